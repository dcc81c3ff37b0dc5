use std::sync::Arc;

use config::Config;
use guard::DeviceFraudGuard;
use sqlx::PgPool;

pub mod config;
pub mod error;
pub mod guard;
pub mod middleware;
pub mod schedule;
pub mod utils;

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub device_guard: Arc<DeviceFraudGuard>,
}
