use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use attendance_backend::{
    AppState,
    config::Config,
    guard::DeviceFraudGuard,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit, require_elder},
    routes,
};
use axum::{
    Router,
    routing::{get, post, put},
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'attendance_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 执行数据库迁移
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");

    // 设备防刷组件（生产环境使用Redis后端）
    let device_guard = Arc::new(DeviceFraudGuard::redis(Arc::new(redis_client.clone())));

    // 设置应用状态
    let state = AppState {
        pool,
        config: config.clone(),
        device_guard,
    };

    // 设置限流器
    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));

    // 公开路由：签到、礼拜状态、成员历史
    let public_routes = Router::new()
        .route("/attendance/mark", post(routes::attendance::mark_attendance))
        .route("/attendance/status", get(routes::attendance::service_status))
        .route("/attendance/member", get(routes::attendance::member_history));

    // 仅限长老的路由
    let elder_routes = Router::new()
        .route("/locations/delete", post(routes::location::delete_location))
        .layer(axum::middleware::from_fn(require_elder));

    // 管理端路由（外部认证服务签发的token在中间件中校验）
    let protected_routes = Router::new()
        .route("/attendance/records", get(routes::attendance::list_records))
        .route("/locations/list", get(routes::location::list_locations))
        .route("/locations/active", get(routes::location::active_locations))
        .route("/locations/create", post(routes::location::create_location))
        .route("/locations/update", put(routes::location::update_location))
        .route("/locations/activate", put(routes::location::activate_location))
        .merge(elder_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // 创建基础路由
    let router = Router::new().nest(
        &config.api_base_uri.clone(),
        Router::new().merge(public_routes).merge(protected_routes),
    );

    // 添加日志中间件和限流中间件
    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(rate_limiter, rate_limit),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        // 设置开发环境的CORS，允许所有来源
        let cors = CorsLayer::permissive();
        router.layer(cors)
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
