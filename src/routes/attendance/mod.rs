mod handler;
pub mod model;

pub use handler::{list_records, mark_attendance, member_history, service_status};
