use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AppState,
    error::ApiError,
    routes::location::model::ChurchLocation,
    schedule::{self, ServiceSchedule, ServiceType},
    utils::success_to_api_response,
};

use super::model::{AttendanceRecord, MarkAttendanceRequest, RecordsFilter};

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct MemberHistoryQuery {
    pub email: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub service_type: Option<String>,
    pub member_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatusResponse {
    pub is_service_time: bool,
    pub current_service: Option<ServiceType>,
    pub church_location: Option<ChurchLocation>,
    pub schedule: ServiceSchedule,
}

/// 一键签到（带围栏与设备防刷检查）
#[axum::debug_handler]
pub async fn mark_attendance(
    State(state): State<AppState>,
    Json(req): Json<MarkAttendanceRequest>,
) -> Response {
    match AttendanceRecord::mark(&state, req).await {
        Ok(marked) => (StatusCode::CREATED, success_to_api_response(marked)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 当前礼拜状态与完整时间表
#[axum::debug_handler]
pub async fn service_status(State(state): State<AppState>) -> Response {
    let now = Utc::now().with_timezone(&state.config.service_offset());
    let current = schedule::current_service(now);

    let church_location = match current {
        Some(service) => match ChurchLocation::active_for(&state.pool, service).await {
            Ok(location) => location,
            Err(e) => return ApiError::Database(e).into_response(),
        },
        None => None,
    };

    (
        StatusCode::OK,
        success_to_api_response(ServiceStatusResponse {
            is_service_time: current.is_some(),
            current_service: current,
            church_location,
            schedule: schedule::full_schedule(),
        }),
    )
        .into_response()
}

/// 成员签到历史
#[axum::debug_handler]
pub async fn member_history(
    State(state): State<AppState>,
    Query(query): Query<MemberHistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match AttendanceRecord::member_history(&state.pool, &query.email, limit).await {
        Ok(history) => (StatusCode::OK, success_to_api_response(history)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 管理端签到记录查询
#[axum::debug_handler]
pub async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> Response {
    let service_type = match &query.service_type {
        Some(value) => match ServiceType::parse(value) {
            Some(service) => Some(service),
            None => {
                return ApiError::InvalidInput(format!("未知的礼拜类型: {value}")).into_response();
            }
        },
        None => None,
    };

    let filter = RecordsFilter {
        start_date: query.start_date,
        end_date: query.end_date,
        service_type,
        member_id: query.member_id,
    };

    match AttendanceRecord::list(&state.pool, filter).await {
        Ok(report) => (StatusCode::OK, success_to_api_response(report)).into_response(),
        Err(e) => e.into_response(),
    }
}
