use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::schedule;
use crate::utils::{error_codes, error_to_api_response, error_with_data_to_api_response};

/// 签到与地点管理的错误分类
///
/// 所有失败都只影响当前请求，服务内部不做任何重试，
/// 由调用方修正输入后重新提交。
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing required fields")]
    MissingFields,
    #[error("no service is active at this time")]
    OutsideServiceWindow,
    #[error("device already used for a different member today")]
    DeviceAlreadyUsed,
    #[error("member not found")]
    MemberNotFound,
    #[error("no active location configured for the current service")]
    NoActiveLocation,
    #[error("position is {distance_m:.0}m away, outside the {radius_m}m geofence")]
    OutOfRange {
        location_name: String,
        radius_m: i32,
        distance_m: f64,
    },
    #[error("attendance already marked for this service today")]
    AlreadyMarked {
        recorded_at: DateTime<Utc>,
        location_name: String,
    },
    #[error("a location with this name already exists")]
    DuplicateName,
    #[error("location not found")]
    LocationNotFound,
    #[error("location is still active for at least one service")]
    LocationInUse,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingFields => (
                StatusCode::BAD_REQUEST,
                error_to_api_response::<()>(
                    error_codes::VALIDATION_ERROR,
                    "邮箱、位置和设备信息都是必填项".to_string(),
                ),
            )
                .into_response(),
            ApiError::OutsideServiceWindow => (
                StatusCode::FORBIDDEN,
                error_with_data_to_api_response(
                    error_codes::OUTSIDE_SERVICE_WINDOW,
                    "只能在礼拜时间内签到".to_string(),
                    json!({ "schedule": schedule::full_schedule() }),
                ),
            )
                .into_response(),
            ApiError::DeviceAlreadyUsed => (
                StatusCode::TOO_MANY_REQUESTS,
                error_with_data_to_api_response(
                    error_codes::DEVICE_ALREADY_USED,
                    "该设备今天已为另一位成员签到".to_string(),
                    json!({
                        "hint": "每位成员请使用自己的设备签到，如需帮助请联系教会管理员"
                    }),
                ),
            )
                .into_response(),
            ApiError::MemberNotFound => (
                StatusCode::NOT_FOUND,
                error_to_api_response::<()>(
                    error_codes::MEMBER_NOT_FOUND,
                    "未找到使用该邮箱的成员，请检查邮箱或先完成注册".to_string(),
                ),
            )
                .into_response(),
            ApiError::NoActiveLocation => {
                // 管理员配置缺失，不是客户端输入问题
                tracing::error!("No active location configured for the current service");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_to_api_response::<()>(
                        error_codes::NO_ACTIVE_LOCATION,
                        "本场礼拜尚未设置签到地点，请联系教会管理员".to_string(),
                    ),
                )
                    .into_response()
            }
            ApiError::OutOfRange {
                location_name,
                radius_m,
                distance_m,
            } => (
                StatusCode::FORBIDDEN,
                error_with_data_to_api_response(
                    error_codes::OUT_OF_RANGE,
                    format!("必须在{location_name}的{radius_m}米范围内才能签到"),
                    json!({
                        "location_name": location_name,
                        "radius_m": radius_m,
                        "distance_m": distance_m.round() as i64,
                    }),
                ),
            )
                .into_response(),
            ApiError::AlreadyMarked {
                recorded_at,
                location_name,
            } => (
                StatusCode::BAD_REQUEST,
                error_with_data_to_api_response(
                    error_codes::ALREADY_MARKED,
                    "今天已经为本场礼拜签到过了".to_string(),
                    json!({
                        "recorded_at": recorded_at,
                        "location_name": location_name,
                    }),
                ),
            )
                .into_response(),
            ApiError::DuplicateName => (
                StatusCode::BAD_REQUEST,
                error_to_api_response::<()>(
                    error_codes::DUPLICATE_NAME,
                    "同名地点已存在".to_string(),
                ),
            )
                .into_response(),
            ApiError::LocationNotFound => (
                StatusCode::NOT_FOUND,
                error_to_api_response::<()>(error_codes::NOT_FOUND, "地点不存在".to_string()),
            )
                .into_response(),
            ApiError::LocationInUse => (
                StatusCode::BAD_REQUEST,
                error_to_api_response::<()>(
                    error_codes::LOCATION_IN_USE,
                    "该地点仍被某场礼拜使用，请先停用再删除".to_string(),
                ),
            )
                .into_response(),
            ApiError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                error_to_api_response::<()>(error_codes::VALIDATION_ERROR, msg),
            )
                .into_response(),
            ApiError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_to_api_response::<()>(
                        error_codes::INTERNAL_ERROR,
                        "内部服务器错误".to_string(),
                    ),
                )
                    .into_response()
            }
            ApiError::Cache(e) => {
                tracing::error!("Cache error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_to_api_response::<()>(
                        error_codes::INTERNAL_ERROR,
                        "内部服务器错误".to_string(),
                    ),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_map_to_expected_status_codes() {
        assert_eq!(
            ApiError::MissingFields.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::OutsideServiceWindow.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::DeviceAlreadyUsed.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::MemberNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::NoActiveLocation.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::OutOfRange {
                location_name: "Main Campus".to_string(),
                radius_m: 100,
                distance_m: 150.2,
            }
            .into_response()
            .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::AlreadyMarked {
                recorded_at: Utc::now(),
                location_name: "Main Campus".to_string(),
            }
            .into_response()
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::DuplicateName.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::LocationNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::LocationInUse.into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
