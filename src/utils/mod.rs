use axum::Json;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// 通用的API响应结构
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 错误码，0表示成功，非0表示失败
    pub code: i32,
    /// 错误消息，成功时为"success"
    pub msg: String,
    /// 响应数据，错误时通常为None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_data: Option<T>,
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 0,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub fn error_to_api_response<T>(code: i32, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: None,
    })
}

/// 错误响应也可以携带数据，例如礼拜时间表、距离信息
pub fn error_with_data_to_api_response<T: Serialize>(
    code: i32,
    msg: String,
    data: T,
) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: Some(data),
    })
}

/// 管理员角色，与认证服务签发的token中的role字段一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminRole {
    Clerk,
    Elder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,    // 管理员ID
    pub role: AdminRole, // 管理员角色
    pub exp: i64,       // 过期时间
    pub iat: i64,       // 签发时间
}

/// 校验外部认证服务签发的token；本服务不负责签发
pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

// 计算球面距离的函数（基于经纬度）
pub fn calculate_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // 使用Haversine公式计算距离
    let r = 6371000.0; // 地球半径（米）
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    r * c // 返回距离（米）
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const AUTH_FAILED: i32 = 1002;
    pub const PERMISSION_DENIED: i32 = 1003;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const OUTSIDE_SERVICE_WINDOW: i32 = 2000;
    pub const DEVICE_ALREADY_USED: i32 = 2001;
    pub const MEMBER_NOT_FOUND: i32 = 2002;
    pub const NO_ACTIVE_LOCATION: i32 = 2003;
    pub const OUT_OF_RANGE: i32 = 2004;
    pub const ALREADY_MARKED: i32 = 2005;
    pub const DUPLICATE_NAME: i32 = 2006;
    pub const LOCATION_IN_USE: i32 = 2007;
    pub const INTERNAL_ERROR: i32 = 5000;
}

#[cfg(test)]
mod tests {
    use super::calculate_distance;

    #[test]
    fn distance_of_identical_points_is_zero() {
        assert_eq!(calculate_distance(-1.2794, 36.8156, -1.2794, 36.8156), 0.0);
        assert_eq!(calculate_distance(0.0, 0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let d1 = calculate_distance(-1.2794, 36.8156, -1.3032, 36.7073);
        let d2 = calculate_distance(-1.3032, 36.7073, -1.2794, 36.8156);
        assert!((d1 - d2).abs() < 1e-6);
    }

    #[test]
    fn one_degree_along_equator_is_about_111km() {
        // 1度经度在赤道上约等于 R * pi / 180 = 111194.93 米
        let d = calculate_distance(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111_194.93).abs() < 1.0, "got {d}");

        let d = calculate_distance(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.93).abs() < 1.0, "got {d}");
    }

    #[test]
    fn hundred_meter_offsets_resolve_accurately() {
        // 纬度偏移0.0009度约等于100米，围栏半径判断依赖这个精度
        let d = calculate_distance(-1.2794, 36.8156, -1.2785, 36.8156);
        assert!((99.5..100.5).contains(&d), "got {d}");
    }

    #[test]
    fn antipodal_points_are_half_the_circumference() {
        let d = calculate_distance(0.0, 0.0, 0.0, 180.0);
        assert!((d - std::f64::consts::PI * 6_371_000.0).abs() < 1.0, "got {d}");
    }
}
