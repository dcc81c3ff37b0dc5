use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::errors::ErrorKind;

use crate::{
    AppState,
    utils::{AdminRole, Claims, error_codes, error_to_api_response, verify_token},
};

/// 管理员认证中间件
///
/// 校验外部认证服务签发的Bearer token并把Claims注入请求扩展，
/// 本服务只做校验，不负责签发。
pub async fn auth_middleware(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(TypedHeader(auth)) = auth else {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response::<()>(error_codes::AUTH_FAILED, "缺少访问令牌".to_string()),
        )
            .into_response();
    };

    match verify_token(auth.token(), &state.config) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            let msg = match e.kind() {
                ErrorKind::ExpiredSignature => "登录已过期，请重新登录",
                _ => "无效的访问令牌",
            };
            (
                StatusCode::UNAUTHORIZED,
                error_to_api_response::<()>(error_codes::AUTH_FAILED, msg.to_string()),
            )
                .into_response()
        }
    }
}

/// 仅限ELDER角色的操作（例如删除地点）
///
/// 必须在auth_middleware之后执行，依赖其注入的Claims。
pub async fn require_elder(req: Request, next: Next) -> Response {
    match req.extensions().get::<Claims>() {
        Some(claims) if claims.role == AdminRole::Elder => next.run(req).await,
        Some(_) => (
            StatusCode::FORBIDDEN,
            error_to_api_response::<()>(
                error_codes::PERMISSION_DENIED,
                "权限不足，此操作仅限长老执行".to_string(),
            ),
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            error_to_api_response::<()>(error_codes::AUTH_FAILED, "需要先通过认证".to_string()),
        )
            .into_response(),
    }
}
