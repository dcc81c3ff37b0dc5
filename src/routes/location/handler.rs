use axum::{
    extract::{Extension, Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{
    AppState,
    error::ApiError,
    utils::{Claims, success_to_api_response},
};

use super::model::{
    ActivateLocationRequest, ChurchLocation, CreateLocationRequest, DeleteLocationRequest,
    UpdateLocationRequest,
};

#[axum::debug_handler]
pub async fn list_locations(State(state): State<AppState>) -> Response {
    match ChurchLocation::list(&state.pool).await {
        Ok(locations) => (StatusCode::OK, success_to_api_response(locations)).into_response(),
        Err(e) => ApiError::Database(e).into_response(),
    }
}

#[axum::debug_handler]
pub async fn active_locations(State(state): State<AppState>) -> Response {
    match ChurchLocation::active_map(&state.pool).await {
        Ok(active) => (StatusCode::OK, success_to_api_response(active)).into_response(),
        Err(e) => ApiError::Database(e).into_response(),
    }
}

#[axum::debug_handler]
pub async fn create_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateLocationRequest>,
) -> Response {
    match ChurchLocation::create(&state.pool, req, &claims.sub).await {
        Ok(location) => (StatusCode::CREATED, success_to_api_response(location)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[axum::debug_handler]
pub async fn update_location(
    State(state): State<AppState>,
    Json(req): Json<UpdateLocationRequest>,
) -> Response {
    match ChurchLocation::update(&state.pool, req).await {
        Ok(location) => (StatusCode::OK, success_to_api_response(location)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[axum::debug_handler]
pub async fn activate_location(
    State(state): State<AppState>,
    Json(req): Json<ActivateLocationRequest>,
) -> Response {
    match ChurchLocation::activate(&state.pool, req).await {
        Ok(location) => (StatusCode::OK, success_to_api_response(location)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[axum::debug_handler]
pub async fn delete_location(
    State(state): State<AppState>,
    Json(req): Json<DeleteLocationRequest>,
) -> Response {
    match ChurchLocation::delete(&state.pool, req.id).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({
                "deleted": true
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
