use axum::Json;
use axum::http::StatusCode;

use crate::api::PingResponse;
use crate::build_info::BuildInfo;

/// GET /ping
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        is_ok: true,
        message: "pong".to_string(),
    })
}

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

pub async fn version() -> Json<BuildInfo> {
    Json(BuildInfo::current())
}
