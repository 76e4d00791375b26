//! HTTP 控制面（JSON）
//!
//! 所有写操作立即返回；运行与扫码登录都在后台完成，进度通过 `/api/status` 的日志查看。
//! 错误只返回 `{ success: false, message }`，不暴露内部细节。

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::config::ConfigPatch;
use crate::core::{Orchestrator, PipelineError, StatusSnapshot};
use crate::publish::Platform;
use crate::source::Topic;

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            accepted: None,
        }
    }

    fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            accepted: None,
        }
    }
}

type ApiResult = Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)>;

fn reject(status: StatusCode, e: &PipelineError) -> (StatusCode, Json<ApiResponse>) {
    tracing::warn!(error = %e, "request rejected");
    (status, Json(ApiResponse::failure(e.to_string())))
}

#[derive(Debug, Deserialize)]
pub struct GenerateDraftRequest {
    pub topic: String,
    #[serde(default)]
    pub link: Option<String>,
    pub platform: Platform,
}

#[derive(Debug, Serialize)]
pub struct GenerateDraftResponse {
    pub success: bool,
    pub content: String,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/config", post(api_config))
        .route("/api/run-once", post(api_run_once))
        .route("/api/login", post(api_login))
        .route("/api/generate-draft", post(api_generate_draft))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(orchestrator)
}

/// GET /api/status：配置、运行状态、日志（最新在前）、登录态
async fn api_status(State(o): State<Arc<Orchestrator>>) -> Json<StatusSnapshot> {
    Json(o.status().await)
}

/// POST /api/config：部分字段更新，持久化后按 autoRun 重新武装定时任务
async fn api_config(
    State(o): State<Arc<Orchestrator>>,
    Json(patch): Json<ConfigPatch>,
) -> ApiResult {
    match o.apply_config(patch).await {
        Ok(_) => Ok(Json(ApiResponse::ok())),
        Err(e @ PipelineError::InvalidSchedule(_)) => Err(reject(StatusCode::BAD_REQUEST, &e)),
        Err(e) => Err(reject(StatusCode::INTERNAL_SERVER_ERROR, &e)),
    }
}

/// POST /api/run-once：不等待运行结束
async fn api_run_once(State(o): State<Arc<Orchestrator>>) -> Json<ApiResponse> {
    let result = o.trigger_run();
    let message = if result.accepted {
        "任务已在后台启动"
    } else {
        "任务正在运行中"
    };
    Json(ApiResponse {
        accepted: Some(result.accepted),
        ..ApiResponse::ok().message(message)
    })
}

/// POST /api/login：打开扫码窗口，Cookies 在等待窗口结束后保存
async fn api_login(State(o): State<Arc<Orchestrator>>) -> ApiResult {
    match o.begin_login() {
        Ok(()) => Ok(Json(ApiResponse::ok().message("请在弹出的浏览器中扫码登录"))),
        Err(e @ PipelineError::AcquisitionInProgress) => Err(reject(StatusCode::CONFLICT, &e)),
        Err(e) => Err(reject(StatusCode::SERVICE_UNAVAILABLE, &e)),
    }
}

/// POST /api/generate-draft：只生成文案，不发布
async fn api_generate_draft(
    State(o): State<Arc<Orchestrator>>,
    Json(req): Json<GenerateDraftRequest>,
) -> Result<Json<GenerateDraftResponse>, (StatusCode, Json<ApiResponse>)> {
    let topic = Topic::new(req.topic, req.link.unwrap_or_default());
    match o.generate_draft(&topic, req.platform).await {
        Ok(content) => Ok(Json(GenerateDraftResponse {
            success: true,
            content,
        })),
        Err(e) => Err(reject(StatusCode::BAD_GATEWAY, &e)),
    }
}
