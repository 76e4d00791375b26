//! MediaBot 服务入口
//!
//! 加载启动参数 → 初始化日志 → 装配流水线 → 按配置武装定时任务 → 启动 HTTP 控制面，
//! 收到 Ctrl+C / SIGTERM 后停止接收请求并关闭定时任务。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use mediabot::config::load_settings;
use mediabot::core::{PipelineBuilder, ShutdownSignal};
use mediabot::{observability, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 可选：第一个参数为额外的配置文件
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = load_settings(config_path).context("Failed to load settings")?;

    observability::init();

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let orchestrator = PipelineBuilder::new(settings).build().await;
    orchestrator.start().await;

    let shutdown = ShutdownSignal::new();
    shutdown.install();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("MediaBot listening on http://{}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, server::router(Arc::clone(&orchestrator)))
        .with_graceful_shutdown(async move {
            let reason = signal.wait().await;
            tracing::info!(%reason, "Shutdown requested, draining HTTP connections");
        })
        .await
        .context("HTTP server failed")?;

    let reason = shutdown.wait().await;
    orchestrator.shutdown();
    tracing::info!(%reason, "MediaBot stopped");
    Ok(())
}
