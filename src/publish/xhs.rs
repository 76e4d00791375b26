//! 小红书发布器（浏览器自动化）
//!
//! 恢复已保存的 Cookies 打开创作者中心，确认登录态后填写标题与正文。
//! 笔记必须带图片，流水线不产出配图，因此停在提交前并返回 PartialSuccess。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{BrowserLease, SessionCookie};
use crate::config::BrowserSection;
use crate::core::PipelineError;
use crate::publish::{truncate_chars, Platform, PublishOutcome, Publisher};
use crate::session::SessionManager;

pub struct XhsPublisher {
    session: Arc<SessionManager>,
    settings: BrowserSection,
}

impl XhsPublisher {
    pub fn new(session: Arc<SessionManager>, settings: BrowserSection) -> Self {
        Self { session, settings }
    }
}

/// 浏览器里实际执行的步骤；lease 在函数返回时释放
fn fill_note(
    mut lease: BrowserLease,
    settings: &BrowserSection,
    cookies: &[SessionCookie],
    title: &str,
    content: &str,
) -> Result<PublishOutcome, PipelineError> {
    lease.set_cookies(cookies)?;
    lease.navigate(&settings.publish_url)?;

    let timeout = Duration::from_secs(settings.marker_timeout_secs);
    if !lease.wait_for_text(&settings.marker_text, timeout)? {
        return Err(PipelineError::SessionExpired);
    }

    let title = truncate_chars(title, settings.title_max_chars);
    lease.fill(&settings.title_selector, &title)?;
    tracing::info!(title = %title, "xhs title filled");

    let completed = match lease.fill(&settings.body_selector, content) {
        Ok(()) => "已填写标题与正文；缺少配图，未提交发布",
        Err(e) => {
            tracing::warn!(error = %e, "xhs body field not filled");
            "已填写标题；正文输入框未找到，缺少配图，未提交发布"
        }
    };
    Ok(PublishOutcome::PartialSuccess {
        completed: completed.to_string(),
    })
}

#[async_trait]
impl Publisher for XhsPublisher {
    fn platform(&self) -> Platform {
        Platform::Xiaohongshu
    }

    async fn publish(&self, title: &str, content: &str) -> Result<PublishOutcome, PipelineError> {
        if !self.session.is_authenticated().await {
            return Err(PipelineError::NotAuthenticated);
        }
        let credentials = self
            .session
            .load_credentials()
            .await?
            .ok_or(PipelineError::NotAuthenticated)?;

        let launcher = self.session.launcher();
        let settings = self.settings.clone();
        let title = title.to_string();
        let content = content.to_string();
        tracing::info!("launching browser for xhs publish");

        tokio::task::spawn_blocking(move || {
            let lease = BrowserLease::acquire(launcher.as_ref())?;
            fill_note(lease, &settings, &credentials.cookies, &title, &content)
        })
        .await
        .map_err(|e| PipelineError::Browser(format!("Task join: {}", e)))?
    }
}
