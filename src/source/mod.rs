//! 热点来源：抓取热榜并返回按热度排序的话题
//!
//! 实现无状态、可替换；失败时返回 `SourceUnavailable`，由 Orchestrator 记录后按空列表继续。

pub mod baidu;
pub mod weibo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{SourceKind, SourceSection};
use crate::core::PipelineError;

pub use baidu::BaiduSource;
pub use weibo::WeiboSource;

/// 一条热点话题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    pub link: String,
}

impl Topic {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
        }
    }
}

/// 热点来源 trait
#[async_trait]
pub trait TopicSource: Send + Sync {
    /// 来源名（用于日志）
    fn name(&self) -> &str;

    /// 最多返回 `limit` 条，按热度从高到低
    async fn fetch(&self, limit: usize) -> Result<Vec<Topic>, PipelineError>;
}

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 带浏览器 UA 与中文 Accept-Language 的抓取客户端
pub(crate) fn http_client(timeout_secs: u64) -> Client {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
        .unwrap_or_default()
}

/// GET 页面正文；非 2xx 视为来源不可用
pub(crate) async fn fetch_html(
    client: &Client,
    url: &str,
    extra: &[(&str, &str)],
) -> Result<String, PipelineError> {
    let mut req = client.get(url);
    for (k, v) in extra {
        req = req.header(*k, *v);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| PipelineError::SourceUnavailable(format!("request failed: {}", e)))?;
    if !resp.status().is_success() {
        return Err(PipelineError::SourceUnavailable(format!("HTTP {}", resp.status())));
    }
    resp.text()
        .await
        .map_err(|e| PipelineError::SourceUnavailable(format!("read body: {}", e)))
}

/// 按配置构造热点来源
pub fn create_source(cfg: &SourceSection) -> Arc<dyn TopicSource> {
    match cfg.kind {
        SourceKind::Weibo => Arc::new(WeiboSource::new(cfg.timeout_secs)),
        SourceKind::Baidu => Arc::new(BaiduSource::new(cfg.timeout_secs)),
    }
}
