//! 微信公众号发布器（草稿箱）
//!
//! 流程：AppID + Secret 换 access_token（缓存至过期前 margin 秒）→ `draft/add` 写入草稿。
//! 只写草稿，群发需要人工在公众号后台确认。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::config::{ConfigHandle, WechatSection};
use crate::core::PipelineError;
use crate::publish::{truncate_chars, Platform, PublishOutcome, Publisher};

/// 响应未给出 expires_in（或给出的值无法表示）时使用的有效期
const DEFAULT_TOKEN_TTL_SECS: u64 = 7200;

const TITLE_MAX_CHARS: usize = 64;
const DIGEST_MAX_CHARS: usize = 54;

/// 公众号常见错误码
fn describe_errcode(code: i64) -> Option<&'static str> {
    Some(match code {
        40001 => "AppSecret 错误或 access_token 无效",
        40002 => "不合法的凭证类型",
        40013 => "不合法的 AppID",
        40014 => "不合法的 access_token",
        42001 => "access_token 超时",
        42002 => "refresh_token 超时",
        45009 => "接口调用超过限制",
        46003 => "标题长度超过限制",
        46004 => "文章内容长度超过限制",
        61070 => "草稿箱已满",
        _ => return None,
    })
}

/// 这些错误码意味着缓存的 token 已不可用
fn is_token_invalid(code: i64) -> bool {
    matches!(code, 40001 | 40014 | 42001)
}

fn upstream_message(code: i64, errmsg: Option<&str>) -> String {
    let text = describe_errcode(code)
        .map(str::to_string)
        .or_else(|| errmsg.map(str::to_string))
        .unwrap_or_else(|| "未知错误".to_string());
    format!("[{}] {}", code, text)
}

/// 去掉 HTML 标签后截取摘要
fn make_digest(content: &str) -> String {
    let mut text = String::with_capacity(content.len());
    let mut in_tag = false;
    for c in content.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, DIGEST_MAX_CHARS)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    #[serde(default)]
    errcode: i64,
    errmsg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DraftResponse {
    media_id: Option<String>,
    #[serde(default)]
    errcode: i64,
    errmsg: Option<String>,
}

struct CachedToken {
    app_id: String,
    secret: String,
    token: String,
    expires_at: Instant,
}

pub struct WechatPublisher {
    client: reqwest::Client,
    api_base: String,
    token_margin: Duration,
    config: ConfigHandle,
    token: Mutex<Option<CachedToken>>,
}

impl WechatPublisher {
    pub fn new(config: ConfigHandle, section: &WechatSection) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: section.api_base.trim_end_matches('/').to_string(),
            token_margin: Duration::from_secs(section.token_margin_secs),
            config,
            token: Mutex::new(None),
        }
    }

    /// 返回缓存中仍有效的 token，否则重新获取；AppID/Secret 变更后缓存失效
    async fn access_token(&self, app_id: &str, secret: &str) -> Result<String, PipelineError> {
        let mut cached = self.token.lock().await;
        if let Some(c) = cached.as_ref() {
            if c.app_id == app_id && c.secret == secret && Instant::now() < c.expires_at {
                return Ok(c.token.clone());
            }
        }

        tracing::debug!(app_id, "refreshing wechat access_token");
        let url = format!("{}/cgi-bin/token", self.api_base);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", app_id),
                ("secret", secret),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::UpstreamAuthError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PipelineError::UpstreamAuthError(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::UpstreamAuthError(e.to_string()))?;
        if body.errcode != 0 {
            return Err(PipelineError::UpstreamAuthError(upstream_message(
                body.errcode,
                body.errmsg.as_deref(),
            )));
        }
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::UpstreamAuthError("响应中缺少 access_token".into()))?;

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS));
        let now = Instant::now();
        let expires_at = now
            .checked_add(lifetime.saturating_sub(self.token_margin))
            .unwrap_or_else(|| now + Duration::from_secs(DEFAULT_TOKEN_TTL_SECS));
        tracing::info!(expires_in = lifetime.as_secs(), "wechat access_token refreshed");
        *cached = Some(CachedToken {
            app_id: app_id.to_string(),
            secret: secret.to_string(),
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl Publisher for WechatPublisher {
    fn platform(&self) -> Platform {
        Platform::Wechat
    }

    async fn publish(&self, title: &str, content: &str) -> Result<PublishOutcome, PipelineError> {
        let cfg = self.config.snapshot().await;
        if cfg.wechat_app_id.trim().is_empty() || cfg.wechat_secret.trim().is_empty() {
            return Err(PipelineError::ConfigIncomplete(
                "微信 AppID/Secret 未配置，跳过发布".to_string(),
            ));
        }

        let token = self
            .access_token(cfg.wechat_app_id.trim(), cfg.wechat_secret.trim())
            .await?;

        let title = truncate_chars(title, TITLE_MAX_CHARS);
        let mut article = json!({
            "title": title,
            "digest": make_digest(content),
            "content": content,
            "need_open_comment": 1,
            "only_fans_can_comment": 0,
        });
        if let Some(thumb) = cfg.wechat_thumb_media_id.as_deref().filter(|t| !t.is_empty()) {
            article["thumb_media_id"] = json!(thumb);
        }

        let url = format!("{}/cgi-bin/draft/add", self.api_base);
        let response = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&json!({ "articles": [article] }))
            .send()
            .await
            .map_err(|e| PipelineError::UpstreamError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PipelineError::UpstreamError(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let body: DraftResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::UpstreamError(e.to_string()))?;
        if body.errcode != 0 {
            if is_token_invalid(body.errcode) {
                self.invalidate_token().await;
            }
            return Err(PipelineError::UpstreamError(upstream_message(
                body.errcode,
                body.errmsg.as_deref(),
            )));
        }
        let media_id = body
            .media_id
            .ok_or_else(|| PipelineError::UpstreamError("响应中缺少 media_id".into()))?;

        tracing::info!(media_id = %media_id, "wechat draft created");
        Ok(PublishOutcome::Success {
            reference: media_id,
            title,
        })
    }
}
