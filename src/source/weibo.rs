//! 微博热搜
//!
//! 解析 s.weibo.com/top/summary 的 `td.td-02 a`；置顶广告（javascript 链接）与站外链接跳过。

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::core::PipelineError;
use crate::source::{fetch_html, http_client, Topic, TopicSource};

const WEIBO_BASE: &str = "https://s.weibo.com";
// 游客 Cookie，缺少时热搜页会跳转到访客验证
const VISITOR_COOKIE: &str = "SUB=_2AkMT_Mrzf8NxqwJRmP0SzGvhZYt1zw_EieKkjJ2ZJRMxHRl-yT9jqkUstRB6PaaZ-xT_r0Y0-v7_s-x_x_x_;";

pub struct WeiboSource {
    client: Client,
    base_url: String,
}

impl WeiboSource {
    pub fn new(timeout_secs: u64) -> Self {
        Self::with_base_url(WEIBO_BASE, timeout_secs)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// 从热搜页 HTML 中提取话题；链接统一指向 s.weibo.com
pub fn parse_hot_search(html: &str, limit: usize) -> Vec<Topic> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("td.td-02 a") else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for a in document.select(&selector) {
        if items.len() >= limit {
            break;
        }
        let href = a.value().attr("href").unwrap_or("");
        if href.contains("javascript") || !href.starts_with('/') {
            continue;
        }
        let title = a.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }
        items.push(Topic::new(title, format!("{}{}", WEIBO_BASE, href)));
    }
    items
}

#[async_trait]
impl TopicSource for WeiboSource {
    fn name(&self) -> &str {
        "微博"
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<Topic>, PipelineError> {
        let url = format!("{}/top/summary", self.base_url);
        tracing::info!(url = %url, limit, "fetching weibo hot search");
        let referer = format!("{}/", self.base_url);
        let html = fetch_html(
            &self.client,
            &url,
            &[("Cookie", VISITOR_COOKIE), ("Referer", referer.as_str())],
        )
        .await?;
        Ok(parse_hot_search(&html, limit))
    }
}
