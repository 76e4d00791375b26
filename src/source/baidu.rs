//! 百度实时热搜

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{Client, Url};
use scraper::{Html, Selector};

use crate::core::PipelineError;
use crate::source::{fetch_html, http_client, Topic, TopicSource};

const BAIDU_BOARD: &str = "https://top.baidu.com";

pub struct BaiduSource {
    client: Client,
    base_url: String,
}

impl BaiduSource {
    pub fn new(timeout_secs: u64) -> Self {
        Self::with_base_url(BAIDU_BOARD, timeout_secs)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn search_link(title: &str) -> String {
    Url::parse_with_params("https://www.baidu.com/s", &[("wd", title)])
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("https://www.baidu.com/s?wd={}", title))
}

/// 提取 `.c-single-text-ellipsis` 标题，去空去重
pub fn parse_board(html: &str, limit: usize) -> Vec<Topic> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(".c-single-text-ellipsis") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for el in document.select(&selector) {
        if items.len() >= limit {
            break;
        }
        let title = el.text().collect::<String>().trim().to_string();
        if title.is_empty() || !seen.insert(title.clone()) {
            continue;
        }
        let link = search_link(&title);
        items.push(Topic::new(title, link));
    }
    items
}

#[async_trait]
impl TopicSource for BaiduSource {
    fn name(&self) -> &str {
        "百度"
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<Topic>, PipelineError> {
        let url = format!("{}/board?tab=realtime", self.base_url);
        tracing::info!(url = %url, limit, "fetching baidu realtime board");
        let html = fetch_html(&self.client, &url, &[]).await?;
        Ok(parse_board(&html, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dedupes_and_skips_empty() {
        let html = r#"
            <div class="c-single-text-ellipsis">  </div>
            <div class="c-single-text-ellipsis">神舟发射</div>
            <div class="c-single-text-ellipsis">神舟发射</div>
            <div class="c-single-text-ellipsis">高考放榜</div>"#;
        let topics = parse_board(html, 10);
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].title, "神舟发射");
        assert!(topics[0].link.starts_with("https://www.baidu.com/s?wd="));
        assert_eq!(topics[1].title, "高考放榜");
    }

    #[test]
    fn test_parse_limit() {
        let html = r#"<p class="c-single-text-ellipsis">a</p><p class="c-single-text-ellipsis">b</p>"#;
        assert_eq!(parse_board(html, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_realtime_tab() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/board"))
            .and(query_param("tab", "realtime"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="c-single-text-ellipsis">神舟发射</div>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let topics = BaiduSource::with_base_url(server.uri(), 5)
            .fetch(3)
            .await
            .unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "神舟发射");
    }
}
