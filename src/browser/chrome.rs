//! Chrome/Chromium 实现（feature "browser"）
//!
//! 登录扫码需要人工看到窗口，默认以有头模式启动。

use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::Network::{self, CookieParam};
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::browser::{BrowserLauncher, BrowserPage, SessionCookie};
use crate::core::PipelineError;

fn browser_err(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Browser(format!("{}: {}", context, e))
}

/// CDP `Network.Cookie` 的 JSON 形态 → SessionCookie；CDP 用 -1 表示会话 Cookie
fn session_cookie(raw: serde_json::Value) -> Result<SessionCookie, serde_json::Error> {
    let mut cookie: SessionCookie = serde_json::from_value(raw)?;
    if cookie.expires.is_some_and(|t| t < 0.0) {
        cookie.expires = None;
    }
    Ok(cookie)
}

/// XPath 1.0 字符串字面量没有转义，同时含两种引号时用 concat() 拼接
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{}'", text);
    }
    if !text.contains('"') {
        return format!("\"{}\"", text);
    }
    let parts: Vec<String> = text
        .split('\'')
        .map(|part| format!("'{}'", part))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}

pub struct ChromeLauncher {
    headless: bool,
}

impl ChromeLauncher {
    pub fn new() -> Self {
        Self { headless: false }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserLauncher for ChromeLauncher {
    fn launch(&self) -> Result<Box<dyn BrowserPage>, PipelineError> {
        let options = LaunchOptions::default_builder()
            .headless(self.headless)
            .window_size(Some((1280, 900)))
            .build()
            .map_err(|e| browser_err("Chrome launch options", e))?;
        let browser = Browser::new(options)
            .map_err(|e| browser_err("Chrome launch failed (install Chrome/Chromium)", e))?;
        let tab = browser
            .new_tab()
            .map_err(|e| browser_err("Browser tab failed", e))?;
        tracing::info!(headless = self.headless, "chrome launched");
        Ok(Box::new(ChromePage {
            browser: Some(browser),
            tab,
        }))
    }
}

struct ChromePage {
    /// Drop 时结束 Chrome 进程
    browser: Option<Browser>,
    tab: Arc<Tab>,
}

impl BrowserPage for ChromePage {
    fn navigate(&mut self, url: &str) -> Result<(), PipelineError> {
        tracing::debug!(url, "navigate");
        self.tab
            .navigate_to(url)
            .map_err(|e| browser_err("Navigate failed", e))?
            .wait_until_navigated()
            .map_err(|e| browser_err("Page load failed", e))?;
        Ok(())
    }

    fn cookies(&self) -> Result<Vec<SessionCookie>, PipelineError> {
        // 整个浏览器上下文的 Cookie，不限于当前页面 URL
        let all = self
            .tab
            .call_method(Network::GetAllCookies(None))
            .map_err(|e| browser_err("Get cookies failed", e))?;
        all.cookies
            .into_iter()
            .map(|c| serde_json::to_value(c).and_then(session_cookie))
            .collect::<Result<Vec<_>, serde_json::Error>>()
            .map_err(|e| browser_err("Cookie decode failed", e))
    }

    fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), PipelineError> {
        let params = cookies
            .iter()
            .map(|c| serde_json::to_value(c).and_then(serde_json::from_value::<CookieParam>))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| browser_err("Cookie encode failed", e))?;
        self.tab
            .set_cookies(params)
            .map_err(|e| browser_err("Set cookies failed", e))
    }

    fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<bool, PipelineError> {
        let xpath = format!("//*[contains(text(), {})]", xpath_literal(text));
        match self.tab.wait_for_xpath_with_custom_timeout(&xpath, timeout) {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, marker = text, "marker not found");
                Ok(false)
            }
        }
    }

    fn fill(&mut self, selector: &str, text: &str) -> Result<(), PipelineError> {
        let selector_js = serde_json::to_string(selector).map_err(|e| browser_err("fill", e))?;
        let text_js = serde_json::to_string(text).map_err(|e| browser_err("fill", e))?;
        let js = format!(
            r#"
            (function() {{
                const el = document.querySelector({selector});
                if (!el) return false;
                el.scrollIntoView({{ behavior: 'instant', block: 'center' }});
                el.focus();
                if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') {{
                    const proto = el.tagName === 'INPUT' ? HTMLInputElement.prototype : HTMLTextAreaElement.prototype;
                    Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, {text});
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                }} else {{
                    el.innerText = {text};
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                }}
                return true;
            }})()
            "#,
            selector = selector_js,
            text = text_js,
        );
        let result = self
            .tab
            .evaluate(&js, false)
            .map_err(|e| browser_err("Type failed", e))?;
        match result.value {
            Some(serde_json::Value::Bool(true)) => Ok(()),
            _ => Err(PipelineError::Browser(format!(
                "Element not found: {}",
                selector
            ))),
        }
    }

    fn close(&mut self) {
        if let Some(browser) = self.browser.take() {
            if let Err(e) = self.tab.close(true) {
                tracing::debug!(error = %e, "tab close failed");
            }
            drop(browser);
            tracing::info!("chrome closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cdp_cookie_converts_to_session_cookie() {
        let raw = json!({
            "name": "web_session",
            "value": "040069b1",
            "domain": "creator.xiaohongshu.com",
            "path": "/",
            "expires": -1,
            "size": 19,
            "httpOnly": true,
            "secure": true,
            "session": true,
            "sameSite": "Lax",
            "priority": "Medium",
            "sameParty": false,
            "sourceScheme": "Secure",
            "sourcePort": 443
        });

        let cookie = session_cookie(raw).unwrap();
        assert_eq!(cookie.name, "web_session");
        assert_eq!(cookie.domain, "creator.xiaohongshu.com");
        assert_eq!(cookie.expires, None);
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site.as_deref(), Some("Lax"));

        let persistent = session_cookie(json!({
            "name": "a1",
            "value": "x",
            "domain": ".xiaohongshu.com",
            "path": "/",
            "expires": 1_900_000_000.5,
            "httpOnly": false,
            "secure": false
        }))
        .unwrap();
        assert_eq!(persistent.expires, Some(1_900_000_000.5));
    }

    #[test]
    fn test_xpath_literal_handles_quotes() {
        assert_eq!(xpath_literal("发布笔记"), "'发布笔记'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal(r#"say "it's" now"#),
            r#"concat('say "it', "'", 's" now')"#
        );
    }
}
