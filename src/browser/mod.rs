//! 浏览器自动化抽象
//!
//! headless_chrome 是同步 API，调用方需放进 `spawn_blocking`。
//! 所有浏览器会话都通过 [`BrowserLease`] 获取：无论成功、超时还是出错，Drop 时一定关闭浏览器进程。

#[cfg(feature = "browser")]
pub mod chrome;
#[cfg(test)]
pub(crate) mod fake;

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::PipelineError;

#[cfg(feature = "browser")]
pub use chrome::ChromeLauncher;

/// 浏览器 Cookie（字段名与 CDP / Playwright 导出格式一致）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix 秒；会话 Cookie 为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

/// 启动一个可见的浏览器窗口
pub trait BrowserLauncher: Send + Sync {
    fn launch(&self) -> Result<Box<dyn BrowserPage>, PipelineError>;
}

/// 单个标签页上的最小操作集
pub trait BrowserPage: Send {
    fn navigate(&mut self, url: &str) -> Result<(), PipelineError>;

    /// 当前浏览器上下文持有的全部 Cookies
    fn cookies(&self) -> Result<Vec<SessionCookie>, PipelineError>;

    fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), PipelineError>;

    /// 等待页面出现指定文字；超时返回 Ok(false)
    fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<bool, PipelineError>;

    /// 向匹配 selector 的第一个输入框 / 可编辑区域写入文本
    fn fill(&mut self, selector: &str, text: &str) -> Result<(), PipelineError>;

    /// 关闭浏览器；需可重复调用
    fn close(&mut self);
}

/// 作用域内的浏览器会话，Drop 时关闭
pub struct BrowserLease {
    page: Box<dyn BrowserPage>,
}

impl BrowserLease {
    pub fn acquire(launcher: &dyn BrowserLauncher) -> Result<Self, PipelineError> {
        let page = launcher.launch()?;
        tracing::debug!("browser session acquired");
        Ok(Self { page })
    }
}

impl Deref for BrowserLease {
    type Target = dyn BrowserPage;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref()
    }
}

impl DerefMut for BrowserLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.page.as_mut()
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        self.page.close();
        tracing::debug!("browser session released");
    }
}

/// 未编译 `browser` feature 时的占位启动器
pub struct UnavailableLauncher;

impl BrowserLauncher for UnavailableLauncher {
    fn launch(&self) -> Result<Box<dyn BrowserPage>, PipelineError> {
        Err(PipelineError::Browser(
            "浏览器支持未启用（需 --features browser）".to_string(),
        ))
    }
}
