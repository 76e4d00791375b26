//! 测试用内存浏览器

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::{BrowserLauncher, BrowserPage, SessionCookie};
use crate::core::PipelineError;

#[derive(Default)]
struct Shared {
    launches: AtomicUsize,
    closes: AtomicUsize,
    /// 扫码后浏览器里会出现的 Cookies
    jar: Mutex<Vec<SessionCookie>>,
    restored: Mutex<Vec<SessionCookie>>,
    visited: Mutex<Vec<String>>,
    filled: Mutex<Vec<(String, String)>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeBrowser {
    shared: Arc<Shared>,
    marker_missing: bool,
    fail_navigation: bool,
}

impl FakeBrowser {
    pub fn with_jar(cookies: Vec<SessionCookie>) -> Self {
        let browser = Self::default();
        *browser.shared.jar.lock().unwrap() = cookies;
        browser
    }

    pub fn marker_missing(mut self) -> Self {
        self.marker_missing = true;
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn launches(&self) -> usize {
        self.shared.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> Vec<SessionCookie> {
        self.shared.restored.lock().unwrap().clone()
    }

    pub fn visited(&self) -> Vec<String> {
        self.shared.visited.lock().unwrap().clone()
    }

    pub fn filled(&self) -> Vec<(String, String)> {
        self.shared.filled.lock().unwrap().clone()
    }
}

impl BrowserLauncher for FakeBrowser {
    fn launch(&self) -> Result<Box<dyn BrowserPage>, PipelineError> {
        self.shared.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            browser: self.clone(),
            closed: false,
        }))
    }
}

struct FakePage {
    browser: FakeBrowser,
    closed: bool,
}

impl BrowserPage for FakePage {
    fn navigate(&mut self, url: &str) -> Result<(), PipelineError> {
        if self.browser.fail_navigation {
            return Err(PipelineError::Browser("net::ERR_NAME_NOT_RESOLVED".into()));
        }
        self.browser.shared.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn cookies(&self) -> Result<Vec<SessionCookie>, PipelineError> {
        Ok(self.browser.shared.jar.lock().unwrap().clone())
    }

    fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), PipelineError> {
        self.browser
            .shared
            .restored
            .lock()
            .unwrap()
            .extend_from_slice(cookies);
        Ok(())
    }

    fn wait_for_text(&self, _text: &str, _timeout: Duration) -> Result<bool, PipelineError> {
        Ok(!self.browser.marker_missing)
    }

    fn fill(&mut self, selector: &str, text: &str) -> Result<(), PipelineError> {
        self.browser
            .shared
            .filled
            .lock()
            .unwrap()
            .push((selector.to_string(), text.to_string()));
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.browser.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
