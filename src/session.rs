//! 小红书会话管理：扫码登录获取 Cookies，并持久化为自动化发布的唯一凭据
//!
//! 状态机：`Idle → AwaitingHuman → {Captured | TimedOut | Failed}`。
//! 扫码窗口到期后无条件读取浏览器中的 Cookies 并落盘，再关闭浏览器；
//! 是否含有会话 Cookie 只决定记为 Captured 还是 TimedOut，不影响是否保存。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::browser::{BrowserLauncher, BrowserLease, SessionCookie};
use crate::config::BrowserSection;
use crate::core::PipelineError;
use crate::publish::Platform;
use crate::store::JsonFile;

/// 持久化的 Cookie 集合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSet {
    pub platform: Platform,
    pub captured_at: DateTime<Utc>,
    pub cookies: Vec<SessionCookie>,
}

/// 扫码登录流程的当前状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AcquisitionState {
    Idle,
    /// 浏览器已打开，等待人工扫码
    AwaitingHuman {
        since: DateTime<Utc>,
        deadline: DateTime<Utc>,
    },
    /// 已保存且包含会话 Cookie
    Captured { cookies: usize, at: DateTime<Utc> },
    /// 已保存，但窗口到期时未见会话 Cookie（未确认登录成功）
    TimedOut { cookies: usize, at: DateTime<Utc> },
    Failed { reason: String },
}

/// 后台扫码流程的句柄
pub struct AcquisitionHandle {
    join: JoinHandle<AcquisitionState>,
}

impl AcquisitionHandle {
    /// 等待流程结束，返回最终状态
    pub async fn wait(self) -> AcquisitionState {
        match self.join.await {
            Ok(state) => state,
            Err(e) => AcquisitionState::Failed {
                reason: e.to_string(),
            },
        }
    }
}

pub struct SessionManager {
    store: JsonFile<CredentialSet>,
    launcher: Arc<dyn BrowserLauncher>,
    login_url: String,
    session_cookie: String,
    wait: Duration,
    state: Mutex<AcquisitionState>,
}

impl SessionManager {
    pub fn new(
        store: JsonFile<CredentialSet>,
        launcher: Arc<dyn BrowserLauncher>,
        settings: &BrowserSection,
    ) -> Self {
        Self {
            store,
            launcher,
            login_url: settings.login_url.clone(),
            session_cookie: settings.session_cookie.clone(),
            wait: Duration::from_secs(settings.login_wait_secs),
            state: Mutex::new(AcquisitionState::Idle),
        }
    }

    /// 覆盖扫码等待窗口
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn launcher(&self) -> Arc<dyn BrowserLauncher> {
        Arc::clone(&self.launcher)
    }

    /// 本地是否存在已保存的 Cookies（不校验是否仍被平台接受）
    pub async fn is_authenticated(&self) -> bool {
        self.store.exists().await
    }

    pub async fn load_credentials(&self) -> Result<Option<CredentialSet>, PipelineError> {
        self.store.load().await
    }

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AcquisitionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: AcquisitionState) {
        *self.lock_state() = state;
    }

    /// 打开可见浏览器进入登录页，立即返回；Cookies 在等待窗口结束后于后台保存
    pub fn begin_acquisition(self: &Arc<Self>) -> Result<AcquisitionHandle, PipelineError> {
        {
            let mut state = self.lock_state();
            if matches!(*state, AcquisitionState::AwaitingHuman { .. }) {
                return Err(PipelineError::AcquisitionInProgress);
            }
            let since = Utc::now();
            let deadline = since
                + chrono::Duration::from_std(self.wait).unwrap_or_else(|_| chrono::Duration::zero());
            *state = AcquisitionState::AwaitingHuman { since, deadline };
        }

        let this = Arc::clone(self);
        let join = tokio::spawn(async move {
            let final_state = match this.acquire().await {
                Ok((cookies, verified)) => {
                    let at = Utc::now();
                    if verified {
                        tracing::info!(cookies, "login cookies captured");
                        AcquisitionState::Captured { cookies, at }
                    } else {
                        tracing::warn!(cookies, "login window elapsed without session cookie");
                        AcquisitionState::TimedOut { cookies, at }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "login acquisition failed");
                    AcquisitionState::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            this.set_state(final_state.clone());
            final_state
        });
        Ok(AcquisitionHandle { join })
    }

    /// 返回 (保存的 Cookie 数, 是否含会话 Cookie)
    async fn acquire(&self) -> Result<(usize, bool), PipelineError> {
        let launcher = Arc::clone(&self.launcher);
        let url = self.login_url.clone();
        let lease = tokio::task::spawn_blocking(move || {
            let mut lease = BrowserLease::acquire(launcher.as_ref())?;
            lease.navigate(&url)?;
            Ok::<_, PipelineError>(lease)
        })
        .await
        .map_err(|e| PipelineError::Browser(format!("Task join: {}", e)))??;

        tracing::info!(wait_secs = self.wait.as_secs(), "waiting for scan-to-login");
        tokio::time::sleep(self.wait).await;

        let cookies = tokio::task::spawn_blocking(move || {
            let cookies = lease.cookies();
            drop(lease);
            cookies
        })
        .await
        .map_err(|e| PipelineError::Browser(format!("Task join: {}", e)))??;

        let verified = cookies
            .iter()
            .any(|c| c.name == self.session_cookie && !c.value.is_empty());
        let count = cookies.len();
        self.store
            .save(&CredentialSet {
                platform: Platform::Xiaohongshu,
                captured_at: Utc::now(),
                cookies,
            })
            .await?;
        Ok((count, verified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use tempfile::TempDir;

    fn cookie(name: &str, value: &str) -> SessionCookie {
        SessionCookie {
            name: name.into(),
            value: value.into(),
            domain: ".xiaohongshu.com".into(),
            path: "/".into(),
            expires: Some(1893456000.5),
            http_only: true,
            secure: true,
            same_site: Some("Lax".into()),
        }
    }

    fn manager(dir: &TempDir, browser: &FakeBrowser) -> Arc<SessionManager> {
        let store = JsonFile::new(dir.path().join("xhs_cookies.json"));
        Arc::new(
            SessionManager::new(store, Arc::new(browser.clone()), &BrowserSection::default())
                .with_wait(Duration::from_millis(20)),
        )
    }

    #[tokio::test]
    async fn test_acquisition_captures_and_persists() {
        let dir = TempDir::new().unwrap();
        let browser = FakeBrowser::with_jar(vec![cookie("a1", "x"), cookie("web_session", "s")]);
        let mgr = manager(&dir, &browser);
        assert!(!mgr.is_authenticated().await);

        let handle = mgr.begin_acquisition().unwrap();
        assert!(matches!(
            mgr.acquisition_state(),
            AcquisitionState::AwaitingHuman { .. }
        ));
        let state = handle.wait().await;

        assert!(matches!(state, AcquisitionState::Captured { cookies: 2, .. }));
        assert!(mgr.is_authenticated().await);
        assert_eq!(browser.visited(), vec!["https://www.xiaohongshu.com".to_string()]);
        assert_eq!(browser.closes(), 1);
    }

    #[tokio::test]
    async fn test_missing_session_cookie_still_persists_as_timed_out() {
        let dir = TempDir::new().unwrap();
        let browser = FakeBrowser::with_jar(vec![cookie("a1", "x")]);
        let mgr = manager(&dir, &browser);

        let state = mgr.begin_acquisition().unwrap().wait().await;
        assert!(matches!(state, AcquisitionState::TimedOut { cookies: 1, .. }));
        assert!(mgr.is_authenticated().await);
        assert_eq!(mgr.acquisition_state(), state);
    }

    #[tokio::test]
    async fn test_second_acquisition_is_rejected_while_waiting() {
        let dir = TempDir::new().unwrap();
        let browser = FakeBrowser::default();
        let store = JsonFile::new(dir.path().join("xhs_cookies.json"));
        let mgr = Arc::new(
            SessionManager::new(store, Arc::new(browser.clone()), &BrowserSection::default())
                .with_wait(Duration::from_millis(200)),
        );

        let first = mgr.begin_acquisition().unwrap();
        assert!(matches!(
            mgr.begin_acquisition(),
            Err(PipelineError::AcquisitionInProgress)
        ));
        first.wait().await;
        assert!(mgr.begin_acquisition().is_ok());
    }

    #[tokio::test]
    async fn test_navigation_failure_releases_browser() {
        let dir = TempDir::new().unwrap();
        let browser = FakeBrowser::default().failing_navigation();
        let mgr = manager(&dir, &browser);

        let state = mgr.begin_acquisition().unwrap().wait().await;
        assert!(matches!(state, AcquisitionState::Failed { .. }));
        assert_eq!(browser.closes(), 1);
        assert!(!mgr.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_persisted_credentials_round_trip_byte_identical() {
        let dir = TempDir::new().unwrap();
        let browser = FakeBrowser::with_jar(vec![cookie("web_session", "s"), cookie("a1", "é")]);
        let mgr = manager(&dir, &browser);
        mgr.begin_acquisition().unwrap().wait().await;

        let on_disk = std::fs::read_to_string(dir.path().join("xhs_cookies.json")).unwrap();
        let loaded = mgr.load_credentials().await.unwrap().unwrap();
        assert_eq!(serde_json::to_string_pretty(&loaded).unwrap(), on_disk);
        assert_eq!(loaded.cookies, vec![cookie("web_session", "s"), cookie("a1", "é")]);
    }
}
