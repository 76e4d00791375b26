//! 配置
//!
//! 两层：
//! - **Settings**：启动参数，从 config/default.toml 与环境变量 `MEDIABOT__*` 加载（双下划线表示嵌套，如 `MEDIABOT__SERVER__PORT=8080`），进程内只读。
//! - **PipelineConfig**：控制台可编辑的流水线配置，持久化为 data/config.json；更新按字段覆盖合并，未知字段直接忽略。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::PipelineError;
use crate::publish::Platform;
use crate::store::JsonFile;

/// 启动参数根
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub source: SourceSection,
    pub wechat: WechatSection,
    pub browser: BrowserSection,
}

/// [server] 段：监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// [storage] 段：配置与 Cookies 的存放目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageSection {
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn cookies_path(&self) -> PathBuf {
        self.data_dir.join("xhs_cookies.json")
    }
}

/// 热点来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Weibo,
    Baidu,
}

/// [source] 段：热榜来源与抓取超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub kind: SourceKind,
    pub timeout_secs: u64,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            kind: SourceKind::Weibo,
            timeout_secs: 10,
        }
    }
}

/// [wechat] 段：公众号 API 地址与 access_token 提前刷新的余量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WechatSection {
    pub api_base: String,
    pub token_margin_secs: u64,
}

impl Default for WechatSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.weixin.qq.com".to_string(),
            token_margin_secs: 300,
        }
    }
}

/// [browser] 段：小红书扫码登录与笔记填写
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub login_url: String,
    pub publish_url: String,
    /// 扫码等待窗口（秒），到期后无条件保存 Cookies
    pub login_wait_secs: u64,
    /// 等待登录态标记出现的超时（秒）
    pub marker_timeout_secs: u64,
    /// 已登录创作页上一定会出现的文字
    pub marker_text: String,
    pub title_selector: String,
    pub body_selector: String,
    /// 用来判断扫码是否真正成功的会话 Cookie 名
    pub session_cookie: String,
    /// 标题最大字符数
    pub title_max_chars: usize,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            login_url: "https://www.xiaohongshu.com".to_string(),
            publish_url: "https://creator.xiaohongshu.com/publish/publish".to_string(),
            login_wait_secs: 60,
            marker_timeout_secs: 10,
            marker_text: "发布笔记".to_string(),
            title_selector: "input[placeholder*='填写标题']".to_string(),
            body_selector: "#post-textarea, .ql-editor, div[contenteditable='true']".to_string(),
            session_cookie: "web_session".to_string(),
            title_max_chars: 20,
        }
    }
}

/// 加载启动参数，环境变量 MEDIABOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MEDIABOT__*
pub fn load_settings(config_path: Option<PathBuf>) -> Result<Settings, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MEDIABOT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 控制台可编辑的流水线配置（data/config.json）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub wechat_app_id: String,
    pub wechat_secret: String,
    /// 草稿封面图 media_id；公众号正式草稿需要，未配置时照常提交
    pub wechat_thumb_media_id: Option<String>,
    pub topic_limit: usize,
    pub schedule_cron: String,
    pub auto_run: bool,
    /// 每轮依次发布的平台
    pub platforms: Vec<Platform>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4".to_string(),
            wechat_app_id: String::new(),
            wechat_secret: String::new(),
            wechat_thumb_media_id: None,
            topic_limit: 3,
            schedule_cron: "0 */4 * * *".to_string(),
            auto_run: false,
            platforms: vec![Platform::Wechat, Platform::Xiaohongshu],
        }
    }
}

/// 配置更新请求：只覆盖出现的字段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub wechat_app_id: Option<String>,
    pub wechat_secret: Option<String>,
    /// 空字符串表示清除
    pub wechat_thumb_media_id: Option<String>,
    pub topic_limit: Option<usize>,
    pub schedule_cron: Option<String>,
    pub auto_run: Option<bool>,
    pub platforms: Option<Vec<Platform>>,
}

impl PipelineConfig {
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(v) = patch.llm_api_key {
            self.llm_api_key = v;
        }
        if let Some(v) = patch.llm_base_url {
            self.llm_base_url = v;
        }
        if let Some(v) = patch.llm_model {
            self.llm_model = v;
        }
        if let Some(v) = patch.wechat_app_id {
            self.wechat_app_id = v;
        }
        if let Some(v) = patch.wechat_secret {
            self.wechat_secret = v;
        }
        if let Some(v) = patch.wechat_thumb_media_id {
            self.wechat_thumb_media_id = if v.trim().is_empty() { None } else { Some(v) };
        }
        if let Some(v) = patch.topic_limit {
            self.topic_limit = v.max(1);
        }
        if let Some(v) = patch.schedule_cron {
            self.schedule_cron = v;
        }
        if let Some(v) = patch.auto_run {
            self.auto_run = v;
        }
        if let Some(v) = patch.platforms {
            self.platforms = v;
        }
    }
}

/// 共享的流水线配置句柄：生成器与发布器在调用时读取最新值
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<PipelineConfig>>,
    store: Option<JsonFile<PipelineConfig>>,
}

impl ConfigHandle {
    /// 不落盘的句柄（测试与一次性工具用）
    pub fn in_memory(config: PipelineConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(config)),
            store: None,
        }
    }

    /// 从磁盘加载；文件不存在或损坏时使用默认值
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let store = JsonFile::new(path);
        let config = match store.load().await {
            Ok(Some(cfg)) => cfg,
            Ok(None) => PipelineConfig::default(),
            Err(e) => {
                tracing::warn!(path = %store.path().display(), "Config load failed ({}), using defaults", e);
                PipelineConfig::default()
            }
        };
        Self {
            current: Arc::new(RwLock::new(config)),
            store: Some(store),
        }
    }

    pub async fn snapshot(&self) -> PipelineConfig {
        self.current.read().await.clone()
    }

    /// 合并并持久化，返回合并后的配置；写盘失败时内存中的配置保持不变
    pub async fn update(&self, patch: ConfigPatch) -> Result<PipelineConfig, PipelineError> {
        self.update_checked(patch, |_| Ok(())).await
    }

    /// 同 `update`，但合并结果先交给 `check`；校验失败时不落盘也不改内存
    pub async fn update_checked<F>(
        &self,
        patch: ConfigPatch,
        check: F,
    ) -> Result<PipelineConfig, PipelineError>
    where
        F: FnOnce(&PipelineConfig) -> Result<(), PipelineError>,
    {
        let mut guard = self.current.write().await;
        let mut merged = guard.clone();
        merged.apply(patch);
        check(&merged)?;
        if let Some(store) = &self.store {
            store.save(&merged).await?;
        }
        *guard = merged.clone();
        Ok(merged)
    }
}
