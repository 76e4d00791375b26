//! 流水线构建器：按启动配置装配热点源、生成器、发布器与会话管理

use std::sync::Arc;

use crate::browser::BrowserLauncher;
use crate::config::{ConfigHandle, Settings};
use crate::core::Orchestrator;
use crate::llm::{ContentGenerator, OpenAiGenerator};
use crate::publish::{WechatPublisher, XhsPublisher};
use crate::session::SessionManager;
use crate::source::{create_source, TopicSource};
use crate::store::JsonFile;

/// 未显式替换的组件按 `Settings` 创建默认实现
pub struct PipelineBuilder {
    settings: Settings,
    source: Option<Arc<dyn TopicSource>>,
    generator: Option<Arc<dyn ContentGenerator>>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
}

impl PipelineBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            source: None,
            generator: None,
            launcher: None,
        }
    }

    /// 替换热点源
    pub fn with_source(mut self, source: Arc<dyn TopicSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// 替换文案生成器
    pub fn with_generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// 替换浏览器启动器
    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    fn default_launcher() -> Arc<dyn BrowserLauncher> {
        #[cfg(feature = "browser")]
        {
            Arc::new(crate::browser::ChromeLauncher::new())
        }
        #[cfg(not(feature = "browser"))]
        {
            tracing::warn!("built without `browser` feature, xhs publishing disabled");
            Arc::new(crate::browser::UnavailableLauncher)
        }
    }

    /// 加载持久化的流水线配置并装配编排器
    pub async fn build(self) -> Arc<Orchestrator> {
        let storage = &self.settings.storage;
        let config = ConfigHandle::open(storage.config_path()).await;

        let source = self
            .source
            .unwrap_or_else(|| create_source(&self.settings.source));
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(OpenAiGenerator::new(config.clone())));
        let launcher = self.launcher.unwrap_or_else(Self::default_launcher);

        let session = Arc::new(SessionManager::new(
            JsonFile::new(storage.cookies_path()),
            launcher,
            &self.settings.browser,
        ));
        tracing::info!(
            source = source.name(),
            data_dir = %storage.data_dir.display(),
            "pipeline assembled"
        );

        let orchestrator = Orchestrator::new(config.clone(), source, generator)
            .with_publisher(Arc::new(WechatPublisher::new(
                config,
                &self.settings.wechat,
            )))
            .with_publisher(Arc::new(XhsPublisher::new(
                Arc::clone(&session),
                self.settings.browser.clone(),
            )))
            .with_session(session);
        Arc::new(orchestrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::config::StorageSection;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_uses_data_dir_and_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            storage: StorageSection {
                data_dir: dir.path().to_path_buf(),
            },
            ..Default::default()
        };
        let o = PipelineBuilder::new(settings)
            .with_launcher(Arc::new(FakeBrowser::default()))
            .build()
            .await;

        let status = o.status().await;
        assert_eq!(status.config.llm_model, "gpt-4");
        assert!(!status.session.authenticated);
        assert!(!status.state.is_running);
    }
}
