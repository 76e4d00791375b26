//! 流水线编排器：单飞运行、按平台隔离失败、定时触发、扫码登录入口
//!
//! 一次运行：抓热点 → 取第一条 → 依次对每个平台「生成 → 发布」。
//! 任一平台任一阶段的失败只写日志，不影响其余平台；运行标记由 [`RunGuard`] 保证复位。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;

use crate::config::{ConfigHandle, ConfigPatch, PipelineConfig};
use crate::core::scheduler::{CronSchedule, Scheduler};
use crate::core::state::{LogEntry, LogLevel, PipelineState, RunGuard, RunState};
use crate::core::PipelineError;
use crate::llm::{ContentGenerator, TokenUsage};
use crate::publish::{Platform, Publisher};
use crate::session::{AcquisitionState, SessionManager};
use crate::source::{Topic, TopicSource};

/// `trigger_run` 的结果；已有运行时 accepted 为 false
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerResult {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub acquisition: AcquisitionState,
}

/// `/status` 返回的只读快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub config: PipelineConfig,
    pub state: RunState,
    pub logs: Vec<LogEntry>,
    pub session: SessionStatus,
    /// 生成器不统计时为 null
    pub token_usage: Option<TokenUsage>,
}

pub struct Orchestrator {
    state: Arc<PipelineState>,
    config: ConfigHandle,
    source: Arc<dyn TopicSource>,
    generator: Arc<dyn ContentGenerator>,
    publishers: Vec<Arc<dyn Publisher>>,
    session: Option<Arc<SessionManager>>,
    scheduler: Scheduler,
    /// 串行化「合并配置 → 重新武装定时任务」
    config_lock: tokio::sync::Mutex<()>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Orchestrator {
    pub fn new(
        config: ConfigHandle,
        source: Arc<dyn TopicSource>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            state: Arc::new(PipelineState::new()),
            config,
            source,
            generator,
            publishers: Vec::new(),
            session: None,
            scheduler: Scheduler::new(),
            config_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 注册发布器；同一平台后注册的覆盖先注册的
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        let platform = publisher.platform();
        self.publishers.retain(|p| p.platform() != platform);
        self.publishers.push(publisher);
        self
    }

    pub fn with_session(mut self, session: Arc<SessionManager>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    fn publisher_for(&self, platform: Platform) -> Option<&Arc<dyn Publisher>> {
        self.publishers.iter().find(|p| p.platform() == platform)
    }

    /// 启动一次后台运行并立即返回；已有运行时直接忽略
    pub fn trigger_run(self: &Arc<Self>) -> TriggerResult {
        let Some(guard) = self.state.try_begin_run() else {
            tracing::debug!("run already in progress, trigger ignored");
            return TriggerResult { accepted: false };
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute(guard).await;
        });
        TriggerResult { accepted: true }
    }

    /// 与 `trigger_run` 相同的单飞语义，但等待运行结束
    pub async fn run_once(&self) -> TriggerResult {
        match self.state.try_begin_run() {
            Some(guard) => {
                self.execute(guard).await;
                TriggerResult { accepted: true }
            }
            None => TriggerResult { accepted: false },
        }
    }

    async fn execute(&self, guard: RunGuard) {
        self.state.log(LogLevel::Info, ">>> 开始执行自动化任务");
        let cfg = self.config.snapshot().await;

        let topics = match self.source.fetch(cfg.topic_limit).await {
            Ok(topics) => topics,
            Err(e) => {
                self.state.log(e.level(), format!("获取热点失败: {}", e));
                Vec::new()
            }
        };

        match topics.into_iter().next() {
            None => self.state.log(LogLevel::Warning, "没有获取到热点数据"),
            Some(topic) => {
                self.state
                    .log(LogLevel::Info, format!("选中热点: {}", topic.title));
                for &platform in &cfg.platforms {
                    let step = AssertUnwindSafe(self.run_platform(&topic, platform))
                        .catch_unwind()
                        .await;
                    if let Err(payload) = step {
                        self.state.log(
                            LogLevel::Error,
                            format!("{}流程异常中止: {}", platform.label(), panic_message(&*payload)),
                        );
                    }
                }
            }
        }

        drop(guard);
    }

    async fn run_platform(&self, topic: &Topic, platform: Platform) {
        let label = platform.label();
        let Some(publisher) = self.publisher_for(platform) else {
            self.state
                .log(LogLevel::Warning, format!("{}发布器未启用，跳过", label));
            return;
        };

        self.state
            .log(LogLevel::Info, format!("正在生成{}文案...", label));
        let content = match self.generator.generate(topic, platform).await {
            Ok(content) => {
                self.state.log(
                    LogLevel::Success,
                    format!("{}文案生成完成（{} 字）", label, content.chars().count()),
                );
                content
            }
            Err(e) => {
                self.state
                    .log(e.level(), format!("{}文案生成失败: {}", label, e));
                return;
            }
        };

        match publisher.publish(&topic.title, &content).await {
            Ok(outcome) => self.state.log(
                LogLevel::Success,
                format!("{}发布完成: {}", label, outcome.describe()),
            ),
            Err(e) => self
                .state
                .log(e.level(), format!("{}发布失败: {}", label, e)),
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        let session = match &self.session {
            Some(s) => SessionStatus {
                authenticated: s.is_authenticated().await,
                acquisition: s.acquisition_state(),
            },
            None => SessionStatus {
                authenticated: false,
                acquisition: AcquisitionState::Idle,
            },
        };
        StatusSnapshot {
            config: self.config.snapshot().await,
            state: self.state.run_state(),
            logs: self.state.logs(),
            session,
            token_usage: self.generator.token_usage(),
        }
    }

    /// 取消旧定时器；`enabled` 时按新表达式重新武装。进行中的运行不受影响。
    pub fn reconfigure_schedule(
        self: &Arc<Self>,
        expression: &str,
        enabled: bool,
    ) -> Result<(), PipelineError> {
        self.scheduler.disarm();
        self.state.set_next_run_time(None);
        if !enabled {
            self.state.log(LogLevel::Info, "定时任务已关闭");
            return Ok(());
        }

        let schedule = match CronSchedule::parse(expression) {
            Ok(s) => s,
            Err(e) => {
                self.state.log(e.level(), format!("定时任务未启动: {}", e));
                return Err(e);
            }
        };

        let state = Arc::clone(&self.state);
        let weak = Arc::downgrade(self);
        self.scheduler.arm(
            schedule,
            move |next| state.set_next_run_time(next),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.trigger_run();
                    }
                }
            },
        );
        self.state
            .log(LogLevel::Info, format!("定时任务已更新: {}", expression.trim()));
        Ok(())
    }

    /// 合并并持久化配置，然后按 autoRun 重新武装或关闭定时任务
    pub async fn apply_config(
        self: &Arc<Self>,
        patch: ConfigPatch,
    ) -> Result<PipelineConfig, PipelineError> {
        let _serial = self.config_lock.lock().await;
        let cron_changed = patch.schedule_cron.is_some();
        let merged = self
            .config
            .update_checked(patch, |merged| {
                if merged.auto_run || cron_changed {
                    CronSchedule::parse(&merged.schedule_cron)?;
                }
                Ok(())
            })
            .await?;
        self.state.log(LogLevel::Success, "配置已保存");
        self.reconfigure_schedule(&merged.schedule_cron, merged.auto_run)?;
        Ok(merged)
    }

    /// 打开扫码登录窗口并立即返回；结果在等待窗口结束后写入日志
    pub fn begin_login(&self) -> Result<(), PipelineError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| PipelineError::Browser("未启用小红书会话管理".to_string()))?;
        let handle = session.begin_acquisition()?;
        self.state.log(
            LogLevel::Info,
            format!(
                "已打开小红书登录窗口，请在 {} 秒内完成扫码",
                session.wait().as_secs()
            ),
        );

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            match handle.wait().await {
                AcquisitionState::Captured { cookies, .. } => state.log(
                    LogLevel::Success,
                    format!("小红书登录成功，已保存 {} 条 Cookies", cookies),
                ),
                AcquisitionState::TimedOut { cookies, .. } => state.log(
                    LogLevel::Warning,
                    format!("扫码等待结束但未检测到登录态，已保存 {} 条 Cookies（未验证）", cookies),
                ),
                AcquisitionState::Failed { reason } => {
                    state.log(LogLevel::Error, format!("小红书登录失败: {}", reason))
                }
                AcquisitionState::Idle | AcquisitionState::AwaitingHuman { .. } => {}
            }
        });
        Ok(())
    }

    /// 只生成不发布
    pub async fn generate_draft(
        &self,
        topic: &Topic,
        platform: Platform,
    ) -> Result<String, PipelineError> {
        tracing::info!(topic = %topic.title, platform = %platform, "manual draft generation");
        self.generator.generate(topic, platform).await
    }

    /// 启动时按持久化配置武装定时任务
    pub async fn start(self: &Arc<Self>) {
        let cfg = self.config.snapshot().await;
        self.state.log(LogLevel::Info, "MediaBot 服务已启动");
        if cfg.auto_run {
            if let Err(e) = self.reconfigure_schedule(&cfg.schedule_cron, true) {
                tracing::warn!(error = %e, "schedule not armed at startup");
            }
        }
    }

    /// 关闭定时任务；进行中的运行不被取消
    pub fn shutdown(&self) {
        self.scheduler.disarm();
        self.state.set_next_run_time(None);
        tracing::info!("orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoTopics;

    #[async_trait]
    impl TopicSource for NoTopics {
        fn name(&self) -> &str {
            "none"
        }
        async fn fetch(&self, _limit: usize) -> Result<Vec<Topic>, PipelineError> {
            Err(PipelineError::SourceUnavailable("offline".into()))
        }
    }

    struct Echo;

    #[async_trait]
    impl ContentGenerator for Echo {
        async fn generate(&self, topic: &Topic, _p: Platform) -> Result<String, PipelineError> {
            Ok(topic.title.clone())
        }
    }

    fn orchestrator() -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            ConfigHandle::in_memory(PipelineConfig::default()),
            Arc::new(NoTopics),
            Arc::new(Echo),
        ))
    }

    #[tokio::test]
    async fn test_source_failure_logged_and_run_completes() {
        let o = orchestrator();
        assert!(o.run_once().await.accepted);

        let messages: Vec<_> = o.state().logs().into_iter().map(|l| l.message).collect();
        assert_eq!(messages[0], "<<< 任务执行完毕");
        assert_eq!(messages[1], "没有获取到热点数据");
        assert!(messages[2].starts_with("获取热点失败"));
        assert!(!o.state().is_running());
        assert!(o.state().run_state().last_run_time.is_some());
    }

    #[tokio::test]
    async fn test_status_serializes_camel_case() {
        let o = orchestrator();
        let v = serde_json::to_value(o.status().await).unwrap();
        assert_eq!(v["state"]["isRunning"], false);
        assert_eq!(v["config"]["topicLimit"], 3);
        assert_eq!(v["session"]["authenticated"], false);
        assert_eq!(v["session"]["acquisition"]["state"], "idle");
        assert!(v["tokenUsage"].is_null());
    }

    struct Metered;

    #[async_trait]
    impl ContentGenerator for Metered {
        async fn generate(&self, topic: &Topic, _p: Platform) -> Result<String, PipelineError> {
            Ok(topic.title.clone())
        }

        fn token_usage(&self) -> Option<TokenUsage> {
            Some(TokenUsage {
                prompt_tokens: 40,
                completion_tokens: 2,
                total_tokens: 42,
            })
        }
    }

    #[tokio::test]
    async fn test_status_reports_generator_token_usage() {
        let o = Orchestrator::new(
            ConfigHandle::in_memory(PipelineConfig::default()),
            Arc::new(NoTopics),
            Arc::new(Metered),
        );
        let v = serde_json::to_value(o.status().await).unwrap();
        assert_eq!(v["tokenUsage"]["promptTokens"], 40);
        assert_eq!(v["tokenUsage"]["totalTokens"], 42);
    }

    #[tokio::test]
    async fn test_invalid_cron_is_rejected_before_persisting() {
        let o = orchestrator();
        let err = o
            .apply_config(ConfigPatch {
                schedule_cron: Some("not a cron".into()),
                auto_run: Some(true),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSchedule(_)));
        assert!(!o.config().snapshot().await.auto_run);
    }

    #[tokio::test]
    async fn test_auto_run_arms_and_disarms() {
        let o = orchestrator();
        o.apply_config(ConfigPatch {
            auto_run: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(o.state().run_state().next_run_time.is_some());

        o.apply_config(ConfigPatch {
            auto_run: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
        assert!(o.state().run_state().next_run_time.is_none());
        assert!(o.scheduler.armed_expression().is_none());
    }

    #[tokio::test]
    async fn test_enabling_with_bad_stored_cron_saves_nothing() {
        let o = Arc::new(Orchestrator::new(
            ConfigHandle::in_memory(PipelineConfig {
                schedule_cron: "every now and then".into(),
                ..Default::default()
            }),
            Arc::new(NoTopics),
            Arc::new(Echo),
        ));

        let err = o
            .apply_config(ConfigPatch {
                auto_run: Some(true),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidSchedule(_)));
        assert!(!o.config().snapshot().await.auto_run);
        assert!(o.scheduler.armed_expression().is_none());
        assert!(!o
            .state()
            .logs()
            .iter()
            .any(|l| l.message == "配置已保存"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_auto_run_updates_keep_schedule_in_sync() {
        let o = orchestrator();
        for round in 0..50 {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let o = Arc::clone(&o);
                    tokio::spawn(async move {
                        o.apply_config(ConfigPatch {
                            auto_run: Some((i + round) % 2 == 0),
                            ..Default::default()
                        })
                        .await
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
            let auto_run = o.config().snapshot().await.auto_run;
            assert_eq!(auto_run, o.scheduler.armed_expression().is_some());
        }
        o.shutdown();
    }

    #[tokio::test]
    async fn test_login_without_session_manager_errors() {
        assert!(matches!(
            orchestrator().begin_login(),
            Err(PipelineError::Browser(_))
        ));
    }
}
