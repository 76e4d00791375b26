//! 定时触发：Cron 表达式 + 可取消的后台循环
//!
//! 同一时刻最多一个已武装的定时器；重新武装前一定先取消旧的。
//! 取消只影响之后的触发，不会打断已经开始的运行。

use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Local};
use croner::Cron;
use tokio_util::sync::CancellationToken;

use crate::core::PipelineError;

/// 解析后的 Cron 表达式（标准 5 段，可选秒字段）
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    cron: Cron,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, PipelineError> {
        let expression = expression.trim();
        let cron = Cron::new(expression)
            .with_seconds_optional()
            .parse()
            .map_err(|e| PipelineError::InvalidSchedule(format!("{} ({})", expression, e)))?;
        Ok(Self {
            expression: expression.to_string(),
            cron,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 严格晚于 `after` 的下一次触发时间
    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.cron.find_next_occurrence(after, false).ok()
    }
}

struct Armed {
    expression: String,
    token: CancellationToken,
}

/// 单槽定时器
#[derive(Default)]
pub struct Scheduler {
    armed: Mutex<Option<Armed>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Armed>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 取消旧定时器并按 `schedule` 武装新的。
    /// 每次算出下一次触发时间都会回调 `on_next`；到点执行 `job`。
    pub fn arm<J, Fut, N>(&self, schedule: CronSchedule, on_next: N, job: J)
    where
        J: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        N: Fn(Option<DateTime<Local>>) + Send + Sync + 'static,
    {
        let mut slot = self.slot();
        if let Some(old) = slot.take() {
            old.token.cancel();
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let expression = schedule.expression().to_string();
        tokio::spawn(async move {
            let mut last_fired: Option<DateTime<Local>> = None;
            loop {
                let now = Local::now();
                let from = match last_fired {
                    Some(last) if last > now => last,
                    _ => now,
                };
                if child.is_cancelled() {
                    break;
                }
                let Some(next) = schedule.next_after(&from) else {
                    tracing::warn!(cron = %schedule.expression(), "no upcoming occurrence");
                    on_next(None);
                    break;
                };
                on_next(Some(next));

                let wait = (next - Local::now()).to_std().unwrap_or_default();
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                if child.is_cancelled() {
                    break;
                }
                last_fired = Some(next);
                tracing::debug!(cron = %schedule.expression(), "schedule fired");
                job().await;
            }
            tracing::debug!(cron = %schedule.expression(), "schedule loop stopped");
        });

        tracing::info!(cron = %expression, "schedule armed");
        *slot = Some(Armed { expression, token });
    }

    /// 取消当前定时器；返回之前是否处于武装状态
    pub fn disarm(&self) -> bool {
        match self.slot().take() {
            Some(old) => {
                old.token.cancel();
                tracing::info!(cron = %old.expression, "schedule disarmed");
                true
            }
            None => false,
        }
    }

    pub fn armed_expression(&self) -> Option<String> {
        self.slot().as_ref().map(|a| a.expression.clone())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(old) = self.slot().take() {
            old.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl Fn() -> futures_util::future::Ready<()> {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures_util::future::ready(())
        }
    }

    #[test]
    fn test_parse_standard_and_seconds_forms() {
        assert!(CronSchedule::parse("0 */4 * * *").is_ok());
        assert!(CronSchedule::parse("*/10 * * * * *").is_ok());
        assert!(matches!(
            CronSchedule::parse("every four hours"),
            Err(PipelineError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_next_after_is_strictly_later() {
        let s = CronSchedule::parse("0 */4 * * *").unwrap();
        let now = Local::now();
        let next = s.next_after(&now).unwrap();
        assert!(next > now);
        assert!(next - now <= chrono::Duration::hours(4));
    }

    #[tokio::test]
    async fn test_armed_schedule_fires() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let nexts = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&nexts);

        scheduler.arm(
            CronSchedule::parse("* * * * * *").unwrap(),
            move |_| {
                n.fetch_add(1, Ordering::SeqCst);
            },
            counting_job(&counter),
        );
        assert_eq!(scheduler.armed_expression().as_deref(), Some("* * * * * *"));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(counter.load(Ordering::SeqCst) >= 1);
        assert!(nexts.load(Ordering::SeqCst) >= 2);
        assert!(scheduler.disarm());
    }

    #[tokio::test]
    async fn test_disarm_stops_future_firings() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.arm(
            CronSchedule::parse("* * * * * *").unwrap(),
            |_| {},
            counting_job(&counter),
        );
        assert!(scheduler.disarm());
        assert!(scheduler.armed_expression().is_none());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!scheduler.disarm());
    }

    #[tokio::test]
    async fn test_disarm_at_fire_time_skips_job() {
        let scheduler = Arc::new(Scheduler::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&scheduler);

        // 回调里拖到触发时刻之后再取消，睡眠与取消同时就绪
        scheduler.arm(
            CronSchedule::parse("* * * * * *").unwrap(),
            move |next| {
                if let Some(next) = next {
                    let late = (next - Local::now()).to_std().unwrap_or_default();
                    std::thread::sleep(late + Duration::from_millis(20));
                    handle.disarm();
                }
            },
            counting_job(&counter),
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(scheduler.armed_expression().is_none());
    }

    #[tokio::test]
    async fn test_rearm_replaces_previous() {
        let scheduler = Scheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler.arm(
            CronSchedule::parse("* * * * * *").unwrap(),
            |_| {},
            counting_job(&first),
        );
        scheduler.arm(
            CronSchedule::parse("* * * * * *").unwrap(),
            |_| {},
            counting_job(&second),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert!(second.load(Ordering::SeqCst) >= 1);
    }
}
