//! 优雅关闭
//!
//! Ctrl+C / SIGTERM 触发关闭；HTTP 服务停止接收新请求后由 main 关闭定时任务。
//! 进行中的运行不会被取消。

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

/// 触发关闭的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "Ctrl+C"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// 进程级关闭信号：第一次触发的原因被保留
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn reason_slot(&self) -> MutexGuard<'_, Option<ShutdownReason>> {
        self.reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn trigger(&self, reason: ShutdownReason) {
        self.reason_slot().get_or_insert(reason);
        self.token.cancel();
    }

    /// 等到触发为止，返回最先到达的原因
    pub async fn wait(&self) -> ShutdownReason {
        self.token.cancelled().await;
        self.reason_slot().unwrap_or(ShutdownReason::Interrupt)
    }

    /// 监听 Ctrl+C 与（unix 下）SIGTERM
    pub fn install(&self) {
        let on_ctrl_c = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_ctrl_c.trigger(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    let on_term = self.clone();
                    tokio::spawn(async move {
                        if sigterm.recv().await.is_some() {
                            on_term.trigger(ShutdownReason::Terminate);
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "SIGTERM handler not installed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_reason_wins_and_wakes_waiters() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let s = signal.clone();
            tokio::spawn(async move { s.wait().await })
        };

        signal.trigger(ShutdownReason::Terminate);
        signal.trigger(ShutdownReason::Interrupt);

        assert_eq!(waiter.await.unwrap(), ShutdownReason::Terminate);
        assert_eq!(signal.wait().await, ShutdownReason::Terminate);
        assert_eq!(ShutdownReason::Terminate.to_string(), "SIGTERM");
    }
}
