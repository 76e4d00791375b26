//! 流水线状态：单飞运行标记 + 有界运行日志
//!
//! `PipelineState` 由 Orchestrator 持有；外部只能拿到快照。
//! 运行标记与日志共用一把 `std::sync::Mutex`，锁从不跨 `.await` 持有。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 运行日志容量，超出后淘汰最旧的条目
pub const LOG_CAPACITY: usize = 100;

/// 运行日志级别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// 面向控制台的一条运行日志
#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    pub id: u64,
    /// 本地时间 HH:MM:SS
    pub time: String,
    pub level: LogLevel,
    pub message: String,
}

/// 运行状态快照
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub is_running: bool,
    pub last_run_time: Option<DateTime<Local>>,
    pub next_run_time: Option<DateTime<Local>>,
}

struct Inner {
    run: RunState,
    logs: VecDeque<LogEntry>,
    next_log_id: u64,
}

impl Inner {
    fn push_log(&mut self, capacity: usize, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!(level = ?level, "{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.next_log_id += 1;
        self.logs.push_back(LogEntry {
            id: self.next_log_id,
            time: Local::now().format("%H:%M:%S").to_string(),
            level,
            message,
        });
        while self.logs.len() > capacity {
            self.logs.pop_front();
        }
    }
}

/// 进程内唯一的流水线状态
pub struct PipelineState {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                run: RunState::default(),
                logs: VecDeque::with_capacity(capacity),
                next_log_id: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    // 持锁期间不会 panic，中毒只可能来自外部，直接取回数据
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 追加一条运行日志（同时写入 tracing）
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let capacity = self.capacity;
        self.lock().push_log(capacity, level, message.into());
    }

    /// 日志快照，最新的在前
    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock().logs.iter().rev().cloned().collect()
    }

    pub fn run_state(&self) -> RunState {
        self.lock().run.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().run.is_running
    }

    pub fn set_next_run_time(&self, next: Option<DateTime<Local>>) {
        self.lock().run.next_run_time = next;
    }

    /// 原子地检查并占用运行标记；已有运行时返回 None。
    ///
    /// 成功时同时记录 `last_run_time`，返回的守卫在 Drop 时复位标记并写入结束日志，
    /// 无论运行体如何结束（包括 panic 展开）。
    pub fn try_begin_run(self: &Arc<Self>) -> Option<RunGuard> {
        let mut inner = self.lock();
        if inner.run.is_running {
            return None;
        }
        inner.run.is_running = true;
        inner.run.last_run_time = Some(Local::now());
        Some(RunGuard {
            state: Arc::clone(self),
        })
    }
}

/// 一次运行的占用凭证
pub struct RunGuard {
    state: Arc<PipelineState>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let capacity = self.state.capacity;
        let mut inner = self.state.lock();
        inner.run.is_running = false;
        inner.push_log(capacity, LogLevel::Info, "<<< 任务执行完毕".to_string());
    }
}
