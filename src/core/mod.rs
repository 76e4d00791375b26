//! 核心层：错误分类、运行状态与日志环、定时器、编排器、装配与关闭

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod shutdown;
pub mod state;

pub use builder::PipelineBuilder;
pub use error::PipelineError;
pub use orchestrator::{Orchestrator, SessionStatus, StatusSnapshot, TriggerResult};
pub use scheduler::{CronSchedule, Scheduler};
pub use shutdown::{ShutdownReason, ShutdownSignal};
pub use state::{LogEntry, LogLevel, PipelineState, RunGuard, RunState, LOG_CAPACITY};
