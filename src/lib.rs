//! MediaBot - 热点驱动的自媒体自动化流水线
//!
//! 模块划分：
//! - **browser**: 浏览器自动化抽象（Chrome 实现需 feature "browser"）与作用域会话
//! - **config**: 启动参数（TOML + 环境变量）与控制台可编辑的流水线配置
//! - **core**: 错误分类、运行状态与日志环、定时器、编排器、装配、优雅关闭
//! - **llm**: 文案生成（OpenAI 兼容端点）与平台提示词
//! - **publish**: 公众号草稿 API 与小红书自动化两种发布器
//! - **server**: axum HTTP 控制面
//! - **session**: 小红书扫码登录与 Cookies 持久化
//! - **source**: 热榜抓取（微博 / 百度）
//! - **store**: JSON 文档持久化

pub mod browser;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod publish;
pub mod server;
pub mod session;
pub mod source;
pub mod store;

pub use crate::core::{Orchestrator, PipelineBuilder, PipelineError};
