//! 发布层：统一的 `publish(title, content)` 能力，两种实现
//!
//! - [`WechatPublisher`]：公众号 API，只写草稿箱
//! - [`XhsPublisher`]：小红书创作者中心，浏览器自动化

pub mod wechat;
pub mod xhs;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::PipelineError;

pub use wechat::WechatPublisher;
pub use xhs::XhsPublisher;

/// 目标平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "wechat")]
    Wechat,
    #[serde(rename = "xhs", alias = "xiaohongshu")]
    Xiaohongshu,
}

impl Platform {
    /// 运行日志里使用的中文名
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Wechat => "微信公众号",
            Platform::Xiaohongshu => "小红书",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Wechat => write!(f, "wechat"),
            Platform::Xiaohongshu => write!(f, "xhs"),
        }
    }
}

/// 一次发布的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PublishOutcome {
    /// 平台已接收（公众号草稿 media_id）
    Success { reference: String, title: String },
    /// 只完成了部分 UI 操作，未提交最终发布
    PartialSuccess { completed: String },
}

impl PublishOutcome {
    pub fn describe(&self) -> String {
        match self {
            PublishOutcome::Success { reference, title } => {
                format!("《{}》已保存 (id: {})", title, reference)
            }
            PublishOutcome::PartialSuccess { completed } => format!("部分完成: {}", completed),
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> Platform;

    async fn publish(&self, title: &str, content: &str) -> Result<PublishOutcome, PipelineError>;
}

/// 按字符（非字节）截断
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
