//! 文案生成层：ContentGenerator 抽象与 OpenAI 兼容实现
//!
//! 每次调用无状态；API Key / Base URL / 模型在调用时从流水线配置读取，控制台改完立即生效。

pub mod openai;
pub mod prompts;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::PipelineError;
use crate::publish::Platform;
use crate::source::Topic;

pub use openai::OpenAiGenerator;

/// 进程启动以来累计的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// 针对某个平台为话题生成文案
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, topic: &Topic, platform: Platform) -> Result<String, PipelineError>;

    /// 不统计用量的实现返回 None
    fn token_usage(&self) -> Option<TokenUsage> {
        None
    }
}
