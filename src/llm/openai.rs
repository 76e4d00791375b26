//! OpenAI 兼容文案生成器
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（智谱 GLM、DeepSeek、OpenAI、自建代理等）。

use std::sync::atomic::{AtomicU64, Ordering};

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::ConfigHandle;
use crate::core::PipelineError;
use crate::llm::{prompts, ContentGenerator, TokenUsage};
use crate::publish::Platform;
use crate::source::Topic;

#[derive(Debug, Default)]
struct UsageCounter {
    prompt: AtomicU64,
    completion: AtomicU64,
}

impl UsageCounter {
    fn add(&self, prompt: u64, completion: u64) {
        self.prompt.fetch_add(prompt, Ordering::Relaxed);
        self.completion.fetch_add(completion, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TokenUsage {
        let prompt_tokens = self.prompt.load(Ordering::Relaxed);
        let completion_tokens = self.completion.load(Ordering::Relaxed);
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// 从流水线配置取 endpoint/key/model 的生成器
pub struct OpenAiGenerator {
    config: ConfigHandle,
    usage: UsageCounter,
}

impl OpenAiGenerator {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            usage: UsageCounter::default(),
        }
    }

    fn build_messages(
        topic: &Topic,
        platform: Platform,
    ) -> Result<Vec<ChatCompletionRequestMessage>, PipelineError> {
        let invalid = |e: async_openai::error::OpenAIError| {
            PipelineError::GenerationUnavailable(e.to_string())
        };
        Ok(vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(prompts::system_prompt(platform).to_string())
                    .build()
                    .map_err(invalid)?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompts::user_prompt(topic))
                    .build()
                    .map_err(invalid)?,
            ),
        ])
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(&self, topic: &Topic, platform: Platform) -> Result<String, PipelineError> {
        let cfg = self.config.snapshot().await;
        if cfg.llm_api_key.trim().is_empty() {
            return Err(PipelineError::GenerationUnavailable(
                "未配置 LLM API Key".to_string(),
            ));
        }

        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_base(cfg.llm_base_url.trim_end_matches('/'))
                .with_api_key(cfg.llm_api_key.clone()),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&cfg.llm_model)
            .messages(Self::build_messages(topic, platform)?)
            .build()
            .map_err(|e| PipelineError::GenerationUnavailable(e.to_string()))?;

        tracing::info!(model = %cfg.llm_model, platform = %platform, "requesting completion");
        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| PipelineError::GenerationUnavailable(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::GenerationUnavailable("模型返回内容为空".to_string()))
    }

    fn token_usage(&self) -> Option<TokenUsage> {
        Some(self.usage.snapshot())
    }
}
