//! 补全服务层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Anthropic / Mock）

pub mod anthropic;
pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use anthropic::AnthropicClient;
pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use message::{CompletionRequest, Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient, ScriptedReply};
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmError};

/// 根据配置与环境变量选择后端（DeepSeek / OpenAI 兼容 / Anthropic / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has = |key: &str| std::env::var(key).is_ok();

    if provider == "anthropic" && has("ANTHROPIC_API_KEY") {
        let model = cfg
            .llm
            .anthropic
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using Anthropic completion service ({})", model);
        Arc::new(AnthropicClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            None,
            cfg.llm.timeouts.request,
        ))
    } else if has("DEEPSEEK_API_KEY") || (provider == "deepseek" && has("OPENAI_API_KEY")) {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek completion service ({})", model);
        Arc::new(create_deepseek_client(Some(&model)))
    } else if has("OPENAI_API_KEY") {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI completion service ({})", model);
        Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, None))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock completion service");
        Arc::new(MockLlmClient)
    }
}
