//! 补全服务抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Anthropic / Mock）实现 LlmClient::complete。
//! 错误按限流、配额、服务端、通用网络分类，核心层只负责区分并上报，从不自动重试。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::llm::CompletionRequest;

/// 补全服务错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Rate limited by completion service: {0}")]
    RateLimited(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Completion service error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 面向用户的提示（UI / CLI 直接展示）
    pub fn user_message(&self) -> String {
        match self {
            LlmError::RateLimited(_) => {
                "The AI service is rate limiting requests. Wait a moment and try again.".to_string()
            }
            LlmError::QuotaExceeded(_) => {
                "The AI service quota is exhausted. Check your plan or API key.".to_string()
            }
            LlmError::ServerError { status, .. } => {
                format!("The AI service failed (HTTP {status}). Try again shortly.")
            }
            LlmError::Network(msg) => format!("Could not reach the AI service: {msg}"),
            LlmError::InvalidResponse(msg) => format!("The AI service returned an unusable reply: {msg}"),
        }
    }

    /// 由 HTTP 状态码分类（reqwest 后端使用）
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 if body.to_lowercase().contains("quota") => LlmError::QuotaExceeded(body),
            429 => LlmError::RateLimited(body),
            402 => LlmError::QuotaExceeded(body),
            500..=599 => LlmError::ServerError {
                status,
                message: body,
            },
            _ => LlmError::Network(format!("HTTP {status}: {body}")),
        }
    }

    /// 由错误文本分类（async-openai 后端只暴露格式化后的错误）；
    /// 状态码只在 `status 502`、`HTTP 502`、`502 Bad Gateway` 这类上下文中识别
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let status = status_in_text(&lower);
        if lower.contains("insufficient_quota") || lower.contains("quota") || status == Some(402) {
            LlmError::QuotaExceeded(message)
        } else if lower.contains("rate_limit") || lower.contains("rate limit") || status == Some(429) {
            LlmError::RateLimited(message)
        } else if let Some(status @ 500..=599) = status {
            LlmError::ServerError { status, message }
        } else {
            LlmError::Network(message)
        }
    }
}

fn status_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:\bstatus(?:\s*code)?\s*[:=]?\s*|\bhttp(?:/[\d.]+)?(?:\s*error)?\s*:?\s*)([1-5]\d\d)\b|\b([1-5]\d\d)\s+(?:too many requests|payment required|internal server error|bad gateway|service unavailable|gateway timeout|overloaded)",
        )
        .expect("valid regex")
    })
}

fn status_in_text(lower: &str) -> Option<u16> {
    let caps = status_pattern().captures(lower)?;
    caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()
}

/// 补全服务 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classes() {
        assert!(matches!(LlmError::from_status(429, "slow down"), LlmError::RateLimited(_)));
        assert!(matches!(
            LlmError::from_status(429, "You exceeded your current quota"),
            LlmError::QuotaExceeded(_)
        ));
        assert!(matches!(LlmError::from_status(402, "pay"), LlmError::QuotaExceeded(_)));
        assert!(matches!(
            LlmError::from_status(503, "overloaded"),
            LlmError::ServerError { status: 503, .. }
        ));
        assert!(matches!(LlmError::from_status(400, "bad"), LlmError::Network(_)));
    }

    #[test]
    fn test_classify_text() {
        assert!(matches!(
            LlmError::classify("Rate limit reached for gpt-4o-mini"),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            LlmError::classify("insufficient_quota: check billing"),
            LlmError::QuotaExceeded(_)
        ));
        assert!(matches!(
            LlmError::classify("http error: 502 Bad Gateway"),
            LlmError::ServerError { status: 502, .. }
        ));
        assert!(matches!(LlmError::classify("connection refused"), LlmError::Network(_)));
        assert!(matches!(
            LlmError::classify("status code: 503, body: upstream overloaded"),
            LlmError::ServerError { status: 503, .. }
        ));
        assert!(matches!(LlmError::classify("HTTP 429"), LlmError::RateLimited(_)));
    }

    #[test]
    fn test_classify_ignores_bare_numbers() {
        assert!(matches!(
            LlmError::classify("invalid request: max_tokens 5000 exceeded"),
            LlmError::Network(_)
        ));
        assert!(matches!(
            LlmError::classify("context length 4290 tokens, limit 5020"),
            LlmError::Network(_)
        ));
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let a = LlmError::RateLimited(String::new()).user_message();
        let b = LlmError::QuotaExceeded(String::new()).user_message();
        let c = LlmError::ServerError { status: 500, message: String::new() }.user_message();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(c.contains("500"));
    }
}
