//! Mock 补全客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：回显最后一条 user 消息，永远判定为单一回答
//! - ScriptedLlmClient：按「prompt 包含关键字」匹配预设回复，可设延迟与失败，便于验证并发合并顺序

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// Mock 客户端：分析请求返回 single，其余回显
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let last_user = request.last_user().unwrap_or("(no input)");
        if last_user.contains("\"type\"") && last_user.contains("parallel") {
            return Ok(r#"{"type": "single"}"#.to_string());
        }
        Ok(format!("Echo from Mock: {}", last_user))
    }
}

/// 预设回复：延迟后返回结果
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub delay: Duration,
    pub result: Result<String, LlmError>,
}

impl ScriptedReply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(text.into()),
        }
    }

    pub fn err(error: LlmError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    pub fn after(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }
}

struct Rule {
    needle: String,
    replies: VecDeque<ScriptedReply>,
}

/// 脚本化客户端：规则按注册顺序匹配；同一规则的多条回复依次消费，最后一条重复使用
#[derive(Default)]
pub struct ScriptedLlmClient {
    rules: Mutex<Vec<Rule>>,
    fallback: Option<ScriptedReply>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最后一条 user 消息包含 needle 时返回 reply
    pub fn on(self, needle: impl Into<String>, reply: ScriptedReply) -> Self {
        let needle = needle.into();
        {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(rule) = rules.iter_mut().find(|r| r.needle == needle) {
                rule.replies.push_back(reply);
            } else {
                rules.push(Rule {
                    needle,
                    replies: VecDeque::from([reply]),
                });
            }
        }
        self
    }

    /// 未命中任何规则时的回复；不设置则返回 InvalidResponse
    pub fn otherwise(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// 已收到的请求（按到达顺序）
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn pick(&self, prompt: &str) -> Option<ScriptedReply> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let rule = rules.iter_mut().find(|r| prompt.contains(&r.needle))?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let prompt = request.last_user().unwrap_or_default().to_string();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let reply = self
            .pick(&prompt)
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| LlmError::InvalidResponse(format!("no scripted reply for: {prompt}")))?;

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}
