//! 错误恢复引擎
//!
//! 将 NexusError 映射为面向用户的动作。核心层从不自动重试，这里只给出建议。

use crate::core::{NexusError, RecoveryAction};
use crate::gap::GapError;
use crate::llm::LlmError;
use crate::socratic::SocraticError;
use crate::doctrine::DoctrineError;

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &NexusError) -> RecoveryAction {
        match err {
            NexusError::Llm(e)
            | NexusError::Gap(GapError::Llm(e))
            | NexusError::Socratic(SocraticError::Llm(e))
            | NexusError::Doctrine(DoctrineError::Llm(e)) => Self::for_llm(e),
            NexusError::Parse(_)
            | NexusError::Gap(GapError::Parse(_))
            | NexusError::Doctrine(DoctrineError::Parse(_)) => RecoveryAction::Retry(
                "The AI reply could not be understood; nothing was changed. Try again.".to_string(),
            ),
            NexusError::Graph(e)
            | NexusError::Gap(GapError::Graph(e))
            | NexusError::Socratic(SocraticError::Graph(e))
            | NexusError::Doctrine(DoctrineError::Graph(e)) => {
                RecoveryAction::AskUser(format!("Graph operation rejected: {e}"))
            }
            NexusError::Gap(GapError::NoContext) | NexusError::NoUniverse => RecoveryAction::AskUser(
                "Open or create a universe, or activate one for synthesis.".to_string(),
            ),
            NexusError::Gap(GapError::StalePlan(msg)) => {
                RecoveryAction::AskUser(format!("The pending plan no longer applies: {msg}"))
            }
            NexusError::Socratic(
                e @ (SocraticError::InvalidTransition { .. } | SocraticError::NotAConnection(_)),
            ) => RecoveryAction::AskUser(e.to_string()),
            NexusError::Doctrine(e @ (DoctrineError::NoTopic | DoctrineError::Busy(_))) => {
                RecoveryAction::AskUser(e.to_string())
            }
            NexusError::Doctrine(DoctrineError::InvalidShape(msg)) => RecoveryAction::Retry(format!(
                "The generated doctrine was incomplete ({msg}); nothing was created. Try again."
            )),
            NexusError::InvalidCommand(msg) => RecoveryAction::AskUser(msg.clone()),
            other => RecoveryAction::Abort(other.to_string()),
        }
    }

    fn for_llm(e: &LlmError) -> RecoveryAction {
        match e {
            LlmError::RateLimited(_) | LlmError::ServerError { .. } | LlmError::Network(_) => {
                RecoveryAction::Retry(e.user_message())
            }
            LlmError::QuotaExceeded(_) | LlmError::InvalidResponse(_) => {
                RecoveryAction::Abort(e.user_message())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityId, GraphError};
    use crate::structured::parse_structured;

    #[test]
    fn test_rate_limit_is_retry() {
        let engine = RecoveryEngine::new();
        let err = NexusError::Gap(GapError::Llm(LlmError::RateLimited("429".into())));
        assert!(matches!(engine.handle(&err), RecoveryAction::Retry(_)));
    }

    #[test]
    fn test_quota_is_abort() {
        let engine = RecoveryEngine::new();
        let err = NexusError::Llm(LlmError::QuotaExceeded("none left".into()));
        match engine.handle(&err) {
            RecoveryAction::Abort(msg) => assert!(msg.contains("quota")),
            other => panic!("Expected Abort, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_is_retry() {
        let engine = RecoveryEngine::new();
        let err = NexusError::Parse(parse_structured("nope").unwrap_err());
        assert!(matches!(engine.handle(&err), RecoveryAction::Retry(_)));
    }

    #[test]
    fn test_cycle_asks_user() {
        let engine = RecoveryEngine::new();
        let err = NexusError::Graph(GraphError::Cycle {
            node: EntityId::from("node_1"),
            target: EntityId::from("node_2"),
        });
        match engine.handle(&err) {
            RecoveryAction::AskUser(msg) => assert!(msg.contains("cycle")),
            other => panic!("Expected AskUser, got {other:?}"),
        }
    }
}
