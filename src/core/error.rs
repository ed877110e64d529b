//! 顶层错误与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 NexusError 决定 Retry / AskUser / Abort。

use thiserror::Error;

use crate::doctrine::DoctrineError;
use crate::gap::GapError;
use crate::graph::GraphError;
use crate::library::LibraryError;
use crate::llm::LlmError;
use crate::socratic::SocraticError;
use crate::structured::ParseError;

/// 各子系统错误的汇总（CLI / 上层应用统一处理）
#[derive(Error, Debug)]
pub enum NexusError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Gap(#[from] GapError),

    #[error(transparent)]
    Socratic(#[from] SocraticError),

    #[error(transparent)]
    Doctrine(#[from] DoctrineError),

    #[error("No universe is open")]
    NoUniverse,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 请求在任何图写入前失败，用户可原样重试
    Retry(String),
    /// 需要用户调整输入或选择
    AskUser(String),
    /// 终止当前操作
    Abort(String),
}
