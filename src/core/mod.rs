//! 核心层：错误汇总与恢复建议、工作区（当前宇宙 + 宇宙库）

pub mod error;
pub mod recovery;
pub mod workspace;

pub use error::{NexusError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use workspace::Workspace;
