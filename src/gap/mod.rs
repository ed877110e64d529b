//! GAP（图感知并行）编排：上下文组装、分析、单一 / 并行派发、按序合并、综合模式

pub mod analyze;
pub mod context;
pub mod dispatch;
pub mod events;
pub mod orchestrator;
pub mod prompts;

use thiserror::Error;

use crate::graph::GraphError;
use crate::library::LibraryError;
use crate::llm::LlmError;
use crate::structured::ParseError;

pub use analyze::Analysis;
pub use context::{build_context, GapContext, GraphContext};
pub use dispatch::{BatchReport, TaskFailure};
pub use events::GapEvent;
pub use orchestrator::{GapOrchestrator, PendingPlan, QueryOutcome, SelectionContext};

#[derive(Error, Debug)]
pub enum GapError {
    #[error("Nothing to reason over: open a universe or activate one for synthesis")]
    NoContext,

    #[error("Pending plan is stale: {0}")]
    StalePlan(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Library(#[from] LibraryError),
}
