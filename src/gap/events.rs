//! GAP 过程事件：供进度视图订阅；接收端被丢弃不影响进行中的任务

use serde::Serialize;

use crate::graph::EntityId;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GapEvent {
    ContextAssembled { has_current: bool, activated: usize },
    Analyzed { mode: &'static str },
    AwaitingConfirmation { tasks: Vec<String>, reasoning: String },
    /// 某个并行任务完成（顺序即网络完成顺序）
    TaskSettled { index: usize, ok: bool },
    /// 按任务原始顺序合并进图
    NodeMerged { index: usize, node: EntityId },
    BatchFinished { created: usize, failed: usize },
    Answered { node: EntityId },
    Synthesized { universe_id: String, nexus: EntityId },
    Error { text: String },
}
