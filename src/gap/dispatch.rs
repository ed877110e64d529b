//! 并行派发与按序合并
//!
//! 每个任务一次独立的补全调用，互不取消；全部落定后按任务原始顺序逐个写入图，
//! 两次写入之间留出固定间隔。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;

use crate::gap::prompts::{task_prompt, GAP_SYSTEM};
use crate::gap::GapEvent;
use crate::graph::{EntityId, EntityStore, NewNode, NodeKind, NodeMetadata};
use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// 单个失败任务（信息性，不是异常）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub index: usize,
    pub task: String,
    pub error: String,
}

/// 并行批次结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// 新节点，按任务原始顺序
    pub created: Vec<EntityId>,
    pub failures: Vec<TaskFailure>,
}

impl BatchReport {
    /// 至少一个任务成功即视为成功
    pub fn is_success(&self) -> bool {
        !self.created.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// 并发执行所有任务；返回结果与 tasks 一一对应（与完成顺序无关）
pub async fn explore_concurrently(
    llm: Arc<dyn LlmClient>,
    context_json: Arc<str>,
    query: &str,
    tasks: &[String],
    max_tokens: u32,
    events: Option<&broadcast::Sender<GapEvent>>,
) -> Vec<Result<String, LlmError>> {
    let calls = tasks.iter().enumerate().map(|(index, task)| {
        let llm = Arc::clone(&llm);
        let request = CompletionRequest::prompt(task_prompt(&context_json, query, task), max_tokens)
            .with_system(GAP_SYSTEM);
        let events = events.cloned();
        async move {
            let result = llm.complete(request).await;
            if let Some(tx) = events {
                let _ = tx.send(GapEvent::TaskSettled {
                    index,
                    ok: result.is_ok(),
                });
            }
            result
        }
    });
    join_all(calls).await
}

/// 按任务顺序把成功结果追加为 parent 下的兄弟节点
pub async fn merge_in_order(
    store: &mut EntityStore,
    parent: &EntityId,
    tasks: &[String],
    results: Vec<Result<String, LlmError>>,
    merge_delay: Duration,
    events: Option<&broadcast::Sender<GapEvent>>,
) -> BatchReport {
    let mut report = BatchReport::default();

    for (index, (task, result)) in tasks.iter().zip(results).enumerate() {
        let content = match result {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(index, task = %task, error = %e, "parallel task failed");
                report.failures.push(TaskFailure {
                    index,
                    task: task.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        if !report.created.is_empty() && !merge_delay.is_zero() {
            tokio::time::sleep(merge_delay).await;
        }

        let metadata = NodeMetadata {
            task: Some(task.clone()),
            ..Default::default()
        };
        match store.add_node(
            NewNode::new(parent.clone(), content)
                .kind(NodeKind::AiResponse)
                .title(task.clone())
                .metadata(metadata),
        ) {
            Ok(node) => {
                tracing::info!(index, node = %node, "parallel result merged");
                if let Some(tx) = events {
                    let _ = tx.send(GapEvent::NodeMerged {
                        index,
                        node: node.clone(),
                    });
                }
                report.created.push(node);
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "parallel result could not be merged");
                report.failures.push(TaskFailure {
                    index,
                    task: task.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    report
}
