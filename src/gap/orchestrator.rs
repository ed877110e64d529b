//! GAP 编排器：组装上下文 → 分析 → 单一 / 并行派发 → 合并
//!
//! - 分析或上下文阶段失败：整个请求中止，图不变，可直接重试
//! - 并行方案必须经用户确认（规划闸门）后才派发
//! - 派发后单个任务失败只记录在 BatchReport 中，不取消其它任务，也不回滚已合并节点

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;

use crate::config::GapSection;
use crate::core::Workspace;
use crate::gap::analyze::{analyze, Analysis};
use crate::gap::context::build_context;
use crate::gap::dispatch::{explore_concurrently, merge_in_order, BatchReport};
use crate::gap::prompts::{single_prompt, synthesis_prompt, GAP_SYSTEM};
use crate::gap::{GapContext, GapError, GapEvent};
use crate::graph::{
    derive_title, EntityId, EntityStore, NewNode, NexusKind, NodeKind, NodeMetadata,
};
use crate::llm::{CompletionRequest, LlmClient};
use crate::structured::parse_structured_as;

/// 用户当前选中的实体与引用片段
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub selected: Option<EntityId>,
    pub quote: Option<String>,
}

impl SelectionContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn on(id: EntityId) -> Self {
        Self {
            selected: Some(id),
            quote: None,
        }
    }
}

/// 等待确认的并行方案；上下文在此刻冻结，派发时所有任务共享同一份只读快照
#[derive(Debug, Clone)]
pub struct PendingPlan {
    pub query: String,
    pub tasks: Vec<String>,
    pub reasoning: String,
    pub universe_id: String,
    pub parent: EntityId,
    context_json: Arc<str>,
}

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// 单一回答已写入
    Answered { node: EntityId },
    /// 综合模式：新宇宙已创建并设为当前
    Synthesized {
        universe_id: String,
        nexus: EntityId,
        nodes: Vec<EntityId>,
    },
    /// 规划闸门：需用户确认后调用 confirm_plan；直接丢弃即取消
    AwaitingConfirmation(PendingPlan),
}

#[derive(Debug, Deserialize)]
struct SynthesisPlan {
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    insights: Vec<Insight>,
}

#[derive(Debug, Deserialize)]
struct Insight {
    #[serde(default)]
    title: Option<String>,
    content: String,
}

pub struct GapOrchestrator {
    llm: Arc<dyn LlmClient>,
    config: GapSection,
    events: Option<broadcast::Sender<GapEvent>>,
}

impl GapOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, config: GapSection) -> Self {
        Self {
            llm,
            config,
            events: None,
        }
    }

    /// 打开进度事件通道，返回第一个订阅者
    pub fn with_events(mut self, capacity: usize) -> (Self, broadcast::Receiver<GapEvent>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        self.events = Some(tx);
        (self, rx)
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<GapEvent>> {
        self.events.as_ref().map(|tx| tx.subscribe())
    }

    fn emit(&self, event: GapEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn merge_delay(&self) -> Duration {
        Duration::from_millis(self.config.merge_delay_ms)
    }

    /// 单一入口：处理一次用户请求
    pub async fn handle_user_query(
        &self,
        workspace: &mut Workspace,
        text: &str,
        selection: &SelectionContext,
    ) -> Result<QueryOutcome, GapError> {
        let result = self.handle_inner(workspace, text, selection).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "gap request aborted");
            self.emit(GapEvent::Error { text: e.to_string() });
        }
        result
    }

    async fn handle_inner(
        &self,
        workspace: &mut Workspace,
        text: &str,
        selection: &SelectionContext,
    ) -> Result<QueryOutcome, GapError> {
        let query = text.trim();
        let context = build_context(workspace.current(), workspace.library().as_ref())?;
        self.emit(GapEvent::ContextAssembled {
            has_current: context.current.is_some(),
            activated: context.activated.len(),
        });
        tracing::info!(
            has_current = context.current.is_some(),
            activated = context.activated.len(),
            "gap context assembled"
        );

        if context.is_empty() {
            return Err(GapError::NoContext);
        }
        if context.is_synthesis() {
            return self.synthesize(workspace, &context, query).await;
        }

        let store = workspace.current().ok_or(GapError::NoContext)?;
        let parent = resolve_parent(store, selection);
        let focus = parent
            .as_ref()
            .and_then(|id| store.get(id))
            .map(|e| e.title().to_string());

        let analysis = analyze(
            self.llm.as_ref(),
            &context,
            query,
            focus.as_deref(),
            self.config.max_tokens,
        )
        .await?
        .normalized(self.config.max_parallel_tasks);

        match analysis {
            Analysis::Single => {
                self.emit(GapEvent::Analyzed { mode: "single" });
                self.answer_single(workspace, &context, query, parent, focus.as_deref(), selection)
                    .await
            }
            Analysis::Parallel { tasks, reasoning } => {
                let Some(parent) = parent else {
                    // 空宇宙没有共同父节点，首个回答先成为 Nexus
                    self.emit(GapEvent::Analyzed { mode: "single" });
                    return self
                        .answer_single(workspace, &context, query, None, None, selection)
                        .await;
                };
                self.emit(GapEvent::Analyzed { mode: "parallel" });
                let store = workspace.current().ok_or(GapError::NoContext)?;
                tracing::info!(tasks = tasks.len(), "parallel plan awaiting confirmation");
                self.emit(GapEvent::AwaitingConfirmation {
                    tasks: tasks.clone(),
                    reasoning: reasoning.clone(),
                });
                Ok(QueryOutcome::AwaitingConfirmation(PendingPlan {
                    query: query.to_string(),
                    tasks,
                    reasoning,
                    universe_id: store.id().to_string(),
                    parent,
                    context_json: Arc::from(context.render()),
                }))
            }
        }
    }

    async fn answer_single(
        &self,
        workspace: &mut Workspace,
        context: &GapContext,
        query: &str,
        parent: Option<EntityId>,
        focus: Option<&str>,
        selection: &SelectionContext,
    ) -> Result<QueryOutcome, GapError> {
        let request = CompletionRequest::prompt(
            single_prompt(context, query, focus, selection.quote.as_deref()),
            self.config.max_tokens,
        )
        .with_system(GAP_SYSTEM);
        let answer = self.llm.complete(request).await?;

        let store = workspace.current_mut().ok_or(GapError::NoContext)?;
        let node = match parent {
            Some(parent) => {
                let mut new = NewNode::new(parent, answer).kind(NodeKind::AiResponse);
                if let Some(q) = &selection.quote {
                    new = new.quote(q.clone());
                }
                store.add_node(new)?
            }
            // 空宇宙：首个回答成为 Nexus
            None => store.create_nexus(derive_title(query), answer, Vec::new()),
        };
        tracing::info!(node = %node, "single answer merged");
        self.emit(GapEvent::Answered { node: node.clone() });
        persist(workspace);
        Ok(QueryOutcome::Answered { node })
    }

    /// 确认并行方案：并发派发，全部落定后按任务顺序合并
    pub async fn confirm_plan(
        &self,
        workspace: &mut Workspace,
        plan: PendingPlan,
    ) -> Result<BatchReport, GapError> {
        {
            let store = workspace.current().ok_or(GapError::NoContext)?;
            if store.id() != plan.universe_id {
                return Err(GapError::StalePlan(format!(
                    "plan was made for universe {}",
                    plan.universe_id
                )));
            }
            if !store.contains(&plan.parent) {
                return Err(GapError::StalePlan(format!("{} no longer exists", plan.parent)));
            }
        }

        tracing::info!(tasks = plan.tasks.len(), "dispatching parallel exploration");
        let results = explore_concurrently(
            Arc::clone(&self.llm),
            Arc::clone(&plan.context_json),
            &plan.query,
            &plan.tasks,
            self.config.max_tokens,
            self.events.as_ref(),
        )
        .await;

        let store = workspace.current_mut().ok_or(GapError::NoContext)?;
        let report = merge_in_order(
            store,
            &plan.parent,
            &plan.tasks,
            results,
            self.merge_delay(),
            self.events.as_ref(),
        )
        .await;

        if report.is_success() {
            tracing::info!(
                created = report.created.len(),
                failed = report.failed_count(),
                "parallel batch merged"
            );
        } else {
            tracing::warn!(failed = report.failed_count(), "parallel batch failed: every task errored");
        }
        self.emit(GapEvent::BatchFinished {
            created: report.created.len(),
            failed: report.failed_count(),
        });
        if !report.created.is_empty() {
            persist(workspace);
        }
        Ok(report)
    }

    /// 综合模式：从激活宇宙生成全新的 Nexus，不修改任何来源
    async fn synthesize(
        &self,
        workspace: &mut Workspace,
        context: &GapContext,
        query: &str,
    ) -> Result<QueryOutcome, GapError> {
        let request = CompletionRequest::prompt(synthesis_prompt(context, query), self.config.max_tokens)
            .with_system(GAP_SYSTEM);
        let raw = self.llm.complete(request).await?;
        let plan: SynthesisPlan = parse_structured_as(&raw)?;

        let sources = context.activated_ids();
        let mut store = EntityStore::new(plan.title.clone(), workspace.layout().clone());
        let nexus = store.create_nexus_of_kind(plan.title, plan.summary, Vec::new(), NexusKind::Chat);

        let mut nodes = Vec::with_capacity(plan.insights.len());
        for (i, insight) in plan.insights.into_iter().enumerate() {
            if i > 0 && !self.merge_delay().is_zero() {
                tokio::time::sleep(self.merge_delay()).await;
            }
            let metadata = NodeMetadata {
                source_universes: sources.clone(),
                ..Default::default()
            };
            let mut new = NewNode::new(nexus.clone(), insight.content)
                .kind(NodeKind::Synthesis)
                .metadata(metadata);
            if let Some(title) = insight.title {
                new = new.title(title);
            }
            nodes.push(store.add_node(new)?);
        }

        let universe_id = store.id().to_string();
        tracing::info!(universe = %universe_id, sources = sources.len(), nodes = nodes.len(), "synthesis universe created");
        workspace.set_current(store);
        persist(workspace);
        self.emit(GapEvent::Synthesized {
            universe_id: universe_id.clone(),
            nexus: nexus.clone(),
        });
        Ok(QueryOutcome::Synthesized {
            universe_id,
            nexus,
            nodes,
        })
    }
}

/// 选中实体存在则用之，否则回落到主 Nexus
/// 选中连接节点时回答挂到它在树上的父节点，连接之下只留苏格拉底对话
fn resolve_parent(store: &EntityStore, selection: &SelectionContext) -> Option<EntityId> {
    selection
        .selected
        .as_ref()
        .filter(|id| store.contains(id))
        .map(|id| match store.get_node(id) {
            Some(node) if node.is_connection_node => node.parent_id.clone(),
            _ => id.clone(),
        })
        .or_else(|| store.root_nexus().map(|n| n.id.clone()))
}

/// 写入已发生，保存失败只记录，不回滚
fn persist(workspace: &Workspace) {
    if let Err(e) = workspace.save() {
        tracing::error!(error = %e, "failed to save universe");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LayoutConfig;
    use crate::library::InMemoryLibrary;
    use crate::llm::{LlmError, ScriptedLlmClient, ScriptedReply};

    fn config() -> GapSection {
        GapSection {
            max_parallel_tasks: 5,
            merge_delay_ms: 0,
            max_tokens: 256,
        }
    }

    fn workspace_with_nexus() -> (Workspace, EntityId) {
        let mut ws = Workspace::new(Arc::new(InMemoryLibrary::new()), LayoutConfig::default());
        let nx = ws.create_universe("u").create_nexus("Topic", "root", vec![]);
        (ws, nx)
    }

    #[tokio::test]
    async fn test_single_answer_under_selection() {
        let (mut ws, nx) = workspace_with_nexus();
        let first = ws
            .current_mut()
            .unwrap()
            .add_node(NewNode::new(nx.clone(), "existing"))
            .unwrap();
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on("Decide whether", ScriptedReply::ok(r#"{"type":"single"}"#))
                .on("Answer the user's query", ScriptedReply::ok("the answer")),
        );
        let gap = GapOrchestrator::new(llm.clone(), config());

        let outcome = gap
            .handle_user_query(&mut ws, "explain", &SelectionContext::on(first.clone()))
            .await
            .unwrap();
        let QueryOutcome::Answered { node } = outcome else {
            panic!("expected answer");
        };
        let store = ws.current().unwrap();
        assert_eq!(store.get_node(&node).unwrap().parent_id, first);
        assert_eq!(store.get_node(&node).unwrap().content, "the answer");
        assert_eq!(llm.call_count(), 2);
        // 已保存
        assert!(ws.library().load(store.id()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_connection_selection_answers_under_its_parent() {
        let (mut ws, nx) = workspace_with_nexus();
        let store = ws.current_mut().unwrap();
        let a = store.add_node(NewNode::new(nx.clone(), "a")).unwrap();
        let b = store.add_node(NewNode::new(nx.clone(), "b")).unwrap();
        let bridge = store.connect(&a, &b).unwrap();
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on("Decide whether", ScriptedReply::ok(r#"{"type":"single"}"#))
                .otherwise(ScriptedReply::ok("the answer")),
        );
        let gap = GapOrchestrator::new(llm, config());

        let outcome = gap
            .handle_user_query(&mut ws, "go on", &SelectionContext::on(bridge.clone()))
            .await
            .unwrap();
        let QueryOutcome::Answered { node } = outcome else {
            panic!("expected answer");
        };
        let store = ws.current().unwrap();
        assert_eq!(store.get_node(&node).unwrap().parent_id, a);
        assert!(store.children_of(&bridge).is_empty());
        store.validate().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_selection_falls_back_to_root() {
        let (mut ws, nx) = workspace_with_nexus();
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on("Decide whether", ScriptedReply::ok(r#"{"type":"single"}"#))
                .otherwise(ScriptedReply::ok("ok")),
        );
        let gap = GapOrchestrator::new(llm, config());
        let outcome = gap
            .handle_user_query(&mut ws, "q", &SelectionContext::on(EntityId::from("node_404")))
            .await
            .unwrap();
        let QueryOutcome::Answered { node } = outcome else {
            panic!("expected answer");
        };
        assert_eq!(ws.current().unwrap().get_node(&node).unwrap().parent_id, nx);
    }

    #[tokio::test]
    async fn test_analysis_failure_leaves_graph_untouched() {
        let (mut ws, _) = workspace_with_nexus();
        let before = ws.current().unwrap().universe().clone();

        let rate_limited = GapOrchestrator::new(
            Arc::new(ScriptedLlmClient::new().otherwise(ScriptedReply::err(LlmError::RateLimited("429".into())))),
            config(),
        );
        let err = rate_limited
            .handle_user_query(&mut ws, "q", &SelectionContext::none())
            .await
            .unwrap_err();
        assert!(matches!(err, GapError::Llm(LlmError::RateLimited(_))));

        let garbage = GapOrchestrator::new(
            Arc::new(ScriptedLlmClient::new().otherwise(ScriptedReply::ok("I think maybe parallel?"))),
            config(),
        );
        let err = garbage
            .handle_user_query(&mut ws, "q", &SelectionContext::none())
            .await
            .unwrap_err();
        assert!(matches!(err, GapError::Parse(_)));

        assert_eq!(ws.current().unwrap().universe(), &before);
    }

    #[tokio::test]
    async fn test_parallel_requires_confirmation() {
        let (mut ws, nx) = workspace_with_nexus();
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on(
                    "Decide whether",
                    ScriptedReply::ok(r#"{"type":"parallel","tasks":["history","economics"],"reasoning":"two lenses"}"#),
                )
                .on("Task: history", ScriptedReply::ok("H"))
                .on("Task: economics", ScriptedReply::ok("E")),
        );
        let (gap, mut rx) = GapOrchestrator::new(llm.clone(), config()).with_events(32);

        let outcome = gap
            .handle_user_query(&mut ws, "compare", &SelectionContext::none())
            .await
            .unwrap();
        let QueryOutcome::AwaitingConfirmation(plan) = outcome else {
            panic!("expected planning gate");
        };
        assert_eq!(plan.tasks, vec!["history", "economics"]);
        assert_eq!(plan.parent, nx);
        // 未确认前没有任何派发与写入
        assert_eq!(llm.call_count(), 1);
        assert_eq!(ws.current().unwrap().node_count(), 0);

        let report = gap.confirm_plan(&mut ws, plan).await.unwrap();
        assert!(report.is_success());
        let store = ws.current().unwrap();
        let contents: Vec<_> = store
            .children_of(&nx)
            .iter()
            .map(|id| store.get_node(id).unwrap().content.clone())
            .collect();
        assert_eq!(contents, vec!["H", "E"]);

        let mut saw_batch = false;
        while let Ok(event) = rx.try_recv() {
            if let GapEvent::BatchFinished { created, failed } = event {
                assert_eq!((created, failed), (2, 0));
                saw_batch = true;
            }
        }
        assert!(saw_batch);
    }

    #[tokio::test]
    async fn test_stale_plan_rejected() {
        let (mut ws, _) = workspace_with_nexus();
        let llm = Arc::new(ScriptedLlmClient::new().on(
            "Decide whether",
            ScriptedReply::ok(r#"{"type":"parallel","tasks":["a","b"]}"#),
        ));
        let gap = GapOrchestrator::new(llm, config());
        let QueryOutcome::AwaitingConfirmation(plan) = gap
            .handle_user_query(&mut ws, "q", &SelectionContext::none())
            .await
            .unwrap()
        else {
            panic!("expected plan");
        };
        ws.create_universe("other").create_nexus("X", "", vec![]);
        assert!(matches!(
            gap.confirm_plan(&mut ws, plan).await,
            Err(GapError::StalePlan(_))
        ));
    }

    #[tokio::test]
    async fn test_no_context_is_error() {
        let mut ws = Workspace::new(Arc::new(InMemoryLibrary::new()), LayoutConfig::default());
        let gap = GapOrchestrator::new(Arc::new(ScriptedLlmClient::new()), config());
        assert!(matches!(
            gap.handle_user_query(&mut ws, "q", &SelectionContext::none()).await,
            Err(GapError::NoContext)
        ));
    }

    #[tokio::test]
    async fn test_empty_universe_first_answer_becomes_nexus() {
        let mut ws = Workspace::new(Arc::new(InMemoryLibrary::new()), LayoutConfig::default());
        ws.create_universe("blank");
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on("Decide whether", ScriptedReply::ok(r#"{"type":"single"}"#))
                .otherwise(ScriptedReply::ok("an overview")),
        );
        let gap = GapOrchestrator::new(llm, config());
        let QueryOutcome::Answered { node } = gap
            .handle_user_query(&mut ws, "What is entropy?", &SelectionContext::none())
            .await
            .unwrap()
        else {
            panic!("expected answer");
        };
        let nexus = ws.current().unwrap().get_nexus(&node).unwrap();
        assert_eq!(nexus.title, "What is entropy?");
        assert_eq!(nexus.content, "an overview");
    }
}
