//! 法理图谱生成：主题 → 规则 + 要件 + 5~8 个判例 → 新宇宙
//!
//! 阶段：Idle → Researching → FindingCases → Analyzing → BuildingMap → Complete，
//! 任一阶段失败进入 Error{message}，error_reset_ms 之后自动回到 Idle；期间 advance 会等到重置时刻。
//! 只有 Analyzing 发起真实请求；其余是带节奏的展示性检查点。
//! 结构化响应完整解析并校验之后才创建 Nexus，失败时不留下任何半成品。

mod map;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::DoctrineSection;
use crate::core::Workspace;
use crate::graph::{EntityId, EntityStore, GraphError, NewNode, NexusKind, NodeKind};
use crate::library::LibraryError;
use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::structured::{parse_structured_as, ParseError};

pub use map::{CaseRecord, DoctrinalMap};

#[derive(Error, Debug)]
pub enum DoctrineError {
    #[error("No topic given")]
    NoTopic,

    #[error("A doctrinal map is already being generated ({0})")]
    Busy(DoctrineStage),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Doctrine response has the wrong shape: {0}")]
    InvalidShape(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DoctrineStage {
    #[default]
    Idle,
    Researching,
    FindingCases,
    Analyzing,
    BuildingMap,
    Complete,
    Error {
        message: String,
    },
}

impl DoctrineStage {
    pub fn label(&self) -> &'static str {
        match self {
            DoctrineStage::Idle => "idle",
            DoctrineStage::Researching => "researching",
            DoctrineStage::FindingCases => "finding-cases",
            DoctrineStage::Analyzing => "analyzing",
            DoctrineStage::BuildingMap => "building-map",
            DoctrineStage::Complete => "complete",
            DoctrineStage::Error { .. } => "error",
        }
    }

    fn is_busy(&self) -> bool {
        !matches!(
            self,
            DoctrineStage::Idle | DoctrineStage::Complete | DoctrineStage::Error { .. }
        )
    }
}

impl fmt::Display for DoctrineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoctrineStage::Error { message } => write!(f, "error: {message}"),
            other => f.write_str(other.label()),
        }
    }
}

/// 成功生成后的结果
#[derive(Debug, Clone)]
pub struct DoctrineOutcome {
    pub universe_id: String,
    pub nexus: EntityId,
    pub cases: Vec<EntityId>,
}

pub struct DoctrinalGenerator {
    llm: Arc<dyn LlmClient>,
    config: DoctrineSection,
    topic: Option<String>,
    map: Option<DoctrinalMap>,
    outcome: Option<DoctrineOutcome>,
    failed_at: Option<Instant>,
    stage_tx: Arc<watch::Sender<DoctrineStage>>,
    /// start / fail 时递增；过期的自动重置据此作废
    generation: Arc<AtomicU64>,
}

impl DoctrinalGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, config: DoctrineSection) -> Self {
        let (stage_tx, _) = watch::channel(DoctrineStage::Idle);
        Self {
            llm,
            config,
            topic: None,
            map: None,
            outcome: None,
            failed_at: None,
            stage_tx: Arc::new(stage_tx),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stage(&self) -> DoctrineStage {
        self.stage_tx.borrow().clone()
    }

    /// 订阅阶段变化（进度展示用）
    pub fn subscribe(&self) -> watch::Receiver<DoctrineStage> {
        self.stage_tx.subscribe()
    }

    pub fn outcome(&self) -> Option<&DoctrineOutcome> {
        self.outcome.as_ref()
    }

    fn set_stage(&self, stage: DoctrineStage) {
        tracing::info!(stage = stage.label(), "doctrine stage");
        self.stage_tx.send_replace(stage);
    }

    /// 接受新主题；Idle / Complete / Error 之外的阶段拒绝
    pub fn start(&mut self, topic: &str) -> Result<(), DoctrineError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(DoctrineError::NoTopic);
        }
        let stage = self.stage();
        if stage.is_busy() {
            return Err(DoctrineError::Busy(stage));
        }
        self.topic = Some(topic.to_string());
        self.map = None;
        self.outcome = None;
        self.failed_at = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_stage(DoctrineStage::Researching);
        Ok(())
    }

    /// 推进一个阶段；失败时进入 Error 并返回原错误
    pub async fn advance(&mut self, workspace: &mut Workspace) -> Result<DoctrineStage, DoctrineError> {
        let stage = self.stage();
        let next = match stage {
            DoctrineStage::Idle | DoctrineStage::Complete => return Ok(stage),
            DoctrineStage::Researching => {
                self.checkpoint().await;
                DoctrineStage::FindingCases
            }
            DoctrineStage::FindingCases => {
                self.checkpoint().await;
                DoctrineStage::Analyzing
            }
            DoctrineStage::Analyzing => match self.analyze().await {
                Ok(map) => {
                    self.map = Some(map);
                    DoctrineStage::BuildingMap
                }
                Err(e) => return Err(self.fail(e)),
            },
            DoctrineStage::BuildingMap => match self.build(workspace).await {
                Ok(outcome) => {
                    tracing::info!(universe = %outcome.universe_id, cases = outcome.cases.len(), "doctrinal map built");
                    self.outcome = Some(outcome);
                    DoctrineStage::Complete
                }
                Err(e) => return Err(self.fail(e)),
            },
            DoctrineStage::Error { .. } => {
                let reset = Duration::from_millis(self.config.error_reset_ms);
                if let Some(at) = self.failed_at.take() {
                    tokio::time::sleep_until(at + reset).await;
                }
                self.topic = None;
                DoctrineStage::Idle
            }
        };
        self.set_stage(next.clone());
        Ok(next)
    }

    /// 从 start 一直推进到 Complete
    pub async fn run(&mut self, topic: &str, workspace: &mut Workspace) -> Result<DoctrineOutcome, DoctrineError> {
        self.start(topic)?;
        loop {
            if self.advance(workspace).await? == DoctrineStage::Complete {
                break;
            }
        }
        self.outcome
            .clone()
            .ok_or_else(|| DoctrineError::InvalidShape("map finished without an outcome".to_string()))
    }

    fn fail(&mut self, e: DoctrineError) -> DoctrineError {
        tracing::warn!(error = %e, "doctrine generation failed");
        self.map = None;
        self.failed_at = Some(Instant::now());
        self.set_stage(DoctrineStage::Error {
            message: e.to_string(),
        });
        self.schedule_reset();
        e
    }

    /// error_reset_ms 后把 Error 置回 Idle，不依赖调用方再次 advance
    fn schedule_reset(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let tx = Arc::clone(&self.stage_tx);
        let reset = Duration::from_millis(self.config.error_reset_ms);
        tokio::spawn(async move {
            tokio::time::sleep(reset).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            let reset = tx.send_if_modified(|stage| {
                if matches!(stage, DoctrineStage::Error { .. }) {
                    *stage = DoctrineStage::Idle;
                    true
                } else {
                    false
                }
            });
            if reset {
                tracing::info!(stage = DoctrineStage::Idle.label(), "doctrine error cleared");
            }
        });
    }

    async fn checkpoint(&self) {
        if self.config.checkpoint_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.checkpoint_delay_ms)).await;
        }
    }

    async fn analyze(&self) -> Result<DoctrinalMap, DoctrineError> {
        let topic = self.topic.as_deref().ok_or(DoctrineError::NoTopic)?;
        let request = CompletionRequest::prompt(
            map::analysis_prompt(topic, self.config.min_cases, self.config.max_cases),
            self.config.max_tokens,
        )
        .with_system(map::DOCTRINE_SYSTEM);
        let raw = self.llm.complete(request).await?;
        let map: DoctrinalMap = parse_structured_as(&raw)?;
        map.validate(self.config.min_cases, self.config.max_cases)?;
        Ok(map)
    }

    /// 在独立的新宇宙里构建；整棵图建好后才交给工作区，随后保存并拍快照
    async fn build(&mut self, workspace: &mut Workspace) -> Result<DoctrineOutcome, DoctrineError> {
        let topic = self.topic.clone().ok_or(DoctrineError::NoTopic)?;
        let map = self
            .map
            .take()
            .ok_or_else(|| DoctrineError::InvalidShape("no analyzed map to build".to_string()))?;

        let mut store = EntityStore::new(topic.clone(), workspace.layout().clone());
        let nexus = store.create_nexus_of_kind(topic, map.nexus_content(), Vec::new(), NexusKind::Academic);

        let delay = Duration::from_millis(self.config.case_delay_ms);
        let mut cases = Vec::with_capacity(map.cases.len());
        for (i, case) in map.cases.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let id = store.add_node(
                NewNode::new(nexus.clone(), case.render())
                    .kind(NodeKind::Doctrine)
                    .title(case.name.clone())
                    .metadata(case.metadata()),
            )?;
            cases.push(id);
        }

        let universe_id = store.id().to_string();
        workspace.set_current(store);
        workspace.begin_exploration()?;
        Ok(DoctrineOutcome {
            universe_id,
            nexus,
            cases,
        })
    }
}
