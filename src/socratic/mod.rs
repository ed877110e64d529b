//! 连接节点上的苏格拉底式对话状态机
//!
//! 状态：Empty → Active → (Answered → Active)* → Ended
//!
//! - 每一轮回答先请求下一个问题，成功后才把回答与问题一起挂到连接节点下，
//!   所以任何时刻 `content` 都是最新问题，子节点数恒为 2 × 已完成轮数
//! - 回答与问题始终是连接节点的直接子节点，从不链式挂在上一个问题下
//! - 焦点由状态机持有，每一步都原样返回连接节点 id，渲染层据此选中

mod prompts;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::SocraticSection;
use crate::graph::{EntityId, EntityStore, GraphError, NewNode, Node, NodeKind};
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};

#[derive(Error, Debug)]
pub enum SocraticError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{0} is not a connection node")]
    NotAConnection(EntityId),

    #[error("Cannot {input} while the dialogue is {state}")]
    InvalidTransition {
        state: DialogueState,
        input: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    /// 刚由 connect 创建，content 为空
    Empty,
    /// 有一个待回答的问题
    Active,
    /// 回答已提交，正在等待下一个问题
    Answered,
    /// 用户结束；子节点即永久记录
    Ended,
}

impl fmt::Display for DialogueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DialogueState::Empty => "empty",
            DialogueState::Active => "active",
            DialogueState::Answered => "answered",
            DialogueState::Ended => "ended",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueInput {
    /// 开场：可附带额外的背景说明
    Open { seed: Option<String> },
    Answer(String),
    End,
}

impl DialogueInput {
    fn name(&self) -> &'static str {
        match self {
            DialogueInput::Open { .. } => "open",
            DialogueInput::Answer(_) => "answer",
            DialogueInput::End => "end",
        }
    }
}

/// 一次 advance 的结果
#[derive(Debug, Clone)]
pub struct DialogueStep {
    pub state: DialogueState,
    /// 始终是连接节点 id
    pub focus: EntityId,
    /// 当前待回答的问题（Ended 时为最后一个问题）
    pub question: Option<String>,
    /// 本轮新挂上的节点：回答在前，问题在后
    pub appended: Vec<EntityId>,
}

pub struct ConnectionDialogue {
    llm: Arc<dyn LlmClient>,
    connection: EntityId,
    state: DialogueState,
    max_tokens: u32,
}

impl ConnectionDialogue {
    /// 绑定到已有连接节点；content 非空时视为已开场，从 Active 继续
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: &EntityStore,
        connection: EntityId,
        config: &SocraticSection,
    ) -> Result<Self, SocraticError> {
        let node = connection_node(store, &connection)?;
        let state = if node.content.is_empty() {
            DialogueState::Empty
        } else {
            DialogueState::Active
        };
        Ok(Self {
            llm,
            connection,
            state,
            max_tokens: config.max_tokens,
        })
    }

    pub fn state(&self) -> DialogueState {
        self.state
    }

    pub fn focus(&self) -> &EntityId {
        &self.connection
    }

    pub async fn advance(
        &mut self,
        store: &mut EntityStore,
        input: DialogueInput,
    ) -> Result<DialogueStep, SocraticError> {
        let name = input.name();
        match (self.state, input) {
            (DialogueState::Empty, DialogueInput::Open { seed }) => self.open(store, seed.as_deref()).await,
            // 上一轮在等待问题时被中断，允许重新回答
            (DialogueState::Active | DialogueState::Answered, DialogueInput::Answer(text)) => {
                self.answer(store, text).await
            }
            (DialogueState::Empty | DialogueState::Active | DialogueState::Answered, DialogueInput::End) => {
                self.state = DialogueState::Ended;
                tracing::info!(connection = %self.connection, "socratic dialogue ended");
                Ok(self.step(store, Vec::new()))
            }
            (state, _) => Err(SocraticError::InvalidTransition { state, input: name }),
        }
    }

    async fn open(&mut self, store: &mut EntityStore, seed: Option<&str>) -> Result<DialogueStep, SocraticError> {
        let brief = bridge_brief(store, &self.connection, seed)?;
        let request = CompletionRequest::new(vec![Message::user(brief)], self.max_tokens)
            .with_system(prompts::SOCRATIC_SYSTEM);
        let question = clean_question(self.llm.complete(request).await?)?;

        store.update_content(&self.connection, question.clone())?;
        store.node_mut(&self.connection)?.metadata.opening_question = Some(question);
        self.state = DialogueState::Active;
        tracing::info!(connection = %self.connection, "socratic dialogue opened");
        Ok(self.step(store, Vec::new()))
    }

    async fn answer(&mut self, store: &mut EntityStore, text: String) -> Result<DialogueStep, SocraticError> {
        let text = text.trim().to_string();
        self.state = DialogueState::Answered;

        let mut messages = match transcript(store, &self.connection) {
            Ok(messages) => messages,
            Err(e) => {
                self.state = DialogueState::Active;
                return Err(e);
            }
        };
        messages.push(Message::user(text.clone()));
        let request = CompletionRequest::new(messages, self.max_tokens).with_system(prompts::SOCRATIC_SYSTEM);

        let question = match self.llm.complete(request).await.map_err(SocraticError::from).and_then(clean_question) {
            Ok(q) => q,
            Err(e) => {
                self.state = DialogueState::Active;
                tracing::warn!(connection = %self.connection, error = %e, "socratic round failed; nothing recorded");
                return Err(e);
            }
        };

        let answer_id = store.add_node(
            NewNode::new(self.connection.clone(), text).kind(NodeKind::SocraticAnswer),
        )?;
        let question_id = store.add_node(
            NewNode::new(self.connection.clone(), question.clone()).kind(NodeKind::SocraticQuestion),
        )?;
        // 覆盖而非追加
        store.update_content(&self.connection, question)?;
        self.state = DialogueState::Active;
        tracing::info!(connection = %self.connection, answer = %answer_id, question = %question_id, "socratic round recorded");
        Ok(self.step(store, vec![answer_id, question_id]))
    }

    fn step(&self, store: &EntityStore, appended: Vec<EntityId>) -> DialogueStep {
        let question = store
            .get_node(&self.connection)
            .map(|n| n.content.clone())
            .filter(|c| !c.is_empty());
        DialogueStep {
            state: self.state,
            focus: self.connection.clone(),
            question,
            appended,
        }
    }
}

fn connection_node<'a>(store: &'a EntityStore, id: &EntityId) -> Result<&'a Node, SocraticError> {
    let node = store
        .get_node(id)
        .ok_or_else(|| GraphError::NotFound(id.clone()))?;
    if !node.is_connection_node {
        return Err(SocraticError::NotAConnection(id.clone()));
    }
    Ok(node)
}

/// 两端实体的内容；B 端为弱引用，已不存在时以占位文本代替
fn bridge_brief(store: &EntityStore, connection: &EntityId, seed: Option<&str>) -> Result<String, SocraticError> {
    let node = connection_node(store, connection)?;
    let [a, _] = node
        .bridged_ids
        .as_ref()
        .ok_or_else(|| GraphError::InvalidBridge(format!("{connection} has no bridged entities")))?;
    let a = store.get(a).ok_or_else(|| GraphError::NotFound(a.clone()))?;
    let (b_title, b_content) = store
        .bridge_partner(connection)
        .map(|b| (b.title(), b.content()))
        .unwrap_or(("(missing)", "(this entity no longer exists)"));
    Ok(prompts::opening_prompt(
        (a.title(), a.content()),
        (b_title, b_content),
        seed,
    ))
}

/// 由连接节点的直接子节点重建对话历史：开场问题 + 依时间顺序的回答 / 问题
fn transcript(store: &EntityStore, connection: &EntityId) -> Result<Vec<Message>, SocraticError> {
    let node = connection_node(store, connection)?;
    let opening = node
        .metadata
        .opening_question
        .clone()
        .unwrap_or_else(|| node.content.clone());

    let mut messages = vec![
        Message::user(bridge_brief(store, connection, None)?),
        Message::assistant(opening),
    ];
    for child in store.children_of(connection) {
        let Some(child) = store.get_node(&child) else {
            continue;
        };
        let message = match child.kind {
            NodeKind::SocraticAnswer | NodeKind::UserReply => Message::user(child.content.clone()),
            NodeKind::SocraticQuestion
            | NodeKind::AiResponse
            | NodeKind::Doctrine
            | NodeKind::Synthesis => Message::assistant(child.content.clone()),
            // 以本连接为端点的嵌套连接不属于对话
            NodeKind::Connection => continue,
        };
        messages.push(message);
    }
    Ok(messages)
}

fn clean_question(raw: String) -> Result<String, SocraticError> {
    let q = raw.trim().trim_matches('"').trim();
    if q.is_empty() {
        return Err(LlmError::InvalidResponse("empty question".to_string()).into());
    }
    Ok(q.to_string())
}
