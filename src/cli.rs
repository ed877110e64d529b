//! 命令行交互会话：解析一行命令并驱动工作区、GAP 编排器与两个状态机
//!
//! 所有图写入都发生在 `Session::execute` 的 `&mut self` 上，一次只执行一条命令。

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use crate::config::{AppConfig, SocraticSection};
use crate::core::{NexusError, RecoveryAction, RecoveryEngine, Workspace};
use crate::doctrine::DoctrinalGenerator;
use crate::gap::{GapEvent, GapOrchestrator, PendingPlan, QueryOutcome, SelectionContext};
use crate::graph::{EntityId, EntityStore, GraphError};
use crate::library::UniverseLibrary;
use crate::llm::LlmClient;
use crate::socratic::{ConnectionDialogue, DialogueInput, DialogueState};

pub const HELP: &str = "\
Commands:
  ask <text>              ask about the selected entity (or the root)
  yes | no                confirm / cancel a pending parallel plan
  select <id>             select an entity
  connect <a> <b>         bridge two entities with a connection node
  open <id> [seed]        start or resume a Socratic dialogue on a connection
  answer <text>           answer the open Socratic question
  end                     end the Socratic dialogue
  doctrine <topic>        generate a doctrinal map as a new universe
  move <node> <parent>    reparent a node (its subtree follows)
  new <title>             create an empty universe
  load <universe>         open a saved universe
  list                    list saved universes (* = activated)
  activate <universe>     add a universe to the synthesis set
  deactivate <universe>   remove a universe from the synthesis set
  close                   close the current universe (`ask` then synthesizes)
  snapshot | revert       take / restore the exploration snapshot
  show                    print the current universe
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    Yes,
    No,
    Select(EntityId),
    Connect(EntityId, EntityId),
    Open {
        connection: EntityId,
        seed: Option<String>,
    },
    Answer(String),
    End,
    Doctrine(String),
    Move {
        node: EntityId,
        parent: EntityId,
    },
    New(String),
    Load(String),
    List,
    Activate(String),
    Deactivate(String),
    Close,
    Snapshot,
    Revert,
    Show,
    Help,
    Quit,
}

impl Command {
    /// 空行返回 Ok(None)
    pub fn parse(line: &str) -> Result<Option<Command>, NexusError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((v, r)) => (v, r.trim()),
            None => (line, ""),
        };
        let need = |what: &str| -> Result<String, NexusError> {
            if rest.is_empty() {
                Err(NexusError::InvalidCommand(format!("{verb} needs {what}")))
            } else {
                Ok(rest.to_string())
            }
        };
        let two_ids = |what: &str| -> Result<(EntityId, EntityId), NexusError> {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(a), Some(b), None) => Ok((EntityId::from(a), EntityId::from(b))),
                _ => Err(NexusError::InvalidCommand(format!("usage: {verb} {what}"))),
            }
        };

        let cmd = match verb.to_lowercase().as_str() {
            "ask" => Command::Ask(need("a question")?),
            "yes" | "y" => Command::Yes,
            "no" | "n" => Command::No,
            "select" => Command::Select(EntityId::new(need("an id")?)),
            "connect" => {
                let (a, b) = two_ids("<a> <b>")?;
                Command::Connect(a, b)
            }
            "open" => {
                let body = need("a connection id")?;
                let (id, seed) = match body.split_once(char::is_whitespace) {
                    Some((id, seed)) => (id.to_string(), Some(seed.trim().to_string())),
                    None => (body, None),
                };
                Command::Open {
                    connection: EntityId::new(id),
                    seed,
                }
            }
            "answer" => Command::Answer(need("an answer")?),
            "end" => Command::End,
            "doctrine" => Command::Doctrine(need("a topic")?),
            "move" => {
                let (node, parent) = two_ids("<node> <parent>")?;
                Command::Move { node, parent }
            }
            "new" => Command::New(need("a title")?),
            "load" => Command::Load(need("a universe id")?),
            "list" | "ls" => Command::List,
            "activate" => Command::Activate(need("a universe id")?),
            "deactivate" => Command::Deactivate(need("a universe id")?),
            "close" => Command::Close,
            "snapshot" => Command::Snapshot,
            "revert" => Command::Revert,
            "show" => Command::Show,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(NexusError::InvalidCommand(format!("unknown command '{other}'"))),
        };
        Ok(Some(cmd))
    }
}

pub struct Session {
    workspace: Workspace,
    llm: Arc<dyn LlmClient>,
    gap: GapOrchestrator,
    doctrine: DoctrinalGenerator,
    socratic: SocraticSection,
    dialogue: Option<ConnectionDialogue>,
    pending: Option<PendingPlan>,
    selection: SelectionContext,
    recovery: RecoveryEngine,
}

impl Session {
    pub fn new(llm: Arc<dyn LlmClient>, library: Arc<dyn UniverseLibrary>, cfg: &AppConfig) -> Self {
        let (gap, _) = GapOrchestrator::new(Arc::clone(&llm), cfg.gap.clone()).with_events(64);
        Self {
            workspace: Workspace::new(library, cfg.layout.clone()),
            doctrine: DoctrinalGenerator::new(Arc::clone(&llm), cfg.doctrine.clone()),
            llm,
            gap,
            socratic: cfg.socratic.clone(),
            dialogue: None,
            pending: None,
            selection: SelectionContext::none(),
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn selection(&self) -> &SelectionContext {
        &self.selection
    }

    pub fn has_pending_plan(&self) -> bool {
        self.pending.is_some()
    }

    /// 后台打印 GAP 进度与法理生成阶段；关闭进度视图不影响进行中的任务
    pub fn spawn_progress_view(&self) {
        if let Some(mut rx) = self.gap.subscribe() {
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if let Some(line) = describe_event(&event) {
                                println!("  · {line}");
                            }
                        }
                        Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "progress view lagged"),
                        Err(RecvError::Closed) => break,
                    }
                }
            });
        }
        let mut stages = self.doctrine.subscribe();
        tokio::spawn(async move {
            while stages.changed().await.is_ok() {
                let stage = stages.borrow_and_update().clone();
                println!("  · doctrine: {stage}");
            }
        });
    }

    pub fn prompt(&self) -> String {
        let title = self
            .workspace
            .current()
            .map(|s| s.universe().title.clone())
            .unwrap_or_else(|| "no universe".to_string());
        if self.pending.is_some() {
            format!("[{title}] (yes/no)>")
        } else {
            format!("[{title}]>")
        }
    }

    /// 处理一行输入；返回 false 表示退出
    pub async fn handle_line(&mut self, line: &str) -> bool {
        let result = match Command::parse(line) {
            Ok(Some(cmd)) => self.execute(cmd).await,
            Ok(None) => Ok(true),
            Err(e) => Err(e),
        };
        match result {
            Ok(keep_going) => keep_going,
            Err(e) => {
                match self.recovery.handle(&e) {
                    RecoveryAction::Retry(msg) => println!("! {msg} (safe to retry)"),
                    RecoveryAction::AskUser(msg) => println!("? {msg}"),
                    RecoveryAction::Abort(msg) => println!("x {msg}"),
                }
                true
            }
        }
    }

    fn store(&self) -> Result<&EntityStore, NexusError> {
        self.workspace.current().ok_or(NexusError::NoUniverse)
    }

    fn store_mut(&mut self) -> Result<&mut EntityStore, NexusError> {
        self.workspace.current_mut().ok_or(NexusError::NoUniverse)
    }

    /// 切换宇宙时丢弃依附于旧宇宙的状态
    fn reset_focus(&mut self) {
        self.dialogue = None;
        self.pending = None;
        self.selection = SelectionContext::none();
    }

    pub async fn execute(&mut self, cmd: Command) -> Result<bool, NexusError> {
        match cmd {
            Command::Ask(text) => {
                if self.pending.take().is_some() {
                    println!("(previous plan discarded)");
                }
                let outcome = self
                    .gap
                    .handle_user_query(&mut self.workspace, &text, &self.selection)
                    .await?;
                match outcome {
                    QueryOutcome::Answered { node } => {
                        if let Some(entity) = self.store()?.get(&node) {
                            println!("[{}] {}\n{}", node, entity.title(), entity.content());
                        }
                        self.selection = SelectionContext::on(node);
                    }
                    QueryOutcome::Synthesized { universe_id, nexus, nodes } => {
                        println!("Synthesized universe {universe_id}: {} insights under {nexus}", nodes.len());
                        self.reset_focus();
                        self.selection = SelectionContext::on(nexus);
                    }
                    QueryOutcome::AwaitingConfirmation(plan) => {
                        println!("Plan ({}):", plan.reasoning);
                        for (i, task) in plan.tasks.iter().enumerate() {
                            println!("  {}. {task}", i + 1);
                        }
                        println!("Explore these in parallel? (yes/no)");
                        self.pending = Some(plan);
                    }
                }
            }
            Command::Yes => {
                let plan = self
                    .pending
                    .take()
                    .ok_or_else(|| NexusError::InvalidCommand("nothing to confirm".to_string()))?;
                let report = self.gap.confirm_plan(&mut self.workspace, plan).await?;
                for failure in &report.failures {
                    println!("  task {} ({}) failed: {}", failure.index + 1, failure.task, failure.error);
                }
                if report.is_success() {
                    println!("Merged {} of {} explorations.", report.created.len(), report.created.len() + report.failed_count());
                } else {
                    println!("Every exploration failed; nothing was added.");
                }
            }
            Command::No => {
                if self.pending.take().is_some() {
                    println!("Plan cancelled.");
                }
            }
            Command::Select(id) => {
                let title = self
                    .store()?
                    .get(&id)
                    .map(|e| e.title().to_string())
                    .ok_or_else(|| GraphError::NotFound(id.clone()))?;
                println!("Selected {id}: {title}");
                self.selection = SelectionContext::on(id);
            }
            Command::Connect(a, b) => {
                let id = self.store_mut()?.connect(&a, &b)?;
                self.workspace.save()?;
                println!("Connection {id} created; `open {id}` to explore it.");
                self.selection = SelectionContext::on(id);
            }
            Command::Open { connection, seed } => {
                let store = self.workspace.current_mut().ok_or(NexusError::NoUniverse)?;
                let mut dialogue =
                    ConnectionDialogue::new(Arc::clone(&self.llm), store, connection, &self.socratic)?;
                if dialogue.state() == DialogueState::Empty {
                    let step = dialogue.advance(store, DialogueInput::Open { seed }).await?;
                    self.workspace.save()?;
                    println!("? {}", step.question.unwrap_or_default());
                } else if let Some(node) = store.get_node(dialogue.focus()) {
                    println!("? {}", node.content);
                }
                self.selection = SelectionContext::on(dialogue.focus().clone());
                self.dialogue = Some(dialogue);
            }
            Command::Answer(text) => {
                let dialogue = self
                    .dialogue
                    .as_mut()
                    .ok_or_else(|| NexusError::InvalidCommand("no open dialogue; use `open <id>`".to_string()))?;
                let store = self.workspace.current_mut().ok_or(NexusError::NoUniverse)?;
                let step = dialogue.advance(store, DialogueInput::Answer(text)).await?;
                self.workspace.save()?;
                println!("? {}", step.question.unwrap_or_default());
                self.selection = SelectionContext::on(step.focus);
            }
            Command::End => {
                let mut dialogue = self
                    .dialogue
                    .take()
                    .ok_or_else(|| NexusError::InvalidCommand("no open dialogue".to_string()))?;
                let store = self.workspace.current_mut().ok_or(NexusError::NoUniverse)?;
                dialogue.advance(store, DialogueInput::End).await?;
                println!("Dialogue ended.");
            }
            Command::Doctrine(topic) => {
                self.workspace.save()?;
                let outcome = self.doctrine.run(&topic, &mut self.workspace).await?;
                self.reset_focus();
                println!(
                    "Doctrinal map {} built with {} cases.",
                    outcome.universe_id,
                    outcome.cases.len()
                );
                self.selection = SelectionContext::on(outcome.nexus);
            }
            Command::Move { node, parent } => {
                let moved = self.store_mut()?.reparent(&node, &parent)?;
                self.workspace.save()?;
                println!("Moved {} node(s).", moved.len());
            }
            Command::New(title) => {
                self.workspace.save()?;
                let id = self.workspace.create_universe(title).id().to_string();
                self.workspace.save()?;
                self.reset_focus();
                println!("Universe {id} created.");
            }
            Command::Load(id) => {
                self.workspace.save()?;
                let store = self.workspace.open(&id)?;
                println!("Loaded {} ({} nodes).", store.universe().title, store.node_count());
                self.reset_focus();
            }
            Command::List => {
                let library = self.workspace.library();
                let activated = library.list_activated()?;
                for (id, title) in library.list()? {
                    let mark = if activated.contains(&id) { "*" } else { " " };
                    println!("{mark} {id}  {title}");
                }
            }
            Command::Activate(id) => {
                self.workspace.library().set_activated(&id, true)?;
                println!("Activated {id}.");
            }
            Command::Deactivate(id) => {
                self.workspace.library().set_activated(&id, false)?;
                println!("Deactivated {id}.");
            }
            Command::Close => {
                self.workspace.save()?;
                self.workspace.close();
                self.reset_focus();
                println!("Universe closed.");
            }
            Command::Snapshot => {
                let snapshot = self.workspace.begin_exploration()?.ok_or(NexusError::NoUniverse)?;
                println!("Snapshot taken of {}.", snapshot.universe_id);
            }
            Command::Revert => {
                self.store()?;
                self.workspace.revert_to_snapshot()?;
                self.reset_focus();
                println!("Reverted to snapshot.");
            }
            Command::Show => println!("{}", render_tree(self.store()?)),
            Command::Help => println!("{HELP}"),
            Command::Quit => {
                self.workspace.save()?;
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn describe_event(event: &GapEvent) -> Option<String> {
    let line = match event {
        GapEvent::Analyzed { mode } => format!("analysis: {mode}"),
        GapEvent::TaskSettled { index, ok } => {
            format!("task {} {}", index + 1, if *ok { "finished" } else { "failed" })
        }
        GapEvent::NodeMerged { index, node } => format!("task {} merged as {node}", index + 1),
        GapEvent::BatchFinished { created, failed } => format!("batch: {created} merged, {failed} failed"),
        GapEvent::Error { text } => format!("error: {text}"),
        GapEvent::ContextAssembled { .. }
        | GapEvent::AwaitingConfirmation { .. }
        | GapEvent::Answered { .. }
        | GapEvent::Synthesized { .. } => return None,
    };
    Some(line)
}

/// 缩进树：每个 Nexus 及其先序后代
pub fn render_tree(store: &EntityStore) -> String {
    let mut out = format!("{} ({})", store.universe().title, store.id());
    for nexus in store.nexuses() {
        out.push_str(&format!("\n◉ {} [{}]", nexus.title, nexus.id));
        for id in store.descendants(&nexus.id) {
            let (Some(node), Some(depth)) = (store.get_node(&id), store.depth_of(&id)) else {
                continue;
            };
            out.push_str(&format!(
                "\n{}- {} [{}] ({})",
                "  ".repeat(depth),
                node.title,
                node.id,
                node.kind
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::InMemoryLibrary;
    use crate::llm::{ScriptedLlmClient, ScriptedReply};

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(
            Command::parse("ask  why is the sky blue ").unwrap(),
            Some(Command::Ask("why is the sky blue".to_string()))
        );
        assert_eq!(
            Command::parse("open node_1 in criminal law").unwrap(),
            Some(Command::Open {
                connection: EntityId::from("node_1"),
                seed: Some("in criminal law".to_string())
            })
        );
        assert_eq!(
            Command::parse("move node_2 node_1").unwrap(),
            Some(Command::Move {
                node: EntityId::from("node_2"),
                parent: EntityId::from("node_1")
            })
        );
        assert_eq!(Command::parse("Y").unwrap(), Some(Command::Yes));
        assert!(matches!(Command::parse("ask"), Err(NexusError::InvalidCommand(_))));
        assert!(matches!(Command::parse("connect a"), Err(NexusError::InvalidCommand(_))));
        assert!(matches!(Command::parse("fly"), Err(NexusError::InvalidCommand(_))));
    }

    #[tokio::test]
    async fn test_session_flow() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on("Decide whether", ScriptedReply::ok(r#"{"type":"single"}"#))
                .on("Ask the opening question", ScriptedReply::ok("How do they relate?"))
                .otherwise(ScriptedReply::ok("An answer")),
        );
        let mut cfg = AppConfig::default();
        cfg.gap.merge_delay_ms = 0;
        let mut session = Session::new(llm, Arc::new(InMemoryLibrary::new()), &cfg);

        assert!(matches!(
            session.execute(Command::Show).await,
            Err(NexusError::NoUniverse)
        ));
        session.execute(Command::New("Physics".into())).await.unwrap();
        session.execute(Command::Ask("What is energy?".into())).await.unwrap();
        let nexus = session.selection().selected.clone().unwrap();
        session.execute(Command::Ask("And work?".into())).await.unwrap();
        let node = session.selection().selected.clone().unwrap();
        assert_ne!(nexus, node);

        session.execute(Command::Connect(nexus.clone(), node)).await.unwrap();
        let conn = session.selection().selected.clone().unwrap();
        session
            .execute(Command::Open { connection: conn.clone(), seed: None })
            .await
            .unwrap();
        session.execute(Command::Answer("Work transfers energy".into())).await.unwrap();

        let store = session.workspace().current().unwrap();
        assert_eq!(store.children_of(&conn).len(), 2);
        assert_eq!(store.get_node(&conn).unwrap().content, "An answer");
        assert!(render_tree(store).contains("socratic-answer"));

        assert!(!session.execute(Command::Quit).await.unwrap());
    }

    #[tokio::test]
    async fn test_yes_without_plan_is_invalid() {
        let mut session = Session::new(
            Arc::new(ScriptedLlmClient::new()),
            Arc::new(InMemoryLibrary::new()),
            &AppConfig::default(),
        );
        assert!(matches!(
            session.execute(Command::Yes).await,
            Err(NexusError::InvalidCommand(_))
        ));
        // 错误只打印，不退出
        assert!(session.handle_line("yes").await);
    }
}
