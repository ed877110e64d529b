//! Nexus - 可持久化的空间知识宇宙引擎
//!
//! 模块划分：
//! - **graph**: 实体存储（Nexus / Node 树、连接节点）与确定性空间布局
//! - **structured**: 容错的结构化响应解析
//! - **gap**: 图感知并行（GAP）编排：分析、单一 / 并行派发、按序合并、综合模式
//! - **socratic**: 连接节点上的苏格拉底式对话状态机
//! - **doctrine**: 法理图谱分阶段生成
//! - **library**: 宇宙库（保存、快照、激活集合）
//! - **llm**: 补全服务客户端抽象与实现（OpenAI 兼容 / DeepSeek / Anthropic / Mock）
//! - **core**: 工作区、错误汇总与恢复建议
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **cli**: 命令行交互会话

pub mod cli;
pub mod config;
pub mod core;
pub mod doctrine;
pub mod gap;
pub mod graph;
pub mod library;
pub mod llm;
pub mod observability;
pub mod socratic;
pub mod structured;

pub use crate::core::{NexusError, Workspace};
pub use gap::{GapOrchestrator, QueryOutcome, SelectionContext};
pub use graph::{EntityId, EntityStore};
