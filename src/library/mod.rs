//! 宇宙库：保存 / 加载 / 快照 / 回滚 / 激活集合
//!
//! 编排器只读访问激活的宇宙；只有当前宇宙会被写回。

pub mod file;
pub mod memory;

use thiserror::Error;

use crate::graph::{Snapshot, Universe};

pub use file::JsonDirLibrary;
pub use memory::InMemoryLibrary;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Universe not found: {0}")]
    NotFound(String),

    #[error("No snapshot for universe {0}")]
    NoSnapshot(String),

    #[error("Library I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Library serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// 宇宙库 trait：整宇宙原子保存，不做细粒度增量
pub trait UniverseLibrary: Send + Sync {
    fn save(&self, universe: &Universe) -> Result<(), LibraryError>;

    fn load(&self, universe_id: &str) -> Result<Option<Universe>, LibraryError>;

    /// 对已保存的宇宙做深拷贝快照（覆盖旧快照）
    fn create_snapshot(&self, universe_id: &str) -> Result<Snapshot, LibraryError>;

    /// 用快照覆盖已保存的宇宙，返回恢复后的宇宙
    fn revert_to_snapshot(&self, universe_id: &str) -> Result<Universe, LibraryError>;

    fn list_activated(&self) -> Result<Vec<String>, LibraryError>;

    fn set_activated(&self, universe_id: &str, active: bool) -> Result<(), LibraryError>;

    /// 全部已保存宇宙的 (id, title)
    fn list(&self) -> Result<Vec<(String, String)>, LibraryError>;
}
