//! 工作区：当前宇宙（唯一可写）+ 宇宙库
//!
//! 所有图写入都经由 `&mut Workspace` / `&mut EntityStore` 串行发生，没有内部锁。

use std::sync::Arc;

use crate::graph::{EntityStore, LayoutConfig, Snapshot};
use crate::library::{LibraryError, UniverseLibrary};

pub struct Workspace {
    current: Option<EntityStore>,
    library: Arc<dyn UniverseLibrary>,
    layout: LayoutConfig,
}

impl Workspace {
    pub fn new(library: Arc<dyn UniverseLibrary>, layout: LayoutConfig) -> Self {
        Self {
            current: None,
            library,
            layout,
        }
    }

    pub fn library(&self) -> &Arc<dyn UniverseLibrary> {
        &self.library
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn current(&self) -> Option<&EntityStore> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut EntityStore> {
        self.current.as_mut()
    }

    /// 替换当前宇宙（不自动保存旧宇宙）
    pub fn set_current(&mut self, store: EntityStore) {
        tracing::info!(universe = %store.id(), "current universe set");
        self.current = Some(store);
    }

    pub fn close(&mut self) -> Option<EntityStore> {
        self.current.take()
    }

    /// 新建空宇宙并设为当前
    pub fn create_universe(&mut self, title: impl Into<String>) -> &mut EntityStore {
        self.current.insert(EntityStore::new(title, self.layout.clone()))
    }

    /// 从宇宙库打开
    pub fn open(&mut self, universe_id: &str) -> Result<&mut EntityStore, LibraryError> {
        let universe = self
            .library
            .load(universe_id)?
            .ok_or_else(|| LibraryError::NotFound(universe_id.to_string()))?;
        tracing::info!(universe = %universe_id, nodes = universe.nodes.len(), "universe opened");
        Ok(self
            .current
            .insert(EntityStore::from_universe(universe, self.layout.clone())))
    }

    /// 整宇宙保存；没有当前宇宙时什么都不做
    pub fn save(&self) -> Result<(), LibraryError> {
        match &self.current {
            Some(store) => self.library.save(store.universe()),
            None => Ok(()),
        }
    }

    /// 开始一次探索前：保存并拍快照
    pub fn begin_exploration(&self) -> Result<Option<Snapshot>, LibraryError> {
        let Some(store) = &self.current else {
            return Ok(None);
        };
        self.library.save(store.universe())?;
        self.library.create_snapshot(store.id()).map(Some)
    }

    /// 回滚到快照并重新载入当前宇宙
    pub fn revert_to_snapshot(&mut self) -> Result<(), LibraryError> {
        let Some(id) = self.current.as_ref().map(|s| s.id().to_string()) else {
            return Ok(());
        };
        let universe = self.library.revert_to_snapshot(&id)?;
        self.current = Some(EntityStore::from_universe(universe, self.layout.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewNode;
    use crate::library::InMemoryLibrary;

    #[test]
    fn test_exploration_and_revert() {
        let mut ws = Workspace::new(Arc::new(InMemoryLibrary::new()), LayoutConfig::default());
        let store = ws.create_universe("u");
        let nx = store.create_nexus("T", "", vec![]);
        ws.begin_exploration().unwrap().unwrap();

        let store = ws.current_mut().unwrap();
        store.add_node(NewNode::new(nx.clone(), "explore 1")).unwrap();
        store.add_node(NewNode::new(nx, "explore 2")).unwrap();
        ws.save().unwrap();
        assert_eq!(ws.current().unwrap().node_count(), 2);

        ws.revert_to_snapshot().unwrap();
        assert_eq!(ws.current().unwrap().node_count(), 0);
    }

    #[test]
    fn test_open_missing() {
        let mut ws = Workspace::new(Arc::new(InMemoryLibrary::new()), LayoutConfig::default());
        assert!(matches!(ws.open("nope"), Err(LibraryError::NotFound(_))));
        assert!(ws.current().is_none());
        assert!(ws.save().is_ok());
    }
}
