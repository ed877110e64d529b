//! 上下文组装：当前宇宙 + 激活宇宙的完整序列化（不压缩节点内容）

use std::collections::BTreeMap;

use serde::Serialize;

use crate::graph::{EntityId, EntityStore, NodeKind, Universe};
use crate::library::{LibraryError, UniverseLibrary};

#[derive(Debug, Clone, Serialize)]
pub struct ContextNexus {
    pub id: EntityId,
    pub title: String,
    pub content: String,
    pub children: Vec<EntityId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextNode {
    pub id: EntityId,
    pub parent_id: EntityId,
    pub title: String,
    pub content: String,
    pub kind: NodeKind,
    pub children: Vec<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridged_ids: Option<[EntityId; 2]>,
}

/// 单个宇宙的图上下文
#[derive(Debug, Clone, Serialize)]
pub struct GraphContext {
    pub universe_id: String,
    pub title: String,
    pub nexuses: Vec<ContextNexus>,
    /// 按创建时间排序
    pub nodes: Vec<ContextNode>,
}

impl GraphContext {
    pub fn from_universe(universe: &Universe) -> Self {
        let mut nexus_children: BTreeMap<&EntityId, Vec<(i64, EntityId)>> = BTreeMap::new();
        for node in universe.nodes.values() {
            nexus_children
                .entry(&node.parent_id)
                .or_default()
                .push((node.created_at, node.id.clone()));
        }

        let nexuses = universe
            .nexuses
            .iter()
            .map(|n| {
                let mut children = nexus_children.get(&n.id).cloned().unwrap_or_default();
                children.sort();
                ContextNexus {
                    id: n.id.clone(),
                    title: n.title.clone(),
                    content: n.content.clone(),
                    children: children.into_iter().map(|(_, id)| id).collect(),
                }
            })
            .collect();

        let mut nodes: Vec<_> = universe.nodes.values().collect();
        nodes.sort_by_key(|n| n.created_at);
        let nodes = nodes
            .into_iter()
            .map(|n| ContextNode {
                id: n.id.clone(),
                parent_id: n.parent_id.clone(),
                title: n.title.clone(),
                content: n.content.clone(),
                kind: n.kind,
                children: n.child_ids.clone(),
                bridged_ids: n.bridged_ids.clone(),
            })
            .collect();

        Self {
            universe_id: universe.id.clone(),
            title: universe.title.clone(),
            nexuses,
            nodes,
        }
    }

    pub fn from_store(store: &EntityStore) -> Self {
        Self::from_universe(store.universe())
    }
}

/// 一次请求的完整上下文；计算一次后在并发调用间只读共享
#[derive(Debug, Clone, Serialize)]
pub struct GapContext {
    #[serde(rename = "currentGraph")]
    pub current: Option<GraphContext>,
    #[serde(rename = "activatedGraphs")]
    pub activated: Vec<GraphContext>,
}

impl GapContext {
    /// 没有当前宇宙但至少有一个激活宇宙
    pub fn is_synthesis(&self) -> bool {
        self.current.is_none() && !self.activated.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.activated.is_empty()
    }

    pub fn activated_ids(&self) -> Vec<String> {
        self.activated.iter().map(|g| g.universe_id.clone()).collect()
    }

    /// 供 prompt 使用的 JSON 文本
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// 组装上下文：激活宇宙只读加载，缺失的跳过；与当前宇宙相同的不重复计入
pub fn build_context(
    current: Option<&EntityStore>,
    library: &dyn UniverseLibrary,
) -> Result<GapContext, LibraryError> {
    let current_ctx = current.map(GraphContext::from_store);
    let current_id = current.map(|s| s.id().to_string());

    let mut activated = Vec::new();
    for id in library.list_activated()? {
        if current_id.as_deref() == Some(id.as_str()) {
            continue;
        }
        match library.load(&id)? {
            Some(universe) => activated.push(GraphContext::from_universe(&universe)),
            None => tracing::warn!(universe = %id, "activated universe missing from library, skipped"),
        }
    }

    Ok(GapContext {
        current: current_ctx,
        activated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LayoutConfig, NewNode};
    use crate::library::InMemoryLibrary;

    #[test]
    fn test_context_keeps_full_content_and_edges() {
        let mut store = EntityStore::new("u", LayoutConfig::default());
        let nx = store.create_nexus("Topic", "root text", vec![]);
        let long = "word ".repeat(500);
        let a = store.add_node(NewNode::new(nx.clone(), long.clone())).unwrap();
        let b = store.add_node(NewNode::new(a.clone(), "child")).unwrap();

        let ctx = GraphContext::from_store(&store);
        assert_eq!(ctx.nexuses[0].children, vec![a.clone()]);
        assert_eq!(ctx.nodes[0].content, long);
        assert_eq!(ctx.nodes[0].children, vec![b.clone()]);
        assert_eq!(ctx.nodes[1].parent_id, a);
    }

    #[test]
    fn test_build_context_synthesis_and_skips() {
        let lib = InMemoryLibrary::new();
        let mut u1 = EntityStore::new("one", LayoutConfig::default());
        u1.create_nexus("A", "", vec![]);
        lib.save(u1.universe()).unwrap();
        lib.set_activated(u1.id(), true).unwrap();
        lib.set_activated("ghost", true).unwrap();

        let ctx = build_context(None, &lib).unwrap();
        assert!(ctx.is_synthesis());
        assert_eq!(ctx.activated_ids(), vec![u1.id().to_string()]);

        let with_current = build_context(Some(&u1), &lib).unwrap();
        assert!(!with_current.is_synthesis());
        assert!(with_current.activated.is_empty());
        assert!(with_current.render().contains("currentGraph"));
    }
}
