//! Entity Store：宇宙图的唯一可变聚合
//!
//! 所有写操作同步完成，返回时保证：
//! - I1 每个节点的父链在有限跳内终止于一个 Nexus
//! - I2 不能把节点挂到自身或其后代之下
//! - I3 child_ids 恰为 parent_id 指向该实体的节点集合（按创建时间排序）
//!
//! 坐标只在创建 / 重挂时由 layout::place 计算，Nexus 除外。

use thiserror::Error;

use crate::graph::layout::{place, Level, LayoutConfig};
use crate::graph::{
    EntityId, IdClock, Nexus, NexusKind, Node, NodeKind, NodeMetadata, Universe, Vec3,
};

/// 图操作错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// 目标父节点是自身或其后代
    #[error("Reparenting {node} under {target} would create a cycle")]
    Cycle { node: EntityId, target: EntityId },

    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    #[error("Nexus {0} is a root and cannot be reparented")]
    NexusHasNoParent(EntityId),

    #[error("Invalid bridge: {0}")]
    InvalidBridge(String),

    /// 连接节点只承载自己的苏格拉底对话记录
    #[error("Connection {parent} cannot host a {kind} node")]
    ConnectionParent { parent: EntityId, kind: NodeKind },

    #[error("Universe has no nexus")]
    EmptyUniverse,

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

/// Nexus 或 Node 的只读视图
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Nexus(&'a Nexus),
    Node(&'a Node),
}

impl<'a> EntityRef<'a> {
    pub fn id(&self) -> &'a EntityId {
        match self {
            EntityRef::Nexus(n) => &n.id,
            EntityRef::Node(n) => &n.id,
        }
    }

    pub fn title(&self) -> &'a str {
        match self {
            EntityRef::Nexus(n) => &n.title,
            EntityRef::Node(n) => &n.title,
        }
    }

    pub fn content(&self) -> &'a str {
        match self {
            EntityRef::Nexus(n) => &n.content,
            EntityRef::Node(n) => &n.content,
        }
    }

    pub fn position(&self) -> Vec3 {
        match self {
            EntityRef::Nexus(n) => n.position,
            EntityRef::Node(n) => n.position,
        }
    }
}

/// add_node 参数
#[derive(Debug, Clone)]
pub struct NewNode {
    pub content: String,
    pub parent_id: EntityId,
    pub title: Option<String>,
    pub quote: Option<String>,
    pub kind: NodeKind,
    /// 显式兄弟序号；None 时取父实体当前子节点数
    pub sibling_index: Option<usize>,
    pub metadata: NodeMetadata,
}

impl NewNode {
    pub fn new(parent_id: EntityId, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            parent_id,
            title: None,
            quote: None,
            kind: NodeKind::default(),
            sibling_index: None,
            metadata: NodeMetadata::default(),
        }
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = Some(quote.into());
        self
    }

    pub fn sibling_index(mut self, index: usize) -> Self {
        self.sibling_index = Some(index);
        self
    }

    pub fn metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// 标题缺省时取内容首行前 60 个字符
pub fn derive_title(content: &str) -> String {
    let first = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    let first = first.trim_start_matches('#').trim();
    let mut title: String = first.chars().take(60).collect();
    if first.chars().count() > 60 {
        title.push('…');
    }
    title
}

/// 宇宙图聚合：持有 Universe、ID 时钟与布局参数
#[derive(Debug, Clone)]
pub struct EntityStore {
    universe: Universe,
    clock: IdClock,
    layout: LayoutConfig,
}

impl EntityStore {
    pub fn new(title: impl Into<String>, layout: LayoutConfig) -> Self {
        Self {
            universe: Universe::new(title),
            clock: IdClock::new(),
            layout,
        }
    }

    /// 接管已加载的宇宙：ID 时钟从已有最大时间戳继续，并重建 child_ids
    pub fn from_universe(universe: Universe, layout: LayoutConfig) -> Self {
        let floor = universe
            .nexuses
            .iter()
            .map(|n| n.created_at)
            .chain(universe.nodes.values().map(|n| n.created_at))
            .max()
            .unwrap_or(0);
        let mut store = Self {
            universe,
            clock: IdClock::starting_after(floor),
            layout,
        };
        store.rebuild_children();
        store
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn into_universe(self) -> Universe {
        self.universe
    }

    pub fn id(&self) -> &str {
        &self.universe.id
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.universe.title = title.into();
        self.touch();
    }

    pub fn node_count(&self) -> usize {
        self.universe.nodes.len()
    }

    pub fn nexuses(&self) -> &[Nexus] {
        &self.universe.nexuses
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.universe.nodes.values()
    }

    pub fn get_node(&self, id: &EntityId) -> Option<&Node> {
        self.universe.nodes.get(id)
    }

    pub fn get_nexus(&self, id: &EntityId) -> Option<&Nexus> {
        self.universe.nexuses.iter().find(|n| &n.id == id)
    }

    pub fn get(&self, id: &EntityId) -> Option<EntityRef<'_>> {
        self.get_node(id)
            .map(EntityRef::Node)
            .or_else(|| self.get_nexus(id).map(EntityRef::Nexus))
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    /// 宇宙的主 Nexus（第一个创建的）
    pub fn root_nexus(&self) -> Option<&Nexus> {
        self.universe.nexuses.first()
    }

    /// 沿父链找到所属 Nexus
    pub fn root_of(&self, id: &EntityId) -> Option<&Nexus> {
        let mut current = id;
        for _ in 0..=self.universe.nodes.len() {
            match self.universe.nodes.get(current) {
                Some(node) => current = &node.parent_id,
                None => return self.get_nexus(current),
            }
        }
        None
    }

    /// 到 Nexus 的跳数（Nexus 为 0）
    pub fn depth_of(&self, id: &EntityId) -> Option<usize> {
        let mut current = id;
        for depth in 0..=self.universe.nodes.len() {
            match self.universe.nodes.get(current) {
                Some(node) => current = &node.parent_id,
                None => return self.get_nexus(current).map(|_| depth),
            }
        }
        None
    }

    /// 子节点 ID，按创建时间排序
    pub fn children_of(&self, id: &EntityId) -> Vec<EntityId> {
        if let Some(node) = self.universe.nodes.get(id) {
            return node.child_ids.clone();
        }
        let mut children: Vec<&Node> = self
            .universe
            .nodes
            .values()
            .filter(|n| &n.parent_id == id)
            .collect();
        children.sort_by_key(|n| n.created_at);
        children.into_iter().map(|n| n.id.clone()).collect()
    }

    /// 全部后代（先序）
    pub fn descendants(&self, id: &EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack: Vec<EntityId> = self.children_of(id).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            stack.extend(self.children_of(&next).into_iter().rev());
            out.push(next);
        }
        out
    }

    /// 连接节点的另一端（非拥有引用，端点不存在时视为已断开）
    pub fn bridge_partner(&self, connection_id: &EntityId) -> Option<EntityRef<'_>> {
        let node = self.get_node(connection_id)?;
        let [_, b] = node.bridged_ids.as_ref()?;
        self.get(b)
    }

    pub fn create_nexus(
        &mut self,
        title: impl Into<String>,
        content: impl Into<String>,
        media_refs: Vec<String>,
    ) -> EntityId {
        self.create_nexus_of_kind(title, content, media_refs, NexusKind::Chat)
    }

    pub fn create_nexus_of_kind(
        &mut self,
        title: impl Into<String>,
        content: impl Into<String>,
        media_refs: Vec<String>,
        kind: NexusKind,
    ) -> EntityId {
        let (id, stamp) = self.clock.next_id("nexus");
        // 多个 Nexus 沿 x 轴错开，避免与已有星系重叠
        let offset = self.universe.nexuses.len() as f64 * self.layout.r1 * 4.0;
        self.universe.nexuses.push(Nexus {
            id: id.clone(),
            title: title.into(),
            content: content.into(),
            position: Vec3::new(offset, 0.0, 0.0),
            media_refs,
            kind,
            created_at: stamp,
        });
        self.touch();
        tracing::debug!(nexus = %id, "nexus created");
        id
    }

    pub fn add_node(&mut self, new: NewNode) -> Result<EntityId, GraphError> {
        self.check_host(&new.parent_id, new.kind)?;
        let parent_pos = self
            .get(&new.parent_id)
            .map(|p| p.position())
            .ok_or_else(|| GraphError::NotFound(new.parent_id.clone()))?;
        let depth = self
            .depth_of(&new.parent_id)
            .ok_or_else(|| GraphError::Invariant(format!("{} has no nexus", new.parent_id)))?;
        let nexus_pos = self
            .root_of(&new.parent_id)
            .map(|n| n.position)
            .ok_or(GraphError::EmptyUniverse)?;

        let index = new
            .sibling_index
            .unwrap_or_else(|| self.next_sibling_index(&new.parent_id));
        let position = place(
            Level::from_parent_depth(depth),
            parent_pos,
            nexus_pos,
            index,
            &self.layout,
        );

        let (id, stamp) = self.clock.next_id("node");
        let mut metadata = new.metadata;
        if new.quote.is_some() {
            metadata.quote = new.quote;
        }
        let title = new.title.unwrap_or_else(|| derive_title(&new.content));
        let node = Node {
            id: id.clone(),
            parent_id: new.parent_id.clone(),
            content: new.content,
            title,
            position,
            layout_index: index,
            child_ids: Vec::new(),
            kind: new.kind,
            is_connection_node: matches!(new.kind, NodeKind::Connection),
            bridged_ids: None,
            metadata,
            created_at: stamp,
        };
        self.universe.nodes.insert(id.clone(), node);
        if let Some(parent) = self.universe.nodes.get_mut(&new.parent_id) {
            // 新节点时间戳最大，直接追加即保持有序
            parent.child_ids.push(id.clone());
        }
        self.touch();
        tracing::debug!(node = %id, parent = %new.parent_id, index, "node added");
        Ok(id)
    }

    pub fn update_content(&mut self, id: &EntityId, text: impl Into<String>) -> Result<(), GraphError> {
        let text = text.into();
        if let Some(node) = self.universe.nodes.get_mut(id) {
            node.content = text;
        } else if let Some(nexus) = self.universe.nexuses.iter_mut().find(|n| &n.id == id) {
            nexus.content = text;
        } else {
            return Err(GraphError::NotFound(id.clone()));
        }
        self.touch();
        Ok(())
    }

    pub(crate) fn node_mut(&mut self, id: &EntityId) -> Result<&mut Node, GraphError> {
        self.universe
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NotFound(id.clone()))
    }

    /// 新父实体是否为 node_id 本身或其后代：从 target 沿 parent 链向上走并比较
    fn would_cycle(&self, node_id: &EntityId, target: &EntityId) -> bool {
        let mut current = target;
        for _ in 0..=self.universe.nodes.len() {
            if current == node_id {
                return true;
            }
            match self.universe.nodes.get(current) {
                Some(node) => current = &node.parent_id,
                None => return false,
            }
        }
        true
    }

    /// 重挂节点：校验无环后修改父子边，再按布局重新计算该节点及整棵子树的坐标。
    /// 返回坐标被改动的节点（被移动节点在前，其余为先序后代）。
    pub fn reparent(
        &mut self,
        node_id: &EntityId,
        new_parent_id: &EntityId,
    ) -> Result<Vec<EntityId>, GraphError> {
        if self.get_nexus(node_id).is_some() {
            return Err(GraphError::NexusHasNoParent(node_id.clone()));
        }
        let old_parent = self
            .get_node(node_id)
            .map(|n| n.parent_id.clone())
            .ok_or_else(|| GraphError::NotFound(node_id.clone()))?;
        if !self.contains(new_parent_id) {
            return Err(GraphError::NotFound(new_parent_id.clone()));
        }
        if self.would_cycle(node_id, new_parent_id) {
            tracing::warn!(node = %node_id, target = %new_parent_id, "reparent rejected: cycle");
            return Err(GraphError::Cycle {
                node: node_id.clone(),
                target: new_parent_id.clone(),
            });
        }
        if &old_parent == new_parent_id {
            return Ok(Vec::new());
        }
        let kind = self
            .get_node(node_id)
            .map(|n| n.kind)
            .ok_or_else(|| GraphError::NotFound(node_id.clone()))?;
        self.check_host(new_parent_id, kind)?;

        let sibling_index = self.next_sibling_index(new_parent_id);

        if let Some(parent) = self.universe.nodes.get_mut(&old_parent) {
            parent.child_ids.retain(|c| c != node_id);
        }
        let stamp = {
            let node = self.node_mut(node_id)?;
            node.parent_id = new_parent_id.clone();
            node.created_at
        };
        self.insert_child_sorted(new_parent_id, node_id, stamp);

        let mut moved = Vec::new();
        self.reparent_subtree(node_id, sibling_index, &mut moved)?;
        self.touch();
        tracing::info!(node = %node_id, from = %old_parent, to = %new_parent_id, moved = moved.len(), "subtree reparented");
        Ok(moved)
    }

    /// 重算 node_id 坐标，并递归重算子树；父子边不变，只有坐标级联
    fn reparent_subtree(
        &mut self,
        node_id: &EntityId,
        sibling_index: usize,
        moved: &mut Vec<EntityId>,
    ) -> Result<(), GraphError> {
        let parent_id = self.node_mut(node_id)?.parent_id.clone();
        let parent_pos = self
            .get(&parent_id)
            .map(|p| p.position())
            .ok_or_else(|| GraphError::NotFound(parent_id.clone()))?;
        let depth = self
            .depth_of(&parent_id)
            .ok_or_else(|| GraphError::Invariant(format!("{parent_id} has no nexus")))?;
        let nexus_pos = self
            .root_of(&parent_id)
            .map(|n| n.position)
            .ok_or(GraphError::EmptyUniverse)?;

        let position = place(
            Level::from_parent_depth(depth),
            parent_pos,
            nexus_pos,
            sibling_index,
            &self.layout,
        );
        let children = {
            let node = self.node_mut(node_id)?;
            node.position = position;
            node.layout_index = sibling_index;
            node.child_ids.clone()
        };
        moved.push(node_id.clone());

        for (index, child) in children.iter().enumerate() {
            self.reparent_subtree(child, index, moved)?;
        }
        Ok(())
    }

    /// 下一个未被占用的兄弟序号：已用最大序号 + 1
    fn next_sibling_index(&self, parent_id: &EntityId) -> usize {
        self.children_of(parent_id)
            .iter()
            .filter_map(|c| self.universe.nodes.get(c))
            .map(|n| n.layout_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// 连接节点之下只允许苏格拉底问答节点
    fn check_host(&self, parent_id: &EntityId, kind: NodeKind) -> Result<(), GraphError> {
        let hosts_transcript_only = self
            .universe
            .nodes
            .get(parent_id)
            .is_some_and(|p| p.is_connection_node);
        let allowed = matches!(kind, NodeKind::SocraticAnswer | NodeKind::SocraticQuestion);
        if hosts_transcript_only && !allowed {
            tracing::warn!(parent = %parent_id, %kind, "rejected child under connection");
            return Err(GraphError::ConnectionParent {
                parent: parent_id.clone(),
                kind,
            });
        }
        Ok(())
    }

    fn insert_child_sorted(&mut self, parent_id: &EntityId, child: &EntityId, stamp: i64) {
        let stamps: Vec<i64> = match self.universe.nodes.get(parent_id) {
            Some(parent) => parent
                .child_ids
                .iter()
                .map(|c| self.universe.nodes.get(c).map(|n| n.created_at).unwrap_or(i64::MIN))
                .collect(),
            None => return,
        };
        let at = stamps.partition_point(|s| *s < stamp);
        if let Some(parent) = self.universe.nodes.get_mut(parent_id) {
            parent.child_ids.insert(at, child.clone());
        }
    }

    /// 创建桥接 a、b 的连接节点：树父节点为 a，b 只是非拥有引用；content 初始为空
    pub fn connect(&mut self, a: &EntityId, b: &EntityId) -> Result<EntityId, GraphError> {
        if a == b {
            return Err(GraphError::InvalidBridge(format!("{a} cannot bridge to itself")));
        }
        let title_a = self.get(a).ok_or_else(|| GraphError::NotFound(a.clone()))?.title().to_string();
        let title_b = self.get(b).ok_or_else(|| GraphError::NotFound(b.clone()))?.title().to_string();

        let id = self.add_node(
            NewNode::new(a.clone(), String::new())
                .kind(NodeKind::Connection)
                .title(format!("{title_a} <-> {title_b}")),
        )?;
        let node = self.node_mut(&id)?;
        node.bridged_ids = Some([a.clone(), b.clone()]);
        tracing::info!(connection = %id, a = %a, b = %b, "entities connected");
        Ok(id)
    }

    /// 按 parent_id 重建所有 child_ids（加载外部数据后调用）
    fn rebuild_children(&mut self) {
        let mut pairs: Vec<(EntityId, EntityId, i64)> = self
            .universe
            .nodes
            .values()
            .map(|n| (n.parent_id.clone(), n.id.clone(), n.created_at))
            .collect();
        pairs.sort_by_key(|(_, _, stamp)| *stamp);
        for node in self.universe.nodes.values_mut() {
            node.child_ids.clear();
        }
        for (parent, child, _) in pairs {
            if let Some(p) = self.universe.nodes.get_mut(&parent) {
                p.child_ids.push(child);
            }
        }
    }

    /// 校验 I1 与 I3
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.universe.nodes.values() {
            if self.root_of(&node.id).is_none() {
                return Err(GraphError::Invariant(format!(
                    "{} does not reach a nexus",
                    node.id
                )));
            }
            let mut expected: Vec<&Node> = self
                .universe
                .nodes
                .values()
                .filter(|n| n.parent_id == node.id)
                .collect();
            expected.sort_by_key(|n| n.created_at);
            let expected: Vec<EntityId> = expected.into_iter().map(|n| n.id.clone()).collect();
            if expected != node.child_ids {
                return Err(GraphError::Invariant(format!(
                    "child_ids of {} out of sync",
                    node.id
                )));
            }
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.universe.updated_at = chrono::Utc::now().timestamp_millis();
    }
}
