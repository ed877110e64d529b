//! 宇宙图数据模型：Nexus（根）、Node（回复）、Universe（存取单元）、Snapshot（回滚点）

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 三维坐标（渲染层只读消费）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }

    pub fn sub(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }

    pub fn scale(self, k: f64) -> Vec3 {
        Vec3::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, o: Vec3) -> f64 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }

    pub fn cross(self, o: Vec3) -> Vec3 {
        Vec3::new(
            self.y * o.z - self.z * o.y,
            self.z * o.x - self.x * o.z,
            self.x * o.y - self.y * o.x,
        )
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// 单位向量；零向量返回 None
    pub fn normalized(self) -> Option<Vec3> {
        let len = self.length();
        if len < 1e-9 {
            None
        } else {
            Some(self.scale(1.0 / len))
        }
    }

    pub fn distance(self, o: Vec3) -> f64 {
        self.sub(o).length()
    }
}

/// 实体 ID：`nexus_<stamp>` 或 `node_<stamp>`，stamp 为单调递增的创建时间戳
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 解析 ID 中嵌入的创建时间戳
    pub fn stamp(&self) -> Option<i64> {
        self.0.rsplit('_').next()?.parse().ok()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Nexus 类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NexusKind {
    #[default]
    Chat,
    Academic,
    Course,
}

/// 节点类别：封闭枚举，每个消费点穷尽匹配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    #[default]
    AiResponse,
    UserReply,
    Doctrine,
    Synthesis,
    Connection,
    SocraticQuestion,
    SocraticAnswer,
}

impl NodeKind {
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::AiResponse => "ai-response",
            NodeKind::UserReply => "user-reply",
            NodeKind::Doctrine => "doctrine",
            NodeKind::Synthesis => "synthesis",
            NodeKind::Connection => "connection",
            NodeKind::SocraticQuestion => "socratic-question",
            NodeKind::SocraticAnswer => "socratic-answer",
        }
    }

    /// 由 AI 生成（而非用户输入）的内容
    pub fn is_generated(self) -> bool {
        match self {
            NodeKind::AiResponse
            | NodeKind::Doctrine
            | NodeKind::Synthesis
            | NodeKind::SocraticQuestion => true,
            NodeKind::UserReply | NodeKind::SocraticAnswer | NodeKind::Connection => false,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 节点附加信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// 回复时引用的原文片段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    /// 并行探索时对应的子任务
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// 连接节点的开场问题（content 被后续问题覆盖后仍可重建对话）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening_question: Option<String>,
    /// 综合模式下的来源宇宙
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_universes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nexus {
    pub id: EntityId,
    pub title: String,
    pub content: String,
    pub position: Vec3,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_refs: Vec<String>,
    #[serde(default)]
    pub kind: NexusKind,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: EntityId,
    pub parent_id: EntityId,
    pub content: String,
    pub title: String,
    pub position: Vec3,
    /// 计算 position 时使用的兄弟序号；同一父实体下不重复
    #[serde(default)]
    pub layout_index: usize,
    /// 子节点，按创建时间戳排序（派生数据，由 EntityStore 维护）
    #[serde(default)]
    pub child_ids: Vec<EntityId>,
    pub kind: NodeKind,
    #[serde(default)]
    pub is_connection_node: bool,
    /// 连接节点桥接的两端 [A, B]；A 同时是树父节点，B 为非拥有引用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridged_ids: Option<[EntityId; 2]>,
    #[serde(default)]
    pub metadata: NodeMetadata,
    pub created_at: i64,
}

/// 宇宙：保存 / 加载 / 回滚的单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub nexuses: Vec<Nexus>,
    #[serde(default)]
    pub nodes: BTreeMap<EntityId, Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_mode: Option<bool>,
    #[serde(default)]
    pub updated_at: i64,
}

impl Universe {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            nexuses: Vec::new(),
            nodes: BTreeMap::new(),
            course_mode: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 探索开始前捕获的不可变副本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub universe_id: String,
    pub taken_at: i64,
    pub universe: Universe,
}

impl Snapshot {
    pub fn capture(universe: &Universe) -> Self {
        Self {
            universe_id: universe.id.clone(),
            taken_at: chrono::Utc::now().timestamp_millis(),
            universe: universe.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_stamp() {
        assert_eq!(EntityId::from("node_1700000000123").stamp(), Some(1700000000123));
        assert_eq!(EntityId::from("nexus_42").stamp(), Some(42));
        assert_eq!(EntityId::from("garbage").stamp(), None);
    }

    #[test]
    fn test_node_kind_serde_is_kebab() {
        let s = serde_json::to_string(&NodeKind::SocraticQuestion).unwrap();
        assert_eq!(s, "\"socratic-question\"");
        let k: NodeKind = serde_json::from_str("\"ai-response\"").unwrap();
        assert_eq!(k, NodeKind::AiResponse);
    }

    #[test]
    fn test_vec3_ops() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(Vec3::ZERO.normalized(), None);
        assert!((Vec3::new(3.0, 4.0, 0.0).length() - 5.0).abs() < 1e-12);
    }
}
