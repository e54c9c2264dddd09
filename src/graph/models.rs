
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dimension an entity belongs to. The closed arms are the built-in
/// dimensions; `Custom` carries caller-defined ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Time,
    Location,
    Person,
    Topic,
    Action,
    Tag,
    Custom(String),
}

impl Default for EntityKind {
    fn default() -> Self {
        Self::Topic
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Time => write!(f, "time"),
            Self::Location => write!(f, "location"),
            Self::Person => write!(f, "person"),
            Self::Topic => write!(f, "topic"),
            Self::Action => write!(f, "action"),
            Self::Tag => write!(f, "tag"),
            Self::Custom(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for EntityKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "time" => Self::Time,
            "location" => Self::Location,
            "person" => Self::Person,
            "topic" => Self::Topic,
            "action" => Self::Action,
            "tag" => Self::Tag,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Atomic information unit. Read-only during retrieval; only the
/// extraction pipeline that populates the graph creates or mutates these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub entity_ids: Vec<String>,
    pub section_id: Option<String>,
}

/// Typed attribute attached to one or more events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub normalized_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Source text span an event was extracted from. Consumed only as the
/// output-join target of paragraph-mode reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub source_id: String,
    pub content: String,
}

/// A node of the bipartite entity–event graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    Entity(String),
    Event(String),
}

impl NodeId {
    pub fn raw_id(&self) -> &str {
        match self {
            Self::Entity(id) | Self::Event(id) => id,
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "entity:{}", id),
            Self::Event(id) => write!(f, "event:{}", id),
        }
    }
}

/// Which activation step produced a clue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClueStage {
    QueryKey,
    KeyEvent,
    QueryEvent,
    Expand,
}

/// Provenance record of one activation/traversal step. Built per query,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clue {
    pub stage: ClueStage,
    pub from_node: String,
    pub to_node: String,
    pub weight: f64,
}

impl Clue {
    pub fn new(stage: ClueStage, from_node: impl Into<String>, to_node: impl Into<String>, weight: f64) -> Self {
        Self {
            stage,
            from_node: from_node.into(),
            to_node: to_node.into(),
            weight,
        }
    }
}
