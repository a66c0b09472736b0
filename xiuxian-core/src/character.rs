//! Player characters as the game core sees them.
//!
//! Characters are owned by the persistence layer; the core consumes
//! read-only snapshots and never mutates one directly. The only sanctioned
//! mutation path is a plugin transforming the character snapshot inside an
//! event payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The ordered cultivation progression. A character's `cultivation_stage`
/// is always one of these, and rank comparisons use list position.
pub const CULTIVATION_STAGES: [&str; 12] = [
    "Qi Refining 1",
    "Qi Refining 2",
    "Qi Refining 3",
    "Qi Refining 4",
    "Qi Refining 5",
    "Qi Refining 6",
    "Qi Refining 7",
    "Qi Refining 8",
    "Qi Refining 9",
    "Foundation Establishment (Early)",
    "Foundation Establishment (Mid)",
    "Foundation Establishment (Late)",
];

/// Position of a stage in the progression, if it is a known stage.
pub fn stage_index(stage: &str) -> Option<usize> {
    CULTIVATION_STAGES.iter().position(|s| *s == stage)
}

/// The stage after the given one, or `None` at the peak (or for an
/// unknown stage).
pub fn next_stage(stage: &str) -> Option<&'static str> {
    let index = stage_index(stage)?;
    CULTIVATION_STAGES.get(index + 1).copied()
}

/// Unique identifier for a character.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a player account.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A character snapshot.
///
/// `attributes` is an open map; extensions (plugins) own whatever keys
/// they put there, and the core passes them through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub user_id: UserId,
    pub name: String,
    pub cultivation_stage: String,
    pub level: u32,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

impl Character {
    /// Create a fresh level-1 character at the first cultivation stage.
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: CharacterId::new(),
            user_id,
            name: name.into(),
            cultivation_stage: CULTIVATION_STAGES[0].to_string(),
            level: 1,
            attributes: serde_json::Map::new(),
        }
    }
}
