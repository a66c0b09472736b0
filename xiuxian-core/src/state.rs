//! The game timeline: one character's authoritative progression record.
//!
//! A [`GameState`] owns the append-only story history, the current scene
//! pointer, the open `game_data` map, and the in-game calendar. All
//! mutation goes through [`GameState::new`] and [`GameState::advance`];
//! history only ever grows and the date never moves backwards.

use crate::character::{CharacterId, UserId};
use crate::storyteller::{StoryChoice, StoryScene};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Unique identifier for a game state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GameStateId(pub Uuid);

impl GameStateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GameStateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GameStateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a game save.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SaveId(pub Uuid);

impl SaveId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SaveId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SaveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The in-game calendar.
///
/// Internally a plain day count; on the wire it is always the string
/// `"Day N"` for compatibility with existing stored states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GameDate {
    day: u64,
}

impl GameDate {
    /// The date every new playthrough starts on.
    pub fn start() -> Self {
        Self { day: 1 }
    }

    pub fn from_day(day: u64) -> Self {
        Self { day }
    }

    pub fn day(&self) -> u64 {
        self.day
    }

    /// Advance by a whole number of days. Zero is a no-op.
    pub fn advance(&mut self, days: u64) {
        self.day += days;
    }

    /// Parse a `"Day N"` string.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix("Day ")?;
        rest.trim().parse::<u64>().ok().map(|day| Self { day })
    }

    /// Parse leniently: an unparseable date is treated as day 0 so a
    /// subsequent advance restarts the calendar rather than failing the
    /// whole state. This is a recovery path and is logged as such.
    pub fn parse_lenient(text: &str) -> Self {
        match Self::parse(text) {
            Some(date) => date,
            None => {
                tracing::warn!(value = text, "unparseable in-game date, treating as Day 0");
                Self { day: 0 }
            }
        }
    }
}

impl std::fmt::Display for GameDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Day {}", self.day)
    }
}

impl Serialize for GameDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GameDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(GameDate::parse_lenient(&text))
    }
}

/// One committed entry of the story history.
///
/// This shape round-trips through storage unchanged; it is the durable
/// record of a single turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryEvent {
    pub scene_id: String,
    pub plot: String,
    pub choices_presented: Vec<StoryChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<StoryChoice>,
    #[serde(default)]
    pub messages: Vec<String>,
    pub event_type: String,
    pub duration_applied_days: u64,
    pub date_before_event: GameDate,
    pub date_after_event: GameDate,
}

/// The authoritative progression record for one character's playthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub id: GameStateId,
    pub character_id: CharacterId,
    pub current_scene_id: Option<String>,
    #[serde(default)]
    pub story_history: Vec<StoryEvent>,
    #[serde(default)]
    pub game_data: serde_json::Map<String, Value>,
    pub current_date: GameDate,
    /// Unix seconds of the last mutation; used to pick the active state.
    pub updated_at: u64,
}

/// The scene pointer a fresh state carries before the first generation.
pub const START_SCENE_ID: &str = "start";

impl GameState {
    /// Create the state for a new playthrough: empty history, the start
    /// sentinel scene pointer, empty game data, Day 1.
    pub fn new(character_id: CharacterId) -> Self {
        Self {
            id: GameStateId::new(),
            character_id,
            current_scene_id: Some(START_SCENE_ID.to_string()),
            story_history: Vec::new(),
            game_data: serde_json::Map::new(),
            current_date: GameDate::start(),
            updated_at: unix_timestamp(),
        }
    }

    /// Commit one turn to the timeline.
    ///
    /// Appends a [`StoryEvent`] built from `scene` (history only grows),
    /// moves the scene pointer, shallow-merges `game_data_updates` (new
    /// keys overwrite existing ones), and advances the date by
    /// `advance_days`. The event records the dates before and after the
    /// advance. `advance_days` of zero leaves the calendar untouched;
    /// negative day counts are unrepresentable here by construction.
    pub fn advance(
        &mut self,
        scene: &StoryScene,
        action_taken: Option<StoryChoice>,
        messages: Vec<String>,
        event_type: &str,
        game_data_updates: Option<serde_json::Map<String, Value>>,
        advance_days: u64,
    ) -> &StoryEvent {
        let date_before = self.current_date;
        if advance_days > 0 {
            self.current_date.advance(advance_days);
        }

        self.story_history.push(StoryEvent {
            scene_id: scene.scene_id.clone(),
            plot: scene.plot.clone(),
            choices_presented: scene.choices.clone(),
            action_taken,
            messages,
            event_type: event_type.to_string(),
            duration_applied_days: advance_days,
            date_before_event: date_before,
            date_after_event: self.current_date,
        });

        self.current_scene_id = Some(scene.scene_id.clone());

        if let Some(updates) = game_data_updates {
            for (key, value) in updates {
                self.game_data.insert(key, value);
            }
        }

        self.updated_at = unix_timestamp();
        self.story_history
            .last()
            .expect("history cannot be empty after push")
    }

    /// The most recent history entry, if any.
    pub fn last_event(&self) -> Option<&StoryEvent> {
        self.story_history.last()
    }
}

/// An immutable pointer-in-time reference to a game state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSave {
    pub id: SaveId,
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub game_state_id: GameStateId,
    pub save_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_slot: Option<u32>,
    /// Unix seconds of creation.
    pub created_at: u64,
}

impl GameSave {
    pub fn new(
        user_id: UserId,
        character_id: CharacterId,
        game_state_id: GameStateId,
        save_name: impl Into<String>,
        save_slot: Option<u32>,
    ) -> Self {
        Self {
            id: SaveId::new(),
            user_id,
            character_id,
            game_state_id,
            save_name: save_name.into(),
            save_slot,
            created_at: unix_timestamp(),
        }
    }
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scene(duration: u64) -> StoryScene {
        StoryScene {
            scene_id: "scene_test".to_string(),
            plot: "A test scene.".to_string(),
            choices: vec![
                StoryChoice::new("choice_1", "First"),
                StoryChoice::new("choice_2", "Second"),
                StoryChoice::new("choice_3", "Third"),
            ],
            duration_days: duration,
        }
    }

    #[test]
    fn test_new_state() {
        let state = GameState::new(CharacterId::new());
        assert!(state.story_history.is_empty());
        assert_eq!(state.current_scene_id.as_deref(), Some(START_SCENE_ID));
        assert_eq!(state.current_date.to_string(), "Day 1");
        assert!(state.game_data.is_empty());
    }

    #[test]
    fn test_date_parse() {
        assert_eq!(GameDate::parse("Day 42"), Some(GameDate::from_day(42)));
        assert_eq!(GameDate::parse("  Day 7 "), Some(GameDate::from_day(7)));
        assert_eq!(GameDate::parse("Tomorrow"), None);
        assert_eq!(GameDate::parse("Day ninety"), None);
    }

    #[test]
    fn test_date_parse_lenient_recovers_as_day_zero() {
        let date = GameDate::parse_lenient("the hour of the rat");
        assert_eq!(date.day(), 0);
    }

    #[test]
    fn test_date_wire_format() {
        let json = serde_json::to_string(&GameDate::from_day(9)).unwrap();
        assert_eq!(json, "\"Day 9\"");
        let back: GameDate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.day(), 9);
    }

    #[test]
    fn test_advance_appends_and_moves_date() {
        let mut state = GameState::new(CharacterId::new());
        let scene = sample_scene(3);

        let event = state
            .advance(&scene, None, vec![], "game_started", None, 3)
            .clone();

        assert_eq!(state.story_history.len(), 1);
        assert_eq!(state.current_scene_id.as_deref(), Some("scene_test"));
        assert_eq!(state.current_date.to_string(), "Day 4");
        assert_eq!(event.date_before_event.to_string(), "Day 1");
        assert_eq!(event.date_after_event.to_string(), "Day 4");
        assert_eq!(event.duration_applied_days, 3);
    }

    #[test]
    fn test_advance_zero_days_leaves_date() {
        let mut state = GameState::new(CharacterId::new());
        state.advance(&sample_scene(1), None, vec![], "game_started", None, 0);
        assert_eq!(state.current_date.to_string(), "Day 1");
    }

    #[test]
    fn test_date_monotonic_across_sequence() {
        let mut state = GameState::new(CharacterId::new());
        let mut previous = state.current_date.day();
        for days in [2, 0, 5, 1, 0, 7] {
            state.advance(&sample_scene(days), None, vec![], "choice_made", None, days);
            assert!(state.current_date.day() >= previous);
            previous = state.current_date.day();
        }
        assert_eq!(state.story_history.len(), 6);
        assert_eq!(state.current_date.day(), 1 + 2 + 5 + 1 + 7);
    }

    #[test]
    fn test_game_data_shallow_merge() {
        let mut state = GameState::new(CharacterId::new());
        let mut first = serde_json::Map::new();
        first.insert("sect".to_string(), Value::String("Azure Cloud".to_string()));
        first.insert("karma".to_string(), Value::from(1));
        state.advance(&sample_scene(1), None, vec![], "choice_made", Some(first), 1);

        let mut second = serde_json::Map::new();
        second.insert("karma".to_string(), Value::from(5));
        state.advance(&sample_scene(1), None, vec![], "choice_made", Some(second), 1);

        assert_eq!(state.game_data["sect"], Value::String("Azure Cloud".to_string()));
        assert_eq!(state.game_data["karma"], Value::from(5));
    }

    #[test]
    fn test_history_entry_round_trip() {
        let mut state = GameState::new(CharacterId::new());
        let scene = sample_scene(2);
        let action = Some(StoryChoice::new("choice_2", "Second"));
        state.advance(
            &scene,
            action,
            vec!["a plugin message".to_string()],
            "choice_made",
            None,
            2,
        );

        let event = state.last_event().unwrap().clone();
        let json = serde_json::to_string(&event).unwrap();
        let back: StoryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
