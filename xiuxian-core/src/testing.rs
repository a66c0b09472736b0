//! Testing utilities for the game engine.
//!
//! This module provides tools for integration testing:
//! - `MockModel` for deterministic generation without API calls
//! - `StubEmbedder` for lore retrieval without API calls
//! - `MemoryStore` for persistence without touching the filesystem
//! - `TestHarness` for scripted gameplay scenarios

use crate::character::{Character, UserId};
use crate::lore::{EmbedError, Embedder};
use crate::persist::{GameStore, StoreError};
use crate::session::{GameSession, SessionError, TurnOutcome};
use crate::state::{GameSave, GameState, GameStateId, SaveId};
use crate::storyteller::{ModelError, StoryModel, Storyteller};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Build a well-formed model response with the given plot and duration.
pub fn scene_response(plot: &str, duration_days: u64) -> String {
    format!(
        r#"{{"plot": "{plot}",
  "choices": [
    {{"id": "choice_1", "text": "Investigate further."}},
    {{"id": "choice_2", "text": "Proceed with caution."}},
    {{"id": "choice_3", "text": "Turn back for now."}}
  ],
  "duration_days": {duration_days}}}"#
    )
}

/// A story model that returns scripted responses in order.
///
/// Once the script runs out, `complete` fails, which surfaces as a
/// fallback scene. Queue responses through a shared `Arc` to keep
/// scripting after the model is handed to a session.
#[derive(Default)]
pub struct MockModel {
    responses: Mutex<VecDeque<String>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response string.
    pub fn queue(&self, response: impl Into<String>) {
        lock_or_recover(&self.responses).push_back(response.into());
    }

    /// Queue a well-formed scene response.
    pub fn queue_scene(&self, plot: &str, duration_days: u64) {
        self.queue(scene_response(plot, duration_days));
    }

    /// Number of responses still queued.
    pub fn remaining(&self) -> usize {
        lock_or_recover(&self.responses).len()
    }
}

#[async_trait]
impl StoryModel for MockModel {
    async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
        lock_or_recover(&self.responses)
            .pop_front()
            .ok_or_else(|| ModelError("no more scripted responses".to_string()))
    }
}

/// Embeds text as a letter-frequency histogram: deterministic, and
/// similar strings land near each other.
pub struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0_f32; 26];
                for c in t.chars().flat_map(|c| c.to_lowercase()) {
                    if c.is_ascii_lowercase() {
                        v[(c as u8 - b'a') as usize] += 1.0;
                    }
                }
                v
            })
            .collect())
    }
}

/// In-memory [`GameStore`] for tests.
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<GameStateId, GameState>>,
    saves: Mutex<HashMap<SaveId, GameSave>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored states.
    pub fn state_count(&self) -> usize {
        lock_or_recover(&self.states).len()
    }

    /// Drop a state, simulating storage loss behind a dangling save.
    pub fn remove_state(&self, id: GameStateId) {
        lock_or_recover(&self.states).remove(&id);
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn save_state(&self, state: &GameState) -> Result<(), StoreError> {
        lock_or_recover(&self.states).insert(state.id, state.clone());
        Ok(())
    }

    async fn load_state(&self, id: GameStateId) -> Result<GameState, StoreError> {
        lock_or_recover(&self.states)
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "game state",
                id: id.to_string(),
            })
    }

    async fn active_state_for_character(
        &self,
        character_id: crate::character::CharacterId,
    ) -> Result<Option<GameState>, StoreError> {
        Ok(lock_or_recover(&self.states)
            .values()
            .filter(|s| s.character_id == character_id)
            .max_by_key(|s| s.updated_at)
            .cloned())
    }

    async fn create_save(&self, save: &GameSave) -> Result<(), StoreError> {
        lock_or_recover(&self.saves).insert(save.id, save.clone());
        Ok(())
    }

    async fn load_save(&self, id: SaveId) -> Result<GameSave, StoreError> {
        lock_or_recover(&self.saves)
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "save",
                id: id.to_string(),
            })
    }

    async fn saves_for_user(&self, user_id: UserId) -> Result<Vec<GameSave>, StoreError> {
        let mut saves: Vec<GameSave> = lock_or_recover(&self.saves)
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        saves.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(saves)
    }
}

/// Test harness for running scripted gameplay scenarios entirely in
/// memory.
pub struct TestHarness {
    /// The session under test.
    pub session: GameSession<Arc<MemoryStore>>,
    /// Handle for scripting model responses.
    pub model: Arc<MockModel>,
    /// Handle for inspecting stored data directly.
    pub store: Arc<MemoryStore>,
    /// The player everything runs as.
    pub user_id: UserId,
}

impl TestHarness {
    pub fn new() -> Self {
        let model = Arc::new(MockModel::new());
        let store = Arc::new(MemoryStore::new());
        let session = GameSession::new(
            Storyteller::new(model.clone() as Arc<dyn StoryModel>),
            store.clone(),
        );
        Self {
            session,
            model,
            store,
            user_id: UserId::new(),
        }
    }

    /// Queue a well-formed scene response.
    pub fn expect_scene(&self, plot: &str, duration_days: u64) -> &Self {
        self.model.queue_scene(plot, duration_days);
        self
    }

    /// Queue a raw (possibly malformed) model response.
    pub fn expect_raw(&self, response: impl Into<String>) -> &Self {
        self.model.queue(response);
        self
    }

    /// Create a character for the harness user.
    pub fn create_character(&mut self, name: &str) -> (Character, Vec<String>) {
        self.session.create_character(self.user_id, name)
    }

    /// Start a game, panicking on error for test brevity.
    pub async fn start(&mut self, character: &Character) -> TurnOutcome {
        self.session
            .start_game(character)
            .await
            .expect("start_game should succeed")
    }

    /// Make a choice, panicking on error for test brevity.
    pub async fn choose(&mut self, character: &Character, choice_id: &str) -> TurnOutcome {
        self.session
            .make_choice(character, choice_id)
            .await
            .expect("make_choice should succeed")
    }

    /// The character's current state.
    pub async fn state_of(&self, character: &Character) -> Result<GameState, SessionError> {
        self.session.current_state(character.id).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
