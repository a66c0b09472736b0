//! GameSession - the primary public API for playing the game.
//!
//! This module ties the storyteller, the plugin bus, and the persistence
//! layer into a single high-level interface: create a character, start a
//! playthrough, make choices, save and load.

use crate::character::{Character, CharacterId, UserId};
use crate::persist::{GameStore, StoreError};
use crate::plugins::{
    EventPayload, Plugin, PluginRegistry, CHARACTER_CREATED, CHOICE_MADE, GAME_LOADED,
    GAME_STARTED, SCENE_GENERATED,
};
use crate::state::{GameSave, GameState, SaveId};
use crate::storyteller::{StoryChoice, StoryScene, Storyteller};
use thiserror::Error;

/// Errors from GameSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no active game for character {0}")]
    NoActiveGame(CharacterId),

    #[error("corrupted save: {0}")]
    CorruptedSave(String),
}

/// What one turn hands back to the caller: the scene to present, every
/// message plugins produced along the way, and the in-game date in its
/// `"Day N"` form.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub scene: StoryScene,
    pub messages: Vec<String>,
    pub current_date: String,
}

/// A running game engine over one storage backend.
///
/// Each method that changes the world persists the resulting state before
/// returning, so a crash after a turn never loses it.
pub struct GameSession<S: GameStore> {
    storyteller: Storyteller,
    plugins: PluginRegistry,
    store: S,
}

impl<S: GameStore> GameSession<S> {
    pub fn new(storyteller: Storyteller, store: S) -> Self {
        Self {
            storyteller,
            plugins: PluginRegistry::new(),
            store,
        }
    }

    /// Register a plugin on the session's event bus. Returns whether it
    /// was accepted (see [`PluginRegistry::register`]).
    pub fn register_plugin(&mut self, plugin: Box<dyn Plugin>) -> bool {
        self.plugins.register(plugin)
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Create a character and announce it to the plugins. Returns the
    /// character as transformed by the plugin chain, plus any messages
    /// the plugins produced (e.g. a starting-attributes greeting).
    pub fn create_character(
        &mut self,
        user_id: UserId,
        name: impl Into<String>,
    ) -> (Character, Vec<String>) {
        let character = Character::new(user_id, name);
        let payload = self
            .plugins
            .emit_event(CHARACTER_CREATED, EventPayload::new(character));
        (payload.character, payload.messages)
    }

    /// Begin a new playthrough for a character: fresh state on Day 1, an
    /// opening scene, nothing advanced on the calendar yet.
    pub async fn start_game(&mut self, character: &Character) -> Result<TurnOutcome, SessionError> {
        let state = GameState::new(character.id);

        let payload = EventPayload::new(character.clone()).with_game_state(state.clone());
        let payload = self.plugins.emit_event(GAME_STARTED, payload);
        let character_snapshot = payload.character;
        let mut state = payload.game_state.unwrap_or(state);
        let messages = payload.messages;

        let scene = self
            .storyteller
            .generate_story(&state, &character_snapshot)
            .await;
        state.advance(&scene, None, messages.clone(), GAME_STARTED, None, 0);
        self.store.save_state(&state).await?;

        tracing::info!(character = %character.id, state = %state.id, "new playthrough started");
        Ok(TurnOutcome {
            scene,
            messages,
            current_date: state.current_date.to_string(),
        })
    }

    /// Resolve a player choice into the next scene.
    ///
    /// The choice is announced to the plugins (which may adjust the
    /// character/state snapshots and emit messages), a new scene is
    /// generated, the timeline advances by the scene's duration, and the
    /// resulting state is persisted.
    pub async fn make_choice(
        &mut self,
        character: &Character,
        choice_id: &str,
    ) -> Result<TurnOutcome, SessionError> {
        let state = self.active_state(character.id).await?;
        let action = resolve_choice(&state, choice_id);

        let payload = EventPayload::new(character.clone())
            .with_game_state(state.clone())
            .with_choice(action.clone());
        let payload = self.plugins.emit_event(CHOICE_MADE, payload);
        let character_snapshot = payload.character;
        let mut state = payload.game_state.unwrap_or(state);
        let mut messages = payload.messages;

        let scene = self
            .storyteller
            .generate_story(&state, &character_snapshot)
            .await;
        let days = scene.duration_days;
        state.advance(
            &scene,
            Some(action),
            messages.clone(),
            CHOICE_MADE,
            None,
            days,
        );

        let payload = EventPayload::new(character_snapshot)
            .with_game_state(state.clone())
            .with_scene(scene.clone());
        let payload = self.plugins.emit_event(SCENE_GENERATED, payload);
        let state = payload.game_state.unwrap_or(state);
        messages.extend(payload.messages);

        self.store.save_state(&state).await?;

        Ok(TurnOutcome {
            scene,
            messages,
            current_date: state.current_date.to_string(),
        })
    }

    /// The character's active (most recently updated) game state.
    pub async fn current_state(
        &self,
        character_id: CharacterId,
    ) -> Result<GameState, SessionError> {
        self.active_state(character_id).await
    }

    /// Create a named save pointing at the character's active state.
    pub async fn save_game(
        &self,
        character: &Character,
        save_name: &str,
        save_slot: Option<u32>,
    ) -> Result<GameSave, SessionError> {
        let state = self.active_state(character.id).await?;
        let save = GameSave::new(
            character.user_id,
            character.id,
            state.id,
            save_name,
            save_slot,
        );
        self.store.create_save(&save).await?;
        tracing::info!(save = %save.id, state = %state.id, "game saved");
        Ok(save)
    }

    /// All of a user's saves, newest first.
    pub async fn list_saves(&self, user_id: UserId) -> Result<Vec<GameSave>, SessionError> {
        Ok(self.store.saves_for_user(user_id).await?)
    }

    /// Resume from a save.
    ///
    /// The scene the player left off on is rebuilt from the last history
    /// entry, so loading never costs a model call for a normal save. A
    /// save whose state has an empty history (taken before any scene was
    /// committed) regenerates an opening scene instead.
    pub async fn load_game(
        &mut self,
        character: &Character,
        save_id: SaveId,
    ) -> Result<TurnOutcome, SessionError> {
        let save = self.store.load_save(save_id).await?;
        let mut state = match self.store.load_state(save.game_state_id).await {
            Ok(state) => state,
            Err(StoreError::NotFound { .. }) => {
                return Err(SessionError::CorruptedSave(format!(
                    "save {} points at missing game state {}",
                    save.id, save.game_state_id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let scene = match state.last_event() {
            Some(event) => StoryScene {
                scene_id: event.scene_id.clone(),
                plot: event.plot.clone(),
                choices: event.choices_presented.clone(),
                duration_days: event.duration_applied_days.max(1),
            },
            None => {
                tracing::warn!(state = %state.id, "loaded state has no history, regenerating opening scene");
                let scene = self.storyteller.generate_story(&state, character).await;
                state.advance(&scene, None, Vec::new(), GAME_LOADED, None, 0);
                self.store.save_state(&state).await?;
                scene
            }
        };

        let payload = EventPayload::new(character.clone())
            .with_game_state(state.clone())
            .with_scene(scene.clone());
        let payload = self.plugins.emit_event(GAME_LOADED, payload);

        tracing::info!(save = %save.id, state = %state.id, "game loaded");
        Ok(TurnOutcome {
            scene,
            messages: payload.messages,
            current_date: state.current_date.to_string(),
        })
    }

    async fn active_state(&self, character_id: CharacterId) -> Result<GameState, SessionError> {
        self.store
            .active_state_for_character(character_id)
            .await?
            .ok_or(SessionError::NoActiveGame(character_id))
    }
}

/// Match a submitted choice id against the choices the last scene
/// actually presented. An id the scene never offered is still recorded
/// (the player's client may be ahead of the server), with a warning.
fn resolve_choice(state: &GameState, choice_id: &str) -> StoryChoice {
    state
        .last_event()
        .and_then(|e| e.choices_presented.iter().find(|c| c.id == choice_id))
        .cloned()
        .unwrap_or_else(|| {
            tracing::warn!(choice = choice_id, "choice was not among those presented");
            StoryChoice::new(choice_id, "An unlisted action")
        })
}
