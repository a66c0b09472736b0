//! Persistence for game states and save slots.
//!
//! The [`GameStore`] trait is the seam between the session layer and
//! storage; [`JsonFileStore`] is the production implementation, one
//! pretty-printed JSON file per record under `states/` and `saves/`.

use crate::character::{CharacterId, UserId};
use crate::state::{GameSave, GameState, GameStateId, SaveId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("corrupted record: {0}")]
    Corrupted(String),
}

impl StoreError {
    fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Storage backend for game states and saves.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Persist a game state, overwriting any previous version of it.
    async fn save_state(&self, state: &GameState) -> Result<(), StoreError>;

    async fn load_state(&self, id: GameStateId) -> Result<GameState, StoreError>;

    /// The most recently updated state for a character, if any.
    async fn active_state_for_character(
        &self,
        character_id: CharacterId,
    ) -> Result<Option<GameState>, StoreError>;

    /// Persist a save record pointing at a state.
    async fn create_save(&self, save: &GameSave) -> Result<(), StoreError>;

    async fn load_save(&self, id: SaveId) -> Result<GameSave, StoreError>;

    /// All saves belonging to a user, newest first.
    async fn saves_for_user(&self, user_id: UserId) -> Result<Vec<GameSave>, StoreError>;
}

// A session can share its store with test code or another session.
#[async_trait]
impl<S: GameStore + ?Sized> GameStore for std::sync::Arc<S> {
    async fn save_state(&self, state: &GameState) -> Result<(), StoreError> {
        (**self).save_state(state).await
    }

    async fn load_state(&self, id: GameStateId) -> Result<GameState, StoreError> {
        (**self).load_state(id).await
    }

    async fn active_state_for_character(
        &self,
        character_id: CharacterId,
    ) -> Result<Option<GameState>, StoreError> {
        (**self).active_state_for_character(character_id).await
    }

    async fn create_save(&self, save: &GameSave) -> Result<(), StoreError> {
        (**self).create_save(save).await
    }

    async fn load_save(&self, id: SaveId) -> Result<GameSave, StoreError> {
        (**self).load_save(id).await
    }

    async fn saves_for_user(&self, user_id: UserId) -> Result<Vec<GameSave>, StoreError> {
        (**self).saves_for_user(user_id).await
    }
}

/// File-backed store rooted at a directory.
///
/// States live under `<root>/states/<id>.json` and saves under
/// `<root>/saves/<id>.json`. Directories are created on first write.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn states_dir(&self) -> PathBuf {
        self.root.join("states")
    }

    fn saves_dir(&self) -> PathBuf {
        self.root.join("saves")
    }

    fn state_path(&self, id: GameStateId) -> PathBuf {
        self.states_dir().join(format!("{id}.json"))
    }

    fn save_path(&self, id: SaveId) -> PathBuf {
        self.saves_dir().join(format!("{id}.json"))
    }
}

async fn write_record<T: serde::Serialize>(
    dir: &Path,
    path: &Path,
    record: &T,
) -> Result<(), StoreError> {
    fs::create_dir_all(dir).await?;
    let content = serde_json::to_string_pretty(record)
        .map_err(|e| StoreError::Corrupted(e.to_string()))?;
    fs::write(path, content).await?;
    Ok(())
}

async fn read_record<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content)
        .map_err(|e| StoreError::Corrupted(format!("{}: {e}", path.display())))
}

/// Read every well-formed JSON record in a directory. A missing directory
/// reads as empty; unparseable files are skipped with a warning so one
/// bad record cannot hide the rest.
async fn read_all_records<T: serde::de::DeserializeOwned>(
    dir: &Path,
) -> Result<Vec<T>, StoreError> {
    let mut records = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.extension().map(|e| e == "json").unwrap_or(false) {
            continue;
        }
        match read_record::<T>(&path).await {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl GameStore for JsonFileStore {
    async fn save_state(&self, state: &GameState) -> Result<(), StoreError> {
        write_record(&self.states_dir(), &self.state_path(state.id), state).await
    }

    async fn load_state(&self, id: GameStateId) -> Result<GameState, StoreError> {
        match read_record(&self.state_path(id)).await {
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found("game state", id))
            }
            other => other,
        }
    }

    async fn active_state_for_character(
        &self,
        character_id: CharacterId,
    ) -> Result<Option<GameState>, StoreError> {
        let states: Vec<GameState> = read_all_records(&self.states_dir()).await?;
        Ok(states
            .into_iter()
            .filter(|s| s.character_id == character_id)
            .max_by_key(|s| s.updated_at))
    }

    async fn create_save(&self, save: &GameSave) -> Result<(), StoreError> {
        write_record(&self.saves_dir(), &self.save_path(save.id), save).await
    }

    async fn load_save(&self, id: SaveId) -> Result<GameSave, StoreError> {
        match read_record(&self.save_path(id)).await {
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found("save", id))
            }
            other => other,
        }
    }

    async fn saves_for_user(&self, user_id: UserId) -> Result<Vec<GameSave>, StoreError> {
        let mut saves: Vec<GameSave> = read_all_records(&self.saves_dir()).await?;
        saves.retain(|s| s.user_id == user_id);
        saves.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(saves)
    }
}
