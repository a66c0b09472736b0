//! Engine configuration and assembly.
//!
//! [`GameConfig`] gathers the knobs an embedding application cares about
//! (model, lore directory, data directory) and builds a ready
//! [`GameSession`] from them. A missing API key degrades the storyteller
//! to fallback scenes instead of refusing to start: the game must remain
//! playable without the model.

use crate::lore::LoreStore;
use crate::persist::JsonFileStore;
use crate::session::GameSession;
use crate::storyteller::Storyteller;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable naming the directory for states and saves.
pub const DATA_DIR_VAR: &str = "XIUXIAN_DATA_DIR";

/// Environment variable naming the lore document directory.
pub const LORE_DIR_VAR: &str = "XIUXIAN_LORE_DIR";

/// Configuration for building a game session.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Chat model override; `None` uses the client default.
    pub model: Option<String>,

    /// Directory of lore documents; `None` disables retrieval.
    pub lore_dir: Option<PathBuf>,

    /// Root directory for persisted states and saves.
    pub data_dir: PathBuf,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            model: None,
            lore_dir: None,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl GameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read directory settings from the environment, leaving anything
    /// unset at its default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(DATA_DIR_VAR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(LORE_DIR_VAR) {
            config.lore_dir = Some(PathBuf::from(dir));
        }
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_lore_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lore_dir = Some(dir.into());
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Assemble a session from this configuration.
    ///
    /// Requires `OPENAI_API_KEY` for live generation; without it the
    /// storyteller runs in fallback mode and the lore index stays empty.
    pub async fn build_session(&self) -> GameSession<JsonFileStore> {
        let storyteller = match openai::OpenAi::from_env() {
            Ok(client) => {
                let client = match &self.model {
                    Some(model) => client.with_model(model.clone()),
                    None => client,
                };
                let client = Arc::new(client);
                let mut storyteller = Storyteller::new(client.clone());
                if let Some(lore_dir) = &self.lore_dir {
                    storyteller =
                        storyteller.with_lore(LoreStore::build(lore_dir, client).await);
                }
                storyteller
            }
            Err(e) => {
                tracing::warn!(error = %e, "no usable API credential, storyteller unavailable");
                Storyteller::unavailable()
            }
        };

        GameSession::new(storyteller, JsonFileStore::new(&self.data_dir))
    }
}
