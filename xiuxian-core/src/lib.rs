//! Narrative engine for a text-based cultivation (Xianxia) game.
//!
//! This crate provides:
//! - An AI storyteller that turns character and timeline context into
//!   scenes with exactly three choices, hardened against malformed model
//!   output
//! - Semantic lore retrieval for grounding scenes in world documents
//! - An ordered plugin event bus with per-plugin failure isolation
//! - An append-only game timeline on a `"Day N"` calendar
//! - JSON-file persistence for states and save slots
//!
//! # Quick Start
//!
//! ```ignore
//! use xiuxian_core::{CultivationPlugin, GameConfig, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = GameConfig::from_env().build_session().await;
//!     session.register_plugin(Box::new(CultivationPlugin::new()));
//!
//!     let (character, _) = session.create_character(UserId::new(), "Li Wei");
//!     let outcome = session.start_game(&character).await?;
//!     println!("{}", outcome.scene.plot);
//!
//!     let outcome = session.make_choice(&character, "choice_1").await?;
//!     println!("[{}] {}", outcome.current_date, outcome.scene.plot);
//!     Ok(())
//! }
//! ```

pub mod character;
pub mod config;
pub mod lore;
pub mod persist;
pub mod plugins;
pub mod session;
pub mod state;
pub mod storyteller;
pub mod testing;

// Primary public API
pub use character::{Character, CharacterId, UserId, CULTIVATION_STAGES};
pub use config::GameConfig;
pub use lore::{LoreHit, LoreStore};
pub use persist::{GameStore, JsonFileStore, StoreError};
pub use plugins::cultivation::CultivationPlugin;
pub use plugins::{EventPayload, Plugin, PluginError, PluginRegistry};
pub use session::{GameSession, SessionError, TurnOutcome};
pub use state::{GameDate, GameSave, GameState, GameStateId, SaveId, StoryEvent};
pub use storyteller::{StoryChoice, StoryModel, StoryScene, Storyteller};
pub use testing::{MemoryStore, MockModel, TestHarness};
