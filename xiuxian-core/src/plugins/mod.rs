//! The plugin event bus.
//!
//! Extensions observe and transform game payloads at named lifecycle
//! points without the core knowing about them. Registration order is
//! load-bearing: each plugin sees the (possibly modified) output of the
//! one before it, so a message-translation plugin can run after a
//! content-producing one. A failing plugin is logged and skipped; it can
//! never take the rest of the chain down with it.

pub mod cultivation;

use crate::character::Character;
use crate::state::GameState;
use crate::storyteller::{StoryChoice, StoryScene};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Lifecycle event names the core emits. These are part of the contract
/// other components rely on.
pub const CHARACTER_CREATED: &str = "character_created";
pub const GAME_STARTED: &str = "game_started";
pub const CHOICE_MADE: &str = "choice_made";
pub const SCENE_GENERATED: &str = "scene_generated";
pub const GAME_LOADED: &str = "game_loaded";

/// Event names the bus knows about. Emitting something else is allowed
/// (it only warns), which keeps the bus forward-compatible with new
/// event names.
pub const KNOWN_EVENTS: [&str; 5] = [
    CHARACTER_CREATED,
    GAME_STARTED,
    CHOICE_MADE,
    SCENE_GENERATED,
    GAME_LOADED,
];

/// Error raised by a plugin lifecycle hook or handler.
#[derive(Debug, Error)]
#[error("plugin error: {0}")]
pub struct PluginError(pub String);

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The shared mutable payload threaded through the plugin chain.
///
/// Snapshots, not live references: plugins transform copies, and the
/// session decides what to fold back into authoritative state.
/// `extensions` is an open map where plugins may put arbitrary keys;
/// `messages` is the channel for player-visible text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub character: Character,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_state: Option<GameState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<StoryChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<StoryScene>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub extensions: serde_json::Map<String, Value>,
}

impl EventPayload {
    pub fn new(character: Character) -> Self {
        Self {
            character,
            game_state: None,
            choice: None,
            scene: None,
            messages: Vec::new(),
            extensions: serde_json::Map::new(),
        }
    }

    pub fn with_game_state(mut self, game_state: GameState) -> Self {
        self.game_state = Some(game_state);
        self
    }

    pub fn with_choice(mut self, choice: StoryChoice) -> Self {
        self.choice = Some(choice);
        self
    }

    pub fn with_scene(mut self, scene: StoryScene) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}

/// The capability contract every extension implements.
///
/// `handle_event` either returns a replacement payload (which becomes the
/// input to the next plugin in the chain) or `None` to pass the payload
/// through unchanged.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn author(&self) -> &str {
        "Unknown"
    }

    fn description(&self) -> &str {
        ""
    }

    fn initialize(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn handle_event(
        &mut self,
        event_type: &str,
        payload: &EventPayload,
    ) -> Result<Option<EventPayload>, PluginError>;

    fn cleanup(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Holds initialized plugins in registration order and routes events
/// through them.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize and register one plugin. A failed `initialize` or a
    /// name collision skips this plugin and returns `false`; other
    /// plugins are unaffected.
    pub fn register(&mut self, mut plugin: Box<dyn Plugin>) -> bool {
        let name = plugin.name().to_string();

        if self.plugins.iter().any(|p| p.name() == name) {
            tracing::warn!(plugin = name.as_str(), "plugin name already registered, skipping");
            return false;
        }

        match plugin.initialize() {
            Ok(()) => {
                tracing::info!(
                    plugin = name.as_str(),
                    version = plugin.version(),
                    "plugin initialized"
                );
                self.plugins.push(plugin);
                true
            }
            Err(e) => {
                tracing::warn!(plugin = name.as_str(), error = %e, "plugin failed to initialize, skipping");
                false
            }
        }
    }

    /// Register a batch of plugins in order. One bad plugin never aborts
    /// the load of the others.
    pub fn load(&mut self, plugins: Vec<Box<dyn Plugin>>) {
        for plugin in plugins {
            self.register(plugin);
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Names of registered plugins in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Route an event through every plugin in registration order.
    ///
    /// Each plugin receives the payload as it stood after the previous
    /// plugin; a replacement return becomes the next plugin's input. A
    /// plugin that errors is logged and skipped, and the payload as it
    /// stood before that plugin continues down the chain. Returns the
    /// payload after the last plugin.
    pub fn emit_event(&mut self, event_type: &str, payload: EventPayload) -> EventPayload {
        if !KNOWN_EVENTS.contains(&event_type) {
            tracing::warn!(event = event_type, "emitting unknown event type");
        }

        let mut current = payload;
        for plugin in &mut self.plugins {
            match plugin.handle_event(event_type, &current) {
                Ok(Some(replacement)) => current = replacement,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        plugin = plugin.name(),
                        event = event_type,
                        error = %e,
                        "plugin failed while handling event, skipping"
                    );
                }
            }
        }
        current
    }

    /// Call `cleanup` on every plugin (tolerating individual failures)
    /// and clear the registry.
    pub fn unload_plugins(&mut self) {
        for plugin in &mut self.plugins {
            if let Err(e) = plugin.cleanup() {
                tracing::warn!(plugin = plugin.name(), error = %e, "plugin cleanup failed");
            }
        }
        self.plugins.clear();
        tracing::info!("all plugins unloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::UserId;

    struct TagPlugin {
        name: String,
    }

    impl Plugin for TagPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle_event(
            &mut self,
            _event_type: &str,
            payload: &EventPayload,
        ) -> Result<Option<EventPayload>, PluginError> {
            let mut next = payload.clone();
            next.messages.push(format!("seen by {}", self.name));
            Ok(Some(next))
        }
    }

    struct SilentPlugin;

    impl Plugin for SilentPlugin {
        fn name(&self) -> &str {
            "Silent"
        }

        fn handle_event(
            &mut self,
            _event_type: &str,
            _payload: &EventPayload,
        ) -> Result<Option<EventPayload>, PluginError> {
            Ok(None)
        }
    }

    struct FaultyPlugin;

    impl Plugin for FaultyPlugin {
        fn name(&self) -> &str {
            "Faulty"
        }

        fn handle_event(
            &mut self,
            _event_type: &str,
            _payload: &EventPayload,
        ) -> Result<Option<EventPayload>, PluginError> {
            Err(PluginError::new("deliberate failure"))
        }
    }

    struct BadInitPlugin;

    impl Plugin for BadInitPlugin {
        fn name(&self) -> &str {
            "BadInit"
        }

        fn initialize(&mut self) -> Result<(), PluginError> {
            Err(PluginError::new("cannot start"))
        }

        fn handle_event(
            &mut self,
            _event_type: &str,
            _payload: &EventPayload,
        ) -> Result<Option<EventPayload>, PluginError> {
            Ok(None)
        }
    }

    fn payload() -> EventPayload {
        EventPayload::new(Character::new(UserId::new(), "Li Wei"))
    }

    #[test]
    fn test_emit_with_no_plugins_returns_payload_unchanged() {
        let mut registry = PluginRegistry::new();
        let result = registry.emit_event(GAME_STARTED, payload());
        assert!(result.messages.is_empty());
        assert_eq!(result.character.name, "Li Wei");
    }

    #[test]
    fn test_plugins_run_in_registration_order() {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(TagPlugin {
            name: "first".to_string(),
        }));
        registry.register(Box::new(TagPlugin {
            name: "second".to_string(),
        }));

        let result = registry.emit_event(CHOICE_MADE, payload());
        assert_eq!(result.messages, vec!["seen by first", "seen by second"]);
    }

    #[test]
    fn test_faulty_plugin_does_not_break_chain() {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(TagPlugin {
            name: "before".to_string(),
        }));
        registry.register(Box::new(FaultyPlugin));
        registry.register(Box::new(TagPlugin {
            name: "after".to_string(),
        }));

        let result = registry.emit_event(CHOICE_MADE, payload());
        assert_eq!(result.messages, vec!["seen by before", "seen by after"]);
    }

    #[test]
    fn test_silent_plugin_passes_payload_through() {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(SilentPlugin));
        registry.register(Box::new(TagPlugin {
            name: "after".to_string(),
        }));

        let result = registry.emit_event(SCENE_GENERATED, payload());
        assert_eq!(result.messages, vec!["seen by after"]);
    }

    #[test]
    fn test_name_collision_skips_second_plugin() {
        let mut registry = PluginRegistry::new();
        assert!(registry.register(Box::new(TagPlugin {
            name: "dup".to_string(),
        })));
        assert!(!registry.register(Box::new(TagPlugin {
            name: "dup".to_string(),
        })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_initialize_skips_plugin() {
        let mut registry = PluginRegistry::new();
        assert!(!registry.register(Box::new(BadInitPlugin)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_event_type_still_delivered() {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(TagPlugin {
            name: "p".to_string(),
        }));
        let result = registry.emit_event("solar_eclipse", payload());
        assert_eq!(result.messages, vec!["seen by p"]);
    }

    #[test]
    fn test_unload_clears_registry() {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(SilentPlugin));
        registry.unload_plugins();
        assert!(registry.is_empty());
    }
}
