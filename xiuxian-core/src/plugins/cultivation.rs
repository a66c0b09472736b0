//! The built-in cultivation progression plugin.
//!
//! Tracks per-character progress toward the next cultivation stage.
//! Progress and spiritual power live under the `"cultivation"` key of the
//! character's open attribute map; the stage itself is the character's
//! `cultivation_stage`. Choices grant progress through a
//! `"cultivation_gain"` number in the event payload's extensions.

use super::{EventPayload, Plugin, PluginError, CHARACTER_CREATED, CHOICE_MADE};
use crate::character::{next_stage, stage_index, CULTIVATION_STAGES};
use serde_json::{json, Value};

/// Progress required in a stage before breaking through to the next.
pub const STAGE_MAX_PROGRESS: f64 = 100.0;

/// Spiritual power granted at character creation and again at each
/// breakthrough.
pub const SPIRITUAL_POWER_STEP: f64 = 50.0;

/// Extensions key a choice (or another plugin) uses to grant progress.
pub const CULTIVATION_GAIN_KEY: &str = "cultivation_gain";

const CULTIVATION_KEY: &str = "cultivation";

#[derive(Default)]
pub struct CultivationPlugin;

impl CultivationPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for CultivationPlugin {
    fn name(&self) -> &str {
        "BasicCultivation"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn author(&self) -> &str {
        "XiuXian Games"
    }

    fn description(&self) -> &str {
        "Manages cultivation stages and progression."
    }

    fn handle_event(
        &mut self,
        event_type: &str,
        payload: &EventPayload,
    ) -> Result<Option<EventPayload>, PluginError> {
        match event_type {
            CHARACTER_CREATED => Ok(Some(on_character_created(payload))),
            CHOICE_MADE => on_choice_made(payload),
            _ => Ok(None),
        }
    }
}

fn on_character_created(payload: &EventPayload) -> EventPayload {
    let mut next = payload.clone();
    next.character.cultivation_stage = CULTIVATION_STAGES[0].to_string();
    next.character.attributes.insert(
        CULTIVATION_KEY.to_string(),
        json!({
            "progress": 0.0,
            "spiritual_power": SPIRITUAL_POWER_STEP,
        }),
    );
    next.messages.push(format!(
        "You sense the flow of qi within you and step onto the path of {}.",
        CULTIVATION_STAGES[0]
    ));
    next
}

fn on_choice_made(payload: &EventPayload) -> Result<Option<EventPayload>, PluginError> {
    let gain = match payload.extensions.get(CULTIVATION_GAIN_KEY) {
        Some(value) => match value.as_f64() {
            Some(gain) => gain,
            None => {
                tracing::warn!(value = %value, "ignoring non-numeric cultivation_gain");
                return Ok(None);
            }
        },
        None => return Ok(None),
    };

    let mut next = payload.clone();

    // An unknown stage (bad data, or content from a removed extension) is
    // reset to the start of the progression rather than poisoning math.
    let stage = next.character.cultivation_stage.clone();
    let stage = match stage_index(&stage) {
        Some(_) => stage,
        None => {
            tracing::warn!(stage = stage.as_str(), "unknown cultivation stage, resetting");
            next.character.cultivation_stage = CULTIVATION_STAGES[0].to_string();
            CULTIVATION_STAGES[0].to_string()
        }
    };

    let cult = cultivation_entry(&mut next.character.attributes);
    let mut progress = cult
        .get("progress")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        + gain;

    next.messages.push(format!(
        "Your cultivation deepens. Progress: {}/{}.",
        progress, STAGE_MAX_PROGRESS
    ));

    if progress >= STAGE_MAX_PROGRESS {
        if let Some(new_stage) = next_stage(&stage) {
            progress = (progress - STAGE_MAX_PROGRESS).max(0.0);
            let spiritual_power = cult
                .get("spiritual_power")
                .and_then(Value::as_f64)
                .unwrap_or(SPIRITUAL_POWER_STEP)
                + SPIRITUAL_POWER_STEP;
            cult.insert("spiritual_power".to_string(), json!(spiritual_power));
            next.character.cultivation_stage = new_stage.to_string();
            next.messages.push(format!(
                "Breakthrough! You have advanced to {}!",
                new_stage
            ));
        } else {
            // Peak of the progression: progress caps, no further stages.
            progress = STAGE_MAX_PROGRESS;
            next.messages.push(
                "Your cultivation has reached the peak of this realm. Seek a new opportunity to break through!"
                    .to_string(),
            );
        }
    }

    let cult = cultivation_entry(&mut next.character.attributes);
    cult.insert("progress".to_string(), json!(progress));

    Ok(Some(next))
}

/// The `"cultivation"` object in the attribute map, created if absent or
/// not an object.
fn cultivation_entry(
    attributes: &mut serde_json::Map<String, Value>,
) -> &mut serde_json::Map<String, Value> {
    let value = attributes
        .entry(CULTIVATION_KEY)
        .or_insert_with(|| json!({}));
    if !value.is_object() {
        *value = json!({});
    }
    match value.as_object_mut() {
        Some(map) => map,
        // Just made it an object above.
        None => unreachable!(),
    }
}
