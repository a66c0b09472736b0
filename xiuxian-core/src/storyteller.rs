//! The AI storyteller: the single source of new narrative content.
//!
//! [`Storyteller::generate_story`] never fails for external reasons. The
//! model is an untrusted free-text producer, so every irregularity — an
//! unconfigured client, a dead network, malformed JSON, a wrong choice
//! count — is absorbed here and surfaced as a structurally valid fallback
//! scene tagged with the reason. Callers never see a half-scene.

use crate::character::Character;
use crate::lore::LoreStore;
use crate::state::GameState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Scene id carried by every fallback scene.
pub const FALLBACK_SCENE_ID: &str = "error_scene";

/// How many lore documents to retrieve per generation. Two keeps the
/// prompt small.
const LORE_RESULTS: usize = 2;

/// Valid range for a scene's suggested duration, in days.
const MIN_DURATION_DAYS: i64 = 1;
const MAX_DURATION_DAYS: i64 = 7;

/// Error from a story model invocation.
#[derive(Debug, Error)]
#[error("model error: {0}")]
pub struct ModelError(pub String);

/// A language model that completes a prompt into free text.
#[async_trait]
pub trait StoryModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

#[async_trait]
impl StoryModel for openai::OpenAi {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let request = openai::CompletionRequest::new(vec![openai::Message::user(prompt)])
            .with_max_tokens(1024)
            .with_temperature(0.7);
        let completion = openai::OpenAi::complete(self, request)
            .await
            .map_err(|e| ModelError(e.to_string()))?;
        Ok(completion.content)
    }
}

/// One option offered to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryChoice {
    pub id: String,
    pub text: String,
}

impl StoryChoice {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One unit of generated narrative: a plot beat, exactly three choices,
/// and a suggested in-game duration in days (1–7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryScene {
    pub scene_id: String,
    pub plot: String,
    pub choices: Vec<StoryChoice>,
    pub duration_days: u64,
}

impl StoryScene {
    /// Whether this is the designated fallback scene.
    pub fn is_fallback(&self) -> bool {
        self.scene_id == FALLBACK_SCENE_ID
    }
}

/// The fixed, always-valid scene returned when generation cannot produce
/// a trustworthy result. `reason` is embedded in the plot so the player
/// (and logs) can tell fallbacks apart.
pub fn fallback_scene(reason: &str) -> StoryScene {
    StoryScene {
        scene_id: FALLBACK_SCENE_ID.to_string(),
        plot: format!("{reason} The path ahead is unclear, but you must choose a way forward."),
        choices: vec![
            StoryChoice::new("choice_1", "Try to re-evaluate the situation."),
            StoryChoice::new("choice_2", "Push forward cautiously."),
            StoryChoice::new("choice_3", "Seek guidance or rest."),
        ],
        duration_days: 1,
    }
}

/// Generates story scenes from character/state context, lore retrieval,
/// and a language model.
pub struct Storyteller {
    model: Option<Arc<dyn StoryModel>>,
    lore: Option<LoreStore>,
}

impl Storyteller {
    /// Create a storyteller backed by the given model.
    pub fn new(model: Arc<dyn StoryModel>) -> Self {
        Self {
            model: Some(model),
            lore: None,
        }
    }

    /// Create a storyteller with no model configured (e.g. missing
    /// credential). Every generation returns the fallback scene.
    pub fn unavailable() -> Self {
        Self {
            model: None,
            lore: None,
        }
    }

    /// Attach a lore store for retrieval-grounded generation.
    pub fn with_lore(mut self, lore: LoreStore) -> Self {
        self.lore = Some(lore);
        self
    }

    /// Generate the next scene for this character and state.
    ///
    /// Always returns a valid scene; on any external failure it returns
    /// the tagged fallback instead.
    pub async fn generate_story(&self, state: &GameState, character: &Character) -> StoryScene {
        let Some(model) = &self.model else {
            tracing::warn!("story model not configured, returning fallback scene");
            return fallback_scene("The AI storyteller is currently unavailable.");
        };

        let context = self.retrieve_context(state, character).await;
        let prompt = build_prompt(state, character, &context);

        let raw = match model.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "story model invocation failed");
                return fallback_scene("There was an issue with the AI storyteller.");
            }
        };

        let parsed: Value = match serde_json::from_str(extract_json(&raw)) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, raw = raw.as_str(), "model output was not valid JSON");
                return fallback_scene("The story's path became muddled (response format error).");
            }
        };

        match scene_from_value(&parsed) {
            Some(scene) => scene,
            None => {
                tracing::warn!(raw = raw.as_str(), "model output had an invalid structure");
                fallback_scene("The story's details were unclear (response structure error).")
            }
        }
    }

    /// Retrieve background context for the prompt. Never fails: every
    /// degradation substitutes a generic context string.
    async fn retrieve_context(&self, state: &GameState, character: &Character) -> String {
        let Some(lore) = &self.lore else {
            return "No specific background knowledge available for this scene.".to_string();
        };
        if !lore.is_available() {
            return "No specific background knowledge available for this scene.".to_string();
        }

        let location = state
            .current_scene_id
            .as_deref()
            .unwrap_or("an unknown location");
        let query = format!(
            "Character: {}, Cultivation Stage: {}, Current Location/Situation: {}",
            character.name, character.cultivation_stage, location
        );

        match lore.search(&query, LORE_RESULTS).await {
            Ok(hits) => {
                let context = hits
                    .iter()
                    .map(|h| h.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                if context.trim().is_empty() {
                    "General knowledge about the world applies here.".to_string()
                } else {
                    context
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "lore search failed, using generic context");
                "The winds of fate are swirling, obscuring detailed knowledge.".to_string()
            }
        }
    }
}

/// Assemble the generation prompt: persona, serialized character, in-game
/// date, the last couple of history entries, retrieved context, and a
/// strict single-JSON-object output instruction.
fn build_prompt(state: &GameState, character: &Character, context: &str) -> String {
    let character_info =
        serde_json::to_string(character).unwrap_or_else(|_| character.name.clone());

    let history = if state.story_history.is_empty() {
        "This is the beginning of your journey.".to_string()
    } else {
        let tail = &state.story_history[state.story_history.len().saturating_sub(2)..];
        serde_json::to_string(tail).unwrap_or_else(|_| "Recent events are hazy.".to_string())
    };

    let mut prompt = String::new();
    prompt.push_str("You are an AI storyteller for a text-based cultivation (Xianxia) game.\n");
    prompt.push_str(
        "Your task is to generate the next part of the story based on the provided information.\n",
    );
    prompt.push_str(&format!("The user is playing as: {character_info}\n"));
    prompt.push_str(&format!("Current in-game date: {}\n", state.current_date));
    prompt.push_str(&format!("Recent game history (last 1-2 events): {history}\n"));
    prompt.push_str("Relevant background knowledge from the game world:\n");
    prompt.push_str(context);
    prompt.push_str("\n\n");
    prompt.push_str(
        "Please generate the output as a single, valid JSON object. Do NOT write any text outside this JSON object.\n",
    );
    prompt.push_str("The JSON object must have the following structure:\n");
    prompt.push_str(
        r#"{
  "plot": "A short, engaging plot description for the current scene. This should be 2-3 sentences long.",
  "choices": [
    {"id": "choice_1", "text": "A brief text for the first choice (10-15 words max)."},
    {"id": "choice_2", "text": "A brief text for the second choice (10-15 words max)."},
    {"id": "choice_3", "text": "A brief text for the third choice (10-15 words max)."}
  ],
  "duration_days": <an integer between 1 and 7, representing the number of in-game days this plot segment will take>
}
"#,
    );
    prompt.push_str(
        "\nEnsure the plot is concise and leads to the choices. The choices should be distinct actions the player can take.\n",
    );
    prompt.push_str(
        "Example for \"plot\": \"You arrive at the Whispering Glade, sunlight filtering through ancient trees. A faint spiritual energy emanates from a moss-covered shrine in the center.\"\n",
    );
    prompt.push_str("Example for \"duration_days\": 3\n");
    prompt
}

/// Extract the JSON portion of a model response.
///
/// Preference order: a fenced block explicitly marked as JSON, then the
/// substring between the first `{` and the last `}`, then the raw text.
fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            return &text[start..=end];
        }
    }

    text.trim()
}

/// Validate a parsed model response and build a scene from it.
///
/// Requires `plot`, `choices`, and `duration_days`; `choices` must be an
/// array of exactly three objects each carrying `id` and `text`. The
/// duration is coerced to an integer (default 1) and clamped to [1, 7].
fn scene_from_value(value: &Value) -> Option<StoryScene> {
    let object = value.as_object()?;

    let plot = object.get("plot")?.as_str()?;
    let choices = object.get("choices")?.as_array()?;
    let duration = object.get("duration_days")?;

    if choices.len() != 3 {
        return None;
    }

    let mut story_choices = Vec::with_capacity(3);
    for choice in choices {
        let choice = choice.as_object()?;
        let id = choice.get("id")?.as_str()?;
        let text = choice.get("text")?.as_str()?;
        story_choices.push(StoryChoice::new(id, text));
    }

    Some(StoryScene {
        scene_id: format!("scene_{}", Uuid::new_v4()),
        plot: plot.to_string(),
        choices: story_choices,
        duration_days: coerce_duration(duration),
    })
}

/// Best-effort numeric cast of the model-supplied duration, clamped to
/// the valid range. Anything unusable defaults to one day.
fn coerce_duration(value: &Value) -> u64 {
    let days = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(MIN_DURATION_DAYS),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(MIN_DURATION_DAYS),
        _ => MIN_DURATION_DAYS,
    };
    days.clamp(MIN_DURATION_DAYS, MAX_DURATION_DAYS) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{CharacterId, UserId};
    use crate::state::GameState;
    use std::sync::Mutex;

    struct ScriptedModel {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(response: &str) -> Self {
            Self {
                responses: Mutex::new(vec![response.to_string()]),
            }
        }
    }

    #[async_trait]
    impl StoryModel for ScriptedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            let mut responses = self.responses.lock().unwrap();
            responses
                .pop()
                .ok_or_else(|| ModelError("no scripted response".to_string()))
        }
    }

    struct DownModel;

    #[async_trait]
    impl StoryModel for DownModel {
        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            Err(ModelError("connection refused".to_string()))
        }
    }

    fn fixtures() -> (GameState, Character) {
        let character = Character::new(UserId::new(), "Li Wei");
        let state = GameState::new(character.id);
        (state, character)
    }

    fn valid_output(duration: &str) -> String {
        format!(
            r#"{{"plot": "A stranger blocks the mountain path.",
                 "choices": [
                   {{"id": "choice_1", "text": "Greet the stranger."}},
                   {{"id": "choice_2", "text": "Draw your sword."}},
                   {{"id": "choice_3", "text": "Leave the path."}}
                 ],
                 "duration_days": {duration}}}"#
        )
    }

    #[test]
    fn test_extract_json_fenced_block() {
        let text = "Here you go:\n```json\n{\"plot\": \"x\"}\n```\nthanks";
        assert_eq!(extract_json(text), "{\"plot\": \"x\"}");
    }

    #[test]
    fn test_extract_json_brace_slice() {
        let text = "Sure! {\"plot\": \"x\"} Hope that helps.";
        assert_eq!(extract_json(text), "{\"plot\": \"x\"}");
    }

    #[test]
    fn test_extract_json_raw_passthrough() {
        assert_eq!(extract_json("no braces at all"), "no braces at all");
    }

    #[test]
    fn test_fenced_block_wins_over_braces() {
        let text = "{not json} ```json\n{\"a\": 1}\n``` {also not}";
        assert_eq!(extract_json(text), "{\"a\": 1}");
    }

    #[test]
    fn test_coerce_duration() {
        assert_eq!(coerce_duration(&Value::from(3)), 3);
        assert_eq!(coerce_duration(&Value::from(0)), 1);
        assert_eq!(coerce_duration(&Value::from(-2)), 1);
        assert_eq!(coerce_duration(&Value::from(99)), 7);
        assert_eq!(coerce_duration(&Value::from(2.7)), 2);
        assert_eq!(coerce_duration(&Value::String("5".to_string())), 5);
        assert_eq!(coerce_duration(&Value::String("soon".to_string())), 1);
        assert_eq!(coerce_duration(&Value::Null), 1);
    }

    #[test]
    fn test_scene_from_value_rejects_wrong_choice_count() {
        let value: Value = serde_json::from_str(
            r#"{"plot": "x", "choices": [{"id": "a", "text": "b"}], "duration_days": 2}"#,
        )
        .unwrap();
        assert!(scene_from_value(&value).is_none());
    }

    #[test]
    fn test_scene_from_value_rejects_missing_choice_text() {
        let value: Value = serde_json::from_str(
            r#"{"plot": "x", "choices": [{"id": "a"}, {"id": "b", "text": "t"}, {"id": "c", "text": "t"}], "duration_days": 2}"#,
        )
        .unwrap();
        assert!(scene_from_value(&value).is_none());
    }

    #[tokio::test]
    async fn test_generate_valid_scene() {
        let (state, character) = fixtures();
        let teller = Storyteller::new(Arc::new(ScriptedModel::new(&valid_output("4"))));

        let scene = teller.generate_story(&state, &character).await;
        assert!(!scene.is_fallback());
        assert_eq!(scene.choices.len(), 3);
        assert_eq!(scene.duration_days, 4);
        assert!(scene.plot.contains("stranger"));
    }

    #[tokio::test]
    async fn test_generate_clamps_duration() {
        let (state, character) = fixtures();
        let teller = Storyteller::new(Arc::new(ScriptedModel::new(&valid_output("42"))));

        let scene = teller.generate_story(&state, &character).await;
        assert_eq!(scene.duration_days, 7);
    }

    #[tokio::test]
    async fn test_generate_with_markdown_wrapped_output() {
        let (state, character) = fixtures();
        let wrapped = format!("```json\n{}\n```", valid_output("2"));
        let teller = Storyteller::new(Arc::new(ScriptedModel::new(&wrapped)));

        let scene = teller.generate_story(&state, &character).await;
        assert!(!scene.is_fallback());
        assert_eq!(scene.duration_days, 2);
    }

    #[tokio::test]
    async fn test_unconfigured_model_falls_back() {
        let (state, character) = fixtures();
        let teller = Storyteller::unavailable();

        let scene = teller.generate_story(&state, &character).await;
        assert!(scene.is_fallback());
        assert!(scene.plot.contains("currently unavailable"));
        assert_eq!(scene.choices.len(), 3);
        assert_eq!(scene.duration_days, 1);
    }

    #[tokio::test]
    async fn test_model_failure_falls_back() {
        let (state, character) = fixtures();
        let teller = Storyteller::new(Arc::new(DownModel));

        let scene = teller.generate_story(&state, &character).await;
        assert!(scene.is_fallback());
        assert!(scene.plot.contains("issue with the AI storyteller"));
    }

    #[tokio::test]
    async fn test_truncated_json_falls_back() {
        let (state, character) = fixtures();
        let teller = Storyteller::new(Arc::new(ScriptedModel::new(
            r#"{"plot": "the story was cut off, "choices": ["#,
        )));

        let scene = teller.generate_story(&state, &character).await;
        assert!(scene.is_fallback());
        assert!(scene.plot.contains("format error"));
    }

    #[tokio::test]
    async fn test_missing_keys_fall_back() {
        let (state, character) = fixtures();
        let teller = Storyteller::new(Arc::new(ScriptedModel::new(
            r#"{"plot": "no choices here", "duration_days": 3}"#,
        )));

        let scene = teller.generate_story(&state, &character).await;
        assert!(scene.is_fallback());
        assert!(scene.plot.contains("structure error"));
    }

    #[tokio::test]
    async fn test_prompt_mentions_history_tail_and_date() {
        let (mut state, character) = fixtures();
        let scene = fallback_scene("Seed.");
        state.advance(&scene, None, vec![], "game_started", None, 2);

        let prompt = build_prompt(&state, &character, "some context");
        assert!(prompt.contains("Day 3"));
        assert!(prompt.contains("Seed."));
        assert!(prompt.contains("some context"));
        assert!(prompt.contains(&character.name));
    }

    #[test]
    fn test_prompt_for_fresh_state_marks_beginning() {
        let (state, character) = fixtures();
        let prompt = build_prompt(&state, &character, "ctx");
        assert!(prompt.contains("This is the beginning of your journey."));
    }
}
