use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{AiModel, BrowserTarget, ConversationTurn, FileEntry, Role};
use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

pub const FALLBACK_EXPLANATION: &str =
    "I processed your request, but couldn't format the code update.";

const CREDENTIAL_MARKERS: [&str; 3] = [
    "Requested entity was not found",
    "API key not valid",
    "API_KEY_INVALID",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedProject {
    pub name: String,
    pub files: Vec<FileEntry>,
}

/// Result of a chat turn. An empty `updated_files` means no code change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatUpdate {
    pub explanation: String,
    pub updated_files: Vec<FileEntry>,
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(
        &self,
        task: &str,
        target: BrowserTarget,
        engine: AiModel,
    ) -> Result<GeneratedProject>;

    async fn chat_edit(
        &self,
        history: &[ConversationTurn],
        current_files: &IndexMap<String, String>,
        target: BrowserTarget,
    ) -> Result<ChatUpdate>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOutcome {
    Accepted,
    Rejected,
}

pub trait CredentialProvider: Send + Sync {
    fn has_active_credential(&self) -> bool;
    fn request_credential(&self, key: &str) -> CredentialOutcome;
    fn current(&self) -> Option<String>;
    fn invalidate(&self);
}

/// In-memory API key, seeded from configuration and replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticCredential {
    key: RwLock<Option<String>>,
}

impl StaticCredential {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: RwLock::new(key.filter(|k| !k.trim().is_empty())),
        }
    }

    fn store(&self, value: Option<String>) {
        match self.key.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

impl CredentialProvider for StaticCredential {
    fn has_active_credential(&self) -> bool {
        self.current().is_some()
    }

    fn request_credential(&self, key: &str) -> CredentialOutcome {
        let key = key.trim();
        if key.is_empty() {
            return CredentialOutcome::Rejected;
        }
        self.store(Some(key.to_string()));
        info!("API credential updated.");
        CredentialOutcome::Accepted
    }

    fn current(&self) -> Option<String> {
        match self.key.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn invalidate(&self) {
        warn!("API credential marked invalid; waiting for a new key.");
        self.store(None);
    }
}

fn extension_system_prompt(target: BrowserTarget) -> String {
    format!(
        r#"You are a world-class senior browser extension engineer.
Your goal is to generate high-quality, production-ready, secure, and performant source code for a {browser} extension.

Guidelines to follow:
1. Manifest Version: Always use Manifest V3 for Chrome/Safari. Use V3 for Firefox unless V2 is specifically better for certain legacy APIs.
2. Security: Implement Content Security Policy (CSP) best practices. Avoid 'eval' or inline scripts.
3. Architecture: Use clear separation of concerns (Background Service Workers, Content Scripts, Popup UI, Options UI).
4. Styling: Use modern CSS or Tailwind CSS where applicable for UI components.
5. Safari Specifics: Ensure 'browser_specific_settings' are included for non-Chrome browsers.
6. Documentation: Include a brief README.md explaining how to load the extension.

IMPORTANT: You MUST return a JSON object with the following structure:
{{
  "name": "Project Name",
  "files": [
    {{ "path": "manifest.json", "content": "..." }},
    {{ "path": "popup/popup.html", "content": "..." }}
  ]
}}"#,
        browser = target.as_str().to_uppercase()
    )
}

fn generation_prompt(task: &str, target: BrowserTarget, engine: AiModel) -> String {
    format!(
        "Task: {}. Browser: {}. Selected Engine Simulation: {}. Generate all necessary files.",
        task,
        target,
        engine.as_str()
    )
}

fn chat_system_prompt(target: BrowserTarget, files_json: &str) -> String {
    format!(
        r#"You are an expert {target} extension debugger.
The current project files are: {files_json}.
If the user finds a bug or requests a change, you MUST provide:
1. A clear explanation of the fix.
2. The updated file contents if any code needs changing.

You MUST respond in JSON format:
{{
  "explanation": "Your text response here...",
  "updatedFiles": [
     {{ "path": "path/to/file.js", "content": "new content here..." }}
  ]
}}
If no code change is needed, return an empty array for updatedFiles."#
    )
}

fn project_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": { "type": "STRING" },
            "files": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "path": { "type": "STRING" },
                        "content": { "type": "STRING" }
                    },
                    "required": ["path", "content"]
                }
            }
        },
        "required": ["name", "files"]
    })
}

/// Maps the log onto upstream `contents`: leading assistant turns are dropped
/// and consecutive turns of the same role are merged, since the service wants
/// a user-first, alternating conversation.
fn history_contents(history: &[ConversationTurn]) -> Vec<Value> {
    let mut merged: Vec<(Role, String)> = Vec::new();
    for turn in history.iter().skip_while(|t| t.role == Role::Assistant) {
        match merged.last_mut() {
            Some((role, text)) if *role == turn.role => {
                text.push_str("\n\n");
                text.push_str(&turn.content);
            }
            _ => merged.push((turn.role, turn.content.clone())),
        }
    }
    merged
        .into_iter()
        .map(|(role, text)| {
            let role = match role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({ "role": role, "parts": [{ "text": text }] })
        })
        .collect()
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.trim_start_matches("json");
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[derive(Deserialize)]
struct RawProject {
    name: Option<String>,
    files: Option<Vec<FileEntry>>,
}

pub fn parse_generated(text: &str) -> Result<GeneratedProject> {
    let raw: RawProject = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| AppError::Generation(format!("response is not a project payload: {}", e)))?;
    let files = raw
        .files
        .ok_or_else(|| AppError::Generation("response is missing the 'files' field".into()))?;
    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| crate::project_store::DEFAULT_PROJECT_NAME.to_string());
    Ok(GeneratedProject { name, files })
}

/// Unparseable output degrades to an explanation-only update carrying the raw
/// text. A malformed `updatedFiles` list is dropped on its own, so a usable
/// explanation next to it survives.
pub fn parse_chat_update(text: &str) -> ChatUpdate {
    let payload = match serde_json::from_str::<Value>(strip_code_fence(text)) {
        Ok(Value::Object(payload)) => payload,
        Ok(_) => {
            warn!("Chat response was JSON but not an object; keeping explanation only.");
            return explanation_only(text);
        }
        Err(e) => {
            warn!("Chat response was not structured JSON ({}); keeping explanation only.", e);
            return explanation_only(text);
        }
    };

    let explanation = payload
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let updated_files = match payload.get("updatedFiles") {
        None | Some(Value::Null) => Vec::new(),
        Some(files) => serde_json::from_value::<Vec<FileEntry>>(files.clone()).unwrap_or_else(|e| {
            warn!("Dropping malformed updatedFiles in chat response: {}", e);
            Vec::new()
        }),
    };
    ChatUpdate {
        explanation,
        updated_files,
    }
}

fn explanation_only(text: &str) -> ChatUpdate {
    let explanation = match text.trim() {
        "" => FALLBACK_EXPLANATION.to_string(),
        raw => raw.to_string(),
    };
    ChatUpdate {
        explanation,
        updated_files: Vec::new(),
    }
}

fn classify_failure(status: StatusCode, body: &str) -> AppError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.trim().to_string());

    let credential_status = matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN);
    if credential_status || CREDENTIAL_MARKERS.iter().any(|m| message.contains(m)) {
        AppError::Credential(message)
    } else {
        AppError::Generation(format!("upstream returned {}: {}", status, message))
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

fn extract_text(response: GeminiResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AppError::Generation("upstream returned no text".into()));
    }
    Ok(text)
}

pub struct GeminiGateway {
    http_client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    base_url: String,
    generation_model: String,
    chat_model: String,
}

impl GeminiGateway {
    pub fn new(config: &Config, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Generation(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            credentials,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            generation_model: config.generation_model.clone(),
            chat_model: config.chat_model.clone(),
        })
    }

    async fn generate_content(&self, model: &str, body: &Value) -> Result<String> {
        let key = self
            .credentials
            .current()
            .ok_or_else(|| AppError::Credential("no API key configured".into()))?;
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!("Calling {} ...", url);
        let start_time = Instant::now();

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Generation(format!("request failed: {}", e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::Generation(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let err = classify_failure(status, &text);
            warn!("Model {} failed after {:.2?}: {}", model, start_time.elapsed(), err);
            return Err(err);
        }
        info!("Model {} answered in {:.2?}.", model, start_time.elapsed());

        let parsed: GeminiResponse = serde_json::from_str(&text)
            .map_err(|e| AppError::Generation(format!("unexpected response shape: {}", e)))?;
        extract_text(parsed)
    }
}

#[async_trait]
impl GenerationGateway for GeminiGateway {
    async fn generate(
        &self,
        task: &str,
        target: BrowserTarget,
        engine: AiModel,
    ) -> Result<GeneratedProject> {
        let model = if engine.is_gemini() {
            engine.as_str()
        } else {
            self.generation_model.as_str()
        };
        let body = json!({
            "systemInstruction": { "parts": [{ "text": extension_system_prompt(target) }] },
            "contents": [{ "role": "user", "parts": [{ "text": generation_prompt(task, target, engine) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": project_schema()
            }
        });
        let text = self.generate_content(model, &body).await?;
        parse_generated(&text)
    }

    async fn chat_edit(
        &self,
        history: &[ConversationTurn],
        current_files: &IndexMap<String, String>,
        target: BrowserTarget,
    ) -> Result<ChatUpdate> {
        let files_json = serde_json::to_string(current_files)
            .map_err(|e| AppError::Generation(format!("failed to encode project files: {}", e)))?;
        let contents = history_contents(history);
        if contents.is_empty() {
            return Err(AppError::Generation("no user message to send".into()));
        }
        let body = json!({
            "systemInstruction": { "parts": [{ "text": chat_system_prompt(target, &files_json) }] },
            "contents": contents,
            "generationConfig": { "responseMimeType": "application/json" }
        });
        let text = self.generate_content(&self.chat_model, &body).await?;
        Ok(parse_chat_update(&text))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_payload_requires_files() {
        let ok = parse_generated(r#"{"name":"Tab Saver","files":[{"path":"manifest.json","content":"{}"}]}"#)
            .expect("valid payload should parse");
        assert_eq!(ok.name, "Tab Saver");
        assert_eq!(ok.files, vec![FileEntry::new("manifest.json", "{}")]);

        let err = parse_generated(r#"{"name":"x"}"#).expect_err("missing files should fail");
        assert!(matches!(err, AppError::Generation(_)));
        assert!(parse_generated("not json").is_err());
    }

    #[test]
    fn generated_payload_defaults_name_and_strips_fence() {
        let text = "```json\n{\"files\":[{\"path\":\"a.js\",\"content\":\"\"}]}\n```";
        let parsed = parse_generated(text).expect("fenced payload should parse");
        assert_eq!(parsed.name, "My Extension");
        assert_eq!(parsed.files.len(), 1);
    }

    #[test]
    fn chat_update_parses_structured_payload() {
        let update = parse_chat_update(
            r#"{"explanation":"Fixed it","updatedFiles":[{"path":"background.js","content":"v2"}]}"#,
        );
        assert_eq!(update.explanation, "Fixed it");
        assert_eq!(update.updated_files, vec![FileEntry::new("background.js", "v2")]);

        let no_change = parse_chat_update(r#"{"explanation":"Looks fine","updatedFiles":null}"#);
        assert!(no_change.updated_files.is_empty());
    }

    #[test]
    fn chat_update_falls_back_to_explanation_only() {
        let update = parse_chat_update("Sorry, here is prose instead of JSON.");
        assert_eq!(update.explanation, "Sorry, here is prose instead of JSON.");
        assert!(update.updated_files.is_empty());

        assert_eq!(parse_chat_update("  ").explanation, FALLBACK_EXPLANATION);
        assert_eq!(parse_chat_update(r#""just a string""#).explanation, r#""just a string""#);
    }

    #[test]
    fn malformed_file_list_keeps_explanation() {
        let update = parse_chat_update(
            r#"{"explanation":"Fixed the popup","updatedFiles":[{"path":"a.js"}]}"#,
        );
        assert_eq!(update.explanation, "Fixed the popup");
        assert!(update.updated_files.is_empty());

        let wrong_shape = parse_chat_update(r#"{"explanation":"Renamed it","updatedFiles":"a.js"}"#);
        assert_eq!(wrong_shape.explanation, "Renamed it");
        assert!(wrong_shape.updated_files.is_empty());
    }

    #[test]
    fn credential_failures_are_distinguished() {
        let not_found = r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND"}}"#;
        assert!(classify_failure(StatusCode::NOT_FOUND, not_found).is_credential());
        assert!(classify_failure(StatusCode::FORBIDDEN, "denied").is_credential());

        let overloaded = classify_failure(StatusCode::SERVICE_UNAVAILABLE, r#"{"error":{"message":"overloaded"}}"#);
        assert_eq!(
            overloaded,
            AppError::Generation("upstream returned 503 Service Unavailable: overloaded".into())
        );
    }

    #[test]
    fn history_is_user_first_and_alternating() {
        let history = vec![
            ConversationTurn::assistant("Success!"),
            ConversationTurn::user("popup is blank"),
            ConversationTurn::assistant("error"),
            ConversationTurn::user("try again"),
            ConversationTurn::user("please"),
        ];
        let contents = history_contents(&history);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "try again\n\nplease");
    }

    #[test]
    fn empty_response_text_is_a_generation_failure() {
        let response: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).expect("valid json");
        assert!(matches!(extract_text(response), Err(AppError::Generation(_))));

        let response: GeminiResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}]}}]}"#)
                .expect("valid json");
        assert_eq!(extract_text(response).expect("text present"), "{\"a\":1}");
    }

    #[test]
    fn static_credential_lifecycle() {
        let credential = StaticCredential::new(Some("  ".into()));
        assert!(!credential.has_active_credential());
        assert_eq!(credential.request_credential(""), CredentialOutcome::Rejected);
        assert_eq!(credential.request_credential(" key-1 "), CredentialOutcome::Accepted);
        assert_eq!(credential.current().as_deref(), Some("key-1"));
        credential.invalidate();
        assert!(!credential.has_active_credential());
    }

    #[actix_rt::test]
    async fn missing_key_fails_before_any_request() {
        let config = Config::default();
        let gateway = GeminiGateway::new(&config, Arc::new(StaticCredential::new(None)))
            .expect("client should build");
        let err = gateway
            .generate("block ads", BrowserTarget::Chrome, AiModel::GeminiPro)
            .await
            .expect_err("missing key should fail");
        assert!(err.is_credential());
    }
}
