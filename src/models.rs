use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => f.write_str("file"),
            NodeKind::Folder => f.write_str("folder"),
        }
    }
}

/// A node of the project file tree. `path` is the full `/`-joined path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    File {
        name: String,
        path: String,
    },
    Folder {
        name: String,
        path: String,
        children: Vec<TreeNode>,
    },
}

impl TreeNode {
    pub fn file(name: &str, path: &str) -> Self {
        TreeNode::File {
            name: name.to_string(),
            path: path.to_string(),
        }
    }

    pub fn folder(name: &str, path: &str) -> Self {
        TreeNode::Folder {
            name: name.to_string(),
            path: path.to_string(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TreeNode::File { name, .. } | TreeNode::Folder { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            TreeNode::File { path, .. } | TreeNode::Folder { path, .. } => path,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::File { .. } => NodeKind::File,
            TreeNode::Folder { .. } => NodeKind::Folder,
        }
    }

    pub fn children(&self) -> &[TreeNode] {
        match self {
            TreeNode::File { .. } => &[],
            TreeNode::Folder { children, .. } => children,
        }
    }
}

/// Browser family a generated extension targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserTarget {
    #[default]
    Chrome,
    Firefox,
    Safari,
}

impl BrowserTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserTarget::Chrome => "chrome",
            BrowserTarget::Firefox => "firefox",
            BrowserTarget::Safari => "safari",
        }
    }
}

impl fmt::Display for BrowserTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine picked in the UI. Only the Gemini engines are called directly; the
/// others are passed along as a hint while the default engine does the work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AiModel {
    #[default]
    #[serde(rename = "gemini-3-pro-preview")]
    GeminiPro,
    #[serde(rename = "gemini-3-flash-preview")]
    GeminiFlash,
    #[serde(rename = "gpt-4o-proxy")]
    OpenAiGpt4,
    #[serde(rename = "claude-3-5-sonnet-proxy")]
    ClaudeSonnet,
    #[serde(rename = "ollama-llama3-local")]
    OllamaLocal,
}

impl AiModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiModel::GeminiPro => "gemini-3-pro-preview",
            AiModel::GeminiFlash => "gemini-3-flash-preview",
            AiModel::OpenAiGpt4 => "gpt-4o-proxy",
            AiModel::ClaudeSonnet => "claude-3-5-sonnet-proxy",
            AiModel::OllamaLocal => "ollama-llama3-local",
        }
    }

    pub fn is_gemini(&self) -> bool {
        self.as_str().starts_with("gemini")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Ordered `(path, content)` pairs from a chat edit, folded left to right.
pub type FileUpdateBatch = Vec<FileEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub browser: BrowserTarget,
    pub files: IndexMap<String, String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
pub struct FileQuery {
    pub path: Option<String>,
}

#[derive(Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub browser: BrowserTarget,
    #[serde(default)]
    pub model: AiModel,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
    pub api_key: String,
}
