use crate::conversation::ConversationLog;
use crate::error::{AppError, Result};
use crate::expansion::ExpansionState;
use crate::file_tree::{build_tree, PathTree, TreeRow};
use crate::gateway::{ChatUpdate, GeneratedProject};
use crate::models::{BrowserTarget, ConversationTurn, Project};
use crate::project_store;
use indexmap::IndexMap;
use log::{info, warn};

pub const CHAT_FAILURE_MESSAGE: &str =
    "The AI service encountered an error processing your debug request.";
pub const UPDATE_APPLIED_MESSAGE: &str = "Update applied successfully.";

/// Everything a chat request needs once the session lock is released.
#[derive(Debug, Clone)]
pub struct ChatTicket {
    pub project_id: String,
    pub history: Vec<ConversationTurn>,
    pub files: IndexMap<String, String>,
    pub browser: BrowserTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub explanation: String,
    pub updated_paths: Vec<String>,
}

/// The single active project plus its view state. Every change to the project
/// swaps in a new value; the old one is never patched in place.
#[derive(Debug, Default)]
pub struct Session {
    project: Option<Project>,
    tree: PathTree,
    expansion: ExpansionState,
    default_expansion: ExpansionState,
    log: ConversationLog,
    selected_path: Option<String>,
    generating: bool,
    chatting: bool,
}

fn greeting(project: &Project) -> ConversationTurn {
    ConversationTurn::assistant(format!(
        "Success! I've generated a production-ready {} extension: \"{}\". I have integrated all standard platform-specific security measures and Manifest V3 requirements.",
        project.browser, project.name
    ))
}

fn tree_for(project: &Project) -> Result<PathTree> {
    let paths: Vec<&str> = project.files.keys().map(String::as_str).collect();
    build_tree(&paths)
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session whose new projects open with `expansion` already applied.
    pub fn with_default_expansion(expansion: ExpansionState) -> Self {
        Self {
            expansion: expansion.clone(),
            default_expansion: expansion,
            ..Self::default()
        }
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn active_project_id(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.id.as_str())
    }

    pub fn tree(&self) -> &PathTree {
        &self.tree
    }

    pub fn expansion(&self) -> &ExpansionState {
        &self.expansion
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn selected_path(&self) -> Option<&str> {
        self.selected_path.as_deref()
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn is_chatting(&self) -> bool {
        self.chatting
    }

    pub fn visible_rows(&self) -> Vec<TreeRow> {
        self.tree.visible(&self.expansion)
    }

    pub fn begin_generation(&mut self) -> Result<()> {
        if self.generating {
            return Err(AppError::Busy("generation"));
        }
        self.generating = true;
        Ok(())
    }

    /// Installs the generated project, or leaves the current one untouched if
    /// generation or validation failed.
    pub fn finish_generation(
        &mut self,
        browser: BrowserTarget,
        outcome: Result<GeneratedProject>,
    ) -> Result<()> {
        self.generating = false;
        let generated = outcome?;
        let project = project_store::initialize(&generated.name, browser, generated.files)?;
        self.install(project)
    }

    fn install(&mut self, project: Project) -> Result<()> {
        let tree = tree_for(&project)?;
        self.selected_path = project_store::select_default_path(&project);
        self.expansion = self.default_expansion.clone();
        self.log = ConversationLog::new().append(greeting(&project));
        self.tree = tree;
        info!("Project {} is now active.", project.id);
        self.project = Some(project);
        Ok(())
    }

    /// Records the user's turn and hands back what the gateway needs. The turn
    /// stays in the log whatever happens to the request.
    pub fn begin_chat(&mut self, message: &str, history_window: usize) -> Result<ChatTicket> {
        let project = self.project.as_ref().ok_or(AppError::NoActiveProject)?;
        if self.chatting {
            return Err(AppError::Busy("chat"));
        }
        let (project_id, files, browser) =
            (project.id.clone(), project.files.clone(), project.browser);

        self.log.push(ConversationTurn::user(message));
        self.chatting = true;

        Ok(ChatTicket {
            project_id,
            history: self.log.window(history_window).to_vec(),
            files,
            browser,
        })
    }

    /// Applies a chat response to the project it was issued for. Responses for
    /// a project that is no longer active are dropped.
    pub fn finish_chat(
        &mut self,
        project_id: &str,
        outcome: Result<ChatUpdate>,
    ) -> Result<ChatOutcome> {
        self.chatting = false;
        if self.active_project_id() != Some(project_id) {
            warn!("Discarding chat response for inactive project {}.", project_id);
            return Err(AppError::StaleResponse);
        }

        let update = match outcome {
            Ok(update) => update,
            Err(e) => {
                warn!("Chat request failed: {}", e);
                self.log.push(ConversationTurn::assistant(CHAT_FAILURE_MESSAGE));
                return Err(e);
            }
        };

        let mut updated_paths: Vec<String> = Vec::new();
        if !update.updated_files.is_empty() {
            let staged = self
                .project
                .as_ref()
                .ok_or(AppError::NoActiveProject)
                .and_then(|current| project_store::merge_updates(current, &update.updated_files))
                .and_then(|merged| tree_for(&merged).map(|tree| (merged, tree)));
            let (merged, tree) = match staged {
                Ok(staged) => staged,
                Err(e) => {
                    warn!("Rejected chat update batch: {}", e);
                    self.log.push(ConversationTurn::assistant(CHAT_FAILURE_MESSAGE));
                    return Err(e);
                }
            };
            for entry in &update.updated_files {
                if !updated_paths.contains(&entry.path) {
                    updated_paths.push(entry.path.clone());
                }
            }
            self.project = Some(merged);
            self.tree = tree;
            self.expansion = self.expansion.retain_valid(self.tree.folder_paths());
            info!("Applied {} file updates to project {}.", updated_paths.len(), project_id);
        }

        let explanation = if update.explanation.trim().is_empty() {
            UPDATE_APPLIED_MESSAGE.to_string()
        } else {
            update.explanation
        };
        self.log.push(ConversationTurn::assistant(explanation.clone()));
        Ok(ChatOutcome {
            explanation,
            updated_paths,
        })
    }

    pub fn toggle(&mut self, path: &str) -> bool {
        self.expansion.toggle(path)
    }

    pub fn select(&mut self, path: &str) -> Result<()> {
        let project = self.project.as_ref().ok_or(AppError::NoActiveProject)?;
        if !project.files.contains_key(path) {
            return Err(AppError::UnknownFile(path.to_string()));
        }
        self.selected_path = Some(path.to_string());
        Ok(())
    }

    pub fn file_content(&self, path: &str) -> Result<&str> {
        let project = self.project.as_ref().ok_or(AppError::NoActiveProject)?;
        project
            .files
            .get(path)
            .map(String::as_str)
            .ok_or_else(|| AppError::UnknownFile(path.to_string()))
    }
}
