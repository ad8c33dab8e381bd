use crate::models::NodeKind;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("Malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: &'static str },

    #[error("Path '{path}' is already a {existing}; conflicting declaration ignored")]
    PathTypeCollision { path: String, existing: NodeKind },

    #[error("A project needs at least one file")]
    EmptyProject,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Credential not configured or invalid: {0}")]
    Credential(String),

    #[error("No active project")]
    NoActiveProject,

    #[error("File not found in project: {0}")]
    UnknownFile(String),

    #[error("A {0} request is already in progress")]
    Busy(&'static str),

    #[error("The active project changed before the response arrived")]
    StaleResponse,
}

impl AppError {
    /// True when the caller should re-prompt for credentials instead of retrying.
    pub fn is_credential(&self) -> bool {
        matches!(self, AppError::Credential(_))
    }

    pub fn is_generation_failure(&self) -> bool {
        matches!(self, AppError::Generation(_) | AppError::Credential(_))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MalformedPath { .. }
            | AppError::PathTypeCollision { .. }
            | AppError::EmptyProject => StatusCode::BAD_REQUEST,
            AppError::Generation(_) => StatusCode::BAD_GATEWAY,
            AppError::Credential(_) => StatusCode::UNAUTHORIZED,
            AppError::NoActiveProject | AppError::UnknownFile(_) => StatusCode::NOT_FOUND,
            AppError::Busy(_) | AppError::StaleResponse => StatusCode::CONFLICT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
            "credentialRequired": self.is_credential(),
        }))
    }
}
