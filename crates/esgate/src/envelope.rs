//! ✉️ The Envelope — every answer the gateway gives, in the same four fields.
//!
//! `{success, result, error_code, error_description}`. Always. Even when the news is bad.
//! Especially when the news is bad. Callers parse one shape and branch on `error_code`.
//!
//! | code | meaning                                  |
//! |------|------------------------------------------|
//! | 700  | wrong HTTP verb for the operation        |
//! | 701  | document not found (read)                |
//! | 702  | document not found (delete)              |
//! | 703  | search matched nothing                   |
//! | 704  | database (index) does not exist          |
//! | 705  | unknown operation                        |
//! | 706  | request body is not what we expected     |
//! | 707  | path parameter missing or unparseable    |
//! | 708  | index deletion was not acknowledged      |
//! | 709  | the search engine (or the road to it) failed |

use axum::Json;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

/// 💀 Everything that can go wrong between "request received" and "envelope sent".
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("http method must be {expected}")]
    WrongMethod { expected: Method },

    #[error("not found")]
    DocumentNotFound,

    #[error("not found")]
    DeleteTargetNotFound,

    #[error("not found")]
    NoSearchHits,

    #[error("database '{0}' doesn't exist")]
    DatabaseNotFound(String),

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("missing or invalid parameter '{0}'")]
    InvalidParameter(&'static str),

    #[error("deletion of database '{0}' was not acknowledged")]
    NotAcknowledged(String),

    #[error("search engine failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn code(&self) -> u16 {
        match self {
            GatewayError::WrongMethod { .. } => 700,
            GatewayError::DocumentNotFound => 701,
            GatewayError::DeleteTargetNotFound => 702,
            GatewayError::NoSearchHits => 703,
            GatewayError::DatabaseNotFound(_) => 704,
            GatewayError::UnknownOperation(_) => 705,
            GatewayError::InvalidBody(_) => 706,
            GatewayError::InvalidParameter(_) => 707,
            GatewayError::NotAcknowledged(_) => 708,
            GatewayError::Store(_) => 709,
        }
    }

    /// 📡 Callers read the envelope, not the status line, so most errors ride on a 200.
    /// The exceptions are the ones a proxy or a human with curl should notice.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnknownOperation(_) => StatusCode::NOT_FOUND,
            GatewayError::Store(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::OK,
        }
    }
}

/// ✉️ The four-field answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub result: Value,
    pub error_code: Option<u16>,
    pub error_description: Option<String>,
}

impl Envelope {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error_code: None,
            error_description: None,
        }
    }

    pub fn from_error(err: &GatewayError) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error_code: Some(err.code()),
            error_description: Some(err.to_string()),
        }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::Store(ref cause) = self {
            error!("💀 search engine failure: {}", cause);
            for link in cause.chain().skip(1) {
                error!("⚠️  cause: {}", link);
            }
        }
        (self.status_code(), Json(Envelope::from_error(&self))).into_response()
    }
}
