// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Structured API errors and the catalog they are loaded from.
//!
//! The catalog is a JSON array of `{code, title, description, httpCode}`
//! objects loaded once at startup. Rejections are answered by looking up a
//! stable code in the catalog; the only entry ever built ad hoc is the generic
//! `INTERNAL_ERROR` fallback.

use std::{collections::HashMap, path::Path, sync::Arc};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::auth::AuthErrorKind;

/// Code of the generic fallback entry.
pub const INTERNAL_ERROR_CODE: &str = "INTERNAL_ERROR";

const BUILTIN_CATALOG: &str = include_str!("../errors.json");

/// A structured error returned to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ApiError {
    /// Stable machine-readable identifier
    pub code: String,
    pub title: String,
    pub description: String,
    /// HTTP status code sent with the error
    #[serde(rename = "httpCode")]
    pub http_status_code: u16,
    /// Canonical reason phrase of `httpCode`
    #[serde(rename = "httpStatusMessage")]
    pub http_status_message: String,
}

/// On-disk shape of a catalog entry.
#[derive(Deserialize)]
struct StoredError {
    code: String,
    title: String,
    description: String,
    #[serde(rename = "httpCode")]
    http_status_code: u16,
}

impl From<StoredError> for ApiError {
    fn from(stored: StoredError) -> Self {
        ApiError::new(
            stored.code,
            stored.title,
            stored.description,
            stored.http_status_code,
        )
    }
}

// The status message is always derived, never trusted from input.
impl<'de> Deserialize<'de> for ApiError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        StoredError::deserialize(deserializer).map(ApiError::from)
    }
}

impl ApiError {
    pub fn new(
        code: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        http_status_code: u16,
    ) -> Self {
        Self {
            code: code.into(),
            title: title.into(),
            description: description.into(),
            http_status_code,
            http_status_message: status_message(http_status_code),
        }
    }

    /// The generic 500 fallback carrying the immediate error message.
    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR_CODE, "Internal Error", description, 500)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.http_status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

fn status_message(code: u16) -> String {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Errors raised while loading an error catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read error catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse error catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("error catalog defines code {0} more than once")]
    DuplicateCode(String),
}

/// Lookup interface injected into the gate.
pub trait ErrorCatalog: Send + Sync {
    fn lookup(&self, code: &str) -> Option<&ApiError>;
}

/// Catalog indexed by error code.
#[derive(Debug, Clone, Default)]
pub struct ApiErrorCatalog {
    errors: HashMap<String, ApiError>,
}

impl ApiErrorCatalog {
    pub fn from_errors(errors: Vec<ApiError>) -> Result<Self, CatalogError> {
        let mut indexed = HashMap::with_capacity(errors.len());
        for error in errors {
            if indexed.contains_key(&error.code) {
                return Err(CatalogError::DuplicateCode(error.code));
            }
            indexed.insert(error.code.clone(), error);
        }
        Ok(Self { errors: indexed })
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let errors: Vec<ApiError> = serde_json::from_str(json)?;
        Self::from_errors(errors)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// The catalog shipped with the binary (`errors.json`).
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ErrorCatalog for ApiErrorCatalog {
    fn lookup(&self, code: &str) -> Option<&ApiError> {
        self.errors.get(code)
    }
}

/// Turns failure classifications into catalog-driven responses.
#[derive(Clone)]
pub struct ErrorResponder {
    catalog: Arc<dyn ErrorCatalog>,
}

impl ErrorResponder {
    pub fn new(catalog: Arc<dyn ErrorCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolve the response body for `code`.
    ///
    /// Codes missing from the catalog, and `INTERNAL_ERROR` itself, produce the
    /// generic 500 entry with `detail` as its description.
    pub fn resolve(&self, code: &str, detail: &str) -> ApiError {
        if code == INTERNAL_ERROR_CODE {
            return ApiError::internal(detail);
        }
        match self.catalog.lookup(code) {
            Some(error) => error.clone(),
            None => {
                tracing::warn!(code, "error code missing from catalog, sending internal error");
                ApiError::internal(detail)
            }
        }
    }

    pub fn respond_code(&self, code: &str, detail: &str) -> Response {
        self.resolve(code, detail).into_response()
    }

    pub fn respond(&self, kind: &AuthErrorKind) -> Response {
        self.respond_code(kind.code(), &kind.to_string())
    }
}
