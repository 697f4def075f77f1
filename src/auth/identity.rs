// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The identity attached to a request that passed the gate.
//!
//! Handlers behind [`protect`](super::middleware::protect) read it with the
//! `Identity` extractor:
//!
//! ```rust,ignore
//! async fn my_handler(Identity(who): Identity) -> impl IntoResponse {
//!     // who.subject, who.username, who.groups ...
//! }
//! ```

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{request::Parts, Extensions},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::userinfo::UserInfo;
use crate::error::ApiError;

/// Identity of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedIdentity {
    /// Subject shared by the token and the userinfo response
    pub subject: String,
    /// `preferred_username` from the provider
    pub username: String,
    /// `name` from the provider
    pub full_name: String,
    /// Provider groups, empty when the provider sends none
    pub groups: Vec<String>,
}

impl AuthenticatedIdentity {
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Read the identity the gate stored in the request extensions.
    pub fn from_extensions(extensions: &Extensions) -> Result<&Self, IdentityError> {
        extensions.get::<Self>().ok_or(IdentityError::Missing)
    }
}

impl From<UserInfo> for AuthenticatedIdentity {
    fn from(info: UserInfo) -> Self {
        Self {
            subject: info.subject,
            username: info.username,
            full_name: info.full_name,
            groups: info.groups,
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    /// The handler is reachable without going through the gate.
    #[error("request has no authenticated identity; route is not protected by the gate")]
    Missing,
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "identity requested on unprotected route");
        ApiError::internal(self.to_string()).into_response()
    }
}

/// Extractor for the gate-provided identity.
pub struct Identity(pub AuthenticatedIdentity);

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        AuthenticatedIdentity::from_extensions(&parts.extensions)
            .cloned()
            .map(Identity)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for Identity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<AuthenticatedIdentity>()
            .cloned()
            .map(Identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn identity() -> AuthenticatedIdentity {
        AuthenticatedIdentity {
            subject: "user-1".to_string(),
            username: "alice".to_string(),
            full_name: "Alice Example".to_string(),
            groups: vec!["admins".to_string()],
        }
    }

    fn parts() -> Parts {
        Request::builder().uri("/test").body(()).unwrap().into_parts().0
    }

    #[test]
    fn group_membership() {
        assert!(identity().in_group("admins"));
        assert!(!identity().in_group("staff"));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(identity()).unwrap();
        assert_eq!(json["fullName"], "Alice Example");
        assert_eq!(json["groups"][0], "admins");
    }

    #[tokio::test]
    async fn extractor_reads_extensions() {
        let mut parts = parts();
        parts.extensions.insert(identity());

        let Identity(who) = <Identity as FromRequestParts<()>>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(who.username, "alice");
    }

    #[tokio::test]
    async fn extractor_without_gate_is_internal_error() {
        let mut parts = parts();
        let rejection = <Identity as FromRequestParts<()>>::from_request_parts(&mut parts, &())
            .await
            .err()
            .unwrap();
        assert_eq!(
            rejection.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn optional_extractor_returns_none() {
        let mut parts = parts();
        let result =
            <Identity as OptionalFromRequestParts<()>>::from_request_parts(&mut parts, &())
                .await
                .unwrap();
        assert!(result.is_none());
    }
}
