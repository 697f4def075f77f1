// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication failure classification.
//!
//! Every step of the gate pipeline reports failures as an [`AuthErrorKind`].
//! The kind is the only thing the gate hands to the error responder, which
//! turns it into a catalog-driven HTTP response using [`AuthErrorKind::code`].

use thiserror::Error;

/// Closed set of reasons a request can be rejected by the gate.
///
/// Client-caused kinds map to 4xx catalog entries, provider and configuration
/// faults map to 5xx entries. The payloads carry the immediate failure message
/// for logging and for the internal-error fallback; they are never required to
/// build the catalog response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthErrorKind {
    /// No Authorization header present
    #[error("no authorization header present")]
    NoAuthentication,
    /// More than one Authorization header present
    #[error("more than one authorization header present")]
    MultipleAuthorizations,
    /// Token could not be decoded or its signature could not be verified
    #[error("token signature could not be verified: {0}")]
    TokenInvalid(String),
    /// `iss` does not match the configured issuer
    #[error("token issuer does not match the configured issuer")]
    IncorrectIssuer,
    /// `aud` does not contain the configured client id
    #[error("token audience does not contain the client id")]
    IncorrectAudience,
    /// `iat` lies in the future
    #[error("token was issued in the future")]
    IssuedAtInvalid,
    /// `exp` lies in the past
    #[error("token has expired")]
    TokenExpired,
    /// A required claim is absent
    #[error("token is missing the required claim '{0}'")]
    MissingClaim(&'static str),
    /// Catch-all for any other token validation failure
    #[error("token is not alive: {0}")]
    TokenNotAlive(String),
    /// Userinfo `sub` differs from the token subject
    #[error("userinfo subject does not match the token subject")]
    SubjectMismatch,
    /// Userinfo response lacks a required profile field
    #[error("userinfo response is missing the field '{0}'")]
    MissingProfileField(&'static str),
    /// Key set could not be retrieved
    #[error("failed to fetch JWKS: {0}")]
    JwksFetchError(String),
    /// Key set could not be parsed
    #[error("failed to parse JWKS: {0}")]
    JwksParseError(String),
    /// Userinfo endpoint could not be reached
    #[error("failed to fetch userinfo: {0}")]
    UserinfoFetchError(String),
    /// Userinfo response could not be parsed
    #[error("failed to parse userinfo response: {0}")]
    UserinfoParseError(String),
    /// No userinfo endpoint configured or discovered
    #[error("no userinfo endpoint configured or discovered")]
    UserinfoEndpointDiscoveryFail,
    /// Internal error
    #[error("{0}")]
    InternalError(String),
}

impl AuthErrorKind {
    /// Stable catalog code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            AuthErrorKind::NoAuthentication => "NO_AUTHENTICATION",
            AuthErrorKind::MultipleAuthorizations => "MULTIPLE_AUTHORIZATIONS",
            AuthErrorKind::TokenInvalid(_) => "TOKEN_INVALID",
            AuthErrorKind::IncorrectIssuer => "INCORRECT_ISSUER",
            AuthErrorKind::IncorrectAudience => "INCORRECT_AUDIENCE",
            AuthErrorKind::IssuedAtInvalid => "ISSUED_AT_INVALID",
            AuthErrorKind::TokenExpired => "TOKEN_EXPIRED",
            AuthErrorKind::MissingClaim(_) => "MISSING_CLAIM",
            AuthErrorKind::TokenNotAlive(_) => "TOKEN_NOT_ALIVE",
            AuthErrorKind::SubjectMismatch => "SUBJECT_MISMATCH",
            AuthErrorKind::MissingProfileField(_) => "MISSING_PROFILE_FIELD",
            AuthErrorKind::JwksFetchError(_) => "JWKS_FETCH_ERROR",
            AuthErrorKind::JwksParseError(_) => "JWKS_PARSE_ERROR",
            AuthErrorKind::UserinfoFetchError(_) => "USERINFO_FETCH_ERROR",
            AuthErrorKind::UserinfoParseError(_) => "USERINFO_PARSE_ERROR",
            AuthErrorKind::UserinfoEndpointDiscoveryFail => "USERINFO_ENDPOINT_DISCOVERY_FAIL",
            AuthErrorKind::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure was caused by the provider or this service rather
    /// than by the caller.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            AuthErrorKind::JwksFetchError(_)
                | AuthErrorKind::JwksParseError(_)
                | AuthErrorKind::UserinfoFetchError(_)
                | AuthErrorKind::UserinfoParseError(_)
                | AuthErrorKind::UserinfoEndpointDiscoveryFail
                | AuthErrorKind::InternalError(_)
        )
    }
}
