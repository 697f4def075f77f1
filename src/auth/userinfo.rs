// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity enrichment from the provider's userinfo endpoint.

use reqwest::StatusCode;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::claims::ParsedToken;
use super::error::AuthErrorKind;
use super::jwks::{read_body_limited, until_cancelled, MAX_PROVIDER_BODY_BYTES};
use super::validator::BearerCredential;

/// Profile of the authenticated principal as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub subject: String,
    pub username: String,
    pub full_name: String,
    pub groups: Vec<String>,
}

impl UserInfo {
    /// Extract the profile from a userinfo response body.
    ///
    /// `sub`, `preferred_username` and `name` must be non-empty strings and
    /// `sub` must equal `expected_subject`. `groups` is optional; anything
    /// other than an array of strings yields no groups.
    pub fn from_profile(
        profile: &Map<String, Value>,
        expected_subject: &str,
    ) -> Result<Self, AuthErrorKind> {
        let subject = required_string(profile, "sub")?;
        if subject != expected_subject {
            return Err(AuthErrorKind::SubjectMismatch);
        }

        let username = required_string(profile, "preferred_username")?;
        let full_name = required_string(profile, "name")?;

        Ok(Self {
            subject: subject.to_string(),
            username: username.to_string(),
            full_name: full_name.to_string(),
            groups: groups(profile),
        })
    }
}

fn required_string<'a>(
    profile: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, AuthErrorKind> {
    profile
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(AuthErrorKind::MissingProfileField(field))
}

fn groups(profile: &Map<String, Value>) -> Vec<String> {
    let Some(value) = profile.get("groups") else {
        tracing::debug!("userinfo response has no groups");
        return Vec::new();
    };

    let groups: Option<Vec<String>> = value.as_array().and_then(|items| {
        items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect()
    });

    groups.unwrap_or_else(|| {
        tracing::warn!("userinfo groups is not an array of strings, ignoring");
        Vec::new()
    })
}

/// Calls the userinfo endpoint with the caller's own bearer credential.
#[derive(Clone)]
pub struct IdentityEnricher {
    userinfo_uri: Option<Url>,
    client: reqwest::Client,
    shutdown: CancellationToken,
}

impl IdentityEnricher {
    pub fn new(userinfo_uri: Option<Url>, client: reqwest::Client) -> Self {
        Self {
            userinfo_uri,
            client,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn userinfo_uri(&self) -> Option<&Url> {
        self.userinfo_uri.as_ref()
    }

    /// Fetch the caller's profile and bind it to the validated token.
    pub async fn enrich(
        &self,
        credential: &BearerCredential,
        token: &ParsedToken,
    ) -> Result<UserInfo, AuthErrorKind> {
        let uri = self
            .userinfo_uri
            .as_ref()
            .ok_or(AuthErrorKind::UserinfoEndpointDiscoveryFail)?;

        let profile = until_cancelled(&self.shutdown, self.fetch(uri, credential), || {
            AuthErrorKind::UserinfoFetchError("request cancelled by shutdown".to_string())
        })
        .await?;

        UserInfo::from_profile(&profile, &token.subject)
    }

    async fn fetch(
        &self,
        uri: &Url,
        credential: &BearerCredential,
    ) -> Result<Map<String, Value>, AuthErrorKind> {
        let response = self
            .client
            .get(uri.clone())
            .header(reqwest::header::AUTHORIZATION, credential.header_value())
            .send()
            .await
            .map_err(|e| AuthErrorKind::UserinfoFetchError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            // The signature checked out, so the provider revoked the token or
            // does not grant it the profile scope.
            tracing::warn!(%status, "userinfo endpoint rejected a verified token");
            return Err(AuthErrorKind::UserinfoFetchError(format!(
                "userinfo endpoint rejected the token with HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(AuthErrorKind::UserinfoFetchError(format!(
                "HTTP {status} from userinfo endpoint"
            )));
        }

        let body = read_body_limited(response, MAX_PROVIDER_BODY_BYTES)
            .await
            .map_err(AuthErrorKind::UserinfoFetchError)?;

        serde_json::from_slice(&body).map_err(|e| AuthErrorKind::UserinfoParseError(e.to_string()))
    }
}
