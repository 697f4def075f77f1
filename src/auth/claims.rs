// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token claims as decoded and as validated.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `aud` is either a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub(crate) fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

/// Claims as found in a signature-verified token, before any checks.
///
/// Every field is optional so that a missing claim is reported as such
/// instead of as a deserialization failure. NumericDate values may carry
/// fractional seconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub iat: Option<f64>,
    #[serde(default)]
    pub exp: Option<f64>,
    #[serde(default)]
    pub nbf: Option<f64>,
}

/// A signature-verified token whose standard claims passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub issuer: String,
    pub audience: Vec<String>,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
