// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer header parsing and token validation.
//!
//! Validation runs as a fixed sequence of hard gates; the first failure wins
//! and nothing after it is checked:
//!
//! 1. exactly one `Authorization` header
//! 2. strip the case-insensitive `Bearer` prefix
//! 3. verify the signature against the resolved key set
//! 4. `iss`, `aud`, `iat`, `exp` (then `nbf` and `sub`) against the config
//!
//! The signature check uses `jsonwebtoken` with all of its claim validation
//! switched off. Claims are checked here so that every failure maps onto one
//! [`AuthErrorKind`] regardless of how the library reports it.

use std::time::Duration;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, errors::ErrorKind, jwk::Jwk, Validation};

use super::claims::{ParsedToken, RawClaims};
use super::error::AuthErrorKind;
use super::jwks::{jwk_to_decoding_key, KeySet};
use crate::config::ProviderConfig;

/// The single `Authorization` header of a request and the token inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerCredential {
    header_value: String,
    token: String,
}

impl BearerCredential {
    /// The header value exactly as received, forwarded to the userinfo endpoint.
    pub fn header_value(&self) -> &str {
        &self.header_value
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Extract the bearer token from the request headers.
pub fn extract_bearer(headers: &HeaderMap) -> Result<BearerCredential, AuthErrorKind> {
    let mut values = headers.get_all(AUTHORIZATION).iter();
    let value = values.next().ok_or(AuthErrorKind::NoAuthentication)?;
    if values.next().is_some() {
        return Err(AuthErrorKind::MultipleAuthorizations);
    }

    let header_value = value
        .to_str()
        .map_err(|_| AuthErrorKind::TokenInvalid("authorization header is not valid ASCII".into()))?;
    let token = strip_bearer(header_value);
    if token.is_empty() {
        return Err(AuthErrorKind::TokenInvalid("empty bearer token".into()));
    }

    Ok(BearerCredential {
        header_value: header_value.to_string(),
        token: token.to_string(),
    })
}

/// Remove a leading `Bearer` (any case) and the whitespace after it.
///
/// A value without the prefix is taken to be the bare token.
fn strip_bearer(value: &str) -> &str {
    const PREFIX: &str = "bearer";
    match value.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => value[PREFIX.len()..].trim_start(),
        _ => value,
    }
}

/// Verifies token signatures and standard claims.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    issuer: String,
    client_id: String,
    leeway: Duration,
}

impl TokenValidator {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            client_id: config.client_id.clone(),
            leeway: Duration::ZERO,
        }
    }

    /// Clock skew tolerance for `iat`, `exp` and `nbf`.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// The `kid` from the token header, if the header can be decoded.
    pub fn key_id(token: &str) -> Option<String> {
        decode_header(token).ok().and_then(|header| header.kid)
    }

    pub fn validate(&self, token: &str, key_set: &KeySet) -> Result<ParsedToken, AuthErrorKind> {
        self.validate_at(token, key_set, Utc::now())
    }

    pub fn validate_at(
        &self,
        token: &str,
        key_set: &KeySet,
        now: DateTime<Utc>,
    ) -> Result<ParsedToken, AuthErrorKind> {
        let claims = self.verify_signature(token, key_set)?;
        self.check_claims(claims, now)
    }

    fn verify_signature(&self, token: &str, key_set: &KeySet) -> Result<RawClaims, AuthErrorKind> {
        let header = decode_header(token).map_err(|e| AuthErrorKind::TokenInvalid(e.to_string()))?;

        // Without a kid every published key is a candidate.
        let candidates: Vec<&Jwk> = match header.kid.as_deref() {
            Some(kid) => key_set.find(kid).into_iter().collect(),
            None => key_set.keys().iter().collect(),
        };
        if candidates.is_empty() {
            return Err(AuthErrorKind::TokenInvalid(
                "no matching key in key set".to_string(),
            ));
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let mut last_error = None;
        for jwk in candidates {
            let key = match jwk_to_decoding_key(jwk) {
                Ok((_, Some(declared))) if declared != header.alg => {
                    last_error = Some(AuthErrorKind::TokenInvalid(format!(
                        "token algorithm {:?} does not match key algorithm {declared:?}",
                        header.alg
                    )));
                    continue;
                }
                Ok((key, _)) => key,
                Err(e) => {
                    last_error = Some(AuthErrorKind::TokenInvalid(e));
                    continue;
                }
            };

            match decode::<RawClaims>(token, &key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => last_error = Some(classify(e)),
            }
        }

        Err(last_error.unwrap_or_else(|| AuthErrorKind::TokenInvalid("no usable key".into())))
    }

    fn check_claims(&self, claims: RawClaims, now: DateTime<Utc>) -> Result<ParsedToken, AuthErrorKind> {
        let now = now.timestamp();
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);

        let issuer = claims.iss.ok_or(AuthErrorKind::MissingClaim("iss"))?;
        if issuer != self.issuer {
            return Err(AuthErrorKind::IncorrectIssuer);
        }

        let audience = claims.aud.ok_or(AuthErrorKind::MissingClaim("aud"))?.into_vec();
        if !audience.iter().any(|aud| aud == &self.client_id) {
            return Err(AuthErrorKind::IncorrectAudience);
        }

        let issued_at = claims.iat.ok_or(AuthErrorKind::MissingClaim("iat"))? as i64;
        if issued_at > now.saturating_add(leeway) {
            return Err(AuthErrorKind::IssuedAtInvalid);
        }

        let expires_at = claims.exp.ok_or(AuthErrorKind::MissingClaim("exp"))? as i64;
        if expires_at < now.saturating_sub(leeway) {
            return Err(AuthErrorKind::TokenExpired);
        }

        if let Some(not_before) = claims.nbf {
            if not_before as i64 > now.saturating_add(leeway) {
                return Err(AuthErrorKind::TokenNotAlive(
                    "token is not valid yet (nbf)".to_string(),
                ));
            }
        }

        let subject = claims
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or(AuthErrorKind::MissingClaim("sub"))?;

        Ok(ParsedToken {
            issuer,
            audience,
            subject,
            issued_at: timestamp(issued_at, "iat")?,
            expires_at: timestamp(expires_at, "exp")?,
        })
    }
}

fn timestamp(secs: i64, claim: &str) -> Result<DateTime<Utc>, AuthErrorKind> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AuthErrorKind::TokenNotAlive(format!("{claim} is out of range")))
}

/// Map a `jsonwebtoken` failure onto the gate's taxonomy.
///
/// Anything that means "the signature could not be verified" is
/// `TokenInvalid`; everything else falls into the `TokenNotAlive` catch-all.
fn classify(error: jsonwebtoken::errors::Error) -> AuthErrorKind {
    match error.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::MissingAlgorithm
        | ErrorKind::Base64(_)
        | ErrorKind::Utf8(_) => AuthErrorKind::TokenInvalid(error.to_string()),
        _ => AuthErrorKind::TokenNotAlive(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;

    const PRIVATE_KEY: &[u8] = include_bytes!("../../tests/fixtures/rsa_private.pem");
    const ROGUE_KEY: &[u8] = include_bytes!("../../tests/fixtures/rogue_private.pem");
    const JWKS: &[u8] = include_bytes!("../../tests/fixtures/jwks.json");
    const ISSUER: &str = "https://id.example.com/realms/main";
    const CLIENT_ID: &str = "my-client";

    fn validator() -> TokenValidator {
        TokenValidator::new(&ProviderConfig::new(CLIENT_ID, ISSUER))
    }

    fn key_set() -> KeySet {
        KeySet::parse(JWKS).unwrap()
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn claims() -> serde_json::Value {
        json!({
            "iss": ISSUER,
            "aud": [CLIENT_ID, "account"],
            "sub": "user-1",
            "iat": now() - 10,
            "exp": now() + 3600,
        })
    }

    fn sign_with(key: &[u8], kid: Option<&str>, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &EncodingKey::from_rsa_pem(key).unwrap()).unwrap()
    }

    fn sign(claims: &serde_json::Value) -> String {
        sign_with(PRIVATE_KEY, Some("gate-test-key"), claims)
    }

    fn headers(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn missing_header_is_no_authentication() {
        assert_eq!(
            extract_bearer(&HeaderMap::new()),
            Err(AuthErrorKind::NoAuthentication)
        );
    }

    #[test]
    fn two_headers_are_rejected() {
        assert_eq!(
            extract_bearer(&headers(&["Bearer a", "Bearer b"])),
            Err(AuthErrorKind::MultipleAuthorizations)
        );
    }

    #[test]
    fn bearer_prefix_is_case_insensitive() {
        for value in ["Bearer abc", "bearer abc", "BEARER   abc", "Bearerabc"] {
            let credential = extract_bearer(&headers(&[value])).unwrap();
            assert_eq!(credential.token(), "abc", "{value}");
            assert_eq!(credential.header_value(), value);
        }
    }

    #[test]
    fn bare_token_is_accepted() {
        let credential = extract_bearer(&headers(&["abc.def.ghi"])).unwrap();
        assert_eq!(credential.token(), "abc.def.ghi");
    }

    #[test]
    fn empty_bearer_is_invalid() {
        assert!(matches!(
            extract_bearer(&headers(&["Bearer "])),
            Err(AuthErrorKind::TokenInvalid(_))
        ));
    }

    #[test]
    fn valid_token_is_parsed() {
        let token = validator().validate(&sign(&claims()), &key_set()).unwrap();
        assert_eq!(token.issuer, ISSUER);
        assert_eq!(token.subject, "user-1");
        assert_eq!(token.audience, vec![CLIENT_ID, "account"]);
        assert!(token.expires_at > Utc::now());
    }

    #[test]
    fn key_id_reads_header() {
        assert_eq!(
            TokenValidator::key_id(&sign(&claims())).as_deref(),
            Some("gate-test-key")
        );
        assert_eq!(TokenValidator::key_id("garbage"), None);
    }

    #[test]
    fn token_without_kid_tries_every_key() {
        let token = sign_with(PRIVATE_KEY, None, &claims());
        assert!(validator().validate(&token, &key_set()).is_ok());
    }

    #[test]
    fn foreign_signature_is_invalid() {
        let token = sign_with(ROGUE_KEY, Some("gate-test-key"), &claims());
        assert!(matches!(
            validator().validate(&token, &key_set()),
            Err(AuthErrorKind::TokenInvalid(_))
        ));
    }

    #[test]
    fn unknown_kid_is_invalid() {
        let token = sign_with(PRIVATE_KEY, Some("unknown"), &claims());
        assert!(matches!(
            validator().validate(&token, &key_set()),
            Err(AuthErrorKind::TokenInvalid(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            validator().validate("not-a-jwt", &key_set()),
            Err(AuthErrorKind::TokenInvalid(_))
        ));
    }

    #[test]
    fn tampered_payload_is_invalid() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

        let token = sign(&claims());
        let mut parts: Vec<&str> = token.split('.').collect();
        let mut forged = claims();
        forged["sub"] = json!("admin");
        let payload = URL_SAFE_NO_PAD.encode(forged.to_string());
        parts[1] = &payload;

        assert!(matches!(
            validator().validate(&parts.join("."), &key_set()),
            Err(AuthErrorKind::TokenInvalid(_))
        ));
    }

    #[test]
    fn hmac_token_is_invalid() {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("gate-test-key".to_string());
        let token = encode(&header, &claims(), &EncodingKey::from_secret(b"secret")).unwrap();
        assert!(matches!(
            validator().validate(&token, &key_set()),
            Err(AuthErrorKind::TokenInvalid(_))
        ));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let mut claims = claims();
        claims["iss"] = json!("https://evil.example.com");
        assert_eq!(
            validator().validate(&sign(&claims), &key_set()),
            Err(AuthErrorKind::IncorrectIssuer)
        );
    }

    #[test]
    fn other_audience_is_rejected() {
        let mut claims = claims();
        claims["aud"] = json!(["other-client"]);
        assert_eq!(
            validator().validate(&sign(&claims), &key_set()),
            Err(AuthErrorKind::IncorrectAudience)
        );
    }

    #[test]
    fn single_string_audience_is_accepted() {
        let mut claims = claims();
        claims["aud"] = json!(CLIENT_ID);
        assert!(validator().validate(&sign(&claims), &key_set()).is_ok());
    }

    #[test]
    fn future_issued_at_is_rejected() {
        let mut claims = claims();
        claims["iat"] = json!(now() + 600);
        assert_eq!(
            validator().validate(&sign(&claims), &key_set()),
            Err(AuthErrorKind::IssuedAtInvalid)
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut claims = claims();
        claims["iat"] = json!(now() - 7200);
        claims["exp"] = json!(now() - 3600);
        assert_eq!(
            validator().validate(&sign(&claims), &key_set()),
            Err(AuthErrorKind::TokenExpired)
        );
    }

    #[test]
    fn leeway_tolerates_small_skew() {
        let mut claims = claims();
        claims["exp"] = json!(now() - 20);
        let validator = validator().with_leeway(Duration::from_secs(60));
        assert!(validator.validate(&sign(&claims), &key_set()).is_ok());
    }

    #[test]
    fn issuer_is_checked_before_expiry() {
        let mut claims = claims();
        claims["iss"] = json!("https://evil.example.com");
        claims["exp"] = json!(now() - 3600);
        assert_eq!(
            validator().validate(&sign(&claims), &key_set()),
            Err(AuthErrorKind::IncorrectIssuer)
        );
    }

    #[test]
    fn missing_claims_are_named() {
        for claim in ["iss", "aud", "iat", "exp", "sub"] {
            let mut claims = claims();
            claims.as_object_mut().unwrap().remove(claim);
            assert_eq!(
                validator().validate(&sign(&claims), &key_set()),
                Err(AuthErrorKind::MissingClaim(claim)),
                "{claim}"
            );
        }
    }

    #[test]
    fn not_before_in_future_is_not_alive() {
        let mut claims = claims();
        claims["nbf"] = json!(now() + 600);
        assert!(matches!(
            validator().validate(&sign(&claims), &key_set()),
            Err(AuthErrorKind::TokenNotAlive(_))
        ));
    }

    #[test]
    fn validation_is_pinned_to_the_given_clock() {
        let token = sign(&claims());
        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(
            validator().validate_at(&token, &key_set(), later),
            Err(AuthErrorKind::TokenExpired)
        );
    }
}
