// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The gate: authentication middleware for Axum.
//!
//! ```rust,ignore
//! let gate = Arc::new(Gate::new(&provider, settings, catalog)?);
//!
//! let app = protect(
//!     Router::new().route("/protected", get(protected_handler)),
//!     gate,
//! );
//! ```
//!
//! Every request runs the pipeline below once. A failing step rejects the
//! request through the [`ErrorResponder`] and nothing downstream runs.
//!
//! ```text
//! Start -> HeaderExtracted -> KeySetResolved -> TokenValidated
//!       -> IdentityEnriched -> Forwarded
//! ```

use std::{fmt, sync::Arc};

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::Response,
    Router,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::error::AuthErrorKind;
use super::identity::AuthenticatedIdentity;
use super::jwks::KeySetResolver;
use super::userinfo::IdentityEnricher;
use super::validator::{extract_bearer, TokenValidator};
use crate::config::{ConfigError, GateSettings, ProviderConfig, JWKS_URI_ENV, ISSUER_ENV};
use crate::error::{ErrorCatalog, ErrorResponder};

/// Last pipeline state a request reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    HeaderExtracted,
    KeySetResolved,
    TokenValidated,
    IdentityEnriched,
    Forwarded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::HeaderExtracted => "header_extracted",
            Stage::KeySetResolved => "key_set_resolved",
            Stage::TokenValidated => "token_validated",
            Stage::IdentityEnriched => "identity_enriched",
            Stage::Forwarded => "forwarded",
        };
        f.write_str(name)
    }
}

/// Terminal `Rejected` state: where the pipeline stopped and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub stage: Stage,
    pub kind: AuthErrorKind,
}

impl Rejection {
    fn at(stage: Stage) -> impl FnOnce(AuthErrorKind) -> Self {
        move |kind| Self { stage, kind }
    }
}

/// Errors building a gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Inbound bearer-token gate.
///
/// Holds no per-request state; the only thing shared between requests is the
/// key set cache inside the resolver.
#[derive(Clone)]
pub struct Gate {
    validator: TokenValidator,
    key_sets: KeySetResolver,
    enricher: IdentityEnricher,
    responder: ErrorResponder,
}

impl Gate {
    /// Build a gate for `provider`.
    ///
    /// The issuer and JWKS endpoint are required here. A missing userinfo
    /// endpoint is not; requests then fail with
    /// `USERINFO_ENDPOINT_DISCOVERY_FAIL`.
    pub fn new(
        provider: &ProviderConfig,
        settings: GateSettings,
        catalog: Arc<dyn ErrorCatalog>,
    ) -> Result<Self, GateError> {
        if provider.issuer.trim().is_empty() {
            return Err(ConfigError::Missing(ISSUER_ENV).into());
        }
        let jwks_uri = provider
            .jwks_uri
            .clone()
            .ok_or(ConfigError::Missing(JWKS_URI_ENV))?;

        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()?;

        Ok(Self {
            validator: TokenValidator::new(provider).with_leeway(settings.clock_leeway),
            key_sets: KeySetResolver::new(jwks_uri, client.clone())
                .with_cache_ttl(settings.jwks_cache_ttl),
            enricher: IdentityEnricher::new(provider.userinfo_uri.clone(), client),
            responder: ErrorResponder::new(catalog),
        })
    }

    /// Abort in-flight provider calls when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.key_sets = self.key_sets.with_shutdown(shutdown.clone());
        self.enricher = self.enricher.with_shutdown(shutdown);
        self
    }

    pub fn key_sets(&self) -> &KeySetResolver {
        &self.key_sets
    }

    pub fn enricher(&self) -> &IdentityEnricher {
        &self.enricher
    }

    /// Run the pipeline up to `IdentityEnriched`.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedIdentity, Rejection> {
        let credential = extract_bearer(headers).map_err(Rejection::at(Stage::Start))?;

        let kid = TokenValidator::key_id(credential.token());
        let key_set = self
            .key_sets
            .resolve_for(kid.as_deref())
            .await
            .map_err(Rejection::at(Stage::HeaderExtracted))?;

        let token = self
            .validator
            .validate(credential.token(), &key_set)
            .map_err(Rejection::at(Stage::KeySetResolved))?;

        let info = self
            .enricher
            .enrich(&credential, &token)
            .await
            .map_err(Rejection::at(Stage::TokenValidated))?;

        Ok(info.into())
    }

    /// Log and answer a rejection.
    pub fn reject(&self, rejection: &Rejection) -> Response {
        let Rejection { stage, kind } = rejection;
        if kind.is_server_fault() {
            tracing::error!(%stage, code = kind.code(), error = %kind, "request rejected");
        } else {
            tracing::debug!(%stage, code = kind.code(), error = %kind, "request rejected");
        }
        self.responder.respond(kind)
    }
}

/// Middleware guarding a route subtree with the gate.
pub async fn require_identity(
    State(gate): State<Arc<Gate>>,
    mut request: Request,
    next: Next,
) -> Response {
    match gate.authenticate(request.headers()).await {
        Ok(identity) => {
            tracing::debug!(
                stage = %Stage::Forwarded,
                subject = %identity.subject,
                "request authenticated"
            );
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(rejection) => gate.reject(&rejection),
    }
}

/// Put every route of `router` behind the gate.
///
/// Uses `route_layer`, so unmatched paths still answer 404 instead of 401.
pub fn protect<S>(router: Router<S>, gate: Arc<Gate>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(gate, require_identity))
}
