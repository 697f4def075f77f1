// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OpenID provider metadata discovery.
//!
//! With `OIDC_USE_DISCOVERY=true` the issuer, JWKS endpoint and userinfo
//! endpoint are read once at startup from the provider's metadata document
//! (usually `<issuer>/.well-known/openid-configuration`). Values discovered
//! this way replace anything set explicitly.

use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::config::ProviderConfig;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery is disabled in the configuration")]
    Disabled,
    #[error("no discovery URI configured")]
    NoDiscoveryUri,
    #[error("discovery request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("discovery endpoint returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to parse provider metadata: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("provider metadata has no '{0}' field")]
    MissingField(&'static str),
    #[error("provider metadata field '{0}' is not a string")]
    WrongType(&'static str),
    #[error("provider metadata field '{field}' is not a valid URL: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// The subset of the provider metadata the gate relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub jwks_uri: Url,
    pub userinfo_endpoint: Url,
}

impl ProviderMetadata {
    pub fn from_document(document: &Map<String, Value>) -> Result<Self, DiscoveryError> {
        Ok(Self {
            issuer: string_field(document, "issuer")?.to_string(),
            jwks_uri: url_field(document, "jwks_uri")?,
            userinfo_endpoint: url_field(document, "userinfo_endpoint")?,
        })
    }
}

fn string_field<'a>(
    document: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, DiscoveryError> {
    document
        .get(field)
        .ok_or(DiscoveryError::MissingField(field))?
        .as_str()
        .ok_or(DiscoveryError::WrongType(field))
}

fn url_field(document: &Map<String, Value>, field: &'static str) -> Result<Url, DiscoveryError> {
    Url::parse(string_field(document, field)?)
        .map_err(|source| DiscoveryError::InvalidUrl { field, source })
}

/// Fetch and parse the metadata document at `uri`.
pub async fn fetch_metadata(
    uri: &Url,
    client: &reqwest::Client,
) -> Result<ProviderMetadata, DiscoveryError> {
    let response = client.get(uri.clone()).send().await?;
    if !response.status().is_success() {
        return Err(DiscoveryError::Status(response.status()));
    }

    let body = response.bytes().await?;
    let document: Map<String, Value> = serde_json::from_slice(&body)?;
    ProviderMetadata::from_document(&document)
}

/// Populate `config` from the provider's metadata document.
///
/// `config` is left untouched unless every field was discovered.
pub async fn discover(
    config: &mut ProviderConfig,
    client: &reqwest::Client,
) -> Result<ProviderMetadata, DiscoveryError> {
    if !config.use_discovery {
        return Err(DiscoveryError::Disabled);
    }
    let uri = config
        .discovery_uri
        .as_ref()
        .ok_or(DiscoveryError::NoDiscoveryUri)?;

    let metadata = fetch_metadata(uri, client).await?;
    tracing::info!(
        issuer = %metadata.issuer,
        jwks_uri = %metadata.jwks_uri,
        userinfo_endpoint = %metadata.userinfo_endpoint,
        "discovered provider metadata"
    );

    config.issuer = metadata.issuer.clone();
    config.jwks_uri = Some(metadata.jwks_uri.clone());
    config.userinfo_uri = Some(metadata.userinfo_endpoint.clone());
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WELL_KNOWN: &str = "/.well-known/openid-configuration";

    fn metadata(server: &MockServer) -> Value {
        json!({
            "issuer": server.uri(),
            "jwks_uri": format!("{}/certs", server.uri()),
            "userinfo_endpoint": format!("{}/userinfo", server.uri()),
            "authorization_endpoint": format!("{}/auth", server.uri()),
        })
    }

    async fn serve(server: &MockServer, body: Value) {
        Mock::given(method("GET"))
            .and(path(WELL_KNOWN))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn config(server: &MockServer) -> ProviderConfig {
        ProviderConfig::new("my-client", "")
            .with_discovery(Url::parse(&format!("{}{WELL_KNOWN}", server.uri())).unwrap())
    }

    #[tokio::test]
    async fn discover_populates_config() {
        let server = MockServer::start().await;
        serve(&server, metadata(&server)).await;

        let mut config = config(&server);
        discover(&mut config, &reqwest::Client::new()).await.unwrap();

        assert_eq!(config.issuer, server.uri());
        assert_eq!(
            config.jwks_uri.unwrap().as_str(),
            format!("{}/certs", server.uri())
        );
        assert_eq!(
            config.userinfo_uri.unwrap().as_str(),
            format!("{}/userinfo", server.uri())
        );
    }

    #[tokio::test]
    async fn disabled_discovery_is_an_error() {
        let mut config = ProviderConfig::new("my-client", "https://id.example.com");
        let result = discover(&mut config, &reqwest::Client::new()).await;
        assert!(matches!(result, Err(DiscoveryError::Disabled)));
    }

    #[tokio::test]
    async fn missing_discovery_uri_is_an_error() {
        let mut config = ProviderConfig::new("my-client", "https://id.example.com");
        config.use_discovery = true;
        let result = discover(&mut config, &reqwest::Client::new()).await;
        assert!(matches!(result, Err(DiscoveryError::NoDiscoveryUri)));
    }

    #[tokio::test]
    async fn missing_field_leaves_config_untouched() {
        let server = MockServer::start().await;
        let mut body = metadata(&server);
        body.as_object_mut().unwrap().remove("userinfo_endpoint");
        serve(&server, body).await;

        let mut config = config(&server);
        let result = discover(&mut config, &reqwest::Client::new()).await;
        assert!(matches!(
            result,
            Err(DiscoveryError::MissingField("userinfo_endpoint"))
        ));
        assert!(config.issuer.is_empty());
        assert!(config.jwks_uri.is_none());
    }

    #[tokio::test]
    async fn non_string_field_is_wrong_type() {
        let server = MockServer::start().await;
        let mut body = metadata(&server);
        body["issuer"] = json!(42);
        serve(&server, body).await;

        let result = discover(&mut config(&server), &reqwest::Client::new()).await;
        assert!(matches!(result, Err(DiscoveryError::WrongType("issuer"))));
    }

    #[tokio::test]
    async fn relative_endpoint_is_invalid_url() {
        let server = MockServer::start().await;
        let mut body = metadata(&server);
        body["jwks_uri"] = json!("/certs");
        serve(&server, body).await;

        let result = discover(&mut config(&server), &reqwest::Client::new()).await;
        assert!(matches!(
            result,
            Err(DiscoveryError::InvalidUrl { field: "jwks_uri", .. })
        ));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(WELL_KNOWN))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = discover(&mut config(&server), &reqwest::Client::new()).await;
        assert!(matches!(result, Err(DiscoveryError::Status(status)) if status == 404));
    }

    #[tokio::test]
    async fn non_json_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(WELL_KNOWN))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = discover(&mut config(&server), &reqwest::Client::new()).await;
        assert!(matches!(result, Err(DiscoveryError::Parse(_))));
    }
}
