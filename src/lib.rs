// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OIDC Gate - bearer-token gatekeeper for HTTP services
//!
//! Verifies OpenID Connect access tokens against the provider's published
//! keys, binds them to the provider's userinfo profile, and forwards only
//! requests carrying a complete identity.
//!
//! ## Modules
//!
//! - `api` - HTTP routes (Axum)
//! - `auth` - Token validation, identity enrichment and the gate middleware
//! - `config` - Environment configuration
//! - `discovery` - OpenID provider metadata discovery
//! - `error` - Error catalog and structured API errors

pub mod api;
pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod state;
