// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! OIDC bearer-token authentication for inbound requests.
//!
//! ## Auth Flow
//!
//! 1. Client authenticates with the identity provider
//! 2. Client sends `Authorization: Bearer <access token>`
//! 3. The gate:
//!    - Resolves the provider's JWKS (cached, single-flight refresh)
//!    - Verifies the token signature, then `iss`, `aud`, `iat`, `exp`
//!    - Calls the userinfo endpoint with the same header
//!    - Checks that the userinfo `sub` matches the token `sub`
//!    - Attaches an [`AuthenticatedIdentity`] to the request
//!
//! ## Security
//!
//! - A request is only forwarded with a complete identity
//! - Every rejection is answered from the error catalog
//! - Provider calls are aborted on shutdown and on client disconnect

pub mod claims;
pub mod error;
pub mod identity;
pub mod jwks;
pub mod middleware;
pub mod userinfo;
pub mod validator;

pub use claims::ParsedToken;
pub use error::AuthErrorKind;
pub use identity::{AuthenticatedIdentity, Identity, IdentityError};
pub use jwks::{KeySet, KeySetResolver};
pub use middleware::{protect, require_identity, Gate, GateError, Rejection, Stage};
pub use userinfo::{IdentityEnricher, UserInfo};
pub use validator::{extract_bearer, BearerCredential, TokenValidator};
