// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::Json;

use crate::auth::{AuthenticatedIdentity, Identity};
use crate::error::ApiError;

/// Get the identity of the authenticated caller.
///
/// Returns the subject, username, full name and groups the gate established
/// from the bearer token and the provider's userinfo endpoint.
#[utoipa::path(
    get,
    path = "/v1/me",
    tag = "Identity",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Caller identity", body = AuthenticatedIdentity),
        (status = 400, description = "More than one Authorization header", body = ApiError),
        (status = 401, description = "Missing, invalid or expired token", body = ApiError),
        (status = 500, description = "Identity provider unavailable", body = ApiError),
    )
)]
pub async fn current_identity(Identity(identity): Identity) -> Json<AuthenticatedIdentity> {
    Json(identity)
}
