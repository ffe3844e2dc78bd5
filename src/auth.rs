//! Bearer-token principals and Django-style permission codenames.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use std::collections::HashSet;
use subtle::ConstantTimeEq;

use crate::api::AppState;
use crate::config::ApiUser;
use crate::error::AppError;
use crate::models::{Capability, EntityMeta};

/// An authenticated API user.
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    pub superuser: bool,
    permissions: HashSet<String>,
}

impl Principal {
    pub fn new(username: impl Into<String>, superuser: bool, permissions: &[String]) -> Self {
        Self {
            username: username.into(),
            superuser,
            permissions: permissions.iter().cloned().collect(),
        }
    }

    pub fn has_perm(&self, codename: &str) -> bool {
        self.superuser || self.permissions.contains(codename)
    }

    pub fn can(&self, meta: &EntityMeta, capability: Capability) -> bool {
        self.has_perm(&meta.permission(capability))
    }

    /// Reject before any state change when the capability is missing.
    pub fn require(&self, meta: &EntityMeta, capability: Capability) -> Result<(), AppError> {
        let codename = meta.permission(capability);
        if self.has_perm(&codename) {
            Ok(())
        } else {
            tracing::warn!("{} denied {}", self.username, codename);
            Err(AppError::PermissionDenied(format!(
                "permission {} required",
                codename
            )))
        }
    }
}

/// Matches bearer tokens against the configured users.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    users: Vec<ApiUser>,
}

impl Authenticator {
    pub fn new(users: Vec<ApiUser>) -> Self {
        Self { users }
    }

    pub fn authenticate(&self, authorization: Option<&str>) -> Option<Principal> {
        let token = bearer_token(authorization?)?;
        self.users
            .iter()
            .filter(|user| !user.token.is_empty())
            .find(|user| bool::from(user.token.as_bytes().ct_eq(token.as_bytes())))
            .map(|user| Principal::new(&user.username, user.superuser, &user.permissions))
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn principal_from(parts: &Parts, state: &AppState) -> Option<Principal> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    state.auth.authenticate(header)
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        principal_from(parts, state).ok_or(AppError::Unauthenticated)
    }
}

/// Optional principal for pages that render differently when anonymous.
#[derive(Debug, Clone)]
pub struct MaybePrincipal(pub Option<Principal>);

#[async_trait]
impl FromRequestParts<AppState> for MaybePrincipal {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybePrincipal(principal_from(parts, state)))
    }
}
