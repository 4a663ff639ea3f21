//! Caller authentication extractors.
//!
//! End users present an HS256 bearer token carrying a `role` claim.
//! Internal services present the shared secret in `x-api-key`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::request_context::{header_string, request_id};
use crate::service::Actor;
use crate::state::{AppState, AuthConfig};
use crate::subscriptions::{UserRef, API_KEY_HEADER};

/// JWT claims accepted on end-user routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The user's id in the subscription store.
    pub sub: UserRef,
    pub role: String,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    PremiumUser,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "USER" => Some(Role::User),
            "PREMIUM_USER" => Some(Role::PremiumUser),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// An authenticated end user.
#[derive(Debug, Clone)]
pub struct UserAuth {
    pub user_id: UserRef,
    pub role: Role,
}

impl UserAuth {
    pub fn actor(&self) -> Actor {
        Actor::User {
            id: self.user_id.clone(),
            admin: self.role == Role::Admin,
        }
    }
}

/// An internal service holding the shared secret.
#[derive(Debug, Clone, Copy)]
pub struct ServiceAuth;

/// Either kind of caller.
#[derive(Debug, Clone)]
pub enum Caller {
    User(UserAuth),
    Service,
}

impl Caller {
    pub fn actor(&self) -> Actor {
        match self {
            Caller::User(user) => user.actor(),
            Caller::Service => Actor::Service,
        }
    }
}

fn authenticate_user(headers: &HeaderMap, auth: &AuthConfig) -> Result<UserAuth, ApiError> {
    let request_id = request_id(headers);
    let Some(value) = header_string(headers, "authorization") else {
        return Err(ApiError::unauthorized("missing_authorization", "missing bearer token")
            .with_request_id(request_id));
    };
    let Some(token) = value.trim().strip_prefix("Bearer ").map(str::trim) else {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization must be a Bearer token",
        )
        .with_request_id(request_id));
    };

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| {
        ApiError::unauthorized("invalid_token", "invalid or expired token")
            .with_request_id(request_id.clone())
    })?
    .claims;

    let Some(role) = Role::parse(&claims.role) else {
        return Err(ApiError::forbidden(
            "role_not_permitted",
            format!("role '{}' may not use this route", claims.role),
        )
        .with_request_id(request_id));
    };

    Ok(UserAuth {
        user_id: claims.sub,
        role,
    })
}

fn authenticate_service(headers: &HeaderMap, auth: &AuthConfig) -> Result<ServiceAuth, ApiError> {
    let presented = header_string(headers, API_KEY_HEADER).unwrap_or_default();
    if presented.is_empty() || !constant_time_eq(presented.as_bytes(), auth.internal_api_key.as_bytes()) {
        return Err(ApiError::unauthorized("invalid_api_key", "missing or invalid API key")
            .with_request_id(request_id(headers)));
    }
    Ok(ServiceAuth)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl FromRequestParts<AppState> for UserAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate_user(&parts.headers, state.auth())
    }
}

impl FromRequestParts<AppState> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate_service(&parts.headers, state.auth())
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    /// Uses the API key when one is presented, otherwise the bearer token.
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if parts.headers.contains_key(API_KEY_HEADER) {
            authenticate_service(&parts.headers, state.auth()).map(|_| Caller::Service)
        } else {
            authenticate_user(&parts.headers, state.auth()).map(Caller::User)
        }
    }
}
