//! Acting user extraction
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user id in `X-Actor-Id`. Mutating endpoints refuse requests without it.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::Error;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Id of the user performing a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Actor(value.to_string()))
            .ok_or_else(|| Error::Validation("X-Actor-Id header is required".to_string()))
    }
}
