//! JWT authentication.
//!
//! The bearer token carries the full identity: user, tenant, role and the
//! stores the user may act at. A token without `stores` covers every store
//! of its tenant.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mercato_core::{Actor, Role, StoreScope};

use crate::error::ApiError;

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    pub tenant_id: String,

    pub role: Role,

    /// Store restriction; absent means every store of the tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stores: Option<Vec<String>>,

    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn into_actor(self) -> Actor {
        Actor {
            user_id: self.sub,
            tenant_id: self.tenant_id,
            role: self.role,
            store_scope: match self.stores {
                Some(stores) => StoreScope::Stores(stores),
                None => StoreScope::All,
            },
        }
    }
}

/// JWT token manager.
#[derive(Clone)]
pub struct JwtManager {
    secret: String,
    lifetime_secs: i64,
}

impl JwtManager {
    pub fn new(secret: impl Into<String>, lifetime_secs: i64) -> Self {
        JwtManager {
            secret: secret.into(),
            lifetime_secs,
        }
    }

    /// Mints a token for `actor`. Used by operator tooling and tests.
    pub fn issue(&self, actor: &Actor) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: actor.user_id.clone(),
            tenant_id: actor.tenant_id.clone(),
            role: actor.role,
            stores: match &actor.store_scope {
                StoreScope::All => None,
                StoreScope::Stores(ids) => Some(ids.clone()),
            },
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.lifetime_secs)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ApiError::AuthFailed(format!("Failed to generate token: {}", e)))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| ApiError::AuthFailed(format!("Invalid token: {}", e)))
    }

    /// Resolves the request's `Authorization` header to an actor.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Actor, ApiError> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::AuthFailed("missing Authorization header".to_string()))?;
        let token = extract_bearer_token(header)
            .ok_or_else(|| ApiError::AuthFailed("expected a Bearer token".to_string()))?;
        Ok(self.validate(token)?.into_actor())
    }
}

/// Extract bearer token from authorization header.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
