//! JWT bearer authentication (requires `jwt` feature)
//!
//! Tokens are issued elsewhere; this service only verifies them. Validated
//! claims are inserted into the request extensions.

use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::{fs, sync::Arc};

use crate::{config::AuthConfig, error::Error};

/// Claims carried by an accepted token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user or client id)
    pub sub: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,
}

/// JWT authentication middleware state
#[derive(Clone)]
pub struct JwtAuth {
    decoding_key: Arc<DecodingKey>,
    validation: Validation,
}

impl JwtAuth {
    /// Load the verification key and build validation rules
    pub fn new(config: &AuthConfig) -> Result<Self, Error> {
        let key = fs::read(&config.key_path).map_err(|e| {
            Error::Config(Box::new(figment::Error::from(format!(
                "Failed to read JWT key from '{}': {}",
                config.key_path.display(),
                e
            ))))
        })?;

        Self::from_key(&key, config)
    }

    /// Build from key material already in memory
    pub fn from_key(key: &[u8], config: &AuthConfig) -> Result<Self, Error> {
        let algorithm = match config.algorithm.to_uppercase().as_str() {
            "RS256" => Algorithm::RS256,
            "RS384" => Algorithm::RS384,
            "RS512" => Algorithm::RS512,
            "ES256" => Algorithm::ES256,
            "ES384" => Algorithm::ES384,
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            alg => {
                return Err(Error::Config(Box::new(figment::Error::from(format!(
                    "Unsupported JWT algorithm: {}",
                    alg
                )))))
            }
        };

        let decoding_key = match algorithm {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                DecodingKey::from_rsa_pem(key)?
            }
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(key)?,
            _ => DecodingKey::from_secret(key),
        };

        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        }

        Ok(Self {
            decoding_key: Arc::new(decoding_key),
            validation,
        })
    }

    /// Decode and validate a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, Error> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(token_data.claims)
    }

    /// Middleware function to validate the bearer token and inject claims
    pub async fn middleware(
        State(auth): State<Self>,
        mut request: Request<Body>,
        next: Next,
    ) -> Result<Response, Error> {
        let token = extract_token(request.headers())?;
        let claims = auth.validate_token(&token).inspect_err(|e| {
            tracing::debug!(error = %e, path = %request.uri().path(), "Rejected bearer token");
        })?;

        request.extensions_mut().insert(claims);
        Ok(next.run(request).await)
    }
}

/// Extract the token from an `Authorization: Bearer` header
pub fn extract_token(headers: &HeaderMap) -> Result<String, Error> {
    let auth_header = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthorized("Missing Authorization header".to_string()))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| Error::Unauthorized("Invalid Authorization header format".to_string()))
}
