//! Bearer token issuing and verification.
//!
//! Tokens are HS256 JWTs whose `sub` is the user id. Identity management
//! lives elsewhere; this service only trusts what it signed.

use anyhow::{Context, Result, bail};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issuer claim for tokens minted here.
pub const ISSUER: &str = "pictor";

/// Default access token lifetime (1 hour).
pub const DEFAULT_TOKEN_LIFETIME: i64 = 3600;

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (user ID).
    pub sub: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// Signs and verifies bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenService {
    /// Create a token service with HMAC-SHA256 signing.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Mint a token for `user_id` valid for `lifetime_secs`.
    pub fn issue(&self, user_id: Uuid, lifetime_secs: i64) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = TokenClaims {
            iss: ISSUER.to_string(),
            sub: user_id.to_string(),
            iat: now,
            exp: now + lifetime_secs,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode token")
    }

    /// Verify a token and return the identity it carries.
    pub fn verify(&self, token: &str) -> Result<Uuid> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .context("invalid token")?;

        let Ok(user_id) = data.claims.sub.parse::<Uuid>() else {
            bail!("token subject is not a user id");
        };
        Ok(user_id)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").finish()
    }
}
