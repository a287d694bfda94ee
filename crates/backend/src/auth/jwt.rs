//! Signed token minting and verification for the two token classes.
//!
//! Access and refresh tokens are HS256 JWTs signed with independent secrets,
//! so a leaked refresh secret cannot forge access tokens and vice versa.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;

/// The two independent signing domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    Access,
    Refresh,
}

impl TokenClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenClass::Access => "access",
            TokenClass::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenClass {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenClass::Access),
            "refresh" => Ok(TokenClass::Refresh),
            other => Err(TokenError::InvalidTokenClass(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("token signature is invalid")]
    SignatureInvalid,

    #[error("token has expired")]
    Expired,

    #[error("expected a {expected} token, got {actual}")]
    ClassMismatch {
        expected: TokenClass,
        actual: TokenClass,
    },

    #[error("invalid token class: {0}")]
    InvalidTokenClass(String),

    /// Both tokens verify but were not minted as one pair.
    #[error("refresh token does not belong to this access token")]
    PairMismatch,

    #[error("failed to sign token: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingRequiredClaim(_) => TokenError::Malformed,
            _ => TokenError::SignatureInvalid,
        }
    }
}

/// JWT Claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (normalized user email)
    pub sub: String,
    /// Unique token id, the registry key
    pub jti: Uuid,
    /// Token class, checked against the verifying domain
    pub typ: TokenClass,
    pub iss: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Not before timestamp
    pub nbf: i64,
    /// Expiration timestamp
    pub exp: i64,
}

/// One signed token plus the metadata the registry needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedToken {
    pub token: String,
    pub id: Uuid,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
}

/// An access/refresh pair minted for one subject at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub subject: String,
    pub issued_at: i64,
    pub access: MintedToken,
    pub refresh: MintedToken,
}

impl From<TokenPair> for shared_types::TokenResponse {
    fn from(pair: TokenPair) -> Self {
        shared_types::TokenResponse {
            access_token: pair.access.token,
            access_expires_at: pair.access.expires_at,
            refresh_token: pair.refresh.token,
            refresh_expires_at: pair.refresh.expires_at,
            token_type: "Bearer".to_string(),
        }
    }
}

#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Mints and verifies tokens. Holds no state beyond its keys.
#[derive(Clone)]
pub struct TokenCodec {
    access: SigningKeys,
    refresh: SigningKeys,
    issuer: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenCodec {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access: SigningKeys::from_secret(config.access_secret.as_bytes()),
            refresh: SigningKeys::from_secret(config.refresh_secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl_secs: i64::try_from(config.access_token_ttl.as_secs()).unwrap_or(i64::MAX),
            refresh_ttl_secs: i64::try_from(config.refresh_token_ttl.as_secs())
                .unwrap_or(i64::MAX),
        }
    }

    fn keys(&self, class: TokenClass) -> &SigningKeys {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }

    fn ttl_secs(&self, class: TokenClass) -> i64 {
        match class {
            TokenClass::Access => self.access_ttl_secs,
            TokenClass::Refresh => self.refresh_ttl_secs,
        }
    }

    /// Mint a fresh access/refresh pair for `subject`.
    ///
    /// Both tokens get new random ids and share the issuance instant. Nothing
    /// is persisted here.
    pub fn mint(&self, subject: &str) -> Result<TokenPair, TokenError> {
        let now = Utc::now().timestamp();

        Ok(TokenPair {
            subject: subject.to_string(),
            issued_at: now,
            access: self.sign(subject, TokenClass::Access, now)?,
            refresh: self.sign(subject, TokenClass::Refresh, now)?,
        })
    }

    fn sign(&self, subject: &str, class: TokenClass, now: i64) -> Result<MintedToken, TokenError> {
        let claims = Claims {
            sub: subject.to_string(),
            jti: Uuid::new_v4(),
            typ: class,
            iss: self.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(self.ttl_secs(class)),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.keys(class).encoding,
        )
        .map_err(TokenError::Encoding)?;

        Ok(MintedToken {
            token,
            id: claims.jti,
            expires_at: claims.exp,
        })
    }

    /// Verify signature, issuer and expiry of `token` in the `class` domain.
    pub fn verify(&self, token: &str, class: TokenClass) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        let token_data = decode::<Claims>(token, &self.keys(class).decoding, &validation)?;
        let claims = token_data.claims;

        if claims.typ != class {
            return Err(TokenError::ClassMismatch {
                expected: class,
                actual: claims.typ,
            });
        }

        Ok(claims)
    }
}
