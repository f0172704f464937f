//! JWT issuance and validation for access and email-verification tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub user_id: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims of an email-verification token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationClaims {
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and checks HS256 tokens with a shared secret.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    verification_ttl: Duration,
}

impl JwtManager {
    #[must_use]
    pub fn new(secret: &[u8], access_ttl_hours: i64, verification_ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl: Duration::hours(access_ttl_hours),
            verification_ttl: Duration::hours(verification_ttl_hours),
        }
    }

    #[must_use]
    pub fn from_config(config: &medlearn_common::config::AuthConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            config.token_ttl_hours,
            config.verification_ttl_hours,
        )
    }

    pub fn issue_access_token(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = AccessClaims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn issue_verification_token(
        &self,
        email: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = VerificationClaims {
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + self.verification_ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn validate_access(&self, token: &str) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
        jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
    }

    pub fn validate_verification(
        &self,
        token: &str,
    ) -> Result<VerificationClaims, jsonwebtoken::errors::Error> {
        jsonwebtoken::decode::<VerificationClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
    }
}
