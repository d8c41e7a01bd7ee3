use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::core::config::Settings;

const ARGON2_MEMORY_KIB: u32 = 19_456;
const ARGON2_TIME: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;

#[derive(Debug, Error)]
pub(crate) enum SecurityError {
    #[error("password hashing failed")]
    Hashing,
    #[error("password verification failed")]
    Verification,
    #[error("jwt encoding failed")]
    JwtEncoding,
    #[error("jwt decoding failed")]
    JwtDecoding,
    #[error("token is not valid for this use")]
    WrongTokenKind,
    #[error("unsupported jwt algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub(crate) sub: String,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
    pub(crate) jti: String,
    #[serde(rename = "typ")]
    pub(crate) kind: TokenKind,
}

/// Issues and verifies access and refresh tokens. Built once at startup and shared through the
/// app state.
///
/// Both kinds are signed with the same key; the `typ` claim keeps a refresh token from being
/// accepted as a bearer credential and the other way round.
#[derive(Clone)]
pub(crate) struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self, SecurityError> {
        let security = settings.security();
        let algorithm = parse_algorithm(&security.algorithm)?;
        let secret = security.secret_key.as_bytes();

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            algorithm,
            ttl: Duration::minutes(security.access_token_expire_minutes as i64),
            refresh_ttl: Duration::days(security.refresh_token_expire_days as i64),
        })
    }

    pub(crate) fn issue(&self, subject: &str) -> Result<String, SecurityError> {
        self.sign(subject, TokenKind::Access, self.ttl)
    }

    pub(crate) fn issue_refresh(&self, subject: &str) -> Result<String, SecurityError> {
        self.sign(subject, TokenKind::Refresh, self.refresh_ttl)
    }

    pub(crate) fn verify(&self, token: &str) -> Result<Claims, SecurityError> {
        self.decode_kind(token, TokenKind::Access)
    }

    pub(crate) fn verify_refresh(&self, token: &str) -> Result<Claims, SecurityError> {
        self.decode_kind(token, TokenKind::Refresh)
    }

    pub(crate) fn expires_in_seconds(&self) -> i64 {
        self.ttl.whole_seconds()
    }

    pub(crate) fn refresh_expires_in_seconds(&self) -> i64 {
        self.refresh_ttl.whole_seconds()
    }

    fn sign(&self, subject: &str, kind: TokenKind, ttl: Duration) -> Result<String, SecurityError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
            kind,
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|_| SecurityError::JwtEncoding)
    }

    fn decode_kind(&self, token: &str, expected: TokenKind) -> Result<Claims, SecurityError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.required_spec_claims.insert("exp".to_string());
        validation.required_spec_claims.insert("sub".to_string());

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| SecurityError::JwtDecoding)?;

        if claims.kind != expected {
            return Err(SecurityError::WrongTokenKind);
        }
        Ok(claims)
    }
}

pub(crate) fn hash_password(password: &str) -> Result<String, SecurityError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher(SecurityError::Hashing)?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| SecurityError::Hashing)?
        .to_string();

    Ok(hash)
}

pub(crate) fn verify_password(password: &str, hash: &str) -> Result<bool, SecurityError> {
    let parsed = PasswordHash::new(hash).map_err(|_| SecurityError::Verification)?;

    match hasher(SecurityError::Verification)?.verify_password(password.as_bytes(), &parsed) {
        Ok(_) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(_) => Err(SecurityError::Verification),
    }
}

fn hasher(on_error: SecurityError) -> Result<Argon2<'static>, SecurityError> {
    let params = argon2::Params::new(ARGON2_MEMORY_KIB, ARGON2_TIME, ARGON2_PARALLELISM, None)
        .map_err(|_| on_error)?;
    Ok(Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params))
}

fn parse_algorithm(value: &str) -> Result<Algorithm, SecurityError> {
    match value {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str) -> TokenService {
        TokenService {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            ttl: Duration::minutes(5),
            refresh_ttl: Duration::days(7),
        }
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("correct-horse-battery-staple").expect("hash");
        assert!(verify_password("correct-horse-battery-staple", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(matches!(
            verify_password("anything", "not-a-phc-string"),
            Err(SecurityError::Verification)
        ));
    }

    #[test]
    fn token_carries_subject() {
        let tokens = service("test-secret");
        let token = tokens.issue("user-123").expect("token");
        let claims = tokens.verify(&token).expect("claims");

        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.exp - claims.iat, 300);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = service("first").issue("user-123").expect("token");
        assert!(matches!(service("second").verify(&token), Err(SecurityError::JwtDecoding)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = service("test-secret");
        let token =
            tokens.sign("user-123", TokenKind::Access, Duration::minutes(-5)).expect("token");
        assert!(tokens.verify(&token).is_err());
    }

    #[test]
    fn token_kinds_are_not_interchangeable() {
        let tokens = service("test-secret");
        let access = tokens.issue("user-123").expect("access");
        let refresh = tokens.issue_refresh("user-123").expect("refresh");

        assert!(matches!(tokens.verify(&refresh), Err(SecurityError::WrongTokenKind)));
        assert!(matches!(tokens.verify_refresh(&access), Err(SecurityError::WrongTokenKind)));

        let claims = tokens.verify_refresh(&refresh).expect("refresh claims");
        assert_eq!(claims.kind, TokenKind::Refresh);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn every_token_is_unique() {
        let tokens = service("test-secret");
        let first = tokens.issue_refresh("user-123").expect("first");
        let second = tokens.issue_refresh("user-123").expect("second");
        assert_ne!(first, second);
    }

    #[test]
    fn unknown_algorithm_is_refused() {
        assert!(matches!(parse_algorithm("RS256"), Err(SecurityError::UnsupportedAlgorithm(_))));
    }
}
