//! Bearer token verification (HS256).

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, Identity};

/// Claims carried by gateway tokens.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            user_id: claims.sub,
            email: claims.email,
            roles: claims.roles,
        }
    }
}

/// Verifies tokens issued by the auth service.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token and return the identity it carries.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("missing subject".to_string()));
        }
        Ok(data.claims.into())
    }

    /// Sign a token for `identity`, valid for `ttl`. Used by tooling and tests.
    pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
        let claims = Claims {
            sub: identity.user_id.clone(),
            email: identity.email.clone(),
            roles: identity.roles.clone(),
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::new("user-1", vec!["user".into()]).with_email("u1@example.com")
    }

    #[test]
    fn test_roundtrip() {
        let verifier = JwtVerifier::new("test-secret");
        let token = verifier.issue(&identity(), Duration::minutes(5)).unwrap();
        let verified = verifier.verify(&token).unwrap();
        assert_eq!(verified, identity());
    }

    #[test]
    fn test_wrong_secret() {
        let token = JwtVerifier::new("a")
            .issue(&identity(), Duration::minutes(5))
            .unwrap();
        assert!(matches!(
            JwtVerifier::new("b").verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired() {
        let verifier = JwtVerifier::new("test-secret");
        let token = verifier.issue(&identity(), Duration::minutes(-5)).unwrap();
        assert_eq!(verifier.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn test_garbage() {
        let verifier = JwtVerifier::new("test-secret");
        assert!(verifier.verify("not-a-token").is_err());
    }
}
