//! HS256 JWT verification.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::auth::{Authenticator, Claims, Reason, Unauthorized};

pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is checked when present; `sub` is always required.
        validation.set_required_spec_claims(&["sub"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator").finish_non_exhaustive()
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, token: &str) -> Result<Claims, Unauthorized> {
        if token.is_empty() {
            return Err(Unauthorized::new(Reason::Missing));
        }

        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => Reason::Expired,
                    ErrorKind::InvalidSignature => Reason::InvalidSignature,
                    _ => Reason::Malformed,
                };
                tracing::debug!(reason = %reason, error = %err, "Token rejected");
                Unauthorized::new(reason)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn token(secret: &str, claims: serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let auth = JwtAuthenticator::new(SECRET);
        let claims = auth
            .verify(&token(SECRET, json!({"sub": "42", "exp": now() + 600, "role": "admin"})))
            .unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.extra["role"], "admin");
    }

    #[test]
    fn token_without_exp_is_accepted() {
        let auth = JwtAuthenticator::new(SECRET);
        assert!(auth.verify(&token(SECRET, json!({"sub": "42"}))).is_ok());
    }

    #[test]
    fn classifies_rejections() {
        let auth = JwtAuthenticator::new(SECRET);

        let expired = auth.verify(&token(SECRET, json!({"sub": "42", "exp": now() - 3600})));
        assert_eq!(expired.unwrap_err().reason, Reason::Expired);

        let forged = auth.verify(&token("other-secret", json!({"sub": "42"})));
        assert_eq!(forged.unwrap_err().reason, Reason::InvalidSignature);

        let no_subject = auth.verify(&token(SECRET, json!({"user": "42"})));
        assert_eq!(no_subject.unwrap_err().reason, Reason::Malformed);

        assert_eq!(auth.verify("not-a-jwt").unwrap_err().reason, Reason::Malformed);
        assert_eq!(auth.verify("").unwrap_err().reason, Reason::Missing);
    }
}
