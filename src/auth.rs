//! Token validation seam for the socket handshake. The hub asks the
//! configured validator about each presented token; a `None` answer means
//! the connection proceeds anonymously.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalType {
    User,
    Service,
}

/// Identity attached to an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub subject_id: String,
    pub principal_type: PrincipalType,
}

pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Option<AuthClaims>;
}

/// Accepts nothing; every connection stays anonymous.
pub struct NullValidator;

impl TokenValidator for NullValidator {
    fn validate(&self, _token: &str) -> Option<AuthClaims> {
        None
    }
}

/// Fixed token-to-subject table, loaded from configuration. Suitable for
/// service-to-service tokens; anything session-based belongs behind a
/// custom [`TokenValidator`].
pub struct StaticTokenValidator {
    tokens: HashMap<String, String>,
}

impl StaticTokenValidator {
    #[must_use]
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Option<AuthClaims> {
        self.tokens.get(token).map(|subject| AuthClaims {
            subject_id: subject.clone(),
            principal_type: PrincipalType::Service,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_validator_maps_known_tokens() {
        let mut tokens = HashMap::new();
        tokens.insert("s3cr3t".to_string(), "ingest-worker".to_string());
        let validator = StaticTokenValidator::new(tokens);

        let claims = validator.validate("s3cr3t").unwrap();
        assert_eq!(claims.subject_id, "ingest-worker");
        assert_eq!(claims.principal_type, PrincipalType::Service);
        assert!(validator.validate("wrong").is_none());
    }

    #[test]
    fn null_validator_rejects_everything() {
        assert!(NullValidator.validate("anything").is_none());
    }
}
