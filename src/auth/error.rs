use std::fmt;

use crate::auth::types::MultiFactorResolver;
use crate::firestore::FirestoreError;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone)]
pub enum AuthError {
    /// Rejection reported by the identity backend, e.g. `auth/invalid-credential`.
    Api { code: String, message: String },
    Network(String),
    InvalidCredential(String),
    /// The password was right but a second factor must be verified.
    MultiFactorRequired(Box<MultiFactorResolver>),
    UnsupportedSecondFactor(String),
    NoCurrentUser,
    Firestore(FirestoreError),
    Validation(String),
}

impl AuthError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        AuthError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            AuthError::Api { code, .. } => code,
            AuthError::Network(_) => "auth/network-request-failed",
            AuthError::InvalidCredential(_) => "auth/invalid-credential",
            AuthError::MultiFactorRequired(_) => "auth/multi-factor-auth-required",
            AuthError::UnsupportedSecondFactor(_) => "auth/unsupported-first-factor",
            AuthError::NoCurrentUser => "auth/no-current-user",
            AuthError::Firestore(err) => err.code_str(),
            AuthError::Validation(_) => "auth/argument-error",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Api { code, message } => write!(f, "{message} ({code})"),
            AuthError::Network(message) => write!(f, "Network error: {message}"),
            AuthError::InvalidCredential(message) => write!(f, "Invalid credential: {message}"),
            AuthError::MultiFactorRequired(resolver) => write!(
                f,
                "Multi-factor authentication required ({} factor(s) enrolled)",
                resolver.hints.len()
            ),
            AuthError::UnsupportedSecondFactor(factor) => {
                write!(f, "Second factor '{factor}' is not supported")
            }
            AuthError::NoCurrentUser => write!(f, "No user is currently signed in"),
            AuthError::Firestore(err) => write!(f, "{err}"),
            AuthError::Validation(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<FirestoreError> for AuthError {
    fn from(error: FirestoreError) -> Self {
        AuthError::Firestore(error)
    }
}

/// Maps an Identity Toolkit error message (`"CODE : detail"`) to an [`AuthError::Api`].
pub(crate) fn map_server_message(raw: &str) -> AuthError {
    let (server_code, detail) = match raw.split_once(':') {
        Some((code, detail)) => (code.trim(), detail.trim()),
        None => (raw.trim(), ""),
    };
    let code = match server_code {
        "EMAIL_EXISTS" => "auth/email-already-in-use".to_string(),
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            "auth/invalid-credential".to_string()
        }
        "USER_DISABLED" => "auth/user-disabled".to_string(),
        "USER_NOT_FOUND" => "auth/user-not-found".to_string(),
        "WEAK_PASSWORD" => "auth/weak-password".to_string(),
        "INVALID_EMAIL" => "auth/invalid-email".to_string(),
        "INVALID_OOB_CODE" => "auth/invalid-action-code".to_string(),
        "EXPIRED_OOB_CODE" => "auth/expired-action-code".to_string(),
        "INVALID_CODE" => "auth/invalid-verification-code".to_string(),
        "INVALID_SESSION_INFO" => "auth/invalid-verification-id".to_string(),
        "SESSION_EXPIRED" => "auth/code-expired".to_string(),
        "INVALID_ID_TOKEN" => "auth/invalid-user-token".to_string(),
        "TOKEN_EXPIRED" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => {
            "auth/requires-recent-login".to_string()
        }
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "auth/too-many-requests".to_string(),
        "MISSING_PHONE_NUMBER" => "auth/missing-phone-number".to_string(),
        "INVALID_PHONE_NUMBER" => "auth/invalid-phone-number".to_string(),
        "SECOND_FACTOR_EXISTS" => "auth/second-factor-already-in-use".to_string(),
        "UNSUPPORTED_FIRST_FACTOR" => "auth/unsupported-first-factor".to_string(),
        other => format!("auth/{}", other.to_ascii_lowercase().replace('_', "-")),
    };
    let message = if detail.is_empty() { server_code } else { detail };
    AuthError::api(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_server_codes() {
        let err = map_server_message("EMAIL_EXISTS : The email address is already in use.");
        assert_eq!(err.code(), "auth/email-already-in-use");
        assert!(err.to_string().starts_with("The email address is already in use."));
    }

    #[test]
    fn unknown_codes_are_kebab_cased() {
        let err = map_server_message("QUOTA_EXCEEDED");
        assert_eq!(err.code(), "auth/quota-exceeded");
    }
}
