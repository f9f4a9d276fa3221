use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::error::AuthResult;

pub const PHONE_FACTOR_ID: &str = "phone";

/// Display name given to the phone factor enrolled through the gateway.
pub const PRIMARY_PHONE_DISPLAY_NAME: &str = "primary phone";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub multi_factor: Vec<MultiFactorInfo>,
}

impl User {
    pub fn has_second_factor(&self) -> bool {
        !self.multi_factor.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    SignIn,
    SignUp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserCredential {
    pub user: User,
    pub operation: OperationType,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiFactorInfo {
    pub uid: String,
    pub factor_id: String,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
    pub enrollment_time: Option<String>,
}

/// Pending sign-in that still needs a second factor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiFactorResolver {
    pub pending_credential: String,
    pub hints: Vec<MultiFactorInfo>,
}

/// A user about to enroll `phone_number` as a second factor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MfaCandidate {
    pub user: User,
    pub phone_number: String,
}

/// Correlates an SMS challenge with whoever has to answer it.
///
/// Exactly one of `candidate` (enrollment) and `resolver` (sign-in) is set by the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MfaVerifier {
    pub verification_id: String,
    pub candidate: Option<MfaCandidate>,
    pub resolver: Option<MultiFactorResolver>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmationResult {
    pub verification_id: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    #[default]
    Local,
    Session,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginStatus {
    Success,
    /// Credentials were valid but the address is not verified yet.
    EmailNotVerified,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginResult {
    pub status: LoginStatus,
    pub credential: UserCredential,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoginOptions {
    pub persistence: Option<Persistence>,
    pub require_verified_email: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub profile: Option<Map<String, Value>>,
    pub send_verification: bool,
}

impl Registration {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            profile: None,
            send_verification: true,
        }
    }

    pub fn with_profile(mut self, profile: Map<String, Value>) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn without_verification(mut self) -> Self {
        self.send_verification = false;
        self
    }
}

/// Source of the reCAPTCHA token required before an SMS is sent.
#[async_trait]
pub trait ApplicationVerifier: Send + Sync {
    fn verifier_type(&self) -> &str {
        "recaptcha"
    }

    async fn verify(&self) -> AuthResult<String>;
}

/// Verifier returning a fixed token, for servers, emulators and tests.
#[derive(Clone, Debug)]
pub struct StaticVerifier {
    token: String,
}

impl StaticVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl ApplicationVerifier for StaticVerifier {
    async fn verify(&self) -> AuthResult<String> {
        Ok(self.token.clone())
    }
}
