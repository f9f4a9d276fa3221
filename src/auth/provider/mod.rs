use async_trait::async_trait;

use crate::auth::error::AuthResult;
use crate::auth::types::{MultiFactorInfo, MultiFactorResolver, Persistence, User, UserCredential};

pub mod http;
pub mod memory;

pub use http::HttpIdentityProvider;
pub use memory::MemoryIdentityProvider;

/// Account operations of the identity backend.
///
/// Successful sign-ins make the returned user the provider's current user.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn create_user(&self, email: &str, password: &str) -> AuthResult<UserCredential>;

    /// Fails with `AuthError::MultiFactorRequired` when the account has a second factor.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<UserCredential>;

    async fn send_email_verification(&self, user: &User) -> AuthResult<()>;

    async fn send_password_reset_email(&self, email: &str) -> AuthResult<()>;

    /// Returns the email address the reset code was issued for.
    async fn verify_password_reset_code(&self, code: &str) -> AuthResult<String>;

    async fn confirm_password_reset(&self, code: &str, new_password: &str) -> AuthResult<()>;

    async fn apply_action_code(&self, code: &str) -> AuthResult<()>;

    async fn update_password(&self, user: &User, new_password: &str) -> AuthResult<User>;

    async fn delete_user(&self, user: &User) -> AuthResult<()>;

    /// Sends an SMS code and returns the verification id.
    async fn sign_in_with_phone_number(&self, phone_number: &str, recaptcha_token: &str) -> AuthResult<String>;

    async fn confirm_phone_sign_in(&self, verification_id: &str, code: &str) -> AuthResult<UserCredential>;

    async fn start_mfa_enrollment(&self, user: &User, phone_number: &str, recaptcha_token: &str) -> AuthResult<String>;

    async fn finalize_mfa_enrollment(
        &self,
        user: &User,
        verification_id: &str,
        code: &str,
        display_name: Option<&str>,
    ) -> AuthResult<User>;

    async fn start_mfa_sign_in(
        &self,
        resolver: &MultiFactorResolver,
        hint: &MultiFactorInfo,
        recaptcha_token: &str,
    ) -> AuthResult<String>;

    async fn finalize_mfa_sign_in(
        &self,
        resolver: &MultiFactorResolver,
        verification_id: &str,
        code: &str,
    ) -> AuthResult<UserCredential>;

    async fn set_persistence(&self, persistence: Persistence) -> AuthResult<()>;

    async fn sign_out(&self) -> AuthResult<()>;

    fn current_user(&self) -> Option<User>;
}
