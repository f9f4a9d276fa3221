use std::sync::Arc;

use serde_json::Value;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::provider::IdentityProvider;
use crate::auth::types::{
    ApplicationVerifier, ConfirmationResult, LoginOptions, LoginResult, LoginStatus, MfaCandidate,
    MfaVerifier, OperationType, Persistence, Registration, User, UserCredential, PHONE_FACTOR_ID,
    PRIMARY_PHONE_DISPLAY_NAME,
};
use crate::firestore::RecordGateway;
use crate::logger::Logger;

const LOGGER_NAME: &str = "@firebase-gateway/users";
const INVALID_EMAIL_CODE_MESSAGE: &str =
    "Code is invalid or expired. Ask the user to verify their email address";

/// Password, phone and multi-factor flows, with an optional profile collection keyed by uid.
pub struct UserGateway {
    provider: Arc<dyn IdentityProvider>,
    records: Option<RecordGateway>,
    logger: Logger,
}

impl UserGateway {
    pub fn new(provider: Arc<dyn IdentityProvider>, records: Option<RecordGateway>) -> Self {
        Self {
            provider,
            records,
            logger: Logger::new(LOGGER_NAME),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    pub fn records(&self) -> Option<&RecordGateway> {
        self.records.as_ref()
    }

    /// Creates the account, then sends the verification email and saves the profile together.
    ///
    /// If either follow-up fails the new account is deleted again before the error is returned.
    /// Each call rolls back only the account it created, so registrations may overlap.
    pub async fn register_with_email_and_password(&self, registration: Registration) -> AuthResult<UserCredential> {
        let Registration {
            email,
            password,
            profile,
            send_verification,
        } = registration;

        let credential = self
            .provider
            .create_user(&email, &password)
            .await
            .map_err(|err| self.fail("register_with_email_and_password", err))?;
        let user = &credential.user;

        let verification = async {
            if send_verification {
                self.provider.send_email_verification(user).await
            } else {
                Ok(())
            }
        };
        let profile_write = async {
            match (&self.records, profile) {
                (Some(records), Some(mut profile)) => {
                    profile.insert("email".to_string(), Value::String(email.clone()));
                    records
                        .save(Value::Object(profile), Some(&user.uid))
                        .await
                        .map(|_| ())
                        .map_err(AuthError::from)
                }
                _ => Ok(()),
            }
        };

        if let Err(err) = futures::try_join!(verification, profile_write) {
            self.roll_back_registration(user).await;
            return Err(self.fail("register_with_email_and_password", err));
        }
        Ok(credential)
    }

    async fn roll_back_registration(&self, user: &User) {
        if let Err(err) = self.provider.delete_user(user).await {
            self.logger.error_with([
                "register_with_email_and_password: could not delete the new account",
                err.to_string().as_str(),
            ]);
        }
        if let Some(records) = &self.records {
            if let Err(err) = records.delete(&user.uid).await {
                self.logger.warn(format!(
                    "register_with_email_and_password: could not delete the profile of {}: {err}",
                    user.uid
                ));
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str, options: LoginOptions) -> AuthResult<LoginResult> {
        let result = async {
            if let Some(persistence) = options.persistence {
                self.provider.set_persistence(persistence).await?;
            }
            let credential = self.provider.sign_in_with_password(email, password).await?;
            let status = if options.require_verified_email && !credential.user.email_verified {
                LoginStatus::EmailNotVerified
            } else {
                LoginStatus::Success
            };
            Ok::<_, AuthError>(LoginResult { status, credential })
        }
        .await;
        result.map_err(|err| self.fail("login", err))
    }

    /// Signs in and starts the SMS step of multi-factor authentication.
    ///
    /// Accounts without a second factor get an enrollment challenge sent to `phone_number`
    /// (or the account's own number). Enrolled accounts get a sign-in challenge on their
    /// first phone factor. `Ok(None)` means the first enrolled factor is not a phone.
    ///
    /// Uses [`Persistence::Session`] unless another persistence is passed.
    pub async fn login_with_multi_auth_factor(
        &self,
        email: &str,
        password: &str,
        phone_number: Option<String>,
        verifier: &dyn ApplicationVerifier,
        persistence: Option<Persistence>,
    ) -> AuthResult<Option<MfaVerifier>> {
        let persistence = persistence.unwrap_or(Persistence::Session);
        if let Err(err) = self.provider.set_persistence(persistence).await {
            return Err(self.fail("login_with_multi_auth_factor", err));
        }
        let result = match self.provider.sign_in_with_password(email, password).await {
            Ok(credential) => self.start_enrollment(credential.user, phone_number, verifier).await,
            Err(AuthError::MultiFactorRequired(resolver)) => {
                let Some(hint) = resolver
                    .hints
                    .first()
                    .filter(|hint| hint.factor_id == PHONE_FACTOR_ID)
                    .cloned()
                else {
                    self.logger.info("login_with_multi_auth_factor: first factor is not a phone");
                    return Ok(None);
                };
                async {
                    let token = verifier.verify().await?;
                    let verification_id = self
                        .provider
                        .start_mfa_sign_in(&resolver, &hint, &token)
                        .await?;
                    Ok::<_, AuthError>(Some(MfaVerifier {
                        verification_id,
                        candidate: None,
                        resolver: Some(*resolver),
                    }))
                }
                .await
            }
            Err(err) => Err(err),
        };
        result.map_err(|err| self.fail("login_with_multi_auth_factor", err))
    }

    async fn start_enrollment(
        &self,
        user: User,
        phone_number: Option<String>,
        verifier: &dyn ApplicationVerifier,
    ) -> AuthResult<Option<MfaVerifier>> {
        let phone_number = phone_number
            .or_else(|| user.phone_number.clone())
            .ok_or_else(|| {
                AuthError::Validation("A phone number is required to enroll a second factor".into())
            })?;
        let token = verifier.verify().await?;
        let verification_id = self
            .provider
            .start_mfa_enrollment(&user, &phone_number, &token)
            .await?;
        Ok(Some(MfaVerifier {
            verification_id,
            candidate: Some(MfaCandidate { user, phone_number }),
            resolver: None,
        }))
    }

    /// Answers the SMS challenge started by [`UserGateway::login_with_multi_auth_factor`].
    pub async fn confirm_otp(&self, verifier: &MfaVerifier, code: &str) -> AuthResult<Option<UserCredential>> {
        let result = if let Some(resolver) = &verifier.resolver {
            self.provider
                .finalize_mfa_sign_in(resolver, &verifier.verification_id, code)
                .await
                .map(Some)
        } else if let Some(candidate) = &verifier.candidate {
            self.provider
                .finalize_mfa_enrollment(
                    &candidate.user,
                    &verifier.verification_id,
                    code,
                    Some(PRIMARY_PHONE_DISPLAY_NAME),
                )
                .await
                .map(|user| {
                    Some(UserCredential {
                        user,
                        operation: OperationType::SignIn,
                    })
                })
        } else {
            Ok(None)
        };
        result.map_err(|err| self.fail("confirm_otp", err))
    }

    pub async fn sign_in_with_phone_number(
        &self,
        phone_number: &str,
        verifier: &dyn ApplicationVerifier,
    ) -> AuthResult<ConfirmationResult> {
        let result = async {
            let token = verifier.verify().await?;
            let verification_id = self
                .provider
                .sign_in_with_phone_number(phone_number, &token)
                .await?;
            Ok::<_, AuthError>(ConfirmationResult { verification_id })
        }
        .await;
        result.map_err(|err| self.fail("sign_in_with_phone_number", err))
    }

    pub async fn confirm_phone_code(&self, confirmation: &ConfirmationResult, code: &str) -> AuthResult<UserCredential> {
        self.provider
            .confirm_phone_sign_in(&confirmation.verification_id, code)
            .await
            .map_err(|err| self.fail("confirm_phone_code", err))
    }

    pub fn is_logged_in(&self) -> Option<User> {
        self.provider.current_user()
    }

    /// Changes the password of the signed-in user.
    pub async fn reset_password(&self, new_password: &str) -> AuthResult<User> {
        let result = async {
            let user = self.provider.current_user().ok_or(AuthError::NoCurrentUser)?;
            self.provider.update_password(&user, new_password).await
        }
        .await;
        result.map_err(|err| self.fail("reset_password", err))
    }

    pub async fn send_password_reset_message(&self, email: &str) -> AuthResult<()> {
        self.provider
            .send_password_reset_email(email)
            .await
            .map_err(|err| self.fail("send_password_reset_message", err))
    }

    pub async fn do_password_reset(&self, code: &str, new_password: &str) -> AuthResult<()> {
        self.provider
            .confirm_password_reset(code, new_password)
            .await
            .map_err(|err| self.fail("do_password_reset", err))
    }

    pub async fn verify_email(&self, code: &str) -> AuthResult<()> {
        self.provider.apply_action_code(code).await.map_err(|err| {
            let err = match err {
                AuthError::Api { code, .. } => AuthError::api(code, INVALID_EMAIL_CODE_MESSAGE),
                other => other,
            };
            self.fail("verify_email", err)
        })
    }

    /// Email address the reset link was sent to.
    pub async fn verify_password_reset_link(&self, code: &str) -> AuthResult<String> {
        self.provider
            .verify_password_reset_code(code)
            .await
            .map_err(|err| self.fail("verify_password_reset_link", err))
    }

    pub async fn logout(&self) -> AuthResult<()> {
        self.provider
            .sign_out()
            .await
            .map_err(|err| self.fail("logout", err))
    }

    /// Deletes the signed-in identity and then its profile document.
    pub async fn delete_account(&self) -> AuthResult<()> {
        let result = async {
            let user = self.provider.current_user().ok_or(AuthError::NoCurrentUser)?;
            self.provider.delete_user(&user).await?;
            if let Some(records) = &self.records {
                records.delete(&user.uid).await?;
            }
            Ok::<_, AuthError>(())
        }
        .await;
        result.map_err(|err| self.fail("delete_account", err))
    }

    fn fail(&self, operation: &str, err: AuthError) -> AuthError {
        self.logger
            .error_with([operation, err.to_string().as_str()]);
        err
    }
}
