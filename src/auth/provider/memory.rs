use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::{thread_rng, Rng};

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::types::{
    MultiFactorInfo, MultiFactorResolver, OperationType, Persistence, User, UserCredential,
    PHONE_FACTOR_ID,
};
use crate::util::auto_id;

use super::IdentityProvider;

const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Clone, Debug)]
struct Account {
    user: User,
    password: String,
}

#[derive(Clone, Debug)]
enum SmsSession {
    PhoneSignIn { phone_number: String },
    Enrollment { uid: String, phone_number: String },
    MfaSignIn { uid: String },
}

#[derive(Clone, Debug)]
struct PendingSms {
    session: SmsSession,
    code: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum OobAction {
    VerifyEmail { uid: String },
    ResetPassword { uid: String },
}

#[derive(Default)]
struct State {
    accounts: BTreeMap<String, Account>,
    sms_sessions: HashMap<String, PendingSms>,
    oob_codes: HashMap<String, OobAction>,
    pending_credentials: HashMap<String, String>,
    current_user: Option<User>,
    persistence: Persistence,
    last_sms_code: Option<String>,
    last_oob_code: Option<String>,
    failures: HashMap<String, AuthError>,
    token_counter: u64,
}

impl State {
    fn uid_for_email(&self, email: &str) -> Option<String> {
        self.accounts
            .values()
            .find(|account| account.user.email.as_deref() == Some(email))
            .map(|account| account.user.uid.clone())
    }

    fn account_mut(&mut self, uid: &str) -> AuthResult<&mut Account> {
        self.accounts.get_mut(uid).ok_or_else(user_not_found)
    }

    /// Refreshes the tokens of `uid` and returns a copy of the account's user.
    fn issue_tokens(&mut self, uid: &str) -> AuthResult<User> {
        self.token_counter += 1;
        let counter = self.token_counter;
        let account = self.account_mut(uid)?;
        account.user.id_token = Some(format!("memory-id-token-{uid}-{counter}"));
        account.user.refresh_token = Some(format!("memory-refresh-token-{uid}-{counter}"));
        Ok(account.user.clone())
    }

    fn sign_in(&mut self, uid: &str, operation: OperationType) -> AuthResult<UserCredential> {
        let user = self.issue_tokens(uid)?;
        self.current_user = Some(user.clone());
        Ok(UserCredential { user, operation })
    }

    fn refresh_current(&mut self, uid: &str) {
        let updated = self.accounts.get(uid).map(|account| account.user.clone());
        if let Some(current) = &mut self.current_user {
            if current.uid == uid {
                if let Some(updated) = updated {
                    *current = updated;
                }
            }
        }
    }

    fn issue_sms(&mut self, session: SmsSession) -> String {
        let code = format!("{:06}", thread_rng().gen_range(0..1_000_000));
        let verification_id = auto_id();
        self.last_sms_code = Some(code.clone());
        self.sms_sessions
            .insert(verification_id.clone(), PendingSms { session, code });
        verification_id
    }

    fn take_sms(&mut self, verification_id: &str, code: &str) -> AuthResult<SmsSession> {
        let pending = self.sms_sessions.get(verification_id).ok_or_else(|| {
            AuthError::api("auth/invalid-verification-id", "Unknown verification id")
        })?;
        if pending.code != code {
            return Err(AuthError::api(
                "auth/invalid-verification-code",
                "The SMS verification code is invalid",
            ));
        }
        self.sms_sessions
            .remove(verification_id)
            .map(|pending| pending.session)
            .ok_or_else(|| AuthError::api("auth/invalid-verification-id", "Unknown verification id"))
    }

    fn issue_oob(&mut self, action: OobAction) {
        let code = auto_id();
        self.last_oob_code = Some(code.clone());
        self.oob_codes.insert(code, action);
    }
}

fn user_not_found() -> AuthError {
    AuthError::api("auth/user-not-found", "There is no user record for this identifier")
}

fn invalid_action_code() -> AuthError {
    AuthError::api(
        "auth/invalid-action-code",
        "The action code is invalid, expired or already used",
    )
}

fn check_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::api(
            "auth/weak-password",
            "Password should be at least 6 characters",
        ));
    }
    Ok(())
}

fn check_recaptcha(token: &str) -> AuthResult<()> {
    if token.is_empty() {
        return Err(AuthError::api(
            "auth/captcha-check-failed",
            "The reCAPTCHA response is missing",
        ));
    }
    Ok(())
}

/// Identity backend kept in process memory.
///
/// Verification codes are never delivered; read them back with
/// [`MemoryIdentityProvider::last_sms_code`] and [`MemoryIdentityProvider::last_oob_code`].
#[derive(Clone, Default)]
pub struct MemoryIdentityProvider {
    state: Arc<Mutex<State>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next call of `operation` (a trait method name such as `"delete_user"`) fail.
    pub fn fail_next(&self, operation: &str, error: AuthError) {
        self.state().failures.insert(operation.to_string(), error);
    }

    fn take_failure(&self, operation: &str) -> AuthResult<()> {
        match self.state().failures.remove(operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Creates an account directly, bypassing sign-up.
    pub fn add_account(&self, email: &str, password: &str, email_verified: bool) -> User {
        let user = User {
            uid: auto_id(),
            email: Some(email.to_string()),
            email_verified,
            ..Default::default()
        };
        self.state().accounts.insert(
            user.uid.clone(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    /// Enrolls a phone second factor on an existing account.
    pub fn add_phone_factor(&self, uid: &str, phone_number: &str) -> AuthResult<MultiFactorInfo> {
        let mut state = self.state();
        let info = MultiFactorInfo {
            uid: auto_id(),
            factor_id: PHONE_FACTOR_ID.to_string(),
            phone_number: Some(phone_number.to_string()),
            display_name: None,
            enrollment_time: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        };
        state.account_mut(uid)?.user.multi_factor.push(info.clone());
        Ok(info)
    }

    pub fn account(&self, email: &str) -> Option<User> {
        let state = self.state();
        let uid = state.uid_for_email(email)?;
        state.accounts.get(&uid).map(|account| account.user.clone())
    }

    pub fn account_count(&self) -> usize {
        self.state().accounts.len()
    }

    pub fn last_sms_code(&self) -> Option<String> {
        self.state().last_sms_code.clone()
    }

    pub fn last_oob_code(&self) -> Option<String> {
        self.state().last_oob_code.clone()
    }

    pub fn persistence(&self) -> Persistence {
        self.state().persistence
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn create_user(&self, email: &str, password: &str) -> AuthResult<UserCredential> {
        self.take_failure("create_user")?;
        if email.trim().is_empty() || !email.contains('@') {
            return Err(AuthError::api("auth/invalid-email", "The email address is badly formatted"));
        }
        check_password(password)?;

        let mut state = self.state();
        if state.uid_for_email(email).is_some() {
            return Err(AuthError::api(
                "auth/email-already-in-use",
                "The email address is already in use by another account",
            ));
        }
        let uid = auto_id();
        state.accounts.insert(
            uid.clone(),
            Account {
                user: User {
                    uid: uid.clone(),
                    email: Some(email.to_string()),
                    ..Default::default()
                },
                password: password.to_string(),
            },
        );
        state.sign_in(&uid, OperationType::SignUp)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<UserCredential> {
        self.take_failure("sign_in_with_password")?;
        let mut state = self.state();
        let account = state
            .uid_for_email(email)
            .and_then(|uid| state.accounts.get(&uid))
            .filter(|account| account.password == password)
            .cloned()
            .ok_or_else(|| {
                AuthError::api("auth/invalid-credential", "The supplied credentials are incorrect")
            })?;

        if account.user.has_second_factor() {
            let pending_credential = auto_id();
            state
                .pending_credentials
                .insert(pending_credential.clone(), account.user.uid.clone());
            return Err(AuthError::MultiFactorRequired(Box::new(MultiFactorResolver {
                pending_credential,
                hints: account.user.multi_factor.clone(),
            })));
        }
        state.sign_in(&account.user.uid, OperationType::SignIn)
    }

    async fn send_email_verification(&self, user: &User) -> AuthResult<()> {
        self.take_failure("send_email_verification")?;
        let mut state = self.state();
        state.account_mut(&user.uid)?;
        state.issue_oob(OobAction::VerifyEmail {
            uid: user.uid.clone(),
        });
        Ok(())
    }

    async fn send_password_reset_email(&self, email: &str) -> AuthResult<()> {
        self.take_failure("send_password_reset_email")?;
        let mut state = self.state();
        let uid = state.uid_for_email(email).ok_or_else(user_not_found)?;
        state.issue_oob(OobAction::ResetPassword { uid });
        Ok(())
    }

    async fn verify_password_reset_code(&self, code: &str) -> AuthResult<String> {
        self.take_failure("verify_password_reset_code")?;
        let state = self.state();
        match state.oob_codes.get(code) {
            Some(OobAction::ResetPassword { uid }) => state
                .accounts
                .get(uid)
                .and_then(|account| account.user.email.clone())
                .ok_or_else(user_not_found),
            _ => Err(invalid_action_code()),
        }
    }

    async fn confirm_password_reset(&self, code: &str, new_password: &str) -> AuthResult<()> {
        self.take_failure("confirm_password_reset")?;
        check_password(new_password)?;
        let mut state = self.state();
        let uid = match state.oob_codes.get(code) {
            Some(OobAction::ResetPassword { uid }) => uid.clone(),
            _ => return Err(invalid_action_code()),
        };
        state.account_mut(&uid)?.password = new_password.to_string();
        state.oob_codes.remove(code);
        Ok(())
    }

    async fn apply_action_code(&self, code: &str) -> AuthResult<()> {
        self.take_failure("apply_action_code")?;
        let mut state = self.state();
        let uid = match state.oob_codes.get(code) {
            Some(OobAction::VerifyEmail { uid }) => uid.clone(),
            _ => return Err(invalid_action_code()),
        };
        state.account_mut(&uid)?.user.email_verified = true;
        state.oob_codes.remove(code);
        state.refresh_current(&uid);
        Ok(())
    }

    async fn update_password(&self, user: &User, new_password: &str) -> AuthResult<User> {
        self.take_failure("update_password")?;
        check_password(new_password)?;
        let mut state = self.state();
        state.account_mut(&user.uid)?.password = new_password.to_string();
        let updated = state.issue_tokens(&user.uid)?;
        state.refresh_current(&user.uid);
        Ok(updated)
    }

    async fn delete_user(&self, user: &User) -> AuthResult<()> {
        self.take_failure("delete_user")?;
        let mut state = self.state();
        state.accounts.remove(&user.uid).ok_or_else(user_not_found)?;
        if state.current_user.as_ref().map(|current| current.uid.as_str()) == Some(user.uid.as_str()) {
            state.current_user = None;
        }
        Ok(())
    }

    async fn sign_in_with_phone_number(&self, phone_number: &str, recaptcha_token: &str) -> AuthResult<String> {
        self.take_failure("sign_in_with_phone_number")?;
        check_recaptcha(recaptcha_token)?;
        if !phone_number.starts_with('+') {
            return Err(AuthError::api(
                "auth/invalid-phone-number",
                "Phone numbers must be in E.164 format",
            ));
        }
        Ok(self.state().issue_sms(SmsSession::PhoneSignIn {
            phone_number: phone_number.to_string(),
        }))
    }

    async fn confirm_phone_sign_in(&self, verification_id: &str, code: &str) -> AuthResult<UserCredential> {
        self.take_failure("confirm_phone_sign_in")?;
        let mut state = self.state();
        let phone_number = match state.take_sms(verification_id, code)? {
            SmsSession::PhoneSignIn { phone_number } => phone_number,
            _ => {
                return Err(AuthError::api(
                    "auth/invalid-verification-id",
                    "The verification id does not belong to a phone sign-in",
                ))
            }
        };

        let existing = state
            .accounts
            .values()
            .find(|account| account.user.phone_number.as_deref() == Some(phone_number.as_str()))
            .map(|account| account.user.uid.clone());
        match existing {
            Some(uid) => state.sign_in(&uid, OperationType::SignIn),
            None => {
                let uid = auto_id();
                state.accounts.insert(
                    uid.clone(),
                    Account {
                        user: User {
                            uid: uid.clone(),
                            phone_number: Some(phone_number),
                            ..Default::default()
                        },
                        password: String::new(),
                    },
                );
                state.sign_in(&uid, OperationType::SignUp)
            }
        }
    }

    async fn start_mfa_enrollment(&self, user: &User, phone_number: &str, recaptcha_token: &str) -> AuthResult<String> {
        self.take_failure("start_mfa_enrollment")?;
        check_recaptcha(recaptcha_token)?;
        let mut state = self.state();
        state.account_mut(&user.uid)?;
        Ok(state.issue_sms(SmsSession::Enrollment {
            uid: user.uid.clone(),
            phone_number: phone_number.to_string(),
        }))
    }

    async fn finalize_mfa_enrollment(
        &self,
        user: &User,
        verification_id: &str,
        code: &str,
        display_name: Option<&str>,
    ) -> AuthResult<User> {
        self.take_failure("finalize_mfa_enrollment")?;
        let mut state = self.state();
        let phone_number = match state.take_sms(verification_id, code)? {
            SmsSession::Enrollment { uid, phone_number } if uid == user.uid => phone_number,
            _ => {
                return Err(AuthError::api(
                    "auth/invalid-verification-id",
                    "The verification id does not belong to this enrollment",
                ))
            }
        };
        state.account_mut(&user.uid)?.user.multi_factor.push(MultiFactorInfo {
            uid: auto_id(),
            factor_id: PHONE_FACTOR_ID.to_string(),
            phone_number: Some(phone_number),
            display_name: display_name.map(str::to_string),
            enrollment_time: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        });
        let updated = state.issue_tokens(&user.uid)?;
        state.refresh_current(&user.uid);
        Ok(updated)
    }

    async fn start_mfa_sign_in(
        &self,
        resolver: &MultiFactorResolver,
        hint: &MultiFactorInfo,
        recaptcha_token: &str,
    ) -> AuthResult<String> {
        self.take_failure("start_mfa_sign_in")?;
        check_recaptcha(recaptcha_token)?;
        if hint.factor_id != PHONE_FACTOR_ID {
            return Err(AuthError::UnsupportedSecondFactor(hint.factor_id.clone()));
        }
        let mut state = self.state();
        let uid = state
            .pending_credentials
            .get(&resolver.pending_credential)
            .cloned()
            .ok_or_else(|| {
                AuthError::api("auth/invalid-multi-factor-session", "The sign-in session is unknown")
            })?;
        let enrolled = state
            .accounts
            .get(&uid)
            .map_or(false, |account| account.user.multi_factor.iter().any(|factor| factor.uid == hint.uid));
        if !enrolled {
            return Err(AuthError::api(
                "auth/multi-factor-info-not-found",
                "The hint does not belong to this account",
            ));
        }
        Ok(state.issue_sms(SmsSession::MfaSignIn { uid }))
    }

    async fn finalize_mfa_sign_in(
        &self,
        resolver: &MultiFactorResolver,
        verification_id: &str,
        code: &str,
    ) -> AuthResult<UserCredential> {
        self.take_failure("finalize_mfa_sign_in")?;
        let mut state = self.state();
        let expected = state
            .pending_credentials
            .get(&resolver.pending_credential)
            .cloned()
            .ok_or_else(|| {
                AuthError::api("auth/invalid-multi-factor-session", "The sign-in session is unknown")
            })?;
        match state.take_sms(verification_id, code)? {
            SmsSession::MfaSignIn { uid } if uid == expected => {}
            _ => {
                return Err(AuthError::api(
                    "auth/invalid-verification-id",
                    "The verification id does not belong to this sign-in",
                ))
            }
        }
        state.pending_credentials.remove(&resolver.pending_credential);
        state.sign_in(&expected, OperationType::SignIn)
    }

    async fn set_persistence(&self, persistence: Persistence) -> AuthResult<()> {
        self.take_failure("set_persistence")?;
        self.state().persistence = persistence;
        Ok(())
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.take_failure("sign_out")?;
        self.state().current_user = None;
        Ok(())
    }

    fn current_user(&self) -> Option<User> {
        self.state().current_user.clone()
    }
}
