use std::sync::Arc;

use async_trait::async_trait;
use firebase_gateway::auth::{
    AuthError, AuthResult, IdentityProvider, LoginOptions, LoginStatus, MemoryIdentityProvider,
    MultiFactorInfo, MultiFactorResolver, OperationType, Persistence, Registration, StaticVerifier,
    User, UserCredential, UserGateway, PRIMARY_PHONE_DISPLAY_NAME,
};
use firebase_gateway::firestore::{MemoryDocumentStore, RecordGateway};
use serde_json::{json, Map, Value};

struct Harness {
    users: UserGateway,
    provider: Arc<MemoryIdentityProvider>,
    documents: Arc<MemoryDocumentStore>,
    profiles: RecordGateway,
}

fn harness() -> Harness {
    let provider = Arc::new(MemoryIdentityProvider::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let profiles = RecordGateway::new("users", documents.clone());
    let users = UserGateway::new(provider.clone(), Some(profiles.clone()));
    Harness {
        users,
        provider,
        documents,
        profiles,
    }
}

fn profile(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn registration_saves_profile_under_uid() {
    let h = harness();

    let credential = h
        .users
        .register_with_email_and_password(
            Registration::new("ada@example.com", "analytical")
                .with_profile(profile(json!({ "name": "Ada" }))),
        )
        .await
        .unwrap();
    assert_eq!(credential.operation, OperationType::SignUp);

    let record = h
        .profiles
        .find(&credential.user.uid)
        .await
        .unwrap()
        .expect("profile saved");
    assert_eq!(record.get("name"), Some(&json!("Ada")));
    assert_eq!(record.get("email"), Some(&json!("ada@example.com")));
    assert!(h.provider.last_oob_code().is_some());
}

#[tokio::test]
async fn failed_verification_email_rolls_back_the_account() {
    let h = harness();
    h.provider.fail_next(
        "send_email_verification",
        AuthError::api("auth/too-many-requests", "Try again later"),
    );

    let err = h
        .users
        .register_with_email_and_password(
            Registration::new("grace@example.com", "compiler")
                .with_profile(profile(json!({ "name": "Grace" }))),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "auth/too-many-requests");
    assert_eq!(h.provider.account_count(), 0);
    assert_eq!(h.documents.document_count("users"), 0);
    assert!(h.users.is_logged_in().is_none());
}

#[tokio::test]
async fn failed_profile_write_rolls_back_the_account() {
    let h = harness();
    h.documents
        .fail_next_commit(firebase_gateway::firestore::unavailable("offline"));

    let err = h
        .users
        .register_with_email_and_password(
            Registration::new("linus@example.com", "kernel-1")
                .with_profile(profile(json!({ "name": "Linus" })))
                .without_verification(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Firestore(_)));
    assert_eq!(h.provider.account_count(), 0);
}

#[tokio::test]
async fn duplicate_registration_keeps_the_first_account() {
    let h = harness();
    h.users
        .register_with_email_and_password(Registration::new("ada@example.com", "analytical"))
        .await
        .unwrap();

    let err = h
        .users
        .register_with_email_and_password(Registration::new("ada@example.com", "different"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "auth/email-already-in-use");
    assert_eq!(h.provider.account_count(), 1);
}

#[tokio::test]
async fn login_reports_unverified_email() {
    let h = harness();
    h.provider.add_account("ada@example.com", "analytical", false);

    let options = LoginOptions {
        persistence: Some(Persistence::Session),
        require_verified_email: true,
    };
    let result = h
        .users
        .login("ada@example.com", "analytical", options.clone())
        .await
        .unwrap();
    assert_eq!(result.status, LoginStatus::EmailNotVerified);
    assert_eq!(h.provider.persistence(), Persistence::Session);

    let result = h
        .users
        .login("ada@example.com", "analytical", LoginOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status, LoginStatus::Success);
    assert_eq!(
        h.users.is_logged_in().map(|user| user.uid),
        Some(result.credential.user.uid)
    );

    let err = h
        .users
        .login("ada@example.com", "wrong-pass", options)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "auth/invalid-credential");
}

#[tokio::test]
async fn verify_email_marks_the_account_verified() {
    let h = harness();
    let credential = h
        .users
        .register_with_email_and_password(Registration::new("ada@example.com", "analytical"))
        .await
        .unwrap();
    assert!(!credential.user.email_verified);

    let code = h.provider.last_oob_code().unwrap();
    h.users.verify_email(&code).await.unwrap();
    assert!(h.provider.account("ada@example.com").unwrap().email_verified);

    let err = h.users.verify_email(&code).await.unwrap_err();
    assert_eq!(err.code(), "auth/invalid-action-code");
    assert_eq!(
        err.to_string(),
        "Code is invalid or expired. Ask the user to verify their email address (auth/invalid-action-code)"
    );
}

#[tokio::test]
async fn multi_factor_enrollment_then_sign_in() {
    let h = harness();
    h.provider.add_account("ada@example.com", "analytical", true);
    let verifier = StaticVerifier::new("recaptcha-token");

    let enrollment = h
        .users
        .login_with_multi_auth_factor(
            "ada@example.com",
            "analytical",
            Some("+15555550100".into()),
            &verifier,
            None,
        )
        .await
        .unwrap()
        .expect("enrollment challenge");
    assert!(enrollment.candidate.is_some());
    assert!(enrollment.resolver.is_none());
    assert_eq!(h.provider.persistence(), Persistence::Session);

    let err = h.users.confirm_otp(&enrollment, "000000x").await.unwrap_err();
    assert_eq!(err.code(), "auth/invalid-verification-code");

    let code = h.provider.last_sms_code().unwrap();
    let enrolled = h
        .users
        .confirm_otp(&enrollment, &code)
        .await
        .unwrap()
        .expect("enrolled credential");
    assert_eq!(enrolled.user.multi_factor.len(), 1);
    assert_eq!(
        enrolled.user.multi_factor[0].display_name.as_deref(),
        Some(PRIMARY_PHONE_DISPLAY_NAME)
    );

    let err = h
        .users
        .login("ada@example.com", "analytical", LoginOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MultiFactorRequired(_)));

    let challenge = h
        .users
        .login_with_multi_auth_factor(
            "ada@example.com",
            "analytical",
            None,
            &verifier,
            Some(Persistence::None),
        )
        .await
        .unwrap()
        .expect("sign-in challenge");
    assert!(challenge.resolver.is_some());
    assert_eq!(h.provider.persistence(), Persistence::None);

    let code = h.provider.last_sms_code().unwrap();
    let credential = h
        .users
        .confirm_otp(&challenge, &code)
        .await
        .unwrap()
        .expect("signed in");
    assert_eq!(credential.operation, OperationType::SignIn);
    assert_eq!(credential.user.email.as_deref(), Some("ada@example.com"));
}

#[tokio::test]
async fn enrollment_needs_a_phone_number() {
    let h = harness();
    h.provider.add_account("ada@example.com", "analytical", true);

    let err = h
        .users
        .login_with_multi_auth_factor(
            "ada@example.com",
            "analytical",
            None,
            &StaticVerifier::new("token"),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
}

#[tokio::test]
async fn phone_sign_in_creates_then_reuses_the_account() {
    let h = harness();
    let verifier = StaticVerifier::new("token");

    let confirmation = h
        .users
        .sign_in_with_phone_number("+15555550111", &verifier)
        .await
        .unwrap();
    let code = h.provider.last_sms_code().unwrap();
    let first = h.users.confirm_phone_code(&confirmation, &code).await.unwrap();
    assert_eq!(first.operation, OperationType::SignUp);

    let confirmation = h
        .users
        .sign_in_with_phone_number("+15555550111", &verifier)
        .await
        .unwrap();
    let code = h.provider.last_sms_code().unwrap();
    let second = h.users.confirm_phone_code(&confirmation, &code).await.unwrap();
    assert_eq!(second.operation, OperationType::SignIn);
    assert_eq!(first.user.uid, second.user.uid);

    let err = h
        .users
        .sign_in_with_phone_number("5555550111", &verifier)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "auth/invalid-phone-number");
}

#[tokio::test]
async fn password_reset_by_email_link() {
    let h = harness();
    h.provider.add_account("ada@example.com", "analytical", true);

    h.users
        .send_password_reset_message("ada@example.com")
        .await
        .unwrap();
    let code = h.provider.last_oob_code().unwrap();

    let email = h.users.verify_password_reset_link(&code).await.unwrap();
    assert_eq!(email, "ada@example.com");

    h.users.do_password_reset(&code, "difference").await.unwrap();
    h.users
        .login("ada@example.com", "difference", LoginOptions::default())
        .await
        .unwrap();

    let err = h.users.do_password_reset(&code, "other-one").await.unwrap_err();
    assert_eq!(err.code(), "auth/invalid-action-code");
}

#[tokio::test]
async fn reset_password_requires_a_signed_in_user() {
    let h = harness();
    let err = h.users.reset_password("new-secret").await.unwrap_err();
    assert!(matches!(err, AuthError::NoCurrentUser));

    h.provider.add_account("ada@example.com", "analytical", true);
    h.users
        .login("ada@example.com", "analytical", LoginOptions::default())
        .await
        .unwrap();
    h.users.reset_password("new-secret").await.unwrap();
    h.users.logout().await.unwrap();
    assert!(h.users.is_logged_in().is_none());

    h.users
        .login("ada@example.com", "new-secret", LoginOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_account_removes_identity_and_profile() {
    let h = harness();
    let credential = h
        .users
        .register_with_email_and_password(
            Registration::new("ada@example.com", "analytical")
                .with_profile(profile(json!({ "name": "Ada" }))),
        )
        .await
        .unwrap();
    assert!(h.profiles.data_exists(&credential.user.uid).await.unwrap());

    h.users.delete_account().await.unwrap();

    assert_eq!(h.provider.account_count(), 0);
    assert!(!h.profiles.data_exists(&credential.user.uid).await.unwrap());
    assert!(h.users.is_logged_in().is_none());
}

#[tokio::test]
async fn verify_email_keeps_transport_failures() {
    let h = harness();
    h.provider.fail_next(
        "apply_action_code",
        AuthError::Network("connection reset".into()),
    );

    let err = h.users.verify_email("any-code").await.unwrap_err();
    assert!(matches!(err, AuthError::Network(_)));
    assert_eq!(err.code(), "auth/network-request-failed");
}

/// Memory provider whose verification email yields to the executor, then fails for one address.
struct YieldingProvider {
    inner: Arc<MemoryIdentityProvider>,
    failing_email: &'static str,
}

#[async_trait]
impl IdentityProvider for YieldingProvider {
    async fn create_user(&self, email: &str, password: &str) -> AuthResult<UserCredential> {
        self.inner.create_user(email, password).await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<UserCredential> {
        self.inner.sign_in_with_password(email, password).await
    }

    async fn send_email_verification(&self, user: &User) -> AuthResult<()> {
        tokio::task::yield_now().await;
        if user.email.as_deref() == Some(self.failing_email) {
            return Err(AuthError::api("auth/too-many-requests", "Try again later"));
        }
        self.inner.send_email_verification(user).await
    }

    async fn send_password_reset_email(&self, email: &str) -> AuthResult<()> {
        self.inner.send_password_reset_email(email).await
    }

    async fn verify_password_reset_code(&self, code: &str) -> AuthResult<String> {
        self.inner.verify_password_reset_code(code).await
    }

    async fn confirm_password_reset(&self, code: &str, new_password: &str) -> AuthResult<()> {
        self.inner.confirm_password_reset(code, new_password).await
    }

    async fn apply_action_code(&self, code: &str) -> AuthResult<()> {
        self.inner.apply_action_code(code).await
    }

    async fn update_password(&self, user: &User, new_password: &str) -> AuthResult<User> {
        self.inner.update_password(user, new_password).await
    }

    async fn delete_user(&self, user: &User) -> AuthResult<()> {
        self.inner.delete_user(user).await
    }

    async fn sign_in_with_phone_number(&self, phone_number: &str, recaptcha_token: &str) -> AuthResult<String> {
        self.inner.sign_in_with_phone_number(phone_number, recaptcha_token).await
    }

    async fn confirm_phone_sign_in(&self, verification_id: &str, code: &str) -> AuthResult<UserCredential> {
        self.inner.confirm_phone_sign_in(verification_id, code).await
    }

    async fn start_mfa_enrollment(&self, user: &User, phone_number: &str, recaptcha_token: &str) -> AuthResult<String> {
        self.inner.start_mfa_enrollment(user, phone_number, recaptcha_token).await
    }

    async fn finalize_mfa_enrollment(
        &self,
        user: &User,
        verification_id: &str,
        code: &str,
        display_name: Option<&str>,
    ) -> AuthResult<User> {
        self.inner
            .finalize_mfa_enrollment(user, verification_id, code, display_name)
            .await
    }

    async fn start_mfa_sign_in(
        &self,
        resolver: &MultiFactorResolver,
        hint: &MultiFactorInfo,
        recaptcha_token: &str,
    ) -> AuthResult<String> {
        self.inner.start_mfa_sign_in(resolver, hint, recaptcha_token).await
    }

    async fn finalize_mfa_sign_in(
        &self,
        resolver: &MultiFactorResolver,
        verification_id: &str,
        code: &str,
    ) -> AuthResult<UserCredential> {
        self.inner.finalize_mfa_sign_in(resolver, verification_id, code).await
    }

    async fn set_persistence(&self, persistence: Persistence) -> AuthResult<()> {
        self.inner.set_persistence(persistence).await
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.inner.sign_out().await
    }

    fn current_user(&self) -> Option<User> {
        self.inner.current_user()
    }
}

#[tokio::test]
async fn overlapping_registrations_roll_back_only_their_own_account() {
    let memory = Arc::new(MemoryIdentityProvider::new());
    let provider = YieldingProvider {
        inner: memory.clone(),
        failing_email: "a@example.com",
    };
    let users = UserGateway::new(Arc::new(provider), None);

    let (a, b) = tokio::join!(
        users.register_with_email_and_password(Registration::new("a@example.com", "password-a")),
        users.register_with_email_and_password(Registration::new("b@example.com", "password-b")),
    );

    assert_eq!(a.unwrap_err().code(), "auth/too-many-requests");
    assert_eq!(b.unwrap().user.email.as_deref(), Some("b@example.com"));
    assert!(memory.account("a@example.com").is_none());
    assert!(memory.account("b@example.com").is_some());
    assert_eq!(memory.account_count(), 1);
}
