use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::error::{map_server_message, AuthError, AuthResult};
use crate::auth::types::{
    MultiFactorInfo, MultiFactorResolver, OperationType, Persistence, User, UserCredential,
    PHONE_FACTOR_ID,
};
use crate::config::{Endpoints, FirebaseOptions, GatewaySettings};

use super::IdentityProvider;

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenResponse {
    #[serde(rename = "idToken", default)]
    id_token: Option<String>,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    #[serde(rename = "isNewUser", default)]
    is_new_user: bool,
    #[serde(rename = "mfaPendingCredential", default)]
    mfa_pending_credential: Option<String>,
    #[serde(rename = "mfaInfo", default)]
    mfa_info: Vec<MfaEnrollmentInfo>,
}

#[derive(Debug, Deserialize, Clone)]
struct MfaEnrollmentInfo {
    #[serde(rename = "mfaEnrollmentId")]
    mfa_enrollment_id: String,
    #[serde(rename = "phoneInfo", default)]
    phone_info: Option<String>,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(rename = "enrolledAt", default)]
    enrolled_at: Option<String>,
}

impl From<MfaEnrollmentInfo> for MultiFactorInfo {
    fn from(info: MfaEnrollmentInfo) -> Self {
        MultiFactorInfo {
            uid: info.mfa_enrollment_id,
            factor_id: if info.phone_info.is_some() {
                PHONE_FACTOR_ID.to_string()
            } else {
                "totp".to_string()
            },
            phone_number: info.phone_info,
            display_name: info.display_name,
            enrollment_time: info.enrolled_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    #[serde(rename = "localId")]
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(rename = "emailVerified", default)]
    email_verified: bool,
    #[serde(rename = "phoneNumber", default)]
    phone_number: Option<String>,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(rename = "mfaInfo", default)]
    mfa_info: Vec<MfaEnrollmentInfo>,
}

#[derive(Debug, Deserialize)]
struct SessionInfoResponse {
    #[serde(rename = "sessionInfo")]
    session_info: String,
}

#[derive(Debug, Deserialize)]
struct MfaEnrollmentStartResponse {
    #[serde(rename = "phoneSessionInfo")]
    phone_session_info: SessionInfoResponse,
}

#[derive(Debug, Deserialize)]
struct MfaSignInStartResponse {
    #[serde(rename = "phoneResponseInfo")]
    phone_response_info: SessionInfoResponse,
}

#[derive(Debug, Deserialize)]
struct ResetPasswordResponse {
    #[serde(default)]
    email: Option<String>,
}

/// Firebase Authentication over the Identity Toolkit REST API.
pub struct HttpIdentityProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    current_user: Mutex<Option<User>>,
    persistence: Mutex<Persistence>,
    request_timeout: Duration,
}

impl HttpIdentityProvider {
    pub fn new(api_key: impl Into<String>) -> AuthResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AuthError::InvalidCredential(
                "Firebase options must include an api_key".into(),
            ));
        }
        let client = Client::builder()
            .build()
            .map_err(|err| AuthError::Network(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: Endpoints::default().identity_toolkit,
            api_key,
            current_user: Mutex::new(None),
            persistence: Mutex::new(Persistence::default()),
            request_timeout: GatewaySettings::default().request_timeout,
        })
    }

    /// Provider for the key in `options`, honouring `FIREBASE_AUTH_EMULATOR_HOST`.
    pub fn from_options(options: &FirebaseOptions) -> AuthResult<Self> {
        let api_key = options.api_key.clone().unwrap_or_default();
        Ok(Self::new(api_key)?.with_endpoint(Endpoints::from_env().identity_toolkit))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Takes the per-request timeout from `settings`.
    pub fn with_settings(mut self, settings: &GatewaySettings) -> Self {
        self.request_timeout = settings.request_timeout;
        self
    }

    pub fn persistence(&self) -> Persistence {
        *lock(&self.persistence)
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}?key={}",
            self.endpoint.trim_end_matches('/'),
            path,
            self.api_key
        )
    }

    async fn post<R>(&self, path: &str, body: Value) -> AuthResult<R>
    where
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;

        if response.status().is_success() {
            response
                .json::<R>()
                .await
                .map_err(|err| AuthError::InvalidCredential(err.to_string()))
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(map_error(status, body))
        }
    }

    async fn lookup(&self, id_token: &str) -> AuthResult<AccountInfo> {
        let response: LookupResponse = self
            .post("v1/accounts:lookup", json!({ "idToken": id_token }))
            .await?;
        response
            .users
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::api("auth/user-not-found", "No account for this token"))
    }

    /// Loads the full profile behind fresh tokens and makes it the current user.
    async fn complete_sign_in(&self, tokens: TokenResponse, operation: OperationType) -> AuthResult<UserCredential> {
        let id_token = tokens
            .id_token
            .ok_or_else(|| AuthError::InvalidCredential("Response did not include an idToken".into()))?;
        let account = self.lookup(&id_token).await?;
        let user = User {
            uid: account.local_id,
            email: account.email,
            email_verified: account.email_verified,
            phone_number: account.phone_number,
            display_name: account.display_name,
            id_token: Some(id_token),
            refresh_token: tokens.refresh_token,
            multi_factor: account.mfa_info.into_iter().map(MultiFactorInfo::from).collect(),
        };
        *lock(&self.current_user) = Some(user.clone());
        Ok(UserCredential { user, operation })
    }

    fn id_token<'a>(&self, user: &'a User) -> AuthResult<&'a str> {
        user.id_token
            .as_deref()
            .ok_or_else(|| AuthError::InvalidCredential("User has no id token".into()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn map_error(status: StatusCode, body: String) -> AuthError {
    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(&body) {
        if let Some(message) = parsed.error.and_then(|error| error.message) {
            return map_server_message(&message);
        }
    }
    AuthError::InvalidCredential(format!("Request failed with status {status}: {body}"))
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn create_user(&self, email: &str, password: &str) -> AuthResult<UserCredential> {
        let tokens: TokenResponse = self
            .post(
                "v1/accounts:signUp",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        self.complete_sign_in(tokens, OperationType::SignUp).await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<UserCredential> {
        let tokens: TokenResponse = self
            .post(
                "v1/accounts:signInWithPassword",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        if let Some(pending_credential) = tokens.mfa_pending_credential {
            return Err(AuthError::MultiFactorRequired(Box::new(MultiFactorResolver {
                pending_credential,
                hints: tokens.mfa_info.into_iter().map(MultiFactorInfo::from).collect(),
            })));
        }
        self.complete_sign_in(tokens, OperationType::SignIn).await
    }

    async fn send_email_verification(&self, user: &User) -> AuthResult<()> {
        let _: Value = self
            .post(
                "v1/accounts:sendOobCode",
                json!({ "requestType": "VERIFY_EMAIL", "idToken": self.id_token(user)? }),
            )
            .await?;
        Ok(())
    }

    async fn send_password_reset_email(&self, email: &str) -> AuthResult<()> {
        let _: Value = self
            .post(
                "v1/accounts:sendOobCode",
                json!({ "requestType": "PASSWORD_RESET", "email": email }),
            )
            .await?;
        Ok(())
    }

    async fn verify_password_reset_code(&self, code: &str) -> AuthResult<String> {
        let response: ResetPasswordResponse = self
            .post("v1/accounts:resetPassword", json!({ "oobCode": code }))
            .await?;
        response
            .email
            .ok_or_else(|| AuthError::api("auth/invalid-action-code", "Reset code has no email"))
    }

    async fn confirm_password_reset(&self, code: &str, new_password: &str) -> AuthResult<()> {
        let _: ResetPasswordResponse = self
            .post(
                "v1/accounts:resetPassword",
                json!({ "oobCode": code, "newPassword": new_password }),
            )
            .await?;
        Ok(())
    }

    async fn apply_action_code(&self, code: &str) -> AuthResult<()> {
        let _: Value = self
            .post("v1/accounts:update", json!({ "oobCode": code }))
            .await?;
        Ok(())
    }

    async fn update_password(&self, user: &User, new_password: &str) -> AuthResult<User> {
        let tokens: TokenResponse = self
            .post(
                "v1/accounts:update",
                json!({
                    "idToken": self.id_token(user)?,
                    "password": new_password,
                    "returnSecureToken": true,
                }),
            )
            .await?;
        Ok(self.complete_sign_in(tokens, OperationType::SignIn).await?.user)
    }

    async fn delete_user(&self, user: &User) -> AuthResult<()> {
        let _: Value = self
            .post("v1/accounts:delete", json!({ "idToken": self.id_token(user)? }))
            .await?;
        let mut current = lock(&self.current_user);
        if current.as_ref().map(|current| current.uid.as_str()) == Some(user.uid.as_str()) {
            *current = None;
        }
        Ok(())
    }

    async fn sign_in_with_phone_number(&self, phone_number: &str, recaptcha_token: &str) -> AuthResult<String> {
        let response: SessionInfoResponse = self
            .post(
                "v1/accounts:sendVerificationCode",
                json!({ "phoneNumber": phone_number, "recaptchaToken": recaptcha_token }),
            )
            .await?;
        Ok(response.session_info)
    }

    async fn confirm_phone_sign_in(&self, verification_id: &str, code: &str) -> AuthResult<UserCredential> {
        let tokens: TokenResponse = self
            .post(
                "v1/accounts:signInWithPhoneNumber",
                json!({ "sessionInfo": verification_id, "code": code }),
            )
            .await?;
        let operation = if tokens.is_new_user {
            OperationType::SignUp
        } else {
            OperationType::SignIn
        };
        self.complete_sign_in(tokens, operation).await
    }

    async fn start_mfa_enrollment(&self, user: &User, phone_number: &str, recaptcha_token: &str) -> AuthResult<String> {
        let response: MfaEnrollmentStartResponse = self
            .post(
                "v2/accounts/mfaEnrollment:start",
                json!({
                    "idToken": self.id_token(user)?,
                    "phoneEnrollmentInfo": {
                        "phoneNumber": phone_number,
                        "recaptchaToken": recaptcha_token,
                    },
                }),
            )
            .await?;
        Ok(response.phone_session_info.session_info)
    }

    async fn finalize_mfa_enrollment(
        &self,
        user: &User,
        verification_id: &str,
        code: &str,
        display_name: Option<&str>,
    ) -> AuthResult<User> {
        let tokens: TokenResponse = self
            .post(
                "v2/accounts/mfaEnrollment:finalize",
                json!({
                    "idToken": self.id_token(user)?,
                    "phoneVerificationInfo": { "sessionInfo": verification_id, "code": code },
                    "displayName": display_name,
                }),
            )
            .await?;
        Ok(self.complete_sign_in(tokens, OperationType::SignIn).await?.user)
    }

    async fn start_mfa_sign_in(
        &self,
        resolver: &MultiFactorResolver,
        hint: &MultiFactorInfo,
        recaptcha_token: &str,
    ) -> AuthResult<String> {
        if hint.factor_id != PHONE_FACTOR_ID {
            return Err(AuthError::UnsupportedSecondFactor(hint.factor_id.clone()));
        }
        let response: MfaSignInStartResponse = self
            .post(
                "v2/accounts/mfaSignIn:start",
                json!({
                    "mfaPendingCredential": resolver.pending_credential,
                    "mfaEnrollmentId": hint.uid,
                    "phoneSignInInfo": { "recaptchaToken": recaptcha_token },
                }),
            )
            .await?;
        Ok(response.phone_response_info.session_info)
    }

    async fn finalize_mfa_sign_in(
        &self,
        resolver: &MultiFactorResolver,
        verification_id: &str,
        code: &str,
    ) -> AuthResult<UserCredential> {
        let tokens: TokenResponse = self
            .post(
                "v2/accounts/mfaSignIn:finalize",
                json!({
                    "mfaPendingCredential": resolver.pending_credential,
                    "phoneVerificationInfo": { "sessionInfo": verification_id, "code": code },
                }),
            )
            .await?;
        self.complete_sign_in(tokens, OperationType::SignIn).await
    }

    async fn set_persistence(&self, persistence: Persistence) -> AuthResult<()> {
        *lock(&self.persistence) = persistence;
        Ok(())
    }

    async fn sign_out(&self) -> AuthResult<()> {
        *lock(&self.current_user) = None;
        Ok(())
    }

    fn current_user(&self) -> Option<User> {
        lock(&self.current_user).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::start_mock_server;
    use httpmock::prelude::*;

    fn provider(server: &MockServer) -> HttpIdentityProvider {
        HttpIdentityProvider::new("test-key")
            .unwrap()
            .with_endpoint(server.base_url())
    }

    #[test]
    fn missing_api_key_is_rejected() {
        assert!(matches!(
            HttpIdentityProvider::new(""),
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn sign_in_loads_the_account() {
        let server = start_mock_server().await;
        let sign_in = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/accounts:signInWithPassword")
                    .query_param("key", "test-key")
                    .json_body(json!({
                        "email": "ada@example.com",
                        "password": "secret",
                        "returnSecureToken": true
                    }));
                then.status(200).json_body(json!({
                    "localId": "uid-1",
                    "idToken": "id-token",
                    "refreshToken": "refresh-token"
                }));
            })
            .await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/accounts:lookup")
                    .json_body(json!({ "idToken": "id-token" }));
                then.status(200).json_body(json!({
                    "users": [{
                        "localId": "uid-1",
                        "email": "ada@example.com",
                        "emailVerified": true
                    }]
                }));
            })
            .await;

        let provider = provider(&server);
        let credential = provider
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap();

        sign_in.assert_async().await;
        lookup.assert_async().await;
        assert_eq!(credential.user.uid, "uid-1");
        assert!(credential.user.email_verified);
        assert_eq!(credential.user.refresh_token.as_deref(), Some("refresh-token"));
        assert_eq!(provider.current_user().map(|user| user.uid), Some("uid-1".into()));
    }

    #[tokio::test]
    async fn pending_credential_requires_second_factor() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/accounts:signInWithPassword");
                then.status(200).json_body(json!({
                    "mfaPendingCredential": "pending",
                    "mfaInfo": [{ "mfaEnrollmentId": "enrollment-1", "phoneInfo": "+1******0100" }]
                }));
            })
            .await;

        let err = provider(&server)
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap_err();
        let AuthError::MultiFactorRequired(resolver) = err else {
            panic!("expected MultiFactorRequired, got {err:?}");
        };
        assert_eq!(resolver.pending_credential, "pending");
        assert_eq!(resolver.hints[0].factor_id, PHONE_FACTOR_ID);
        assert_eq!(resolver.hints[0].uid, "enrollment-1");
    }

    #[tokio::test]
    async fn server_errors_map_to_auth_codes() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/accounts:signUp");
                then.status(400).json_body(json!({
                    "error": { "code": 400, "message": "EMAIL_EXISTS" }
                }));
            })
            .await;

        let err = provider(&server)
            .create_user("ada@example.com", "secret")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "auth/email-already-in-use");
    }
}
