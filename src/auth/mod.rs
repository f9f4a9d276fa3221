//! Firebase Authentication flows.
//!
//! [`UserGateway`] drives registration, login, phone sign-in and phone based multi-factor
//! authentication against an [`IdentityProvider`], keeping an optional profile document per
//! user through a [`crate::firestore::RecordGateway`].

mod action_code;
mod error;
pub mod provider;
mod types;
mod users;
pub mod validation;

#[doc(inline)]
pub use action_code::{ActionCodeMode, ActionCodeUrl};

#[doc(inline)]
pub use error::{AuthError, AuthResult};

#[doc(inline)]
pub use provider::{HttpIdentityProvider, IdentityProvider, MemoryIdentityProvider};

#[doc(inline)]
pub use types::{
    ApplicationVerifier, ConfirmationResult, LoginOptions, LoginResult, LoginStatus, MfaCandidate,
    MfaVerifier, MultiFactorInfo, MultiFactorResolver, OperationType, Persistence, Registration,
    StaticVerifier, User, UserCredential, PHONE_FACTOR_ID, PRIMARY_PHONE_DISPLAY_NAME,
};

#[doc(inline)]
pub use users::UserGateway;

#[doc(inline)]
pub use validation::{is_valid_email, is_valid_name, is_valid_password};
