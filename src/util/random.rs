use std::fmt;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

pub const MAX_RANDOM_STRING_LENGTH: usize = 60;
const AUTO_ID_LENGTH: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RandomStringError {
    pub requested: usize,
}

impl fmt::Display for RandomStringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Length must not exceed {MAX_RANDOM_STRING_LENGTH} characters (requested {})",
            self.requested
        )
    }
}

impl std::error::Error for RandomStringError {}

/// `[A-Za-z0-9]` string of the requested length.
pub fn random_alphanumeric(length: usize) -> Result<String, RandomStringError> {
    if length > MAX_RANDOM_STRING_LENGTH {
        return Err(RandomStringError { requested: length });
    }
    Ok(thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(length)
        .collect())
}

/// Document identifier in the shape Firestore generates client side.
pub fn auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(AUTO_ID_LENGTH)
        .collect()
}
