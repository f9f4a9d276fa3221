//! Input checks for sign-up forms.

use crate::auth::error::{AuthError, AuthResult};

const PASSWORD_SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";
const MIN_PASSWORD_LENGTH: usize = 8;

fn invalid(message: &str) -> AuthError {
    AuthError::Validation(message.to_string())
}

/// `local@domain.tld` with no whitespace and exactly one `@`.
pub fn is_valid_email(email: &str) -> AuthResult<()> {
    let valid = email
        .split_once('@')
        .filter(|(local, domain)| {
            !local.is_empty() && !domain.contains('@') && has_dotted_domain(domain)
        })
        .is_some()
        && !email.chars().any(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(invalid("Invalid email address"))
    }
}

fn has_dotted_domain(domain: &str) -> bool {
    domain
        .rsplit_once('.')
        .map_or(false, |(host, tld)| !host.is_empty() && !tld.is_empty())
}

pub fn is_valid_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(invalid("Password cannot be less than 8 characters in length"));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(invalid("Password must contain at least 1 uppercase letter"));
    }
    if password.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(invalid("Password cannot be all uppercase letter"));
    }
    if !password.chars().any(|c| PASSWORD_SPECIAL_CHARACTERS.contains(c)) {
        return Err(invalid("Password must contain at least 1 special character"));
    }
    Ok(())
}

/// ASCII letters in words separated by single spaces, at least two characters once trimmed.
pub fn is_valid_name(name: &str) -> AuthResult<()> {
    let name = name.trim();
    let well_formed = name.len() >= 2
        && name
            .split(' ')
            .all(|word| !word.is_empty() && word.chars().all(|c| c.is_ascii_alphabetic()));
    if well_formed {
        Ok(())
    } else {
        Err(invalid("Please enter a valid value"))
    }
}
