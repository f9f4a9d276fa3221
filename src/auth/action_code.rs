use std::collections::HashMap;

use url::Url;

const MAX_LINK_NESTING: usize = 4;

/// What an emailed action link asks the user to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionCodeMode {
    VerifyEmail,
    ResetPassword,
    RecoverEmail,
    SignIn,
}

impl ActionCodeMode {
    pub fn from_mode(value: &str) -> Option<Self> {
        match value {
            "verifyEmail" => Some(ActionCodeMode::VerifyEmail),
            "resetPassword" => Some(ActionCodeMode::ResetPassword),
            "recoverEmail" => Some(ActionCodeMode::RecoverEmail),
            "signIn" => Some(ActionCodeMode::SignIn),
            _ => None,
        }
    }
}

/// The query parameters of an email action link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionCodeUrl {
    pub mode: ActionCodeMode,
    pub code: String,
    pub api_key: Option<String>,
    pub continue_url: Option<String>,
}

impl ActionCodeUrl {
    /// Parses `link`, following `link=` / `deep_link_id=` wrappers added by dynamic links.
    pub fn parse(link: &str) -> Option<Self> {
        let query = unwrap_link(link, 0)?;
        Some(Self {
            mode: ActionCodeMode::from_mode(query.get("mode")?)?,
            code: query.get("oobCode")?.clone(),
            api_key: query.get("apiKey").cloned(),
            continue_url: query.get("continueUrl").cloned(),
        })
    }
}

fn unwrap_link(link: &str, depth: usize) -> Option<HashMap<String, String>> {
    let parsed = Url::parse(link).ok()?;
    let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
    if depth < MAX_LINK_NESTING && !query.contains_key("oobCode") {
        let nested = query.get("link").or_else(|| query.get("deep_link_id"));
        if let Some(nested) = nested {
            return unwrap_link(nested, depth + 1);
        }
    }
    Some(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reset_link() {
        let parsed = ActionCodeUrl::parse(
            "https://demo.firebaseapp.com/__/auth/action?mode=resetPassword&oobCode=CODE123&apiKey=KEY&continueUrl=https%3A%2F%2Fapp.example.com",
        )
        .unwrap();
        assert_eq!(parsed.mode, ActionCodeMode::ResetPassword);
        assert_eq!(parsed.code, "CODE123");
        assert_eq!(parsed.api_key.as_deref(), Some("KEY"));
        assert_eq!(parsed.continue_url.as_deref(), Some("https://app.example.com"));
    }

    #[test]
    fn follows_wrapped_links() {
        let inner = url::form_urlencoded::byte_serialize(
            b"https://demo.firebaseapp.com/__/auth/action?mode=verifyEmail&oobCode=XYZ",
        )
        .collect::<String>();
        let parsed = ActionCodeUrl::parse(&format!("https://demo.page.link/?link={inner}")).unwrap();
        assert_eq!(parsed.mode, ActionCodeMode::VerifyEmail);
        assert_eq!(parsed.code, "XYZ");
    }

    #[test]
    fn rejects_links_without_code() {
        assert!(ActionCodeUrl::parse("https://demo.firebaseapp.com/?mode=verifyEmail").is_none());
        assert!(ActionCodeUrl::parse("not a url").is_none());
    }
}
