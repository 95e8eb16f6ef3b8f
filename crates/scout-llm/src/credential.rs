use secrecy::{ExposeSecret, SecretString};

/// Prefix of Anthropic bearer tokens issued by the OAuth flow.
pub const OAUTH_TOKEN_PREFIX: &str = "sk-ant-oat";

/// How we authenticate with a backend.
#[derive(Clone)]
pub enum Credential {
    ApiKey(SecretString),
    /// Sent as `Authorization: Bearer`; the Anthropic backend adds extra
    /// headers and a fixed system preamble for these.
    OAuthToken(SecretString),
}

impl Credential {
    /// Classify a raw credential string by its prefix.
    pub fn detect(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.starts_with(OAUTH_TOKEN_PREFIX) {
            Self::OAuthToken(SecretString::from(raw))
        } else {
            Self::ApiKey(SecretString::from(raw))
        }
    }

    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuthToken(_))
    }

    pub fn expose(&self) -> &str {
        match self {
            Self::ApiKey(s) | Self::OAuthToken(s) => s.expose_secret(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            Self::OAuthToken(_) => f.write_str("OAuthToken([REDACTED])"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_oauth_prefix() {
        assert!(Credential::detect("sk-ant-oat01-abc").is_oauth());
        assert!(!Credential::detect("sk-ant-api03-abc").is_oauth());
        assert!(!Credential::detect("sk-proj-openai").is_oauth());
    }

    #[test]
    fn debug_is_redacted() {
        let cred = Credential::detect("sk-ant-api03-secret");
        let shown = format!("{cred:?}");
        assert!(!shown.contains("secret"));
        assert_eq!(cred.expose(), "sk-ant-api03-secret");
    }
}
