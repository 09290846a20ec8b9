//! Who the feed is fetched for.

use log::warn;

/// An authenticated GitHub user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Partitions response-cache keys between users.
    pub user_id: String,
    pub access_token: String,
}

#[cfg_attr(test, mockall::automock)]
pub trait SessionProvider: Send + Sync {
    fn session(&self) -> Option<Session>;

    /// Called when the upstream rejected the session's credentials.
    fn on_session_invalid(&self);
}

/// Session backed by a personal access token from the environment.
pub struct TokenSession {
    user_id: String,
    token: Option<String>,
}

impl TokenSession {
    pub fn new(user_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token,
        }
    }
}

impl SessionProvider for TokenSession {
    fn session(&self) -> Option<Session> {
        self.token.as_ref().map(|token| Session {
            user_id: self.user_id.clone(),
            access_token: token.clone(),
        })
    }

    fn on_session_invalid(&self) {
        warn!("GitHub rejected the configured token; set a valid GITHUB_TOKEN");
    }
}

/// Masks all but the edges of a secret for logging.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_session() {
        let session = TokenSession::new("octocat", Some("ghp_secret".to_string()));
        assert_eq!(
            session.session(),
            Some(Session {
                user_id: "octocat".to_string(),
                access_token: "ghp_secret".to_string(),
            })
        );

        assert_eq!(TokenSession::new("octocat", None).session(), None);
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("ghp_1234567890abcdef"), "ghp_*********cdef");
        assert_eq!(mask_token("short"), "*****");
    }
}
