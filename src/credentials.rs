use std::collections::HashMap;

/// CredentialStore validates a username/password pair
pub trait CredentialStore: Send + Sync {
    fn valid(&self, username: &str, password: &str) -> bool;
}

/// StaticCredentials holds a fixed username -> password table
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// with_user adds (or replaces) a single user
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl From<HashMap<String, String>> for StaticCredentials {
    fn from(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

impl CredentialStore for StaticCredentials {
    fn valid(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credentials_match_exactly() {
        let creds = StaticCredentials::new().with_user("foo", "bar");

        assert!(creds.valid("foo", "bar"));
        assert!(!creds.valid("foo", "baz"));
        assert!(!creds.valid("baz", "bar"));
        assert!(!creds.valid("fo", "bar"));
        assert!(!creds.valid("", ""));
    }
}
