//! Credential checking.
//!
//! The server treats authentication as a pure `(username, password) -> bool`
//! oracle behind the [`Authenticator`] trait. The shipped implementation is a
//! static user table loaded from the users file.

use std::collections::HashMap;

use subtle::ConstantTimeEq;

use crate::config::UserEntry;

/// Pure, side-effect-free credential oracle.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Fixed user table with constant-time password comparison.
pub struct StaticAuthenticator {
    users: HashMap<String, String>,
}

impl StaticAuthenticator {
    pub fn new(entries: impl IntoIterator<Item = UserEntry>) -> Self {
        Self {
            users: entries
                .into_iter()
                .map(|u| (u.name, u.password))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(expected) => expected.as_bytes().ct_eq(password.as_bytes()).into(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StaticAuthenticator {
        StaticAuthenticator::new([
            UserEntry {
                name: "alice".into(),
                password: "secret".into(),
            },
            UserEntry {
                name: "bob".into(),
                password: "hunter2".into(),
            },
        ])
    }

    #[test]
    fn accepts_valid_credentials() {
        let auth = table();
        assert!(auth.authenticate("alice", "secret"));
        assert!(auth.authenticate("bob", "hunter2"));
    }

    #[test]
    fn rejects_wrong_password() {
        let auth = table();
        assert!(!auth.authenticate("alice", "wrong"));
        assert!(!auth.authenticate("alice", ""));
        assert!(!auth.authenticate("alice", "secret2"));
    }

    #[test]
    fn rejects_unknown_user() {
        let auth = table();
        assert!(!auth.authenticate("mallory", "secret"));
        assert!(!auth.authenticate("", ""));
    }

    #[test]
    fn empty_table_rejects_everyone() {
        let auth = StaticAuthenticator::new([]);
        assert!(auth.is_empty());
        assert!(!auth.authenticate("alice", "secret"));
    }
}
