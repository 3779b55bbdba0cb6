//! Simulated user accounts

use serde::{Deserialize, Serialize};

/// Credentials for a simulated end user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub seed_phrase: Option<String>,
}

impl UserAccount {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            seed_phrase: None,
        }
    }

    pub fn with_seed_phrase(mut self, seed_phrase: impl Into<String>) -> Self {
        self.seed_phrase = Some(seed_phrase.into());
        self
    }
}

impl Default for UserAccount {
    fn default() -> Self {
        Self::new("user_account_one", "TestPassword1")
    }
}
