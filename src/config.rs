//! Secrets read from the environment.

use std::fmt;

use crate::errors::{Error, Result};

pub const API_KEY_VAR: &str = "BINANCE_API_KEY";
pub const SECRET_KEY_VAR: &str = "BINANCE_SECRET_KEY";
pub const CHAT_TOKEN_VAR: &str = "CHAT_TOKEN";
pub const CHAT_ID_VAR: &str = "CHAT_ID";

/// Exchange keys and notification chat.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    pub chat_token: String,
    pub chat_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("secret_key", &"***")
            .field("chat_token", &"***")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl Credentials {
    /// Reads the credentials from the process environment.
    ///
    /// Load a `.env` file beforehand to have its values picked up.
    ///
    /// ### Returns
    /// `Error::MissingConfig` naming the first variable that is unset or empty.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env` with `lookup` standing in for the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| Error::MissingConfig(name.to_string()))
        };

        Ok(Self {
            api_key: require(API_KEY_VAR)?,
            secret_key: require(SECRET_KEY_VAR)?,
            chat_token: require(CHAT_TOKEN_VAR)?,
            chat_id: require(CHAT_ID_VAR)?,
        })
    }
}
