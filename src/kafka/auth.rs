use std::fmt;

use crate::kafka::base::ConnectorError;

pub const SASL_USER_VAR: &str = "KAFKA_SASL_USER";
pub const SASL_PASS_VAR: &str = "KAFKA_SASL_PASS";

/// Login used for SASL authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

// never print the password
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// The login clusters use for read access without an account.
    pub fn anonymous() -> Self {
        Self::new("anon", "anon")
    }

    /// Read the login from `KAFKA_SASL_USER` and `KAFKA_SASL_PASS`.
    pub fn from_env() -> Result<Self, ConnectorError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConnectorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user = lookup(SASL_USER_VAR).filter(|value| !value.is_empty());
        let password = lookup(SASL_PASS_VAR).filter(|value| !value.is_empty());
        match (user, password) {
            (Some(user), Some(password)) => Ok(Self::new(user, password)),
            _ => Err(ConnectorError::MissingEnvCredentials),
        }
    }
}
