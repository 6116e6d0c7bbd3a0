//! Account credentials and the vendor default accounts.
//!
//! Authenticating transports first try what the caller supplied, then walk
//! [`fallback_chain`]: the Kasa and Tapo factory accounts, then an empty
//! account for devices that were never bound to the cloud. Cameras have
//! their own factory account ([`DefaultCredentials::Camera`]).

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// Environment variable read by [`Credentials::from_env`] for the username.
pub const USERNAME_ENV: &str = "KASA_USERNAME";

/// Environment variable read by [`Credentials::from_env`] for the password.
pub const PASSWORD_ENV: &str = "KASA_PASSWORD";

/// A cloud account as typed by the user.
///
/// The password is wrapped in a [`SecretString`] and only leaves it through
/// [`expose_password`](Self::expose_password), when a transport hashes it.
///
/// # Example
///
/// ```
/// use kasa_protocol::Credentials;
///
/// let creds = Credentials::new("user@example.com", "hunter2");
/// assert_eq!(creds.username, "user@example.com");
/// assert!(!format!("{creds:?}").contains("hunter2"));
/// ```
#[derive(Clone)]
pub struct Credentials {
    /// Account email.
    pub username: String,
    password: SecretString,
}

impl Credentials {
    /// Creates credentials from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// The empty account accepted by devices never bound to the cloud.
    pub fn blank() -> Self {
        Self::new("", "")
    }

    /// Reads [`USERNAME_ENV`] and [`PASSWORD_ENV`]. Both must be set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        Some(Self::new(lookup(USERNAME_ENV)?, lookup(PASSWORD_ENV)?))
    }

    /// Returns `true` when username and password are both empty.
    pub fn is_blank(&self) -> bool {
        self.username.is_empty() && self.expose_password().is_empty()
    }

    /// Raw password, for hashing during a handshake. Never log it.
    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::blank()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username && self.expose_password() == other.expose_password()
    }
}

impl Eq for Credentials {}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Factory accounts baked into device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultCredentials {
    /// Kasa devices bound through the Kasa app.
    Kasa,
    /// Tapo devices, also the AES login fallback.
    Tapo,
    /// Unprovisioned Tapo cameras. The password is `md5("admin")` in hex.
    Camera,
}

impl DefaultCredentials {
    /// Username and password of this account.
    pub fn credentials(self) -> Credentials {
        let (username, password) = match self {
            DefaultCredentials::Kasa => ("kasa@tp-link.net", "kasaSetup"),
            DefaultCredentials::Tapo => ("test@tp-link.net", "test"),
            DefaultCredentials::Camera => ("admin", "21232f297a57a5a743894a0e4a801fc3"),
        };
        Credentials::new(username, password)
    }

    /// Accounts tried by KLAP after the user's own credentials.
    pub fn all() -> &'static [DefaultCredentials] {
        &[DefaultCredentials::Kasa, DefaultCredentials::Tapo]
    }

    /// Value of the `credential_type` log field.
    pub fn label(self) -> &'static str {
        match self {
            DefaultCredentials::Kasa => "kasa default",
            DefaultCredentials::Tapo => "tapo default",
            DefaultCredentials::Camera => "camera default",
        }
    }
}

/// Labelled accounts tried after `user`: the factory accounts of
/// [`DefaultCredentials::all`], then the blank account unless `user` is
/// already blank.
pub fn fallback_chain(user: &Credentials) -> Vec<(&'static str, Credentials)> {
    let mut chain: Vec<_> = DefaultCredentials::all()
        .iter()
        .map(|default| (default.label(), default.credentials()))
        .collect();
    if !user.is_blank() {
        chain.push(("blank", Credentials::blank()));
    }
    chain
}
