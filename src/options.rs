//! Options Module
//!
//! Extension configuration and the store it lives in.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::StorageError;

pub const DEFAULT_INSTANCE_URL: &str = "https://www.legadilo.eu";

/// Persisted extension configuration.
///
/// Keys are camelCase on disk. Any key missing from the stored record falls
/// back to [`Options::default`], and an empty string means "not set".
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    pub instance_url: String,
    pub application_token: String,
    pub user_email: String,
    pub token_id: String,
    pub token_secret: String,
    pub access_token: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            instance_url: DEFAULT_INSTANCE_URL.to_string(),
            application_token: String::new(),
            user_email: String::new(),
            token_id: String::new(),
            token_secret: String::new(),
            access_token: String::new(),
        }
    }
}

impl Options {
    /// Build the record written on an explicit save. The cached access
    /// token always starts out empty.
    pub fn from_form(form: OptionsForm) -> Self {
        Self {
            instance_url: form.instance_url,
            application_token: form.application_token,
            user_email: form.user_email,
            token_id: form.token_id,
            token_secret: form.token_secret,
            access_token: String::new(),
        }
    }

    /// The instance URL without trailing slashes, ready for path joining.
    pub fn base_url(&self) -> &str {
        self.instance_url.trim_end_matches('/')
    }

    pub fn cached_access_token(&self) -> Option<&str> {
        non_empty(&self.access_token)
    }

    /// The user-editable part of the options, as shown on the options page.
    pub fn to_form(&self) -> OptionsForm {
        OptionsForm {
            instance_url: self.instance_url.clone(),
            application_token: self.application_token.clone(),
            user_email: self.user_email.clone(),
            token_id: self.token_id.clone(),
            token_secret: self.token_secret.clone(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("instance_url", &self.instance_url)
            .field("application_token", &redacted(&self.application_token))
            .field("user_email", &self.user_email)
            .field("token_id", &self.token_id)
            .field("token_secret", &redacted(&self.token_secret))
            .field("access_token", &redacted(&self.access_token))
            .finish()
    }
}

/// Options as submitted from (and displayed on) the options page.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionsForm {
    pub instance_url: String,
    pub application_token: String,
    pub user_email: String,
    pub token_id: String,
    pub token_secret: String,
}

impl Default for OptionsForm {
    fn default() -> Self {
        Options::default().to_form()
    }
}

impl fmt::Debug for OptionsForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsForm")
            .field("instance_url", &self.instance_url)
            .field("application_token", &redacted(&self.application_token))
            .field("user_email", &self.user_email)
            .field("token_id", &self.token_id)
            .field("token_secret", &redacted(&self.token_secret))
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "REDACTED"
    }
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Process-wide key-value store holding [`Options`].
///
/// There is no locking across a load/save pair: the last writer wins.
pub trait OptionsStore: Send + Sync {
    /// Read the options, falling back to defaults for anything not stored.
    fn load(&self) -> Result<Options, StorageError>;

    /// Replace the stored options wholesale.
    fn save(&self, options: &Options) -> Result<(), StorageError>;

    /// Persist a freshly exchanged access token, keeping everything else.
    fn store_access_token(&self, access_token: &str) -> Result<(), StorageError> {
        let mut options = self.load()?;
        options.access_token = access_token.to_string();
        self.save(&options)
    }

    /// Save options from the options page and drop the cached access token.
    fn store_options(&self, form: OptionsForm) -> Result<(), StorageError> {
        info!("Storing options for instance: {}", form.instance_url);
        self.save(&Options::from_form(form))
    }
}

/// Options kept in process memory only.
#[derive(Debug, Default)]
pub struct MemoryOptionsStore {
    options: Mutex<Options>,
}

impl MemoryOptionsStore {
    pub fn new(options: Options) -> Self {
        Self {
            options: Mutex::new(options),
        }
    }
}

impl OptionsStore for MemoryOptionsStore {
    fn load(&self) -> Result<Options, StorageError> {
        self.options
            .lock()
            .map(|guard| guard.clone())
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    fn save(&self, options: &Options) -> Result<(), StorageError> {
        let mut guard = self
            .options
            .lock()
            .map_err(|e| StorageError::Io(e.to_string()))?;
        *guard = options.clone();
        Ok(())
    }
}
