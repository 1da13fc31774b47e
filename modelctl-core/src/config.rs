//! # Session Configuration
//!
//! A [`SessionContext`] carries everything a session needs to talk to the server: where it is,
//! who we are, how long calls may take, and how the remote services are named. It is built once
//! by the caller and handed to every component; nothing in this crate reads process-wide state.
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::time::Duration;

pub const ENV_SERVER: &str = "MODELCTL_SERVER";
pub const ENV_USERNAME: &str = "MODELCTL_USERNAME";
pub const ENV_PASSWORD: &str = "MODELCTL_PASSWORD";
pub const ENV_PROTOSET: &str = "MODELCTL_PROTOSET";

/// Default size of a file transfer chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// Server major versions this client knows how to talk to.
pub const DEFAULT_VERSION_CONSTRAINT: &str = ">= 3, < 5";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{0} is not set. Please update the configuration or the {1} environment variable")]
    Missing(&'static str, &'static str),
    #[error("Chunk size must be a positive number of bytes")]
    InvalidChunkSize,
}

/// Names of the remote services and packages the client talks to.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceLayout {
    /// Package holding the model messages (e.g. `xos.Slice`).
    pub model_package: String,
    /// Service exposing `Get<T>`, `List<T>`, `Filter<T>`, ... for every model.
    pub model_service: String,
    /// Service exposing the `Upload` and `Download` streaming calls.
    pub transfer_service: String,
    /// Service exposing `GetVersion` and `GetDatabaseInfo`.
    pub utility_service: String,
}

impl Default for ServiceLayout {
    fn default() -> Self {
        Self {
            model_package: "xos".to_string(),
            model_service: "xos.xos".to_string(),
            transfer_service: "xos.filetransfer".to_string(),
            utility_service: "xos.utility".to_string(),
        }
    }
}

impl ServiceLayout {
    /// Fully qualified message name of a model, e.g. `xos.Slice`.
    pub fn model_message(&self, model: &str) -> String {
        format!("{}.{}", self.model_package, model)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GrpcSettings {
    /// Per-call timeout, in seconds.
    pub timeout_secs: u64,
}

impl Default for GrpcSettings {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionContext {
    pub server: String,
    pub username: String,
    pub password: String,
    /// Optional path of a binary `FileDescriptorSet` to use instead of server reflection.
    pub protoset: Option<String>,
    pub grpc: GrpcSettings,
    /// Answer yes to every confirmation prompt.
    pub assume_yes: bool,
    pub chunk_size: usize,
    pub version_constraint: String,
    pub services: ServiceLayout,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            server: "localhost:50055".to_string(),
            username: String::new(),
            password: String::new(),
            protoset: None,
            grpc: GrpcSettings::default(),
            assume_yes: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            version_constraint: DEFAULT_VERSION_CONSTRAINT.to_string(),
            services: ServiceLayout::default(),
        }
    }
}

impl SessionContext {
    /// Parses a YAML document. Missing keys keep their defaults.
    pub fn from_yaml_str(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(document)?)
    }

    /// Applies `MODELCTL_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup. Used by [`Self::with_env_overrides`].
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(server) = lookup(ENV_SERVER) {
            self.server = server;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.username = username;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.password = password;
        }
        if let Some(protoset) = lookup(ENV_PROTOSET) {
            self.protoset = Some(protoset);
        }
        self
    }

    /// Checks that the settings required to open a session are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::Missing("Server", ENV_SERVER));
        }
        if self.username.is_empty() {
            return Err(ConfigError::Missing("Username", ENV_USERNAME));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("Password", ENV_PASSWORD));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.grpc.timeout_secs)
    }

    /// The server address as an URI tonic can dial.
    pub fn endpoint(&self) -> String {
        if self.server.contains("://") {
            self.server.clone()
        } else {
            format!("http://{}", self.server)
        }
    }

    /// Request headers attached to every call.
    pub fn headers(&self) -> Vec<(String, String)> {
        let credentials = STANDARD.encode(format!("{}:{}", self.username, self.password));
        vec![("authorization".to_string(), format!("basic {credentials}"))]
    }
}
