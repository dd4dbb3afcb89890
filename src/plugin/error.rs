//! Plugin Error Types
//!
//! Error taxonomy for the plugin runtime. Install and manifest errors are
//! surfaced to the caller of `install`, activation errors are captured into
//! the registration record, and facade calls fail with `PermissionDenied`
//! instead of silently doing nothing.

use thiserror::Error;
use crate::plugin::components::ComponentKind;
use crate::plugin::permissions::Capability;

/// Result type for plugin runtime operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors produced by the plugin runtime
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    /// Manifest is malformed or misses required fields
    #[error("Invalid plugin manifest: {message}")]
    InvalidManifest { message: String },

    /// Manifest declares a capability outside the known enumeration
    #[error("Plugin '{plugin_id}' declares unknown permission '{permission}'")]
    PermissionDeclaration { plugin_id: String, permission: String },

    /// Facade call for a capability the plugin does not hold
    #[error("Permission denied: plugin '{plugin_id}' has not been granted '{capability}'")]
    PermissionDenied { plugin_id: String, capability: Capability },

    /// The plugin's own activation logic failed or timed out
    #[error("Activation of plugin '{plugin_id}' failed: {message}")]
    ActivationFailed { plugin_id: String, message: String },

    /// Setting value rejected by its declaration
    #[error("Invalid value for setting '{key}': {message}")]
    Validation { key: String, message: String },

    /// Component id not registered under the requested kind
    #[error("Component not found: {kind} '{component_id}'")]
    ComponentNotFound { kind: ComponentKind, component_id: String },

    /// Plugin not found
    #[error("Plugin not found: {plugin_id}")]
    PluginNotFound { plugin_id: String },

    /// Plugin already registered or installed
    #[error("Plugin already registered: {plugin_id}")]
    PluginAlreadyRegistered { plugin_id: String },

    /// Fetching a plugin from its source failed
    #[error("Plugin installation failed: {message}")]
    InstallFailed { message: String },

    /// Persistence backend failure
    #[error("Plugin storage error: {message}")]
    Storage { message: String },

    /// Operation exceeded its time bound
    #[error("Plugin operation timed out: {message}")]
    Timeout { message: String },

    /// Host does not provide the requested service
    #[error("Host does not support '{operation}'")]
    Unsupported { operation: String },

    /// Host accessor failure
    #[error("Host error: {message}")]
    Host { message: String },

    /// Operation not valid in the current state
    #[error("Invalid plugin state: {message}")]
    InvalidState { message: String },
}

impl PluginError {
    /// Create an invalid manifest error
    pub fn invalid_manifest<S: Into<String>>(message: S) -> Self {
        Self::InvalidManifest { message: message.into() }
    }

    /// Create an unknown permission declaration error
    pub fn permission_declaration<S: Into<String>, P: Into<String>>(plugin_id: S, permission: P) -> Self {
        Self::PermissionDeclaration { plugin_id: plugin_id.into(), permission: permission.into() }
    }

    /// Create a permission denied error
    pub fn permission_denied<S: Into<String>>(plugin_id: S, capability: Capability) -> Self {
        Self::PermissionDenied { plugin_id: plugin_id.into(), capability }
    }

    /// Create an activation failure
    pub fn activation_failed<S: Into<String>, M: Into<String>>(plugin_id: S, message: M) -> Self {
        Self::ActivationFailed { plugin_id: plugin_id.into(), message: message.into() }
    }

    /// Create a setting validation error
    pub fn validation<S: Into<String>, M: Into<String>>(key: S, message: M) -> Self {
        Self::Validation { key: key.into(), message: message.into() }
    }

    /// Create a component not found error
    pub fn component_not_found<S: Into<String>>(kind: ComponentKind, component_id: S) -> Self {
        Self::ComponentNotFound { kind, component_id: component_id.into() }
    }

    /// Create a plugin not found error
    pub fn plugin_not_found<S: Into<String>>(plugin_id: S) -> Self {
        Self::PluginNotFound { plugin_id: plugin_id.into() }
    }

    /// Create a plugin already registered error
    pub fn plugin_already_registered<S: Into<String>>(plugin_id: S) -> Self {
        Self::PluginAlreadyRegistered { plugin_id: plugin_id.into() }
    }

    /// Create an install error
    pub fn install_failed<S: Into<String>>(message: S) -> Self {
        Self::InstallFailed { message: message.into() }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout { message: message.into() }
    }

    /// Create an unsupported host service error
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        Self::Unsupported { operation: operation.into() }
    }

    /// Create a host error
    pub fn host<S: Into<String>>(message: S) -> Self {
        Self::Host { message: message.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState { message: message.into() }
    }

    /// Check if a user-initiated retry can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self,
            PluginError::ActivationFailed { .. } |
            PluginError::Timeout { .. } |
            PluginError::Host { .. } |
            PluginError::InstallFailed { .. }
        )
    }

    /// Check if error aborts an install
    pub fn is_install_error(&self) -> bool {
        matches!(self,
            PluginError::InvalidManifest { .. } |
            PluginError::PermissionDeclaration { .. } |
            PluginError::InstallFailed { .. } |
            PluginError::PluginAlreadyRegistered { .. }
        )
    }

    /// Check if error is related to plugin lifecycle
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(self,
            PluginError::ActivationFailed { .. } |
            PluginError::PluginNotFound { .. } |
            PluginError::PluginAlreadyRegistered { .. } |
            PluginError::InvalidState { .. }
        )
    }
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        PluginError::storage(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::storage(format!("JSON error: {}", err))
    }
}

impl From<git2::Error> for PluginError {
    fn from(err: git2::Error) -> Self {
        PluginError::host(format!("Git error: {}", err.message()))
    }
}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        PluginError::install_failed(format!("HTTP error: {}", err))
    }
}

impl From<tokio::task::JoinError> for PluginError {
    fn from(err: tokio::task::JoinError) -> Self {
        PluginError::host(format!("Task join error: {}", err))
    }
}
