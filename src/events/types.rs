//! Event Types
//!
//! Domain events that flow through the runtime's buses.

use serde::{Deserialize, Serialize};
use crate::events::bus::BusEvent;

/// Coding-agent lifecycle events published by the host for plugins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentEvent {
    /// An agent session started in a worktree
    #[serde(rename = "agent:started")]
    Started {
        session_id: String,
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worktree: Option<String>,
    },

    /// The agent is waiting for user input
    #[serde(rename = "agent:waiting")]
    WaitingForInput {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },

    /// The agent finished its task
    #[serde(rename = "agent:completed")]
    Completed {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },

    /// The agent stopped with an error
    #[serde(rename = "agent:failed")]
    Failed {
        session_id: String,
        error: String,
    },
}

impl AgentEvent {
    pub const STARTED: &'static str = "agent:started";
    pub const WAITING: &'static str = "agent:waiting";
    pub const COMPLETED: &'static str = "agent:completed";
    pub const FAILED: &'static str = "agent:failed";

    /// Create a started event
    pub fn started<S: Into<String>, A: Into<String>>(session_id: S, agent: A) -> Self {
        Self::Started { session_id: session_id.into(), agent: agent.into(), worktree: None }
    }

    /// Create a completed event
    pub fn completed<S: Into<String>>(session_id: S) -> Self {
        Self::Completed { session_id: session_id.into(), summary: None }
    }

    /// Create a failed event
    pub fn failed<S: Into<String>, E: Into<String>>(session_id: S, error: E) -> Self {
        Self::Failed { session_id: session_id.into(), error: error.into() }
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            AgentEvent::Started { session_id, .. } |
            AgentEvent::WaitingForInput { session_id, .. } |
            AgentEvent::Completed { session_id, .. } |
            AgentEvent::Failed { session_id, .. } => session_id,
        }
    }
}

impl BusEvent for AgentEvent {
    fn event_type(&self) -> &str {
        match self {
            AgentEvent::Started { .. } => Self::STARTED,
            AgentEvent::WaitingForInput { .. } => Self::WAITING,
            AgentEvent::Completed { .. } => Self::COMPLETED,
            AgentEvent::Failed { .. } => Self::FAILED,
        }
    }
}

/// Plugin lifecycle notifications emitted by the plugin manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    Registered { plugin_id: String },
    Activated { plugin_id: String },
    Deactivated { plugin_id: String },
    Unregistered { plugin_id: String },
    ActivationFailed { plugin_id: String, message: String },
}

impl LifecycleEvent {
    pub const REGISTERED: &'static str = "registered";
    pub const ACTIVATED: &'static str = "activated";
    pub const DEACTIVATED: &'static str = "deactivated";
    pub const UNREGISTERED: &'static str = "unregistered";
    pub const ACTIVATION_FAILED: &'static str = "activation-failed";

    /// Plugin the event refers to
    pub fn plugin_id(&self) -> &str {
        match self {
            LifecycleEvent::Registered { plugin_id } |
            LifecycleEvent::Activated { plugin_id } |
            LifecycleEvent::Deactivated { plugin_id } |
            LifecycleEvent::Unregistered { plugin_id } |
            LifecycleEvent::ActivationFailed { plugin_id, .. } => plugin_id,
        }
    }
}

impl BusEvent for LifecycleEvent {
    fn event_type(&self) -> &str {
        match self {
            LifecycleEvent::Registered { .. } => Self::REGISTERED,
            LifecycleEvent::Activated { .. } => Self::ACTIVATED,
            LifecycleEvent::Deactivated { .. } => Self::DEACTIVATED,
            LifecycleEvent::Unregistered { .. } => Self::UNREGISTERED,
            LifecycleEvent::ActivationFailed { .. } => Self::ACTIVATION_FAILED,
        }
    }
}
