//! Action payloads: what a job, scheduled task, or workflow step actually runs.
//!
//! An action is a tagged variant over the three execution contexts. Each
//! variant carries statically-typed parameters and validates itself before it
//! is ever enqueued, so a malformed spec is rejected at submission time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH"];

/// A unit of work, addressed to one of the execution contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Shell command, local (`target: None`) or on a remote host.
    Command {
        command: String,
        #[serde(default)]
        target: Option<String>,
        /// Fire-and-forget: spawn and return without waiting for output.
        #[serde(default)]
        background: bool,
        /// Extra environment for the child. Local commands only.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    /// Request against the management API collaborator.
    ApiCall {
        method: String,
        path: String,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
    /// In-process handler invocation, resolved by symbolic name.
    Function {
        handler: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
        #[serde(default)]
        kwargs: serde_json::Map<String, serde_json::Value>,
    },
}

impl ActionSpec {
    /// The string tag used in records and log fields.
    pub fn type_tag(&self) -> &'static str {
        match self {
            ActionSpec::Command { .. } => "command",
            ActionSpec::ApiCall { .. } => "api_call",
            ActionSpec::Function { .. } => "function",
        }
    }

    /// Validate the spec. Called on every admission path.
    pub fn validate(&self) -> Result<(), TaskError> {
        match self {
            ActionSpec::Command { command, target, .. } => {
                if command.trim().is_empty() {
                    return Err(TaskError::InvalidSpec {
                        reason: "command must not be empty".to_string(),
                    });
                }
                if let Some(t) = target {
                    if t.trim().is_empty() {
                        return Err(TaskError::InvalidSpec {
                            reason: "remote target must not be empty".to_string(),
                        });
                    }
                }
                Ok(())
            }
            ActionSpec::ApiCall { method, path, .. } => {
                let upper = method.to_uppercase();
                if !ALLOWED_METHODS.contains(&upper.as_str()) {
                    return Err(TaskError::InvalidSpec {
                        reason: format!("unknown HTTP method '{method}'"),
                    });
                }
                if path.trim().is_empty() {
                    return Err(TaskError::InvalidSpec {
                        reason: "api path must not be empty".to_string(),
                    });
                }
                Ok(())
            }
            ActionSpec::Function { handler, .. } => {
                if handler.trim().is_empty() {
                    return Err(TaskError::InvalidSpec {
                        reason: "handler name must not be empty".to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Convenience constructor for a local command.
    pub fn local_command(command: impl Into<String>) -> Self {
        ActionSpec::Command {
            command: command.into(),
            target: None,
            background: false,
            env: HashMap::new(),
        }
    }

    /// Convenience constructor for a command on a remote target.
    pub fn remote_command(target: impl Into<String>, command: impl Into<String>) -> Self {
        ActionSpec::Command {
            command: command.into(),
            target: Some(target.into()),
            background: false,
            env: HashMap::new(),
        }
    }

    /// Convenience constructor for a function action without arguments.
    pub fn function(handler: impl Into<String>) -> Self {
        ActionSpec::Function {
            handler: handler.into(),
            args: Vec::new(),
            kwargs: serde_json::Map::new(),
        }
    }
}

/// Positional and keyword arguments handed to a function handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionArgs {
    pub args: Vec<serde_json::Value>,
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl FunctionArgs {
    pub fn new(
        args: Vec<serde_json::Value>,
        kwargs: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self { args, kwargs }
    }

    /// Look up a keyword argument.
    pub fn kwarg(&self, name: &str) -> Option<&serde_json::Value> {
        self.kwargs.get(name)
    }

    /// Look up a keyword argument as a string.
    pub fn kwarg_str(&self, name: &str) -> Option<&str> {
        self.kwargs.get(name).and_then(|v| v.as_str())
    }
}
