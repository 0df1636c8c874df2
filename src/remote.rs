//! Remote command channel collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Result of a command run on a target host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes shell commands on a remote target (SSH, guest agent, ...).
///
/// The engine never owns the channel; callers inject an implementation for
/// their environment.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run a command on the named target and capture its output.
    async fn run(&self, target: &str, command: &str) -> Result<CommandOutput, RemoteError>;
}
