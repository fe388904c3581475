mod site;

pub use site::{RemoteSite, SiteCommands};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CommandError;
use crate::process::{CommandRunner, LocalCommand};

/// Runs a command on a named remote host and returns its output
#[async_trait]
pub trait RemoteExecutionChannel: Send + Sync {
    async fn execute(&self, target: &str, command: &LocalCommand) -> Result<String, CommandError>;
}

/// Remote execution over OpenSSH.
///
/// Hosts are expected to allow key-based login and passwordless sudo. New
/// host keys are accepted on first contact; changed ones are refused.
pub struct SshChannel {
    runner: Arc<dyn CommandRunner>,
    connect_timeout: Option<Duration>,
}

impl SshChannel {
    pub fn new(runner: Arc<dyn CommandRunner>, connect_timeout: Option<Duration>) -> Self {
        Self {
            runner,
            connect_timeout,
        }
    }

    fn ssh_command(&self, target: &str, command: &LocalCommand) -> LocalCommand {
        let mut ssh = LocalCommand::new("ssh")
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", "BatchMode=yes"]);

        if let Some(timeout) = self.connect_timeout {
            ssh = ssh
                .arg("-o")
                .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        }

        // ssh joins its trailing arguments into one string for the remote
        // shell, so each one is quoted to survive that split
        ssh.arg(target).quoted_tail(command)
    }
}

#[async_trait]
impl RemoteExecutionChannel for SshChannel {
    async fn execute(&self, target: &str, command: &LocalCommand) -> Result<String, CommandError> {
        self.runner.run(&self.ssh_command(target, command)).await
    }
}
