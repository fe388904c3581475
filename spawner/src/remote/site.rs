use std::sync::Arc;
use tracing::{error, info, warn};

use super::RemoteExecutionChannel;
use crate::error::{Result, SpawnError};
use crate::process::{shell_quote, LocalCommand};
use crate::types::{PeerList, SiteRecord, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteState {
    Idle,
    Provisioning,
    Running,
    /// Provisioning or teardown failed
    Failed,
    TearingDown,
    Stopped,
}

/// Names the remote side of the contract: the gateway script, the overlay
/// interface it creates and the naming of its worker containers
#[derive(Debug, Clone)]
pub struct SiteCommands {
    pub entrypoint: String,
    pub remote_interface: String,
    pub worker_prefix: String,
}

/// Controller for one remote site
pub struct RemoteSite {
    record: SiteRecord,
    workers: u32,
    commands: SiteCommands,
    channel: Arc<dyn RemoteExecutionChannel>,
    state: SiteState,
}

impl RemoteSite {
    pub fn new(
        record: SiteRecord,
        workers: u32,
        commands: SiteCommands,
        channel: Arc<dyn RemoteExecutionChannel>,
    ) -> Self {
        Self {
            record,
            workers,
            commands,
            channel,
            state: SiteState::Idle,
        }
    }

    pub fn site_id(&self) -> u16 {
        self.record.site_id
    }

    pub fn login_target(&self) -> &str {
        &self.record.login_target
    }

    pub fn state(&self) -> SiteState {
        self.state
    }

    /// Start the site's gateway and workers, handing it the peers it must dial
    pub async fn start_workers(&mut self, topology: &Topology) -> Result<()> {
        if self.state != SiteState::Idle {
            return Err(self.provisioning_failed(format!(
                "site is {:?}, expected Idle",
                self.state
            )));
        }

        let peers = topology.peers_for(self.record.site_id);
        let cmd = self.provision_command(&peers);

        info!(
            "Provisioning site {} ({}) with {} worker(s) and {} peer(s)",
            self.record.site_id,
            self.record.login_target,
            self.workers,
            peers.len()
        );
        self.state = SiteState::Provisioning;

        match self.channel.execute(&self.record.login_target, &cmd).await {
            Ok(_) => {
                self.state = SiteState::Running;
                info!("Site {} is running", self.record.site_id);
                Ok(())
            }
            Err(e) => {
                self.state = SiteState::Failed;
                error!(
                    "Provisioning site {} ({}) failed: {}",
                    self.record.site_id, self.record.login_target, e
                );
                Err(self.provisioning_failed(e.output))
            }
        }
    }

    /// Take the site's overlay interface down and kill its workers.
    ///
    /// Allowed from any state: a site whose provisioning failed may still
    /// have started part of its stack.
    pub async fn kill_workers(&mut self) -> Result<()> {
        let cmd = self.teardown_command();

        info!(
            "Tearing down site {} ({})",
            self.record.site_id, self.record.login_target
        );
        let previous = self.state;
        self.state = SiteState::TearingDown;

        match self.channel.execute(&self.record.login_target, &cmd).await {
            Ok(_) => {
                self.state = SiteState::Stopped;
                Ok(())
            }
            Err(e) => {
                self.state = SiteState::Failed;
                if previous == SiteState::Running {
                    error!("Teardown of site {} failed: {}", self.record.site_id, e);
                } else {
                    warn!(
                        "Teardown of site {} (was {:?}) failed: {}",
                        self.record.site_id, previous, e
                    );
                }
                Err(SpawnError::RemoteTeardown {
                    site: self.describe(),
                    output: e.output,
                })
            }
        }
    }

    /// `sudo <entrypoint> <private key> <site id> <workers> <peer list>`
    fn provision_command(&self, peers: &PeerList) -> LocalCommand {
        LocalCommand::new("sudo")
            .arg(&self.commands.entrypoint)
            .secret_arg(self.record.keys.private.expose())
            .arg(self.record.site_id.to_string())
            .arg(self.workers.to_string())
            .arg(peers.to_string())
    }

    /// One shell sequence. Every step runs even if an earlier one fails, and
    /// the sequence exits non-zero if any step did.
    fn teardown_command(&self) -> LocalCommand {
        LocalCommand::new("sudo")
            .args(["bash", "-c"])
            .arg(self.teardown_script())
    }

    fn teardown_script(&self) -> String {
        let mut steps = vec![format!(
            "wg-quick down {}",
            shell_quote(&self.commands.remote_interface)
        )];
        for worker in 1..=self.workers {
            steps.push(format!(
                "docker kill {}",
                shell_quote(&format!("{}{}", self.commands.worker_prefix, worker))
            ));
        }

        let mut script = String::from("rc=0; ");
        for step in steps {
            script.push_str(&step);
            script.push_str(" || rc=1; ");
        }
        script.push_str("exit $rc");
        script
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.record.site_id, self.record.login_target)
    }

    fn provisioning_failed(&self, output: String) -> SpawnError {
        SpawnError::RemoteProvisioning {
            site: self.describe(),
            output,
        }
    }
}
