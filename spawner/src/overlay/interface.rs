use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{CommandError, Result, SpawnError};
use crate::process::{CommandRunner, LocalCommand};

/// The scheduler-side overlay interface, driven through `wg-quick` and
/// `ip6tables`
pub struct OverlayInterface {
    runner: Arc<dyn CommandRunner>,
    name: String,
    conf_file: PathBuf,
    settle: Duration,
}

impl OverlayInterface {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        name: impl Into<String>,
        conf_file: PathBuf,
        settle: Duration,
    ) -> Self {
        Self {
            runner,
            name: name.into(),
            conf_file,
            settle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Activate the interface from the written config, then accept forwarded
    /// traffic arriving on it. If the forwarding rule cannot be installed the
    /// interface is taken down again.
    pub async fn bring_up(&self) -> Result<()> {
        info!("Bringing up overlay interface {}", self.name);

        self.runner
            .run(&self.wg_quick("up"))
            .await
            .map_err(SpawnError::OverlayBringUp)?;

        if !self.settle.is_zero() {
            debug!("Waiting {:?} for {} to settle", self.settle, self.name);
            tokio::time::sleep(self.settle).await;
        }

        if let Err(e) = self.runner.run(&self.forward_rule("-A")).await {
            warn!("Forwarding rule failed, taking {} down again", self.name);
            if let Err(down) = self.runner.run(&self.wg_quick("down")).await {
                warn!("Failed to bring {} down: {}", self.name, down);
            }
            return Err(SpawnError::OverlayBringUp(e));
        }

        info!("Overlay interface {} is up", self.name);
        Ok(())
    }

    /// Undo `bring_up`. Both steps are attempted; failures are returned
    /// rather than stopping the second step.
    pub async fn tear_down(&self) -> Vec<CommandError> {
        info!("Tearing down overlay interface {}", self.name);

        let mut failures = Vec::new();
        for cmd in [self.forward_rule("-D"), self.wg_quick("down")] {
            if let Err(e) = self.runner.run(&cmd).await {
                warn!("{}", e);
                failures.push(e);
            }
        }
        failures
    }

    fn wg_quick(&self, action: &str) -> LocalCommand {
        LocalCommand::new("wg-quick")
            .arg(action)
            .arg(self.conf_file.to_string_lossy())
    }

    fn forward_rule(&self, op: &str) -> LocalCommand {
        LocalCommand::new("ip6tables")
            .arg(op)
            .args(["FORWARD", "-i", self.name.as_str(), "--jump", "ACCEPT"])
    }
}
