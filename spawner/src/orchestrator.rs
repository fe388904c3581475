use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::SpawnConfig;
use crate::error::{Result, SpawnError};
use crate::identity::IdentityProvider;
use crate::overlay::{write_config, OverlayInterface};
use crate::process::CommandRunner;
use crate::public_ip::resolve_scheduler_endpoint;
use crate::remote::{RemoteExecutionChannel, RemoteSite, SiteCommands};
use crate::scheduler::{wait_until_exit, SchedulerExit, SchedulerLauncher};
use crate::topology::TopologyBuilder;

/// Outcome of a run that got past bring-up
#[derive(Debug)]
pub struct RunReport {
    pub sites: usize,
    /// `None` if waiting on the scheduler itself failed
    pub scheduler_exit: Option<SchedulerExit>,
    pub provisioning_failures: Vec<SpawnError>,
    pub teardown_failures: Vec<SpawnError>,
}

impl RunReport {
    /// Every site started and was torn down again
    pub fn is_clean(&self) -> bool {
        self.scheduler_exit.is_some()
            && self.provisioning_failures.is_empty()
            && self.teardown_failures.is_empty()
    }

    pub fn log_summary(&self) {
        for failure in self.provisioning_failures.iter().chain(&self.teardown_failures) {
            error!("{}", failure);
        }

        if self.is_clean() {
            info!("All {} site(s) provisioned and torn down", self.sites);
        } else {
            warn!(
                "Run finished with problems: {} site(s), {} failed to provision, {} failed to tear down",
                self.sites,
                self.provisioning_failures.len(),
                self.teardown_failures.len()
            );
        }
    }
}

/// Drives a whole run: identities, topology, overlay, scheduler, remote
/// sites, then teardown of every site
pub struct Orchestrator {
    config: SpawnConfig,
    identity: Arc<dyn IdentityProvider>,
    channel: Arc<dyn RemoteExecutionChannel>,
    runner: Arc<dyn CommandRunner>,
    scheduler: Arc<dyn SchedulerLauncher>,
}

impl Orchestrator {
    pub fn new(
        config: SpawnConfig,
        identity: Arc<dyn IdentityProvider>,
        channel: Arc<dyn RemoteExecutionChannel>,
        runner: Arc<dyn CommandRunner>,
        scheduler: Arc<dyn SchedulerLauncher>,
    ) -> Self {
        Self {
            config,
            identity,
            channel,
            runner,
            scheduler,
        }
    }

    /// Run until the scheduler exits or `shutdown` resolves, then tear every
    /// site down.
    ///
    /// Errors are returned only for bring-up failures, before any remote
    /// site has been contacted. Remote failures end up in the report.
    pub async fn run<F>(&self, targets: &[String], shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()> + Send,
    {
        let config = &self.config;

        // Bad targets are rejected before the endpoint lookup goes to the network
        let builder = TopologyBuilder::new(&config.addressing, self.identity.as_ref());
        let plan = builder.plan(targets)?;

        let endpoint = resolve_scheduler_endpoint(config.public_endpoint.as_deref()).await;
        let topology = builder.build(plan, &endpoint).await?;

        write_config(&config.conf_file, &config.addressing, &topology)?;

        let overlay = OverlayInterface::new(
            self.runner.clone(),
            config.interface_name(),
            config.conf_file.clone(),
            config.interface_settle,
        );
        overlay.bring_up().await?;

        let mut handle = match self.scheduler.start().await {
            Ok(handle) => handle,
            Err(e) => {
                error!("{}; rolling back overlay interface {}", e, overlay.name());
                overlay.tear_down().await;
                return Err(e);
            }
        };

        if !config.scheduler_warmup.is_zero() {
            info!(
                "Giving the scheduler {:?} to come up",
                config.scheduler_warmup
            );
            tokio::time::sleep(config.scheduler_warmup).await;
        }

        let commands = SiteCommands {
            entrypoint: config.entrypoint.clone(),
            remote_interface: config.remote_interface.clone(),
            worker_prefix: config.worker_prefix.clone(),
        };
        let mut sites: Vec<RemoteSite> = topology
            .sites
            .iter()
            .map(|record| {
                RemoteSite::new(
                    record.clone(),
                    config.workers_for(&record.login_target),
                    commands.clone(),
                    self.channel.clone(),
                )
            })
            .collect();

        info!("Spawning gateways on {} site(s)", sites.len());
        let provisioning_failures: Vec<SpawnError> =
            join_all(sites.iter_mut().map(|site| site.start_workers(&topology)))
                .await
                .into_iter()
                .filter_map(|r| r.err())
                .collect();

        // Hand over to the scheduler until it quits or we are interrupted
        let scheduler_exit = match wait_until_exit(handle.as_mut(), shutdown).await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!("{}", e);
                if let Err(e) = handle.stop().await {
                    warn!("Failed to stop scheduler: {}", e);
                }
                None
            }
        };

        info!("Killing remote workers");
        let teardown_failures: Vec<SpawnError> =
            join_all(sites.iter_mut().map(|site| site.kill_workers()))
                .await
                .into_iter()
                .filter_map(|r| r.err())
                .collect();

        for site in &sites {
            debug!(
                "Site {} ({}) finished {:?}",
                site.site_id(),
                site.login_target(),
                site.state()
            );
        }

        Ok(RunReport {
            sites: sites.len(),
            scheduler_exit,
            provisioning_failures,
            teardown_failures,
        })
    }
}
