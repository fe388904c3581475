use std::collections::HashSet;
use tracing::{info, warn};

use crate::config::OverlayAddressing;
use crate::error::{Result, SpawnError};
use crate::identity::IdentityProvider;
use crate::types::{SchedulerRecord, SiteRecord, Topology};

/// Turns the ordered list of login targets into a topology.
///
/// Site IDs follow input order (first target is site 1), so re-running with
/// the same ordering hands every site the same overlay block.
pub struct TopologyBuilder<'a> {
    addressing: &'a OverlayAddressing,
    identity: &'a dyn IdentityProvider,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(addressing: &'a OverlayAddressing, identity: &'a dyn IdentityProvider) -> Self {
        Self {
            addressing,
            identity,
        }
    }

    /// Validates the addressing and every target without issuing any key
    pub fn plan(&self, targets: &[String]) -> Result<SitePlan> {
        self.addressing.validate()?;
        Ok(SitePlan(plan_sites(targets)?))
    }

    /// Issues one identity for the scheduler and one per planned site
    pub async fn build(&self, plan: SitePlan, scheduler_endpoint: &str) -> Result<Topology> {
        let SitePlan(planned) = plan;

        let scheduler = SchedulerRecord {
            keys: self.identity.generate("scheduler").await?,
            address: self.addressing.scheduler_address,
            endpoint: scheduler_endpoint.to_string(),
        };

        let mut sites = Vec::with_capacity(planned.len());
        for (site_id, login_target, endpoint) in planned {
            let keys = self.identity.generate(&format!("site-{}", site_id)).await?;
            sites.push(SiteRecord {
                site_id,
                login_target,
                endpoint,
                keys,
                overlay_block: self.addressing.site_block(site_id),
            });
        }

        let mut seen = HashSet::new();
        seen.insert(scheduler.keys.public.clone());
        for site in &sites {
            if !seen.insert(site.keys.public.clone()) {
                return Err(SpawnError::KeyGeneration {
                    label: format!("site-{}", site.site_id),
                    reason: "identity provider returned a key already in use".to_string(),
                });
            }
        }

        for site in &sites {
            info!(
                "Site {}: target={}, endpoint={}, block={}",
                site.site_id, site.login_target, site.endpoint, site.overlay_block
            );
        }

        Ok(Topology { scheduler, sites })
    }
}

/// Validated targets, in site ID order
#[derive(Debug)]
pub struct SitePlan(Vec<(u16, String, String)>);

/// `(site_id, login_target, endpoint)` for every target, in order
fn plan_sites(targets: &[String]) -> Result<Vec<(u16, String, String)>> {
    if targets.is_empty() {
        return Err(SpawnError::TopologyBuild(
            "at least one remote site is required".to_string(),
        ));
    }

    let mut seen_targets = HashSet::new();
    let mut seen_endpoints = HashSet::new();
    let mut planned = Vec::with_capacity(targets.len());

    for (index, target) in targets.iter().enumerate() {
        let site_id = u16::try_from(index + 1).map_err(|_| {
            SpawnError::TopologyBuild(format!("too many sites ({})", targets.len()))
        })?;

        let endpoint = endpoint_of(target);
        if endpoint.is_empty() {
            return Err(SpawnError::TopologyBuild(format!(
                "login target '{}' has no host",
                target
            )));
        }

        if !seen_targets.insert(target.as_str()) {
            return Err(SpawnError::TopologyBuild(format!(
                "login target '{}' given more than once",
                target
            )));
        }
        if !seen_endpoints.insert(endpoint) {
            warn!("Endpoint {} is shared by more than one site", endpoint);
        }

        planned.push((site_id, target.clone(), endpoint.to_string()));
    }

    Ok(planned)
}

/// Host part of a `user@host` login target
pub fn endpoint_of(login_target: &str) -> &str {
    login_target
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(login_target)
        .trim()
}
