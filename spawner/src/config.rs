use anyhow::{bail, Context, Result};
use ipnet::Ipv6Net;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SpawnError;

pub const DEFAULT_CONF_FILE: &str = "/etc/wireguard/dasklocal.conf";
pub const DEFAULT_LISTEN_PORT: u16 = 51820;
pub const DEFAULT_KEEPALIVE_SECS: u16 = 25;

/// Lengths passed here are constants, never above 128
fn net(addr: Ipv6Addr, prefix_len: u8) -> Ipv6Net {
    Ipv6Net::new(addr, prefix_len).unwrap_or_else(|_| Ipv6Net::from(addr))
}

/// Addressing plan of the overlay.
///
/// Site `n` owns `<prefix>:n::/64`; block 0 belongs to the scheduler, whose
/// address is fixed and known to every site in advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayAddressing {
    pub prefix: Ipv6Net,
    pub scheduler_address: Ipv6Addr,
    pub listen_port: u16,
    pub keepalive_secs: u16,
}

impl Default for OverlayAddressing {
    fn default() -> Self {
        Self {
            prefix: net(Ipv6Addr::new(0xfda5, 0xc0ff, 0xeeee, 0, 0, 0, 0, 0), 48),
            scheduler_address: Ipv6Addr::new(0xfda5, 0xc0ff, 0xeeee, 0, 0, 0, 0, 1),
            listen_port: DEFAULT_LISTEN_PORT,
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
        }
    }
}

impl OverlayAddressing {
    /// The /64 block of a site. The site ID becomes the fourth address group.
    pub fn site_block(&self, site_id: u16) -> Ipv6Net {
        let mut segments = self.prefix.network().segments();
        segments[3] = site_id;
        let network = Ipv6Addr::new(
            segments[0],
            segments[1],
            segments[2],
            segments[3],
            0,
            0,
            0,
            0,
        );
        net(network, 64)
    }

    /// Checks that the prefix leaves the fourth group free for site IDs and
    /// that the scheduler lives in the reserved block 0
    pub fn validate(&self) -> std::result::Result<(), SpawnError> {
        if self.prefix.prefix_len() > 48 {
            return Err(SpawnError::TopologyBuild(format!(
                "overlay prefix {} must be /48 or shorter",
                self.prefix
            )));
        }

        if !self.site_block(0).contains(&self.scheduler_address) {
            return Err(SpawnError::TopologyBuild(format!(
                "scheduler address {} is outside reserved block {}",
                self.scheduler_address,
                self.site_block(0)
            )));
        }

        Ok(())
    }
}

/// Everything a run needs, after merging defaults, the config file and flags
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub addressing: OverlayAddressing,
    /// Local overlay config; its file stem names the interface
    pub conf_file: PathBuf,
    pub workers_per_site: u32,
    /// Per login target worker counts overriding `workers_per_site`
    pub site_workers: HashMap<String, u32>,
    /// Gateway script on each remote site
    pub entrypoint: String,
    pub remote_interface: String,
    pub worker_prefix: String,
    pub scheduler_command: Vec<String>,
    pub scheduler_warmup: Duration,
    pub interface_settle: Duration,
    pub scheduler_stop_grace: Duration,
    pub ssh_connect_timeout: Option<Duration>,
    /// Skips address detection when set
    pub public_endpoint: Option<String>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            addressing: OverlayAddressing::default(),
            conf_file: PathBuf::from(DEFAULT_CONF_FILE),
            workers_per_site: 1,
            site_workers: HashMap::new(),
            entrypoint: "dask_wg/wg_cloud_gateway.sh".to_string(),
            remote_interface: "dasklocal".to_string(),
            worker_prefix: "dask-worker-".to_string(),
            scheduler_command: vec!["dask-scheduler".to_string()],
            scheduler_warmup: Duration::from_secs(5),
            interface_settle: Duration::from_secs(1),
            scheduler_stop_grace: Duration::from_secs(10),
            ssh_connect_timeout: None,
            public_endpoint: None,
        }
    }
}

impl SpawnConfig {
    pub fn workers_for(&self, login_target: &str) -> u32 {
        self.site_workers
            .get(login_target)
            .copied()
            .unwrap_or(self.workers_per_site)
    }

    /// Name of the local overlay interface (`dasklocal` for `dasklocal.conf`)
    pub fn interface_name(&self) -> String {
        self.conf_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.remote_interface.clone())
    }
}

// ============================================================================
// Config File
// ============================================================================

/// TOML config file. Every field is optional and falls back to the default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub conf_file: Option<PathBuf>,
    pub workers_per_site: Option<u32>,
    pub site_workers: HashMap<String, u32>,
    pub entrypoint: Option<String>,
    pub remote_interface: Option<String>,
    pub worker_prefix: Option<String>,
    pub scheduler_command: Option<Vec<String>>,
    pub scheduler_warmup_secs: Option<u64>,
    pub interface_settle_secs: Option<u64>,
    pub scheduler_stop_grace_secs: Option<u64>,
    pub ssh_connect_timeout_secs: Option<u64>,
    pub public_endpoint: Option<String>,
    pub overlay_prefix: Option<String>,
    pub scheduler_address: Option<String>,
    pub listen_port: Option<u16>,
    pub keepalive_secs: Option<u16>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let cfg = toml::from_str(&text).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(cfg)
    }

    /// Layer this file over the built-in defaults
    pub fn into_spawn_config(self) -> Result<SpawnConfig> {
        let mut config = SpawnConfig::default();

        if let Some(prefix) = self.overlay_prefix {
            config.addressing.prefix = prefix
                .parse()
                .with_context(|| format!("Invalid overlay prefix {}", prefix))?;
        }
        if let Some(addr) = self.scheduler_address {
            config.addressing.scheduler_address = addr
                .parse()
                .with_context(|| format!("Invalid scheduler address {}", addr))?;
        }
        if let Some(port) = self.listen_port {
            config.addressing.listen_port = port;
        }
        if let Some(keepalive) = self.keepalive_secs {
            config.addressing.keepalive_secs = keepalive;
        }

        if let Some(path) = self.conf_file {
            config.conf_file = path;
        }
        if let Some(n) = self.workers_per_site {
            config.workers_per_site = n;
        }
        config.site_workers = self.site_workers;
        if let Some(entrypoint) = self.entrypoint {
            config.entrypoint = entrypoint;
        }
        if let Some(iface) = self.remote_interface {
            config.remote_interface = iface;
        }
        if let Some(prefix) = self.worker_prefix {
            config.worker_prefix = prefix;
        }
        if let Some(cmd) = self.scheduler_command {
            if cmd.is_empty() {
                bail!("scheduler_command must not be empty");
            }
            config.scheduler_command = cmd;
        }
        if let Some(secs) = self.scheduler_warmup_secs {
            config.scheduler_warmup = Duration::from_secs(secs);
        }
        if let Some(secs) = self.interface_settle_secs {
            config.interface_settle = Duration::from_secs(secs);
        }
        if let Some(secs) = self.scheduler_stop_grace_secs {
            config.scheduler_stop_grace = Duration::from_secs(secs);
        }
        config.ssh_connect_timeout = self.ssh_connect_timeout_secs.map(Duration::from_secs);
        config.public_endpoint = self.public_endpoint;

        Ok(config)
    }
}
