//! Fakes for the injected traits, shared by the unit tests.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::OverlayAddressing;
use crate::error::{CommandError, Result, SpawnError};
use crate::identity::IdentityProvider;
use crate::process::{CommandRunner, LocalCommand};
use crate::remote::{RemoteExecutionChannel, SiteCommands};
use crate::scheduler::{SchedulerHandle, SchedulerLauncher};
use crate::topology::endpoint_of;
use crate::types::{KeyPair, PrivateKey, PublicKey, SchedulerRecord, SiteRecord, Topology};

/// Ordered record of everything the fakes were asked to do
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn note(journal: &Option<Journal>, event: String) {
    if let Some(j) = journal {
        j.lock().unwrap().push(event);
    }
}

/// A well-formed key, distinct for every `n`
pub fn test_key(n: u8) -> String {
    STANDARD.encode([n; 32])
}

fn key_pair(n: u8) -> KeyPair {
    KeyPair {
        private: PrivateKey::parse(&test_key(n)).unwrap(),
        public: PublicKey::parse(&test_key(n.wrapping_add(128))).unwrap(),
    }
}

/// Topology over the default addressing with the scheduler at 203.0.113.9
pub fn sample_topology(targets: &[&str]) -> Topology {
    let addressing = OverlayAddressing::default();
    let sites = targets
        .iter()
        .enumerate()
        .map(|(i, target)| {
            let site_id = (i + 1) as u16;
            SiteRecord {
                site_id,
                login_target: target.to_string(),
                endpoint: endpoint_of(target).to_string(),
                keys: key_pair(site_id as u8),
                overlay_block: addressing.site_block(site_id),
            }
        })
        .collect();

    Topology {
        scheduler: SchedulerRecord {
            keys: key_pair(100),
            address: addressing.scheduler_address,
            endpoint: "203.0.113.9".to_string(),
        },
        sites,
    }
}

pub fn sample_commands() -> SiteCommands {
    SiteCommands {
        entrypoint: "dask_wg/wg_cloud_gateway.sh".to_string(),
        remote_interface: "dasklocal".to_string(),
        worker_prefix: "dask-worker-".to_string(),
    }
}

// ============================================================================
// Local commands
// ============================================================================

/// Records commands; answers with the first rule whose prefix matches the
/// displayed command line, or an empty success
#[derive(Default)]
pub struct FakeRunner {
    rules: Vec<(String, std::result::Result<String, CommandError>)>,
    calls: Mutex<Vec<LocalCommand>>,
    journal: Option<Journal>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(
        mut self,
        prefix: &str,
        result: std::result::Result<String, CommandError>,
    ) -> Self {
        self.rules.push((prefix.to_string(), result));
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> Vec<LocalCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, cmd: &LocalCommand) -> std::result::Result<String, CommandError> {
        let line = cmd.to_string();
        self.calls.lock().unwrap().push(cmd.clone());
        note(&self.journal, format!("run {}", line));

        self.rules
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| Ok(String::new()))
    }
}

// ============================================================================
// Identities
// ============================================================================

pub struct FakeIdentity {
    next: Mutex<u8>,
    labels: Mutex<Vec<String>>,
    fail_on: Option<String>,
    constant: bool,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self {
            next: Mutex::new(1),
            labels: Mutex::new(Vec::new()),
            fail_on: None,
            constant: false,
        }
    }

    pub fn failing_on(label: &str) -> Self {
        Self {
            fail_on: Some(label.to_string()),
            ..Self::new()
        }
    }

    /// Hands out the same keypair every time
    pub fn constant() -> Self {
        Self {
            constant: true,
            ..Self::new()
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn generate(&self, label: &str) -> Result<KeyPair> {
        self.labels.lock().unwrap().push(label.to_string());

        if self.fail_on.as_deref() == Some(label) {
            return Err(SpawnError::KeyGeneration {
                label: label.to_string(),
                reason: "wg: command not found".to_string(),
            });
        }

        if self.constant {
            return Ok(key_pair(1));
        }

        let mut next = self.next.lock().unwrap();
        let pair = key_pair(*next);
        *next += 1;
        Ok(pair)
    }
}

// ============================================================================
// Remote channel
// ============================================================================

/// Records `(target, argv)` per call and fails calls matching a rule
#[derive(Default)]
pub struct FakeChannel {
    failures: Vec<(String, String, CommandError)>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    journal: Option<Journal>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail calls to `target` whose argv contains `needle`
    pub fn fail_on(mut self, target: &str, needle: &str, err: CommandError) -> Self {
        self.failures
            .push((target.to_string(), needle.to_string(), err));
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutionChannel for FakeChannel {
    async fn execute(
        &self,
        target: &str,
        command: &LocalCommand,
    ) -> std::result::Result<String, CommandError> {
        let argv: Vec<String> = command.argv().map(str::to_string).collect();
        let line = argv.join(" ");
        self.calls
            .lock()
            .unwrap()
            .push((target.to_string(), argv));
        note(&self.journal, format!("{} {}", target, command));

        match self
            .failures
            .iter()
            .find(|(t, needle, _)| t == target && line.contains(needle.as_str()))
        {
            Some((_, _, err)) => Err(err.clone()),
            None => Ok(String::new()),
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct FakeScheduler {
    /// `None` runs until stopped
    exit_code: Option<i32>,
    fail_start: bool,
    started: AtomicBool,
    stopped: Arc<AtomicBool>,
    journal: Option<Journal>,
}

impl FakeScheduler {
    fn build(exit_code: Option<i32>, fail_start: bool) -> Self {
        Self {
            exit_code,
            fail_start,
            started: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
            journal: None,
        }
    }

    pub fn exiting(code: i32) -> Self {
        Self::build(Some(code), false)
    }

    pub fn running_forever() -> Self {
        Self::build(None, false)
    }

    pub fn failing() -> Self {
        Self::build(None, true)
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchedulerLauncher for FakeScheduler {
    async fn start(&self) -> Result<Box<dyn SchedulerHandle>> {
        if self.fail_start {
            return Err(SpawnError::SchedulerStart(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "dask-scheduler: not found",
            )));
        }

        self.started.store(true, Ordering::SeqCst);
        note(&self.journal, "scheduler start".to_string());

        Ok(Box::new(FakeHandle {
            exit_code: self.exit_code,
            stopped: self.stopped.clone(),
            journal: self.journal.clone(),
        }))
    }
}

struct FakeHandle {
    exit_code: Option<i32>,
    stopped: Arc<AtomicBool>,
    journal: Option<Journal>,
}

#[async_trait]
impl SchedulerHandle for FakeHandle {
    async fn wait(&mut self) -> Result<Option<i32>> {
        match self.exit_code {
            Some(code) => Ok(Some(code)),
            None => std::future::pending().await,
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        note(&self.journal, "scheduler stop".to_string());
        Ok(())
    }
}
