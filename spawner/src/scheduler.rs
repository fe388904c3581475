use async_trait::async_trait;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{Result, SpawnError};

/// How the wait on the scheduler ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// The process exited by itself. `None` when it was killed by a signal.
    Exited(Option<i32>),
    /// An interrupt arrived first and the scheduler was stopped
    Interrupted,
}

#[async_trait]
pub trait SchedulerLauncher: Send + Sync {
    async fn start(&self) -> Result<Box<dyn SchedulerHandle>>;
}

/// A running scheduler
#[async_trait]
pub trait SchedulerHandle: Send {
    /// Resolves with the exit code once the process exits
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Ask the process to stop and reap it. No-op if it already exited.
    async fn stop(&mut self) -> Result<()>;
}

/// Block until the scheduler exits or `shutdown` resolves. An interrupt is
/// not an error: the scheduler is stopped and the caller moves on to teardown.
pub async fn wait_until_exit<F>(handle: &mut dyn SchedulerHandle, shutdown: F) -> Result<SchedulerExit>
where
    F: Future<Output = ()> + Send,
{
    let finished = tokio::select! {
        res = handle.wait() => Some(res),
        () = shutdown => None,
    };

    match finished {
        Some(res) => {
            let code = res?;
            match code {
                Some(0) => info!("Scheduler exited"),
                Some(code) => warn!("Scheduler exited with code {}", code),
                None => warn!("Scheduler was terminated by a signal"),
            }
            Ok(SchedulerExit::Exited(code))
        }
        None => {
            info!("Interrupt received, stopping scheduler");
            handle.stop().await?;
            Ok(SchedulerExit::Interrupted)
        }
    }
}

/// Launches the scheduler as a child process sharing this process's
/// stdout and stderr
pub struct ProcessScheduler {
    command: Vec<String>,
    stop_grace: Duration,
}

impl ProcessScheduler {
    pub fn new(command: Vec<String>, stop_grace: Duration) -> Self {
        Self {
            command,
            stop_grace,
        }
    }
}

#[async_trait]
impl SchedulerLauncher for ProcessScheduler {
    async fn start(&self) -> Result<Box<dyn SchedulerHandle>> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            SpawnError::SchedulerStart(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty scheduler command",
            ))
        })?;

        info!("Starting scheduler: {}", self.command.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(SpawnError::SchedulerStart)?;

        info!("Scheduler started (pid {})", child.id().unwrap_or_default());

        Ok(Box::new(ChildScheduler {
            child,
            stop_grace: self.stop_grace,
        }))
    }
}

struct ChildScheduler {
    child: Child,
    stop_grace: Duration,
}

impl ChildScheduler {
    /// SIGINT first so the scheduler can close its connections
    #[cfg(target_os = "linux")]
    fn interrupt(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match self.child.id() {
            Some(pid) => match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to interrupt scheduler (pid {}): {}", pid, e);
                    false
                }
            },
            None => false,
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn interrupt(&self) -> bool {
        false
    }
}

#[async_trait]
impl SchedulerHandle for ChildScheduler {
    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await.map_err(SpawnError::SchedulerWait)?;
        Ok(status.code())
    }

    async fn stop(&mut self) -> Result<()> {
        if self
            .child
            .try_wait()
            .map_err(SpawnError::SchedulerWait)?
            .is_some()
        {
            return Ok(());
        }

        if self.interrupt() {
            match tokio::time::timeout(self.stop_grace, self.child.wait()).await {
                Ok(status) => {
                    let status = status.map_err(SpawnError::SchedulerWait)?;
                    info!("Scheduler stopped ({})", status);
                    return Ok(());
                }
                Err(_) => warn!(
                    "Scheduler still running {:?} after interrupt, killing it",
                    self.stop_grace
                ),
            }
        }

        self.child.kill().await.map_err(SpawnError::SchedulerWait)?;
        info!("Scheduler killed");
        Ok(())
    }
}
