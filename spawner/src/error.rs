use thiserror::Error;

/// A local or remote command that could not be run, or exited non-zero.
#[derive(Error, Debug, Clone)]
#[error("`{command}` failed ({status}): {output}")]
pub struct CommandError {
    /// Command line as it should appear in logs (secrets masked)
    pub command: String,
    pub status: String,
    /// Captured stdout and stderr
    pub output: String,
}

impl CommandError {
    pub fn new(command: impl Into<String>, status: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            status: status.into(),
            output: output.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Key generation failed for {label}: {reason}")]
    KeyGeneration { label: String, reason: String },

    #[error("Topology build failed: {0}")]
    TopologyBuild(String),

    #[error("Failed to write overlay config {path}: {source}")]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Overlay bring-up failed: {0}")]
    OverlayBringUp(#[source] CommandError),

    #[error("Scheduler failed to start: {0}")]
    SchedulerStart(#[source] std::io::Error),

    #[error("Failed waiting for scheduler: {0}")]
    SchedulerWait(#[source] std::io::Error),

    #[error("Provisioning failed on site {site}: {output}")]
    RemoteProvisioning { site: String, output: String },

    #[error("Teardown failed on site {site}: {output}")]
    RemoteTeardown { site: String, output: String },
}

impl SpawnError {
    /// Output captured from the failing process, if any
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::OverlayBringUp(e) => Some(&e.output),
            Self::RemoteProvisioning { output, .. } | Self::RemoteTeardown { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpawnError>;
