use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::CommandError;

const REDACTED: &str = "<redacted>";

/// A program invocation. Arguments marked secret are masked when displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    secret: Vec<usize>,
}

impl LocalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            secret: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Argument that must never reach the logs
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program followed by arguments, as the remote side should see them
    #[cfg(test)]
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }

    /// Appends `inner`'s argv to this command, each element shell-quoted so a
    /// remote shell splits it back into the same words
    pub fn quoted_tail(mut self, inner: &LocalCommand) -> Self {
        self.args.push(shell_quote(&inner.program));
        for (i, arg) in inner.args.iter().enumerate() {
            if inner.secret.contains(&i) {
                self.secret.push(self.args.len());
            }
            self.args.push(shell_quote(arg));
        }
        self
    }
}

impl fmt::Display for LocalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret.contains(&i) {
                write!(f, " {}", REDACTED)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Single-quote `word` for a POSIX shell unless it is made only of
/// characters the shell never interprets
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:,=+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Runs a command to completion and returns its stdout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: &LocalCommand) -> Result<String, CommandError>;
}

/// Runs commands as child processes of this one
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &LocalCommand) -> Result<String, CommandError> {
        debug!("Running: {}", cmd);

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::new(cmd.to_string(), "not started", e.to_string()))?;

        if let (Some(input), Some(mut stdin)) = (&cmd.stdin, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| CommandError::new(cmd.to_string(), "stdin closed", e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CommandError::new(cmd.to_string(), "wait failed", e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CommandError::new(
            cmd.to_string(),
            output.status.to_string(),
            format!("{}{}", stdout, stderr).trim().to_string(),
        ))
    }
}
