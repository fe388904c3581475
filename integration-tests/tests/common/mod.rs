use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;

/// Public endpoint handed to the binary so no lookup goes over the network
pub const SCHEDULER_ENDPOINT: &str = "203.0.113.7";

/// Exit code of a run that left sites unprovisioned or not torn down
pub const EXIT_PARTIAL: i32 = 3;

/// Get the path to a compiled binary in the target directory
fn cargo_bin(name: &str) -> PathBuf {
    // Look for the binary in target/debug (standard cargo test location)
    let mut path = std::env::current_exe()
        .expect("Failed to get current exe")
        .parent()
        .expect("No parent")
        .parent()
        .expect("No grandparent")
        .to_path_buf();
    path.push(name);
    if path.exists() {
        return path;
    }

    // Fallback: try target/debug directly
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // integration-tests -> workspace root
    path.push("target");
    path.push("debug");
    path.push(name);
    if path.exists() {
        return path;
    }

    panic!(
        "Binary '{}' not found. Run `cargo build --workspace` first.",
        name
    );
}

const WG: &str = r#"echo "wg $1" >> "$LOG"
case "$1" in
  genkey) head -c 32 /dev/urandom | base64 ;;
  pubkey) cat > /dev/null; head -c 32 /dev/urandom | base64 ;;
  *) exit 1 ;;
esac
"#;

const WG_QUICK: &str = r#"echo "wg-quick $*" >> "$LOG"
"#;

const IP6TABLES: &str = r#"echo "ip6tables $*" >> "$LOG"
"#;

// FAKE_SSH_FAIL names a login target whose gateway script fails,
// FAKE_SSH_TEARDOWN_FAIL one whose teardown sequence fails
const SSH: &str = r#"echo "ssh $*" >> "$LOG"
if [ -n "$FAKE_SSH_FAIL" ]; then
  case " $* " in
    *" $FAKE_SSH_FAIL sudo "*wg_cloud_gateway*)
      echo "Permission denied (publickey)." >&2
      exit 255 ;;
  esac
fi
if [ -n "$FAKE_SSH_TEARDOWN_FAIL" ]; then
  case " $* " in
    *" $FAKE_SSH_TEARDOWN_FAIL sudo bash -c "*)
      echo "wg-quick: \`dasklocal' is not a WireGuard interface" >&2
      exit 1 ;;
  esac
fi
"#;

// FAKE_SCHEDULER_SLEEP keeps the scheduler running for that many seconds
const SCHEDULER: &str = r#"echo "dask-scheduler $*" >> "$LOG"
if [ -n "$FAKE_SCHEDULER_SLEEP" ]; then
  exec sleep "$FAKE_SCHEDULER_SLEEP"
fi
"#;

/// A scratch host: fake `wg`, `wg-quick`, `ip6tables`, `ssh` and `dask-scheduler`
/// executables on PATH, each appending its command line to a shared log
pub struct FakeHost {
    dir: TempDir,
}

impl FakeHost {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).expect("Failed to create bin dir");

        let log = dir.path().join("calls.log");
        for (name, body) in [
            ("wg", WG),
            ("wg-quick", WG_QUICK),
            ("ip6tables", IP6TABLES),
            ("ssh", SSH),
            ("dask-scheduler", SCHEDULER),
        ] {
            write_script(&bin.join(name), &log, body);
        }

        Self { dir }
    }

    pub fn conf_file(&self) -> PathBuf {
        self.dir.path().join("wireguard").join("dasklocal.conf")
    }

    fn bin_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    fn log_file(&self) -> PathBuf {
        self.dir.path().join("calls.log")
    }

    /// The binary wired to the fakes, with no delays, for the given targets
    pub fn command(&self, targets: &[&str]) -> Command {
        let path = format!(
            "{}:{}",
            self.bin_dir().display(),
            std::env::var("PATH").unwrap_or_default()
        );

        let mut cmd = Command::new(cargo_bin("meshspawn"));
        cmd.env("PATH", path)
            .args(["--conf-file", self.conf_file().to_str().unwrap()])
            .args(["--public-endpoint", SCHEDULER_ENDPOINT])
            .args(["--scheduler-warmup-secs", "0"])
            .args(["--interface-settle-secs", "0"])
            .args(["--log-level", "debug"])
            .args(targets)
            .stdin(Stdio::null());
        cmd
    }

    /// Every command the fakes saw, in order
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.log_file())
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Position of the first call starting with `prefix` and containing `needle`
    pub fn position(&self, prefix: &str, needle: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|c| c.starts_with(prefix) && c.contains(needle))
    }

    /// Wait until `count` calls start with `prefix` and contain `needle`
    pub async fn wait_for_calls(&self, prefix: &str, needle: &str, count: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self
                .calls()
                .iter()
                .filter(|c| c.starts_with(prefix) && c.contains(needle))
                .count();
            if seen >= count {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "Timed out waiting for {} '{}' call(s) containing '{}', saw {:?}",
                    count,
                    prefix,
                    needle,
                    self.calls()
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

fn write_script(path: &Path, log: &Path, body: &str) {
    let script = format!("#!/bin/sh\nLOG='{}'\n{}", log.display(), body);
    fs::write(path, script).expect("Failed to write fake tool");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .expect("Failed to make fake tool executable");
}
