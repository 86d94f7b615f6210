//! The interestingness test and its execution environment.
//!
//! An oracle inspects a candidate input and decides whether it still
//! exhibits the property under investigation. Oracles must be pure in
//! outcome: identical bytes yield identical verdicts, and any side effects
//! stay inside the per-call working directory. Verdicts are never errors;
//! an unresolved outcome steers the search conservatively.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Outcome of one oracle invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Interesting,
    NotInteresting,
    /// The test could not decide (crash of the harness itself, timeout).
    /// Treated as not interesting so the previous baseline survives.
    Unresolved,
}

impl Verdict {
    pub fn is_interesting(self) -> bool {
        matches!(self, Verdict::Interesting)
    }
}

/// A test that can decide about the interestingness of a candidate.
///
/// `id` is unique per invocation within a session and may be used for
/// working-directory isolation.
pub trait Oracle: Sync {
    fn examine(&self, candidate: &[u8], id: &str) -> Verdict;
}

/// Closure-backed oracle, mostly for library use and tests.
pub struct FnOracle<F>(F);

impl<F> FnOracle<F>
where
    F: Fn(&[u8]) -> Verdict + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Oracle for FnOracle<F>
where
    F: Fn(&[u8]) -> Verdict + Sync,
{
    fn examine(&self, candidate: &[u8], _id: &str) -> Verdict {
        (self.0)(candidate)
    }
}

/// Runs a user-supplied command against each candidate.
///
/// Every invocation gets a private directory `<work_dir>/<id>` holding the
/// candidate as `<test_name>`; the command receives the file path as its
/// only argument and its exit status is the verdict. Spawn failures and
/// timeouts are unresolved.
pub struct CommandOracle {
    command: PathBuf,
    work_dir: PathBuf,
    test_name: String,
    timeout: Option<Duration>,
    cleanup: bool,
}

impl CommandOracle {
    pub fn new(command: PathBuf, work_dir: PathBuf, test_name: String) -> Self {
        Self {
            command,
            work_dir,
            test_name,
            timeout: None,
            cleanup: true,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    fn run(&self, candidate: &[u8], id: &str) -> std::io::Result<Verdict> {
        let dir = self.work_dir.join(id);
        std::fs::create_dir_all(&dir)?;
        let case = dir.join(&self.test_name);
        std::fs::write(&case, candidate)?;

        let mut child = Command::new(&self.command)
            .arg(&case)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let verdict = match self.timeout {
            None => {
                let status = child.wait()?;
                status_verdict(status.success())
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status_verdict(status.success());
                    }
                    if Instant::now() >= deadline {
                        warn!(id, "oracle timed out; treating as unresolved");
                        let _ = child.kill();
                        let _ = child.wait();
                        break Verdict::Unresolved;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        };

        if self.cleanup {
            let _ = std::fs::remove_dir_all(&dir);
        }
        Ok(verdict)
    }
}

fn status_verdict(success: bool) -> Verdict {
    if success {
        Verdict::Interesting
    } else {
        Verdict::NotInteresting
    }
}

impl Oracle for CommandOracle {
    fn examine(&self, candidate: &[u8], id: &str) -> Verdict {
        match self.run(candidate, id) {
            Ok(verdict) => {
                debug!(id, ?verdict, "oracle verdict");
                verdict
            }
            Err(e) => {
                warn!(id, error = %e, "oracle invocation failed; treating as unresolved");
                Verdict::Unresolved
            }
        }
    }
}

/// Cooperative cancellation, checked at every DDMIN submission boundary.
/// An in-flight oracle call finishes; its result is discarded.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_oracle_delegates() {
        let oracle = FnOracle::new(|bytes: &[u8]| {
            if bytes.contains(&b'!') {
                Verdict::Interesting
            } else {
                Verdict::NotInteresting
            }
        });
        assert_eq!(oracle.examine(b"hi!", "t0"), Verdict::Interesting);
        assert_eq!(oracle.examine(b"hi", "t1"), Verdict::NotInteresting);
    }

    #[test]
    fn cancellation_is_sticky() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn missing_command_is_unresolved() {
        let oracle = CommandOracle::new(
            PathBuf::from("/nonexistent/definitely-not-a-real-binary"),
            std::env::temp_dir().join("whittle-oracle-test"),
            "case.txt".into(),
        );
        assert_eq!(oracle.examine(b"x", "t0"), Verdict::Unresolved);
    }
}
