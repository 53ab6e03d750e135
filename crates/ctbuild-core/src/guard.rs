//! Container cleanup: the cleanup policy, the single-flight unit guard, and
//! the interrupt listener that requests early teardown.
//!
//! Once a unit exists it must be removed (or killed, when preserved for
//! debugging) exactly once. [`UnitGuard`] owns that obligation; whichever
//! path reaches [`UnitGuard::release`] first performs the remote call and any
//! later caller observes a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ContainerClient, RemoveOptions, UnitId};
use crate::error::{BuildError, BuildResult};

/// Signal sent to a preserved unit.
pub const KILL_SIGNAL: &str = "KILL";

/// What happens to a unit once the build is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Force-remove the unit and its anonymous volumes.
    #[default]
    Remove,
    /// Kill the unit but leave it in place for post-mortem inspection.
    Kill,
}

impl CleanupPolicy {
    pub fn from_preserve(preserve: bool) -> Self {
        if preserve {
            CleanupPolicy::Kill
        } else {
            CleanupPolicy::Remove
        }
    }

    /// Apply the policy to `unit`.
    ///
    /// A unit that is already gone (or already stopped, for `Kill`) is not an
    /// error, and an empty ID is a no-op.
    pub async fn apply(&self, client: &dyn ContainerClient, unit: &UnitId) -> BuildResult<()> {
        if unit.is_empty() {
            debug!("No container to clean up");
            return Ok(());
        }

        let result = match self {
            CleanupPolicy::Remove => client.remove_unit(unit, RemoveOptions::default()).await,
            CleanupPolicy::Kill => client.kill_unit(unit, KILL_SIGNAL).await,
        };

        match result {
            Ok(()) => {
                match self {
                    CleanupPolicy::Remove => info!(container = %unit, "Removed container"),
                    CleanupPolicy::Kill => {
                        info!(container = %unit, "Killed container, leaving it in place")
                    }
                }
                Ok(())
            }
            Err(err) if err.is_gone() => {
                debug!(container = %unit, error = %err, "Container already gone");
                Ok(())
            }
            Err(source) => Err(BuildError::Cleanup {
                unit: unit.clone(),
                source,
            }),
        }
    }
}

/// Outcome of [`UnitGuard::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// This call applied the cleanup policy.
    Now,
    /// An earlier call already did.
    AlreadyReleased,
}

/// Cleanup obligation for one created unit.
pub struct UnitGuard {
    client: Arc<dyn ContainerClient>,
    unit: UnitId,
    policy: CleanupPolicy,
    released: AtomicBool,
}

impl UnitGuard {
    /// Take ownership of the cleanup obligation for `unit`.
    pub fn new(client: Arc<dyn ContainerClient>, unit: UnitId, policy: CleanupPolicy) -> Self {
        UnitGuard {
            client,
            unit,
            policy,
            released: AtomicBool::new(false),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Apply the cleanup policy if no one has yet.
    ///
    /// The flag is set before the remote call, so a failed cleanup is not
    /// retried by a later caller.
    pub async fn release(&self) -> BuildResult<Released> {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!(container = %self.unit, "Container already released");
            return Ok(Released::AlreadyReleased);
        }

        self.policy
            .apply(self.client.as_ref(), &self.unit)
            .await
            .map(|()| Released::Now)
    }
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        if !self.unit.is_empty() && !self.is_released() {
            warn!(
                container = %self.unit,
                "Container guard dropped without cleanup; the container may still exist"
            );
        }
    }
}

impl std::fmt::Debug for UnitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitGuard")
            .field("unit", &self.unit)
            .field("policy", &self.policy)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Listen for interrupts in the background.
///
/// The handlers are installed before this returns, so a signal arriving
/// while a container is being created is never lost. The returned token is
/// cancelled on the first Ctrl-C (or SIGTERM on Unix). Each further signal is
/// logged and cancels again, which is a no-op.
pub fn spawn_signal_listener() -> std::io::Result<CancellationToken> {
    let mut signals = Signals::install()?;
    let token = CancellationToken::new();
    let listener = token.clone();

    tokio::spawn(async move {
        while let Some(name) = signals.recv().await {
            warn!(signal = name, "Signal received, tearing down container");
            listener.cancel();
        }
        debug!("Signal listener stopped");
    });

    Ok(token)
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Signals {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some("SIGINT"),
            Some(()) = self.terminate.recv() => Some("SIGTERM"),
            else => None,
        }
    }
}

#[cfg(windows)]
struct Signals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Signals {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    async fn recv(&mut self) -> Option<&'static str> {
        self.ctrl_c.recv().await.map(|()| "ctrl-c")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::UnitConfig;
    use crate::fakes::{MemoryContainerClient, Operation};

    fn unit_config() -> UnitConfig {
        UnitConfig {
            image: "alpine".to_string(),
            entrypoint: vec!["/bin/sh".to_string()],
            args: Vec::new(),
            binds: Vec::new(),
            tty: true,
        }
    }

    #[test]
    fn preserve_flag_selects_policy() {
        assert_eq!(CleanupPolicy::from_preserve(false), CleanupPolicy::Remove);
        assert_eq!(CleanupPolicy::from_preserve(true), CleanupPolicy::Kill);
        assert_eq!(CleanupPolicy::default(), CleanupPolicy::Remove);
    }

    #[tokio::test]
    async fn remove_twice_is_not_fatal() {
        let client = MemoryContainerClient::new();
        let unit = client.create_unit(&unit_config()).await.unwrap();

        CleanupPolicy::Remove.apply(&client, &unit).await.unwrap();
        CleanupPolicy::Remove.apply(&client, &unit).await.unwrap();

        assert!(!client.exists(&unit));
        assert_eq!(client.removals(&unit), 2);
    }

    #[tokio::test]
    async fn kill_on_removed_unit_is_not_fatal() {
        let client = MemoryContainerClient::new();
        let unit = client.create_unit(&unit_config()).await.unwrap();

        CleanupPolicy::Remove.apply(&client, &unit).await.unwrap();
        CleanupPolicy::Kill.apply(&client, &unit).await.unwrap();
    }

    #[tokio::test]
    async fn empty_unit_id_is_a_no_op() {
        let client = MemoryContainerClient::new();

        CleanupPolicy::Remove
            .apply(&client, &UnitId::default())
            .await
            .unwrap();
        CleanupPolicy::Kill
            .apply(&client, &UnitId::new(""))
            .await
            .unwrap();

        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn api_failure_is_a_cleanup_error() {
        let client = MemoryContainerClient::new();
        let unit = client.create_unit(&unit_config()).await.unwrap();
        client.fail_on(Operation::Remove);

        let err = CleanupPolicy::Remove.apply(&client, &unit).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cleanup);
    }

    #[tokio::test]
    async fn guard_releases_once() {
        let client = Arc::new(MemoryContainerClient::new());
        let unit = client.create_unit(&unit_config()).await.unwrap();
        let guard = UnitGuard::new(client.clone(), unit.clone(), CleanupPolicy::Remove);

        assert_eq!(guard.release().await.unwrap(), Released::Now);
        assert_eq!(guard.release().await.unwrap(), Released::AlreadyReleased);
        assert!(guard.is_released());
        assert_eq!(client.removals(&unit), 1);
    }

    #[tokio::test]
    async fn concurrent_releases_make_one_remote_call() {
        let client = Arc::new(MemoryContainerClient::new());
        let unit = client.create_unit(&unit_config()).await.unwrap();
        let guard = Arc::new(UnitGuard::new(
            client.clone(),
            unit.clone(),
            CleanupPolicy::Kill,
        ));

        let (a, b) = tokio::join!(guard.release(), guard.release());
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|r| *r == Released::AlreadyReleased);

        assert_eq!(outcomes, vec![Released::Now, Released::AlreadyReleased]);
        assert_eq!(client.kills(&unit), 1);
        assert!(client.exists(&unit), "killed containers stay in place");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_signal_cancels_token() {
        let token = spawn_signal_listener().unwrap();
        assert!(!token.is_cancelled());

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(std::time::Duration::from_secs(5), token.cancelled())
            .await
            .expect("SIGTERM did not cancel the token");
    }

    #[tokio::test]
    async fn failed_release_is_not_retried() {
        let client = Arc::new(MemoryContainerClient::new());
        let unit = client.create_unit(&unit_config()).await.unwrap();
        client.fail_on(Operation::Remove);
        let guard = UnitGuard::new(client.clone(), unit.clone(), CleanupPolicy::Remove);

        assert!(guard.release().await.is_err());
        assert_eq!(guard.release().await.unwrap(), Released::AlreadyReleased);
    }
}
