//! Execution environment client abstraction.
//!
//! [`ContainerClient`] is the seam between the orchestrator and whatever
//! actually runs containers. [`crate::docker::DockerClient`] talks to a
//! Docker Engine; [`crate::fakes::MemoryContainerClient`] keeps everything in
//! memory for tests.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Combined stdout/stderr of a running unit, as raw byte chunks.
pub type LogStream = BoxStream<'static, ClientResult<Vec<u8>>>;

/// Errors returned by an execution environment client
#[derive(Error, Debug)]
pub enum ClientError {
    /// The unit does not exist (never created, or already removed)
    #[error("container not found: {id}")]
    NotFound { id: String },

    /// The unit is in a state that rejects the request (not running,
    /// removal already in progress)
    #[error("container {id} is in a conflicting state: {message}")]
    Conflict { id: String, message: String },

    /// The runtime answered with an error
    #[error("container runtime error: {0}")]
    Api(String),

    /// The connection to the runtime failed
    #[error("container runtime unreachable: {0}")]
    Transport(String),
}

impl ClientError {
    /// Whether the error means the unit is already gone or already stopping.
    ///
    /// Cleanup treats these as success.
    pub fn is_gone(&self) -> bool {
        matches!(self, ClientError::NotFound { .. } | ClientError::Conflict { .. })
    }
}

/// Opaque identifier assigned by the client when a unit is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        UnitId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty ID never refers to a live unit.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Short form (first 12 characters), matching `docker ps` output.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// A host directory made visible inside the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host: PathBuf,
    pub target: String,
}

impl BindMount {
    pub fn new(host: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        BindMount {
            host: host.into(),
            target: target.into(),
        }
    }

    /// Render in the `host:target` form used by the Docker API.
    pub fn to_bind_spec(&self) -> String {
        format!("{}:{}", self.host.display(), self.target)
    }
}

/// Everything needed to create a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConfig {
    /// Image reference the unit is created from
    pub image: String,
    /// Entrypoint override
    pub entrypoint: Vec<String>,
    /// Arguments passed to the entrypoint
    pub args: Vec<String>,
    /// Host directories mounted read/write
    pub binds: Vec<BindMount>,
    /// Allocate a pseudo terminal
    pub tty: bool,
}

/// Final state of a unit, read after its output stream closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitState {
    pub exit_code: i64,
}

/// Options for [`ContainerClient::remove_unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove even if running
    pub force: bool,
    /// Also remove anonymous volumes created by the unit
    pub remove_volumes: bool,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        RemoveOptions {
            force: true,
            remove_volumes: true,
        }
    }
}

/// API surface of an isolated execution environment provider.
///
/// Implementations must map "no such unit" to [`ClientError::NotFound`] so
/// that cleanup can stay idempotent.
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// Create (but do not start) a unit.
    async fn create_unit(&self, config: &UnitConfig) -> ClientResult<UnitId>;

    /// Extract a tar archive into the unit's filesystem at `target`.
    async fn copy_archive(&self, id: &UnitId, target: &str, archive: Vec<u8>) -> ClientResult<()>;

    /// Start a created unit.
    async fn start_unit(&self, id: &UnitId) -> ClientResult<()>;

    /// Follow the unit's combined stdout/stderr until it exits.
    async fn stream_logs(&self, id: &UnitId) -> ClientResult<LogStream>;

    /// Read the unit's current state.
    async fn inspect_unit(&self, id: &UnitId) -> ClientResult<UnitState>;

    /// Remove the unit.
    async fn remove_unit(&self, id: &UnitId, options: RemoveOptions) -> ClientResult<()>;

    /// Send a signal (e.g. `"KILL"`) to the unit.
    async fn kill_unit(&self, id: &UnitId, signal: &str) -> ClientResult<()>;
}
