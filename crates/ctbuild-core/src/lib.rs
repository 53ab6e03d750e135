//! ctbuild-core: run a build program inside a throwaway container
//!
//! A build is described by a [`BuildEnvironmentSpec`] (image, entrypoint,
//! files to inject). [`ContainerOrchestrator`] creates a container from it
//! with the source, result and cache directories bind-mounted, injects the
//! files as a tar archive, starts it, streams its output, and reports the exit
//! code. The container is always cleaned up, including when the process is
//! interrupted.
//!
//! ## Key Components
//!
//! - [`archive`]: tar packing of injected files
//! - [`descriptor`]: TOML build environment descriptor
//! - [`client`]: `ContainerClient` trait, the seam to the container runtime
//! - [`docker`]: Docker Engine client
//! - [`fakes`]: in-memory client for tests
//! - [`guard`]: cleanup policy, single-flight cleanup guard, signal listener
//! - [`orchestrator`]: the build lifecycle

pub mod archive;
pub mod client;
pub mod descriptor;
pub mod docker;
mod error;
pub mod fakes;
pub mod guard;
pub mod orchestrator;
pub mod telemetry;

pub use archive::{build_archive, ArchiveError};
pub use client::{
    BindMount, ClientError, ClientResult, ContainerClient, LogStream, RemoveOptions, UnitConfig,
    UnitId, UnitState,
};
pub use descriptor::{BuildEnvironmentSpec, DescriptorError, FileEntry};
pub use docker::DockerClient;
pub use error::{BuildError, BuildResult, ErrorKind};
pub use guard::{spawn_signal_listener, CleanupPolicy, Released, UnitGuard};
pub use orchestrator::{BuildRequest, ContainerOrchestrator, HostBindings, OutcomeReport};
pub use telemetry::init_tracing;

pub use tokio_util::sync::CancellationToken;
