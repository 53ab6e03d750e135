//! Build orchestration: drives one container from creation to cleanup.
//!
//! Lifecycle of [`ContainerOrchestrator::run_build`]:
//!
//! ```text
//! resolve dirs → create → inject files → start → stream logs → inspect → cleanup
//! ```
//!
//! Everything after creation races the cancellation token. Whichever way the
//! build ends, the container goes through [`UnitGuard::release`] exactly once
//! before `run_build` returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::build_archive;
use crate::client::{BindMount, ContainerClient, UnitConfig, UnitId};
use crate::descriptor::BuildEnvironmentSpec;
use crate::error::{BuildError, BuildResult};
use crate::guard::{CleanupPolicy, UnitGuard};

/// Mount point of the source directory inside the container.
pub const SOURCE_MOUNT: &str = "/source";
/// Mount point of the result directory inside the container.
pub const RESULT_MOUNT: &str = "/result";
/// Mount point of the cache directory inside the container.
pub const CACHE_MOUNT: &str = "/cache";
/// Where the files archive is extracted.
pub const INJECT_TARGET: &str = "/";

/// Host directories shared with the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBindings {
    pub source: PathBuf,
    pub result: PathBuf,
    pub cache: PathBuf,
}

impl HostBindings {
    pub fn new(
        source: impl Into<PathBuf>,
        result: impl Into<PathBuf>,
        cache: impl Into<PathBuf>,
    ) -> Self {
        HostBindings {
            source: source.into(),
            result: result.into(),
            cache: cache.into(),
        }
    }

    /// Make every path absolute and create the result and cache directories.
    ///
    /// The source directory is used as-is; it is not created.
    pub async fn resolve(&self) -> BuildResult<HostBindings> {
        let resolved = HostBindings {
            source: absolute("source", &self.source)?,
            result: absolute("result", &self.result)?,
            cache: absolute("cache", &self.cache)?,
        };

        for (binding, dir) in [("result", &resolved.result), ("cache", &resolved.cache)] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| BuildError::DirectoryCreate {
                    binding,
                    path: dir.clone(),
                    source,
                })?;
        }

        Ok(resolved)
    }

    /// Bind mounts for the container, in source/result/cache order.
    pub fn mounts(&self) -> Vec<BindMount> {
        vec![
            BindMount::new(&self.source, SOURCE_MOUNT),
            BindMount::new(&self.result, RESULT_MOUNT),
            BindMount::new(&self.cache, CACHE_MOUNT),
        ]
    }
}

fn absolute(binding: &'static str, path: &Path) -> BuildResult<PathBuf> {
    std::path::absolute(path).map_err(|source| BuildError::PathResolution {
        binding,
        path: path.to_path_buf(),
        source,
    })
}

/// Everything [`ContainerOrchestrator::run_build`] needs for one build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub spec: BuildEnvironmentSpec,
    pub bindings: HostBindings,
    /// Arguments passed to the build command
    pub build_args: Vec<String>,
    pub cleanup: CleanupPolicy,
}

/// Result of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeReport {
    pub exit_code: i64,
    pub success: bool,
}

impl OutcomeReport {
    pub fn from_exit_code(exit_code: i64) -> Self {
        OutcomeReport {
            exit_code,
            success: exit_code == 0,
        }
    }
}

/// Runs builds against an execution environment client.
pub struct ContainerOrchestrator {
    client: Arc<dyn ContainerClient>,
}

impl ContainerOrchestrator {
    pub fn new(client: Arc<dyn ContainerClient>) -> Self {
        ContainerOrchestrator { client }
    }

    /// Run one build, copying the container's output to `out`.
    ///
    /// Returns an error for any failed step, for a non-zero exit code
    /// ([`BuildError::NonZeroExit`]), or when `cancel` fires
    /// ([`BuildError::Interrupted`]). A failed cleanup is logged and never
    /// replaces the build's own result.
    pub async fn run_build<W>(
        &self,
        request: &BuildRequest,
        cancel: CancellationToken,
        out: &mut W,
    ) -> BuildResult<OutcomeReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if cancel.is_cancelled() {
            return Err(BuildError::Interrupted { unit: None });
        }

        let bindings = request.bindings.resolve().await?;
        let config = UnitConfig {
            image: request.spec.base_image().to_string(),
            entrypoint: vec![request.spec.build_cmd().to_string()],
            args: request.build_args.clone(),
            binds: bindings.mounts(),
            tty: true,
        };

        let unit = self
            .client
            .create_unit(&config)
            .await
            .map_err(|source| BuildError::UnitCreate {
                image: config.image.clone(),
                source,
            })?;
        info!(container = %unit, image = %config.image, "Created container");

        let guard = UnitGuard::new(self.client.clone(), unit.clone(), request.cleanup);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(container = %unit, "Build interrupted");
                Err(BuildError::Interrupted { unit: Some(unit.clone()) })
            }
            outcome = self.drive(&unit, &request.spec, out) => outcome,
        };

        if let Err(err) = guard.release().await {
            warn!(error = %err, "Container cleanup failed");
        }

        outcome
    }

    /// Steps between creation and cleanup.
    async fn drive<W>(
        &self,
        unit: &UnitId,
        spec: &BuildEnvironmentSpec,
        out: &mut W,
    ) -> BuildResult<OutcomeReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let archive =
            build_archive(spec.files()).map_err(|source| BuildError::ArchiveBuild { source })?;
        let archive_len = archive.len();
        self.client
            .copy_archive(unit, INJECT_TARGET, archive)
            .await
            .map_err(|source| BuildError::FileInjection {
                unit: unit.clone(),
                source,
            })?;
        debug!(
            container = %unit,
            files = spec.files().len(),
            bytes = archive_len,
            "Injected files"
        );

        self.client
            .start_unit(unit)
            .await
            .map_err(|source| BuildError::UnitStart {
                unit: unit.clone(),
                source,
            })?;
        info!(container = %unit, "Started container");

        self.copy_logs(unit, out).await?;

        let state = self
            .client
            .inspect_unit(unit)
            .await
            .map_err(|source| BuildError::UnitInspect {
                unit: unit.clone(),
                source,
            })?;
        info!(container = %unit, exit_code = state.exit_code, "Container exited");

        if state.exit_code != 0 {
            return Err(BuildError::NonZeroExit {
                code: state.exit_code,
            });
        }
        Ok(OutcomeReport::from_exit_code(state.exit_code))
    }

    async fn copy_logs<W>(&self, unit: &UnitId, out: &mut W) -> BuildResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut logs =
            self.client
                .stream_logs(unit)
                .await
                .map_err(|source| BuildError::LogStream {
                    unit: unit.clone(),
                    source,
                })?;

        let mut copied = 0usize;
        while let Some(chunk) = logs.next().await {
            let chunk = chunk.map_err(|source| BuildError::LogStream {
                unit: unit.clone(),
                source,
            })?;
            out.write_all(&chunk)
                .await
                .map_err(|source| BuildError::LogOutput { source })?;
            out.flush()
                .await
                .map_err(|source| BuildError::LogOutput { source })?;
            copied += chunk.len();
        }

        debug!(container = %unit, bytes = copied, "Log stream ended");
        Ok(())
    }
}
