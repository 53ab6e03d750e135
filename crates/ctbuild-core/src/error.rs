//! Error types for ctbuild builds

use std::path::PathBuf;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::client::{ClientError, UnitId};
use crate::descriptor::DescriptorError;

/// Failure category of a [`BuildError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigParse,
    PathResolution,
    DirectoryCreate,
    UnitCreate,
    FileInjection,
    UnitStart,
    LogStream,
    UnitInspect,
    NonZeroExit,
    Cleanup,
    Interrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigParse => "config parse error",
            ErrorKind::PathResolution => "path resolution error",
            ErrorKind::DirectoryCreate => "directory create error",
            ErrorKind::UnitCreate => "container create error",
            ErrorKind::FileInjection => "file injection error",
            ErrorKind::UnitStart => "container start error",
            ErrorKind::LogStream => "log stream error",
            ErrorKind::UnitInspect => "container inspect error",
            ErrorKind::NonZeroExit => "build failed",
            ErrorKind::Cleanup => "cleanup error",
            ErrorKind::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while running a build
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to parse build env config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: DescriptorError,
    },

    #[error("failed to resolve {binding} directory {}: {source}", path.display())]
    PathResolution {
        binding: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create {binding} directory {}: {source}", path.display())]
    DirectoryCreate {
        binding: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create container from image {image}: {source}")]
    UnitCreate {
        image: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to create files archive: {source}")]
    ArchiveBuild {
        #[source]
        source: ArchiveError,
    },

    #[error("failed to write files to container {unit}: {source}")]
    FileInjection {
        unit: UnitId,
        #[source]
        source: ClientError,
    },

    #[error("failed to start container {unit}: {source}")]
    UnitStart {
        unit: UnitId,
        #[source]
        source: ClientError,
    },

    #[error("failed to read logs of container {unit}: {source}")]
    LogStream {
        unit: UnitId,
        #[source]
        source: ClientError,
    },

    #[error("failed to copy container output: {source}")]
    LogOutput {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to inspect container {unit}: {source}")]
    UnitInspect {
        unit: UnitId,
        #[source]
        source: ClientError,
    },

    #[error("container exited with code {code}")]
    NonZeroExit { code: i64 },

    #[error("failed to clean up container {unit}: {source}")]
    Cleanup {
        unit: UnitId,
        #[source]
        source: ClientError,
    },

    #[error("build interrupted")]
    Interrupted { unit: Option<UnitId> },
}

impl BuildError {
    /// The taxonomy entry this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::ConfigParse { .. } => ErrorKind::ConfigParse,
            BuildError::PathResolution { .. } => ErrorKind::PathResolution,
            BuildError::DirectoryCreate { .. } => ErrorKind::DirectoryCreate,
            BuildError::UnitCreate { .. } => ErrorKind::UnitCreate,
            BuildError::ArchiveBuild { .. } | BuildError::FileInjection { .. } => {
                ErrorKind::FileInjection
            }
            BuildError::UnitStart { .. } => ErrorKind::UnitStart,
            BuildError::LogStream { .. } | BuildError::LogOutput { .. } => ErrorKind::LogStream,
            BuildError::UnitInspect { .. } => ErrorKind::UnitInspect,
            BuildError::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            BuildError::Cleanup { .. } => ErrorKind::Cleanup,
            BuildError::Interrupted { .. } => ErrorKind::Interrupted,
        }
    }

    /// Exit code of the build program, if that is why the build failed.
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            BuildError::NonZeroExit { code } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for build operations
pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_and_copy_failures_share_a_kind() {
        let archive = BuildError::ArchiveBuild {
            source: ArchiveError::Finish {
                source: std::io::Error::other("disk full"),
            },
        };
        let copy = BuildError::FileInjection {
            unit: UnitId::new("abc"),
            source: ClientError::Api("no space".into()),
        };

        assert_eq!(archive.kind(), ErrorKind::FileInjection);
        assert_eq!(copy.kind(), ErrorKind::FileInjection);
    }

    #[test]
    fn message_carries_context_and_cause() {
        let err = BuildError::UnitStart {
            unit: UnitId::new("0123456789abcdef"),
            source: ClientError::Api("image has no shell".into()),
        };

        let text = err.to_string();
        assert!(text.contains("failed to start container 0123456789ab"), "{text}");
        assert!(text.contains("image has no shell"), "{text}");
    }

    #[test]
    fn non_zero_exit_carries_code() {
        let err = BuildError::NonZeroExit { code: 2 };
        assert_eq!(err.kind(), ErrorKind::NonZeroExit);
        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(err.to_string(), "container exited with code 2");
    }

    #[test]
    fn kind_display_names() {
        assert_eq!(ErrorKind::UnitCreate.to_string(), "container create error");
        assert_eq!(ErrorKind::Interrupted.to_string(), "interrupted");
    }
}
