//! Build environment descriptor.
//!
//! A descriptor names the image to build in, the entrypoint to run, and the
//! files to inject before the container starts:
//!
//! ```toml
//! base_image = "alpine"
//! build_cmd = "/bin/sh"
//!
//! [[file]]
//! name = "build.sh"
//! mode = 0o755
//! content = "echo hi"
//! ```
//!
//! Validation happens during deserialization, so a [`BuildEnvironmentSpec`]
//! value always has a non-empty image and command.
//!
//! Descriptors written for the HCL-based 0.1 releases do not load as-is.
//! Each labelled block `file "build.sh" { mode = 0755 ... }` becomes a
//! `[[file]]` table with the label moved into `name`, and octal modes need
//! the `0o` prefix.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Mode applied to files that do not declare one.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Errors produced while loading a descriptor
#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `message` is the parser error flattened onto one line.
    #[error("invalid descriptor syntax: {message}")]
    Parse {
        message: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid build environment: {0}")]
    Invalid(String),
}

/// A file injected into the container before it starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileEntry {
    /// Path relative to the container's filesystem root
    pub name: String,
    /// Permission bits
    #[serde(default = "default_mode")]
    pub mode: u32,
    /// File body
    #[serde(default)]
    pub content: String,
}

fn default_mode() -> u32 {
    DEFAULT_FILE_MODE
}

impl FileEntry {
    pub fn new(name: impl Into<String>, mode: u32, content: impl Into<String>) -> Self {
        FileEntry {
            name: name.into(),
            mode,
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    base_image: String,
    build_cmd: String,
    #[serde(default, rename = "file")]
    files: Vec<FileEntry>,
}

/// Image, entrypoint, and files for one build.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawDescriptor")]
pub struct BuildEnvironmentSpec {
    base_image: String,
    build_cmd: String,
    files: Vec<FileEntry>,
}

impl TryFrom<RawDescriptor> for BuildEnvironmentSpec {
    type Error = DescriptorError;

    fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
        BuildEnvironmentSpec::new(raw.base_image, raw.build_cmd, raw.files)
    }
}

impl BuildEnvironmentSpec {
    /// Build a spec, rejecting an empty image or command.
    pub fn new(
        base_image: impl Into<String>,
        build_cmd: impl Into<String>,
        files: Vec<FileEntry>,
    ) -> Result<Self, DescriptorError> {
        let base_image = base_image.into();
        let build_cmd = build_cmd.into();

        if base_image.trim().is_empty() {
            return Err(DescriptorError::Invalid(
                "base_image must not be empty".to_string(),
            ));
        }
        if build_cmd.trim().is_empty() {
            return Err(DescriptorError::Invalid(
                "build_cmd must not be empty".to_string(),
            ));
        }

        Ok(BuildEnvironmentSpec {
            base_image,
            build_cmd,
            files,
        })
    }

    /// Parse a descriptor from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, DescriptorError> {
        toml::from_str(text).map_err(|source| DescriptorError::Parse {
            message: one_line(text, &source),
            source,
        })
    }

    /// Read and parse a descriptor file.
    pub fn from_path(path: &Path) -> Result<Self, DescriptorError> {
        let text = std::fs::read_to_string(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    pub fn build_cmd(&self) -> &str {
        &self.build_cmd
    }

    /// Files to inject, in declaration order.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }
}

/// Render a parser error as `line L, column C: reason`.
fn one_line(text: &str, err: &toml::de::Error) -> String {
    let reason = err
        .message()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    let Some(span) = err.span() else {
        return reason;
    };
    let before = text.get(..span.start).unwrap_or(text);
    let line = before.matches('\n').count() + 1;
    let column = before.len() - before.rfind('\n').map(|idx| idx + 1).unwrap_or(0) + 1;
    format!("line {line}, column {column}: {reason}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_descriptor_in_order() {
        let spec = BuildEnvironmentSpec::from_toml_str(
            r#"
base_image = "alpine"
build_cmd = "/bin/sh"

[[file]]
name = "build.sh"
mode = 0o755
content = "echo hi"

[[file]]
name = "etc/build.conf"
content = "jobs=4\n"
"#,
        )
        .unwrap();

        assert_eq!(spec.base_image(), "alpine");
        assert_eq!(spec.build_cmd(), "/bin/sh");
        assert_eq!(
            spec.files(),
            &[
                FileEntry::new("build.sh", 0o755, "echo hi"),
                FileEntry::new("etc/build.conf", DEFAULT_FILE_MODE, "jobs=4\n"),
            ]
        );
    }

    #[test]
    fn files_are_optional() {
        let spec =
            BuildEnvironmentSpec::from_toml_str("base_image = \"debian\"\nbuild_cmd = \"make\"\n")
                .unwrap();
        assert!(spec.files().is_empty());
    }

    #[test]
    fn decimal_mode_is_accepted() {
        let spec = BuildEnvironmentSpec::from_toml_str(
            "base_image = \"a\"\nbuild_cmd = \"b\"\n[[file]]\nname = \"x\"\nmode = 493\n",
        )
        .unwrap();
        assert_eq!(spec.files()[0].mode, 0o755);
    }

    #[test]
    fn empty_base_image_is_rejected() {
        let err =
            BuildEnvironmentSpec::from_toml_str("base_image = \"\"\nbuild_cmd = \"/bin/sh\"\n")
                .unwrap_err();
        assert!(err.to_string().contains("base_image"), "got: {err}");
    }

    #[test]
    fn empty_build_cmd_is_rejected() {
        let err = BuildEnvironmentSpec::new("alpine", "   ", Vec::new()).unwrap_err();
        assert!(matches!(err, DescriptorError::Invalid(_)));
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        let err = BuildEnvironmentSpec::from_toml_str("base_image = \"alpine\"\n").unwrap_err();
        assert!(matches!(err, DescriptorError::Parse { .. }));
    }

    #[test]
    fn syntax_error_is_reported_on_one_line() {
        let err = BuildEnvironmentSpec::from_toml_str("base_image = \"alpine\"\nbuild_cmd = \n")
            .unwrap_err();

        let text = err.to_string();
        assert!(matches!(err, DescriptorError::Parse { .. }));
        assert_eq!(text.lines().count(), 1, "{text}");
        assert!(text.contains("line 2, column 13"), "{text}");
    }

    #[test]
    fn module_example_parses() {
        let spec = BuildEnvironmentSpec::from_toml_str(
            "base_image = \"alpine\"\nbuild_cmd = \"/bin/sh\"\n\n[[file]]\nname = \"build.sh\"\nmode = 0o755\ncontent = \"echo hi\"\n",
        )
        .unwrap();
        assert_eq!(spec.files(), &[FileEntry::new("build.sh", 0o755, "echo hi")]);
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let err = BuildEnvironmentSpec::from_toml_str(
            "base_image = \"alpine\"\nbuild_cmd = \"sh\"\nbuild_command = \"sh\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, DescriptorError::Parse { .. }));
    }

    #[test]
    fn from_path_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        let err = BuildEnvironmentSpec::from_path(&missing).unwrap_err();
        match err {
            DescriptorError::Io { path, .. } => assert_eq!(path, missing),
            other => panic!("expected Io, got {:?}", other),
        }
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctbuild.toml");
        std::fs::write(&path, "base_image = \"alpine\"\nbuild_cmd = \"/bin/sh\"\n").unwrap();

        let spec = BuildEnvironmentSpec::from_path(&path).unwrap();
        assert_eq!(spec.base_image(), "alpine");
    }
}
