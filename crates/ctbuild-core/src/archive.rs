//! Tar archive of the files injected into a build container.

use std::time::{SystemTime, UNIX_EPOCH};

use tar::{Builder, EntryType, Header};
use thiserror::Error;
use tracing::debug;

use crate::descriptor::FileEntry;

/// Errors produced while writing the archive
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to write tar entry {name}: {source}")]
    Entry {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to close tar archive: {source}")]
    Finish {
        #[source]
        source: std::io::Error,
    },
}

/// Pack `files` into an in-memory tar archive, preserving order.
///
/// Each entry is a regular file owned by root with the declared mode and a
/// size equal to the content's byte length. An empty slice yields the
/// end-of-archive marker only.
pub fn build_archive(files: &[FileEntry]) -> Result<Vec<u8>, ArchiveError> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut builder = Builder::new(Vec::new());
    for file in files {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(file.mode);
        header.set_size(file.content.len() as u64);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(mtime);

        builder
            .append_data(&mut header, &file.name, file.content.as_bytes())
            .map_err(|source| ArchiveError::Entry {
                name: file.name.clone(),
                source,
            })?;
    }

    let bytes = builder
        .into_inner()
        .map_err(|source| ArchiveError::Finish { source })?;

    debug!(entries = files.len(), bytes = bytes.len(), "Built files archive");
    Ok(bytes)
}
