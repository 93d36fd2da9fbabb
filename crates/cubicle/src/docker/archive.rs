//! Single-file tar archives for the container archive endpoint
//!
//! `PUT /containers/{id}/archive` only accepts tar bodies, so source code is
//! wrapped in a one-entry archive before upload.

use std::io::{Cursor, Read};
use std::time::{SystemTime, UNIX_EPOCH};

use tar::{Archive, Builder, EntryType, Header};

use crate::docker::DockerError;

/// Permissions of injected files
const FILE_MODE: u32 = 0o644;

/// Reject names that would escape the destination directory
fn validate_name(name: &str) -> Result<(), DockerError> {
    if name.is_empty() || name.contains('/') || name.contains("..") || name.contains('\0') {
        return Err(DockerError::InvalidPath(format!(
            "archive entry must be a plain file name: {name:?}"
        )));
    }
    Ok(())
}

/// Pack `content` as a single regular file called `name`
pub fn pack_file(name: &str, content: &[u8]) -> Result<Vec<u8>, DockerError> {
    validate_name(name)?;

    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(FILE_MODE);
    header.set_mtime(mtime);

    let mut builder = Builder::new(Vec::with_capacity(content.len() + 2048));
    builder
        .append_data(&mut header, name, content)
        .map_err(DockerError::Archive)?;
    builder.into_inner().map_err(DockerError::Archive)
}

/// Read back the first entry of an archive as `(name, content)`
pub fn unpack_file(archive: &[u8]) -> Result<(String, Vec<u8>), DockerError> {
    let mut archive = Archive::new(Cursor::new(archive));
    let mut entries = archive.entries().map_err(DockerError::Archive)?;

    let mut entry = entries
        .next()
        .ok_or_else(|| {
            DockerError::Archive(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "archive has no entries",
            ))
        })?
        .map_err(DockerError::Archive)?;

    let name = entry
        .path()
        .map_err(DockerError::Archive)?
        .to_string_lossy()
        .into_owned();
    let mut content = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut content)
        .map_err(DockerError::Archive)?;

    Ok((name, content))
}
