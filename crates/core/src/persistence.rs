//! Zone layout persistence
//!
//! A document's zones are saved as a JSON array of flat zone records in a
//! sidecar file next to the PDF.

use crate::zone::Zone;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize zone layout: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("invalid zone layout in {}: {source}", path.display())]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Sidecar path for a PDF
///
/// ```
/// use std::path::Path;
/// use zonemark_core::persistence::layout_path;
///
/// assert_eq!(
///     layout_path(Path::new("/docs/report.pdf")),
///     Path::new("/docs/report.pdf.zones.json")
/// );
/// ```
pub fn layout_path(pdf_path: &Path) -> PathBuf {
    let mut path = pdf_path.as_os_str().to_owned();
    path.push(".zones.json");
    PathBuf::from(path)
}

/// Write `zones` to `path`, replacing the file atomically
pub fn save_layout<'a, I>(path: &Path, zones: I) -> PersistenceResult<()>
where
    I: IntoIterator<Item = &'a Zone>,
{
    let zones: Vec<&Zone> = zones.into_iter().collect();
    let json = serde_json::to_vec_pretty(&zones).map_err(PersistenceError::Serialize)?;

    let io_error = |source| PersistenceError::Io { path: path.to_owned(), source };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(io_error)?;
    file.write_all(&json).map_err(io_error)?;
    file.as_file().sync_all().map_err(io_error)?;
    file.persist(path).map_err(|err| io_error(err.error))?;

    tracing::debug!(path = %path.display(), zones = zones.len(), "layout saved");
    Ok(())
}

pub fn load_layout(path: &Path) -> PersistenceResult<Vec<Zone>> {
    let json = fs::read(path).map_err(|source| PersistenceError::Io { path: path.to_owned(), source })?;
    serde_json::from_slice(&json)
        .map_err(|source| PersistenceError::Deserialize { path: path.to_owned(), source })
}

/// Saved layout for a PDF, if its sidecar exists
pub fn load_layout_for(pdf_path: &Path) -> PersistenceResult<Option<Vec<Zone>>> {
    let path = layout_path(pdf_path);
    if !path.exists() {
        return Ok(None);
    }
    load_layout(&path).map(Some)
}

pub fn layout_exists(pdf_path: &Path) -> bool {
    layout_path(pdf_path).exists()
}

pub fn delete_layout(pdf_path: &Path) -> PersistenceResult<()> {
    let path = layout_path(pdf_path);
    if path.exists() {
        fs::remove_file(&path).map_err(|source| PersistenceError::Io { path, source })?;
    }
    Ok(())
}
