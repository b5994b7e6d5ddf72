use std::path::PathBuf;

/// The primary error type for all operations in the `mfutar` crate.
///
/// Matches the error kinds named by the archive subsystem design: `Io`,
/// `Format`, `Layout`, `Missing`, and `Unsupported`, plus a catch-all
/// `Other` for anything that doesn't fit those variants.
#[derive(Debug)]
pub enum ArchiverError {
    /// An I/O error occurred, typically while opening, seeking, reading,
    /// writing, truncating, or preallocating a file. Includes the path
    /// where the error happened, when known.
    Io { source: std::io::Error, path: PathBuf },

    /// An error occurred when trying to strip a prefix from a file path,
    /// or a path would escape the configured working directory.
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// The tar header codec failed to encode or decode an entry.
    Format(String),

    /// A layout computation could not be completed, typically because a
    /// header did not fit in the per-rank scratch buffer.
    Layout(String),

    /// No offset index is available for an archive (missing, truncated,
    /// or failing the size/digest checks) and the caller must fall back
    /// to scanning.
    Missing(String),

    /// The requested operation cannot be performed on this archive, e.g.
    /// extracting by index from a compressed stream.
    Unsupported(String),

    /// A wrapper for any other error that doesn't fit the specific variants.
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ArchiverError {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ArchiverError::Io { source, path: path.into() }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        ArchiverError::Format(msg.into())
    }

    pub fn layout(msg: impl Into<String>) -> Self {
        ArchiverError::Layout(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        ArchiverError::Missing(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        ArchiverError::Unsupported(msg.into())
    }
}

impl std::fmt::Display for ArchiverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiverError::Io { source, path } => {
                write!(f, "I/O error on path '{}': {}", path.display(), source)
            }
            ArchiverError::StripPrefix { prefix, path } => write!(
                f,
                "could not relativize path '{}' against '{}'",
                path.display(),
                prefix.display()
            ),
            ArchiverError::Format(msg) => write!(f, "header codec error: {}", msg),
            ArchiverError::Layout(msg) => write!(f, "layout error: {}", msg),
            ArchiverError::Missing(msg) => write!(f, "index unavailable: {}", msg),
            ArchiverError::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            ArchiverError::Other(e) => write!(f, "an unexpected error occurred: {}", e),
        }
    }
}

impl std::error::Error for ArchiverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiverError::Io { source, .. } => Some(source),
            ArchiverError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ArchiverError {
    fn from(err: std::io::Error) -> Self {
        ArchiverError::Io { source: err, path: PathBuf::new() }
    }
}

pub type Result<T> = std::result::Result<T, ArchiverError>;
