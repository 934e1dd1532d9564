use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
};

/// The filesystem call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOperation {
    Open,
    Seek,
    Read,
    Remove,
    CreateDir,
}

impl fmt::Display for FsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            FsOperation::Open => "open",
            FsOperation::Seek => "seek in",
            FsOperation::Read => "read",
            FsOperation::Remove => "remove",
            FsOperation::CreateDir => "create directory",
        };
        f.write_str(verb)
    }
}

#[derive(Debug)]
pub enum FileSystemError {
    /// An I/O call on `path` failed.
    Io {
        operation: FsOperation,
        path: PathBuf,
        source: io::Error,
    },

    /// `path` exists but a directory was required.
    NotADirectory(PathBuf),

    /// The symlink `link` pointing to `target` couldn't be created.
    LinkFailed {
        link: PathBuf,
        target: PathBuf,
        source: io::Error,
    },
}

impl FileSystemError {
    pub(crate) fn io(operation: FsOperation, path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| {
            FileSystemError::Io {
                operation,
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// The path the error is about; the link itself for symlink failures.
    pub fn path(&self) -> &Path {
        match self {
            FileSystemError::Io { path, .. } | FileSystemError::NotADirectory(path) => path,
            FileSystemError::LinkFailed { link, .. } => link,
        }
    }

    /// Consumes the error, returning the underlying I/O error if there is one.
    pub fn into_io_error(self) -> Option<io::Error> {
        match self {
            FileSystemError::Io { source, .. } | FileSystemError::LinkFailed { source, .. } => {
                Some(source)
            }
            FileSystemError::NotADirectory(_) => None,
        }
    }
}

impl fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSystemError::Io {
                operation,
                path,
                source,
            } => write!(f, "cannot {operation} `{}`: {source}", path.display()),
            FileSystemError::NotADirectory(path) => {
                write!(f, "`{}` exists and is not a directory", path.display())
            }
            FileSystemError::LinkFailed {
                link,
                target,
                source,
            } => {
                write!(
                    f,
                    "cannot link `{}` to `{}`: {source}",
                    link.display(),
                    target.display()
                )
            }
        }
    }
}

impl Error for FileSystemError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FileSystemError::Io { source, .. } | FileSystemError::LinkFailed { source, .. } => {
                Some(source)
            }
            FileSystemError::NotADirectory(_) => None,
        }
    }
}

pub type FileSystemResult<T> = std::result::Result<T, FileSystemError>;
