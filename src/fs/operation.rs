//! File operations and their execution.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Default chunk size of streaming operations.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// A filesystem operation queued on a [`FileSource`](super::FileSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOp {
    /// Read the whole file.
    Read(PathBuf),
    /// Create or truncate the file and write `data`.
    Write {
        /// Target file.
        path: PathBuf,
        /// Bytes to write.
        data: Vec<u8>,
    },
    /// Append `data`, creating the file if needed.
    Append {
        /// Target file.
        path: PathBuf,
        /// Bytes to append.
        data: Vec<u8>,
    },
    /// Remove a file.
    Delete(PathBuf),
    /// Check whether a path exists.
    Exists(PathBuf),
    /// Read metadata.
    Stat(PathBuf),
    /// Create a directory.
    CreateDir {
        /// Directory to create.
        path: PathBuf,
        /// Also create missing parents.
        recursive: bool,
    },
    /// Remove an empty directory.
    RemoveDir(PathBuf),
    /// Copy a file.
    Copy {
        /// Source file.
        from: PathBuf,
        /// Destination file, created or truncated.
        to: PathBuf,
    },
    /// Rename or move a path.
    Rename {
        /// Current path.
        from: PathBuf,
        /// New path.
        to: PathBuf,
    },
}

impl FileOp {
    /// Reads `path`.
    pub fn read(path: impl Into<PathBuf>) -> Self {
        Self::Read(path.into())
    }

    /// Writes `data` to `path`.
    pub fn write(path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self::Write {
            path: path.into(),
            data: data.into(),
        }
    }

    /// Appends `data` to `path`.
    pub fn append(path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self::Append {
            path: path.into(),
            data: data.into(),
        }
    }

    /// Copies `from` to `to`.
    pub fn copy(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::Copy {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Renames `from` to `to`.
    pub fn rename(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::Rename {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Short lower-case name of the operation.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Read(_) => "read",
            Self::Write { .. } => "write",
            Self::Append { .. } => "append",
            Self::Delete(_) => "delete",
            Self::Exists(_) => "exists",
            Self::Stat(_) => "stat",
            Self::CreateDir { .. } => "create_dir",
            Self::RemoveDir(_) => "remove_dir",
            Self::Copy { .. } => "copy",
            Self::Rename { .. } => "rename",
        }
    }

    /// True for operations that can move data chunk by chunk.
    #[must_use]
    pub const fn is_streamable(&self) -> bool {
        matches!(self, Self::Read(_) | Self::Write { .. } | Self::Copy { .. })
    }

    /// The path the operation acts on (the source for copy and rename).
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Read(path)
            | Self::Delete(path)
            | Self::Exists(path)
            | Self::Stat(path)
            | Self::RemoveDir(path)
            | Self::Write { path, .. }
            | Self::Append { path, .. }
            | Self::CreateDir { path, .. } => path,
            Self::Copy { from, .. } | Self::Rename { from, .. } => from,
        }
    }
}

/// Options of one submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOpOptions {
    /// Move data one chunk per poll instead of all at once. Only read, write
    /// and copy stream; other operations ignore this.
    pub streaming: bool,
    /// Bytes moved per poll when streaming. Zero is treated as one.
    pub chunk_size: usize,
    /// Create missing parent directories before writing.
    pub create_dirs: bool,
}

impl Default for FileOpOptions {
    fn default() -> Self {
        Self {
            streaming: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            create_dirs: false,
        }
    }
}

impl FileOpOptions {
    /// Streaming options with the default chunk size.
    #[must_use]
    pub fn streaming() -> Self {
        Self {
            streaming: true,
            ..Self::default()
        }
    }

    /// Sets the chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Creates missing parent directories before writing.
    #[must_use]
    pub const fn with_create_dirs(mut self) -> Self {
        self.create_dirs = true;
        self
    }
}

/// Metadata returned by [`FileOp::Stat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStat {
    /// Length in bytes.
    pub size: u64,
    /// Last modification time, where the platform records one.
    pub modified: Option<SystemTime>,
    /// Regular file.
    pub is_file: bool,
    /// Directory.
    pub is_dir: bool,
    /// Write permission is missing.
    pub readonly: bool,
}

impl From<fs::Metadata> for FileStat {
    fn from(meta: fs::Metadata) -> Self {
        Self {
            size: meta.len(),
            modified: meta.modified().ok(),
            is_file: meta.is_file(),
            is_dir: meta.is_dir(),
            readonly: meta.permissions().readonly(),
        }
    }
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutput {
    /// Contents of a read.
    Bytes(Vec<u8>),
    /// Bytes written by a write, append or copy.
    Written(u64),
    /// Answer of an exists check.
    Exists(bool),
    /// Metadata of a stat.
    Stat(FileStat),
    /// Delete, directory and rename operations.
    Done,
}

impl FileOutput {
    /// The bytes of a read.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

fn prepare_parent(path: &Path, options: FileOpOptions) -> io::Result<()> {
    if options.create_dirs {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn write_len(data: &[u8]) -> u64 {
    u64::try_from(data.len()).unwrap_or(u64::MAX)
}

/// Runs a non-streaming operation to completion.
pub(crate) fn execute(op: &FileOp, options: FileOpOptions) -> io::Result<FileOutput> {
    match op {
        FileOp::Read(path) => fs::read(path).map(FileOutput::Bytes),
        FileOp::Write { path, data } => {
            prepare_parent(path, options)?;
            fs::write(path, data)?;
            Ok(FileOutput::Written(write_len(data)))
        }
        FileOp::Append { path, data } => {
            prepare_parent(path, options)?;
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(data)?;
            Ok(FileOutput::Written(write_len(data)))
        }
        FileOp::Delete(path) => fs::remove_file(path).map(|()| FileOutput::Done),
        FileOp::Exists(path) => path.try_exists().map(FileOutput::Exists),
        FileOp::Stat(path) => fs::metadata(path).map(|meta| FileOutput::Stat(meta.into())),
        FileOp::CreateDir { path, recursive } => {
            if *recursive {
                fs::create_dir_all(path)?;
            } else {
                fs::create_dir(path)?;
            }
            Ok(FileOutput::Done)
        }
        FileOp::RemoveDir(path) => fs::remove_dir(path).map(|()| FileOutput::Done),
        FileOp::Copy { from, to } => {
            prepare_parent(to, options)?;
            fs::copy(from, to).map(FileOutput::Written)
        }
        FileOp::Rename { from, to } => fs::rename(from, to).map(|()| FileOutput::Done),
    }
}

/// An operation that moves one chunk per step.
pub(crate) struct Transfer {
    kind: TransferKind,
    chunk: Vec<u8>,
}

enum TransferKind {
    Read { file: File, out: Vec<u8> },
    Write { file: File, data: Vec<u8>, offset: usize },
    Copy { from: File, to: File, copied: u64 },
}

impl Transfer {
    /// Opens the files of a streamable operation.
    pub(crate) fn open(op: FileOp, options: FileOpOptions) -> io::Result<Self> {
        let kind = match op {
            FileOp::Read(path) => TransferKind::Read {
                file: File::open(path)?,
                out: Vec::new(),
            },
            FileOp::Write { path, data } => {
                prepare_parent(&path, options)?;
                TransferKind::Write {
                    file: File::create(path)?,
                    data,
                    offset: 0,
                }
            }
            FileOp::Copy { from, to } => {
                let from = File::open(from)?;
                prepare_parent(&to, options)?;
                TransferKind::Copy {
                    from,
                    to: File::create(to)?,
                    copied: 0,
                }
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} cannot be streamed", other.name()),
                ));
            }
        };
        Ok(Self {
            kind,
            chunk: vec![0; options.chunk_size.max(1)],
        })
    }

    /// Moves one chunk. Returns the output once the transfer is complete.
    pub(crate) fn step(&mut self) -> io::Result<Option<FileOutput>> {
        match &mut self.kind {
            TransferKind::Read { file, out } => {
                let n = file.read(&mut self.chunk)?;
                if n == 0 {
                    return Ok(Some(FileOutput::Bytes(std::mem::take(out))));
                }
                out.extend_from_slice(&self.chunk[..n]);
                Ok(None)
            }
            TransferKind::Write { file, data, offset } => {
                let end = (*offset + self.chunk.len()).min(data.len());
                file.write_all(&data[*offset..end])?;
                *offset = end;
                if *offset == data.len() {
                    file.flush()?;
                    return Ok(Some(FileOutput::Written(write_len(data))));
                }
                Ok(None)
            }
            TransferKind::Copy { from, to, copied } => {
                let n = from.read(&mut self.chunk)?;
                if n == 0 {
                    to.flush()?;
                    return Ok(Some(FileOutput::Written(*copied)));
                }
                to.write_all(&self.chunk[..n])?;
                *copied += n as u64;
                Ok(None)
            }
        }
    }
}
