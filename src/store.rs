//! Filesystem collaborators for transfer sessions.
//!
//! Holds the storage root served by the server, file name sanitization, disk
//! space probing and the [`PartialFile`] guard used by both peers to write a
//! destination file that disappears unless it is explicitly persisted.
//!
//! Uploads into a [`FileStore`] are written under a staging directory and only
//! linked into the root once persisted, so a reader never sees a file that is
//! still being received.
use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};

/// Directory under the store root holding uploads in progress.
pub const STAGING_DIR: &str = ".incoming";

/// Capability answering how many bytes may still be written under a path.
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Queries the filesystem holding the path.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskSpace;

impl SpaceProbe for DiskSpace {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

impl<F> SpaceProbe for F
where
    F: Fn(&Path) -> io::Result<u64> + Send + Sync,
{
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        self(path)
    }
}

/// Strips every directory component from a peer supplied name.
///
/// Returns `None` when nothing usable is left (`""`, `.`, `..`, `/`, ...).
pub fn base_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

pub fn ensure_directory(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Directory that stored files live in.
pub struct FileStore {
    root: PathBuf,
    staging: PathBuf,
    probe: Box<dyn SpaceProbe>,
}

impl FileStore {
    /// Opens a store backed by the real disk, creating `root` if needed.
    pub fn open(root: PathBuf) -> io::Result<Self> {
        Self::with_probe(root, DiskSpace)
    }

    pub fn with_probe<P: SpaceProbe + 'static>(root: PathBuf, probe: P) -> io::Result<Self> {
        let staging = root.join(STAGING_DIR);
        ensure_directory(&staging)?;

        // leftovers of uploads interrupted by a previous run
        for entry in fs::read_dir(&staging)? {
            let path = entry?.path();
            match fs::remove_file(&path) {
                Ok(()) => warn!("discarded stale upload {}", path.display()),
                Err(e) => warn!("failed to discard {}: {e}", path.display()),
            }
        }

        Ok(Self {
            root,
            staging,
            probe: Box::new(probe),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn available_bytes(&self) -> io::Result<u64> {
        self.probe.available_bytes(&self.root)
    }

    /// Path of an already sanitized name inside the store.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Starts an upload of `name`.
    ///
    /// Fails with `AlreadyExists` if `name` is stored or already being
    /// uploaded. The returned file becomes visible at `name` only once
    /// persisted.
    pub fn create(&self, name: &str) -> io::Result<PartialFile> {
        let target = self.path(name);
        if fs::symlink_metadata(&target).is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            ));
        }
        PartialFile::staged(self.staging.join(name), target)
    }

    pub fn open_file(&self, name: &str) -> io::Result<File> {
        File::open(self.path(name))
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore").field("root", &self.root).finish()
    }
}

/// A freshly created file that is removed on drop unless persisted.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    target: Option<PathBuf>,
    file: Option<File>,
    kept: bool,
}

impl PartialFile {
    /// Creates `path` with exclusive-create semantics.
    pub fn create(path: PathBuf) -> io::Result<Self> {
        Self::open(path, None)
    }

    /// Creates `path` exclusively; persisting links it to `target`.
    pub fn staged(path: PathBuf, target: PathBuf) -> io::Result<Self> {
        Self::open(path, Some(target))
    }

    fn open(path: PathBuf, target: Option<PathBuf>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        debug!("created {}", path.display());

        Ok(Self {
            path,
            target,
            file: Some(file),
            kept: false,
        })
    }

    /// Flushes the file to disk and keeps it, returning its final path.
    ///
    /// A staged file is hard linked to its target, which fails if the target
    /// appeared in the meantime; the staged copy is removed either way.
    pub fn persist(mut self) -> io::Result<PathBuf> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }

        let Some(target) = self.target.take() else {
            self.kept = true;
            return Ok(self.path.clone());
        };
        fs::hard_link(&self.path, &target)?;
        debug!("published {}", target.display());
        Ok(target)
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("partial file already closed"))
    }
}

impl Write for PartialFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        // close before unlinking
        drop(self.file.take());
        if self.kept {
            return;
        }

        match fs::remove_file(&self.path) {
            Ok(()) => debug!("removed partial file {}", self.path.display()),
            Err(e) => warn!("failed to remove {}: {e}", self.path.display()),
        }
    }
}
