//! Artifact packaging
//!
//! Produces a deterministic tar archive of a file or directory so the same
//! inputs always yield the same digest:
//! - entries sorted by path
//! - mtime 0, uid/gid 0, empty user/group names
//! - mode 0o755 for directories and executables, 0o644 otherwise
//! - symlinks kept as links and rejected if they leave the source tree

pub mod documents;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use salsag_ledger::{digest, Digest, TrustError};
use tar::{Builder, EntryType, Header};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("source {0} does not exist")]
    MissingSource(PathBuf),

    #[error("symlink {path} points outside the source tree")]
    SymlinkEscapesRoot { path: PathBuf },

    #[error("package is {actual_bytes} bytes, limit is {limit_bytes}")]
    SizeExceeded { actual_bytes: u64, limit_bytes: u64 },
}

impl From<BundleError> for TrustError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::MissingSource(_) => TrustError::not_found(err.to_string()),
            other => TrustError::config(format!("cannot package: {}", other)),
        }
    }
}

/// A packaged artifact ready to be digested and signed.
#[derive(Debug, Clone)]
pub struct Package {
    /// Object key derived from the source name (`<name>.tar`).
    pub default_key: String,
    pub bytes: Vec<u8>,
    pub digest: Digest,
    pub entry_count: usize,
}

pub struct Packager {
    source: PathBuf,
    max_bytes: Option<u64>,
}

impl Packager {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            max_bytes: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Object key used when the caller does not supply one.
    pub fn default_key(&self) -> String {
        let name = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
            .collect();
        format!("{}.tar", sanitized.trim_start_matches('.'))
    }

    pub fn package(&self) -> Result<Package, BundleError> {
        let meta = fs::symlink_metadata(&self.source)
            .map_err(|_| BundleError::MissingSource(self.source.clone()))?;

        let mut buffer = Vec::new();
        let entry_count = {
            let mut builder = Builder::new(&mut buffer);
            let count = if meta.is_dir() {
                self.append_tree(&mut builder)?
            } else {
                let name = self
                    .source
                    .file_name()
                    .map(PathBuf::from)
                    .ok_or_else(|| BundleError::MissingSource(self.source.clone()))?;
                let contents = fs::read(&self.source)?;
                append_file(&mut builder, &name, &contents, is_executable(&self.source))?;
                1
            };
            builder.finish()?;
            count
        };

        let actual_bytes = buffer.len() as u64;
        if let Some(limit_bytes) = self.max_bytes {
            if actual_bytes > limit_bytes {
                return Err(BundleError::SizeExceeded {
                    actual_bytes,
                    limit_bytes,
                });
            }
        }

        Ok(Package {
            default_key: self.default_key(),
            digest: digest(&buffer),
            bytes: buffer,
            entry_count,
        })
    }

    fn append_tree<W: io::Write>(&self, builder: &mut Builder<W>) -> Result<usize, BundleError> {
        let root = self.source.canonicalize()?;
        let mut count = 0;

        for entry in WalkDir::new(&self.source)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            let path = entry.path();
            let rel = match path.strip_prefix(&self.source) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel,
                _ => continue,
            };
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let target = fs::read_link(path)?;
                let resolved = path.parent().unwrap_or(path).join(&target);
                let canonical = resolved.canonicalize().unwrap_or(resolved);
                if !canonical.starts_with(&root) {
                    return Err(BundleError::SymlinkEscapesRoot {
                        path: path.to_path_buf(),
                    });
                }
                let mut header = canonical_header(EntryType::Symlink, 0o777, 0);
                header.set_path(rel)?;
                header.set_link_name(&target)?;
                header.set_cksum();
                builder.append(&header, io::empty())?;
            } else if file_type.is_dir() {
                let mut header = canonical_header(EntryType::Directory, 0o755, 0);
                header.set_path(format!("{}/", rel.display()))?;
                header.set_cksum();
                builder.append(&header, io::empty())?;
            } else {
                let contents = fs::read(path)?;
                append_file(builder, rel, &contents, is_executable(path))?;
            }
            count += 1;
        }
        Ok(count)
    }
}

fn canonical_header(kind: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn append_file<W: io::Write>(
    builder: &mut Builder<W>,
    path: &Path,
    contents: &[u8],
    executable: bool,
) -> Result<(), BundleError> {
    let mode = if executable { 0o755 } else { 0o644 };
    let mut header = canonical_header(EntryType::Regular, mode, contents.len() as u64);
    header.set_path(path)?;
    header.set_cksum();
    builder.append(&header, contents)?;
    Ok(())
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = fs::metadata(path) {
            return meta.permissions().mode() & 0o111 != 0;
        }
    }
    false
}
