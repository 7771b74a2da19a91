//! Input staging: copy the caller's file into a private temporary copy.
//!
//! Backends get a path the pipeline owns, never the caller's original, so a
//! backend that writes next to its input or holds the file open cannot touch
//! user data. The copy keeps the original extension because several backends
//! dispatch on it.
//!
//! Copying happens in bounded chunks with a token check before each one. A
//! cancelled copy deletes its partial file before returning.

use crate::cancel::CancellationToken;
use crate::error::MarkitError;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

/// Prefix of every staged input file name.
pub const STAGED_PREFIX: &str = "markit-input-";

/// Result of a staging attempt.
#[derive(Debug)]
pub enum Staging {
    Staged(StagedInput),
    Cancelled,
}

/// A private copy of the source document. Deleted on [`cleanup`] or drop.
///
/// [`cleanup`]: StagedInput::cleanup
#[derive(Debug)]
pub struct StagedInput {
    path: TempPath,
    bytes: u64,
}

impl StagedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes copied.
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Delete the staged copy. Failure is logged, not returned.
    pub fn cleanup(self) {
        let path = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => debug!("Removed staged input {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Staged input {} was already removed", path.display())
            }
            Err(e) => warn!("Failed to remove staged input {}: {}", path.display(), e),
        }
    }
}

/// Copy `source` into a fresh temp file in `dir` (system temp dir if `None`).
pub fn stage_input(
    source: &Path,
    dir: Option<&Path>,
    chunk_size: usize,
    token: &CancellationToken,
) -> Result<Staging, MarkitError> {
    stage_input_tracked(source, dir, chunk_size, token, &|_| {})
}

/// [`stage_input`], reporting the staged path as soon as the file exists so
/// an owner outside the copying thread can remove it.
pub(crate) fn stage_input_tracked(
    source: &Path,
    dir: Option<&Path>,
    chunk_size: usize,
    token: &CancellationToken,
    on_created: &dyn Fn(&Path),
) -> Result<Staging, MarkitError> {
    let reader = open_source(source)?;

    let suffix = source
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let mut builder = tempfile::Builder::new();
    builder.prefix(STAGED_PREFIX).suffix(&suffix);
    let created = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    };
    let staged = created.map_err(|e| staging_error(source, e))?;
    on_created(staged.path());

    copy_chunks(reader, staged, source, chunk_size, token)
}

fn copy_chunks(
    mut reader: impl Read,
    mut staged: NamedTempFile,
    source: &Path,
    chunk_size: usize,
    token: &CancellationToken,
) -> Result<Staging, MarkitError> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut copied: u64 = 0;
    loop {
        if token.is_cancelled() {
            info!(
                "Cancellation requested while staging '{}' ({} bytes copied)",
                source.display(),
                copied
            );
            discard(staged);
            return Ok(Staging::Cancelled);
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                discard(staged);
                return Err(staging_error(source, e));
            }
        };

        if let Err(e) = staged.write_all(&buf[..n]) {
            discard(staged);
            return Err(staging_error(source, e));
        }
        copied += n as u64;
    }

    if let Err(e) = staged.flush() {
        discard(staged);
        return Err(staging_error(source, e));
    }

    let path = staged.into_temp_path();
    debug!(
        "Staged '{}' → {} ({} bytes)",
        source.display(),
        path.display(),
        copied
    );
    Ok(Staging::Staged(StagedInput {
        path,
        bytes: copied,
    }))
}

fn open_source(source: &Path) -> Result<File, MarkitError> {
    match File::open(source) {
        Ok(f) => Ok(f),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(MarkitError::SourceNotFound {
            path: source.to_path_buf(),
        }),
        Err(e) => Err(staging_error(source, e)),
    }
}

fn staging_error(source: &Path, source_err: std::io::Error) -> MarkitError {
    MarkitError::StagingFailed {
        path: PathBuf::from(source),
        source: source_err,
    }
}

fn discard(file: NamedTempFile) {
    let path = file.path().to_path_buf();
    match file.close() {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial staged input {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves `remaining` bytes and sets the token on read number `cancel_after`.
    struct CancellingReader {
        token: CancellationToken,
        remaining: usize,
        cancel_after: usize,
        reads: usize,
        served: usize,
    }

    impl Read for CancellingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.remaining);
            buf[..n].fill(b'x');
            self.remaining -= n;
            self.served += n;
            self.reads += 1;
            if self.reads == self.cancel_after {
                self.token.cancel();
            }
            Ok(n)
        }
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGED_PREFIX))
            .count()
    }

    #[test]
    fn copies_content_and_keeps_extension() {
        let src_dir = TempDir::new().unwrap();
        let stage_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("report.pdf");
        std::fs::write(&src, b"%PDF-1.7 hello").unwrap();

        let staged = match stage_input(&src, Some(stage_dir.path()), 4, &CancellationToken::new()).unwrap() {
            Staging::Staged(s) => s,
            Staging::Cancelled => panic!("not cancelled"),
        };
        assert_eq!(staged.path().extension().unwrap(), "pdf");
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"%PDF-1.7 hello");
        assert_eq!(staged.len(), 14);

        let path = staged.path().to_path_buf();
        staged.cleanup();
        assert!(!path.exists());
        assert_eq!(staged_files(stage_dir.path()), 0);
    }

    #[test]
    fn cancelled_before_copy_leaves_nothing() {
        let src_dir = TempDir::new().unwrap();
        let stage_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("a.txt");
        std::fs::write(&src, b"0123456789").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = stage_input(&src, Some(stage_dir.path()), 4, &token).unwrap();
        assert!(matches!(result, Staging::Cancelled));
        assert_eq!(staged_files(stage_dir.path()), 0);
    }

    #[test]
    fn missing_source_is_reported() {
        let stage_dir = TempDir::new().unwrap();
        let err = stage_input(
            Path::new("/definitely/not/here.pdf"),
            Some(stage_dir.path()),
            1024,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, MarkitError::SourceNotFound { .. }));
        assert_eq!(staged_files(stage_dir.path()), 0);
    }

    #[test]
    fn drop_removes_staged_copy() {
        let src_dir = TempDir::new().unwrap();
        let stage_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("noext");
        std::fs::write(&src, b"x").unwrap();

        let path = match stage_input(&src, Some(stage_dir.path()), 1024, &CancellationToken::new()).unwrap() {
            Staging::Staged(s) => {
                assert!(s.path().extension().is_none());
                s.path().to_path_buf()
            }
            Staging::Cancelled => panic!("not cancelled"),
        };
        assert!(!path.exists());
    }

    #[test]
    fn cancel_between_chunks_stops_the_copy() {
        let stage_dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let mut reader = CancellingReader {
            token: token.clone(),
            remaining: 1024 * 1024,
            cancel_after: 3,
            reads: 0,
            served: 0,
        };
        let staged = tempfile::Builder::new()
            .prefix(STAGED_PREFIX)
            .tempfile_in(stage_dir.path())
            .unwrap();

        let result = copy_chunks(&mut reader, staged, Path::new("big.bin"), 4096, &token).unwrap();
        assert!(matches!(result, Staging::Cancelled));
        // The check before the fourth read sees the token.
        assert_eq!(reader.reads, 3);
        assert_eq!(reader.served, 3 * 4096);
        assert_eq!(staged_files(stage_dir.path()), 0);
    }

    #[test]
    fn tracked_staging_reports_the_path_up_front() {
        let src_dir = TempDir::new().unwrap();
        let stage_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("a.pdf");
        std::fs::write(&src, b"%PDF-1.4").unwrap();

        let seen = Mutex::new(None);
        let result = stage_input_tracked(&src, Some(stage_dir.path()), 4, &CancellationToken::new(), &|p| {
            *seen.lock().unwrap() = Some(p.to_path_buf());
        })
        .unwrap();
        let staged = match result {
            Staging::Staged(s) => s,
            Staging::Cancelled => panic!("not cancelled"),
        };
        assert_eq!(seen.lock().unwrap().as_deref(), Some(staged.path()));
    }

    #[test]
    fn cleanup_tolerates_an_already_removed_copy() {
        let src_dir = TempDir::new().unwrap();
        let stage_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("a.txt");
        std::fs::write(&src, b"abc").unwrap();

        let staged = match stage_input(&src, Some(stage_dir.path()), 4, &CancellationToken::new()).unwrap() {
            Staging::Staged(s) => s,
            Staging::Cancelled => panic!("not cancelled"),
        };
        std::fs::remove_file(staged.path()).unwrap();
        staged.cleanup();
        assert_eq!(staged_files(stage_dir.path()), 0);
    }
}
