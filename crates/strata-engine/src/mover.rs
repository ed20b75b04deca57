//! Single-file relocation between tiers.
//!
//! A move relocates the primary media file and any sidecar files sharing
//! its base name in the same directory (subtitles, metadata) as one logical
//! unit. The primary transfer tries an atomic rename first and falls back
//! to copy-then-verify-then-delete when crossing volumes, so a crash
//! mid-copy never destroys the only copy. Sidecar failures are reported,
//! never fatal: losing a subtitle is not losing the asset. The executor is
//! pure I/O; manifest and cache-entry bookkeeping belong to the caller.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use strata_config::VerifyMode;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::model::MoveKind;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

#[cfg(unix)]
use nix::unistd::{Gid, Uid, chown};

/// One relocation request between the two tiers.
#[derive(Debug, Clone)]
pub struct MoveJob {
    /// Direction of the relocation.
    pub kind: MoveKind,
    /// Absolute source path in the engine namespace.
    pub source: PathBuf,
    /// Absolute target path in the engine namespace.
    pub target: PathBuf,
    /// Expected size of the primary file in bytes.
    pub size_bytes: u64,
}

/// How the primary file reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    /// Same-volume atomic rename.
    Renamed,
    /// Cross-volume copy, verified, source removed.
    Copied,
    /// Destination already held a complete copy from an interrupted move;
    /// only the source removal remained.
    AlreadyPresent,
}

/// A sidecar file that failed to accompany its primary.
#[derive(Debug, Clone)]
pub struct SidecarFailure {
    /// Source path of the sidecar.
    pub path: PathBuf,
    /// Failure detail.
    pub message: String,
}

/// Result of one executed move.
#[derive(Debug)]
pub struct MoveOutcome {
    /// How the primary file was transferred.
    pub method: TransferMethod,
    /// Sidecar files relocated alongside the primary.
    pub sidecars_moved: Vec<PathBuf>,
    /// Sidecar files that failed to relocate.
    pub sidecar_failures: Vec<SidecarFailure>,
}

/// Executes single relocations with space and collision checks.
#[derive(Debug, Clone, Copy)]
pub struct MoveExecutor {
    verify: VerifyMode,
    free_space_margin_bytes: u64,
}

impl MoveExecutor {
    /// Construct an executor with the given verification policy and
    /// free-space safety margin for promotions.
    #[must_use]
    pub const fn new(verify: VerifyMode, free_space_margin_bytes: u64) -> Self {
        Self {
            verify,
            free_space_margin_bytes,
        }
    }

    /// Relocate one file and its sidecars.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MoveIo`], [`EngineError::CopyVerifyFailed`],
    /// or [`EngineError::InsufficientSpace`]. On any failure before the
    /// destination is confirmed complete, the source is left untouched.
    pub fn execute(&self, job: &MoveJob) -> EngineResult<MoveOutcome> {
        if !job.source.exists() {
            return Err(EngineError::move_io(
                "locate_source",
                &job.source,
                io::Error::new(io::ErrorKind::NotFound, "source file missing"),
            ));
        }

        let sidecars = discover_sidecars(&job.source);

        let parent = job.target.parent().ok_or_else(|| {
            EngineError::move_io(
                "resolve_target_parent",
                &job.target,
                io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"),
            )
        })?;
        fs::create_dir_all(parent)
            .map_err(|source| EngineError::move_io("create_target_parent", parent, source))?;

        if job.kind == MoveKind::Promote {
            self.ensure_free_space(parent, &job.target, job.size_bytes)?;
        }

        let method = self.relocate(&job.source, &job.target)?;
        debug!(
            kind = job.kind.as_str(),
            source = %job.source.display(),
            target = %job.target.display(),
            "relocated primary file"
        );

        let mut sidecars_moved = Vec::new();
        let mut sidecar_failures = Vec::new();
        for sidecar in sidecars {
            let Some(name) = sidecar.file_name() else {
                continue;
            };
            let sidecar_target = parent.join(name);
            match self.relocate(&sidecar, &sidecar_target) {
                Ok(_) => sidecars_moved.push(sidecar),
                Err(err) => {
                    warn!(
                        sidecar = %sidecar.display(),
                        error = %err,
                        "sidecar failed to accompany primary file"
                    );
                    sidecar_failures.push(SidecarFailure {
                        path: sidecar,
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(MoveOutcome {
            method,
            sidecars_moved,
            sidecar_failures,
        })
    }

    fn relocate(&self, source: &Path, target: &Path) -> EngineResult<TransferMethod> {
        if target.exists() {
            let source_len = file_len(source)
                .map_err(|err| EngineError::move_io("stat_source", source, err))?;
            let target_len = file_len(target)
                .map_err(|err| EngineError::move_io("stat_target", target, err))?;
            if source_len == target_len {
                // An interrupted copy-then-delete left a complete copy
                // behind; only the source removal remains.
                fs::remove_file(source)
                    .map_err(|err| EngineError::move_io("remove_source", source, err))?;
                return Ok(TransferMethod::AlreadyPresent);
            }
            return Err(EngineError::move_io(
                "collision_check",
                target,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "destination exists with different size",
                ),
            ));
        }

        match fs::rename(source, target) {
            Ok(()) => Ok(TransferMethod::Renamed),
            Err(_rename_err) => {
                self.copy_and_verify(source, target)?;
                fs::remove_file(source)
                    .map_err(|err| EngineError::move_io("remove_source", source, err))?;
                Ok(TransferMethod::Copied)
            }
        }
    }

    fn copy_and_verify(&self, source: &Path, target: &Path) -> EngineResult<()> {
        let source_meta = fs::metadata(source)
            .map_err(|err| EngineError::move_io("stat_source", source, err))?;

        fs::copy(source, target).map_err(|err| EngineError::move_io("copy", target, err))?;

        let copied_len =
            file_len(target).map_err(|err| EngineError::move_io("stat_target", target, err))?;
        if copied_len != source_meta.len() {
            let _ = fs::remove_file(target);
            return Err(EngineError::CopyVerifyFailed {
                path: target.to_path_buf(),
                reason: "size_mismatch",
            });
        }

        if self.verify == VerifyMode::SizeAndChecksum {
            let source_digest = sha256_file(source)
                .map_err(|err| EngineError::move_io("checksum_source", source, err))?;
            let target_digest = sha256_file(target)
                .map_err(|err| EngineError::move_io("checksum_target", target, err))?;
            if source_digest != target_digest {
                let _ = fs::remove_file(target);
                return Err(EngineError::CopyVerifyFailed {
                    path: target.to_path_buf(),
                    reason: "checksum_mismatch",
                });
            }
        }

        preserve_ownership(&source_meta, target);
        Ok(())
    }

    #[cfg(unix)]
    fn ensure_free_space(&self, parent: &Path, target: &Path, size_bytes: u64) -> EngineResult<()> {
        let stat = nix::sys::statvfs::statvfs(parent)
            .map_err(|err| EngineError::move_io("statvfs", parent, io::Error::other(err)))?;
        let available = u64::try_from(
            u128::from(stat.blocks_available()) * u128::from(stat.fragment_size()),
        )
        .unwrap_or(u64::MAX);
        let required = size_bytes.saturating_add(self.free_space_margin_bytes);
        if available < required {
            return Err(EngineError::InsufficientSpace {
                path: target.to_path_buf(),
                required_bytes: required,
                available_bytes: available,
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn ensure_free_space(
        &self,
        _parent: &Path,
        _target: &Path,
        _size_bytes: u64,
    ) -> EngineResult<()> {
        Ok(())
    }
}

/// Sidecar files share the primary's base name plus a dot in the same
/// directory, e.g. `A.srt` and `A.en.srt` next to `A.mkv`. Directory read
/// failures degrade to "no sidecars".
fn discover_sidecars(primary: &Path) -> Vec<PathBuf> {
    let (Some(parent), Some(stem), Some(primary_name)) = (
        primary.parent(),
        primary.file_stem().and_then(|stem| stem.to_str()),
        primary.file_name(),
    ) else {
        return Vec::new();
    };

    let prefix = format!("{stem}.");
    let Ok(entries) = fs::read_dir(parent) else {
        return Vec::new();
    };

    let mut sidecars: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name() != primary_name)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix))
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    sidecars.sort();
    sidecars
}

fn file_len(path: &Path) -> io::Result<u64> {
    fs::metadata(path).map(|meta| meta.len())
}

fn sha256_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().into())
}

#[cfg(unix)]
fn preserve_ownership(source_meta: &fs::Metadata, target: &Path) {
    let uid = Uid::from_raw(source_meta.uid());
    let gid = Gid::from_raw(source_meta.gid());
    if let Err(err) = chown(target, Some(uid), Some(gid)) {
        warn!(
            target = %target.display(),
            error = %err,
            "could not preserve ownership on copied file"
        );
    }
}

#[cfg(not(unix))]
fn preserve_ownership(_source_meta: &fs::Metadata, _target: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor() -> MoveExecutor {
        MoveExecutor::new(VerifyMode::Size, 0)
    }

    fn promote_job(temp: &TempDir, name: &str) -> MoveJob {
        let source = temp.path().join("archive").join(name);
        let target = temp.path().join("cache").join(name);
        MoveJob {
            kind: MoveKind::Promote,
            source,
            target,
            size_bytes: 0,
        }
    }

    fn write_file(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(path, contents).expect("write file");
    }

    #[test]
    fn promotion_moves_primary_and_sidecars() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let mut job = promote_job(&temp, "A.mkv");
        write_file(&job.source, b"video-bytes");
        job.size_bytes = 11;

        let archive_dir = job.source.parent().expect("parent").to_path_buf();
        write_file(&archive_dir.join("A.srt"), b"subs");
        write_file(&archive_dir.join("A.en.srt"), b"english subs");
        write_file(&archive_dir.join("AB.mkv"), b"other movie");

        let outcome = executor().execute(&job)?;
        assert_eq!(outcome.method, TransferMethod::Renamed);
        assert_eq!(outcome.sidecars_moved.len(), 2);
        assert!(outcome.sidecar_failures.is_empty());

        let cache_dir = job.target.parent().expect("parent");
        assert!(job.target.exists());
        assert!(cache_dir.join("A.srt").exists());
        assert!(cache_dir.join("A.en.srt").exists());
        assert!(!job.source.exists());
        assert!(
            archive_dir.join("AB.mkv").exists(),
            "stem-prefixed but dot-less neighbours stay put"
        );
        Ok(())
    }

    #[test]
    fn identical_collision_completes_interrupted_move() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let mut job = promote_job(&temp, "A.mkv");
        write_file(&job.source, b"same-bytes");
        write_file(&job.target, b"same-bytes");
        job.size_bytes = 10;

        let outcome = executor().execute(&job)?;
        assert_eq!(outcome.method, TransferMethod::AlreadyPresent);
        assert!(!job.source.exists());
        assert!(job.target.exists());
        Ok(())
    }

    #[test]
    fn size_mismatch_collision_leaves_source_untouched() {
        let temp = TempDir::new().expect("tempdir");
        let mut job = promote_job(&temp, "A.mkv");
        write_file(&job.source, b"new contents");
        write_file(&job.target, b"old");
        job.size_bytes = 12;

        let err = executor().execute(&job).expect_err("collision should fail");
        assert!(matches!(err, EngineError::MoveIo { operation: "collision_check", .. }));
        assert!(job.source.exists());
        assert_eq!(fs::read(&job.target).expect("target readable"), b"old");
    }

    #[test]
    fn missing_source_fails_without_side_effects() {
        let temp = TempDir::new().expect("tempdir");
        let job = promote_job(&temp, "A.mkv");
        let err = executor().execute(&job).expect_err("missing source should fail");
        assert!(matches!(err, EngineError::MoveIo { operation: "locate_source", .. }));
        assert!(!job.target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn free_space_margin_blocks_promotion() {
        let temp = TempDir::new().expect("tempdir");
        let mut job = promote_job(&temp, "A.mkv");
        write_file(&job.source, b"video");
        job.size_bytes = 5;

        let greedy = MoveExecutor::new(VerifyMode::Size, u64::MAX);
        let err = greedy.execute(&job).expect_err("margin should exceed free space");
        assert!(matches!(err, EngineError::InsufficientSpace { .. }));
        assert!(job.source.exists());
    }

    #[test]
    fn sidecar_failure_does_not_roll_back_primary() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let mut job = promote_job(&temp, "A.mkv");
        write_file(&job.source, b"video-bytes");
        job.size_bytes = 11;

        let archive_dir = job.source.parent().expect("parent").to_path_buf();
        write_file(&archive_dir.join("A.srt"), b"subtitle contents");
        // A colliding sidecar of a different size at the destination.
        write_file(
            &job.target.parent().expect("parent").join("A.srt"),
            b"stale",
        );

        let outcome = executor().execute(&job)?;
        assert_eq!(outcome.method, TransferMethod::Renamed);
        assert!(job.target.exists());
        assert_eq!(outcome.sidecar_failures.len(), 1);
        assert!(archive_dir.join("A.srt").exists(), "failed sidecar stays put");
        Ok(())
    }

    #[test]
    fn copy_and_verify_round_trips_with_checksum() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let source = temp.path().join("archive").join("A.mkv");
        let target = temp.path().join("cache").join("A.mkv");
        write_file(&source, b"video-bytes");
        fs::create_dir_all(target.parent().expect("parent")).expect("create parent");

        let checksummed = MoveExecutor::new(VerifyMode::SizeAndChecksum, 0);
        checksummed.copy_and_verify(&source, &target)?;
        assert_eq!(
            fs::read(&source).expect("source readable"),
            fs::read(&target).expect("target readable")
        );
        assert!(source.exists(), "copy step never removes the source");
        Ok(())
    }

    #[test]
    fn sha256_is_content_addressed() {
        let temp = TempDir::new().expect("tempdir");
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        let third = temp.path().join("third");
        fs::write(&first, b"same").expect("write");
        fs::write(&second, b"same").expect("write");
        fs::write(&third, b"different").expect("write");

        let first_digest = sha256_file(&first).expect("digest");
        assert_eq!(first_digest, sha256_file(&second).expect("digest"));
        assert_ne!(first_digest, sha256_file(&third).expect("digest"));
    }
}
