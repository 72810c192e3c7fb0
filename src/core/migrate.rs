//! Storage migration
//!
//! Changing an array's shape allocates a new backend for the target layout,
//! scan-copies every logical point from the source, and swaps the new
//! backend in. File-backed arrays are rebuilt in a temporary file next to the
//! original and renamed over it once the copy is flushed; the rename is the
//! only step that touches the original file, so any earlier failure leaves
//! the source untouched and usable.
//!
//! Heap arrays stay on the heap while the target fits the heap limit or is no
//! larger than the source. Past that they spill into a mapped file: the
//! migrator's spill path if one was given, otherwise a scratch file in the
//! system temp directory.

use crate::core::backend::{ArrayStorage, BackendKind, StorageBackend};
use crate::core::config::StoreConfig;
use crate::core::error::{Result, StoreError};
use crate::core::header::Header;
use crate::core::layout::{BlockSizePolicy, IndexIter};
use crate::core::selector::{BackendSelector, StorageMode};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TEMP_SUFFIX: &str = ".migrating";

/// Outcome of a completed migration
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    /// Header describing the migrated array
    pub header: Header,
    pub from_kind: BackendKind,
    pub to_kind: BackendKind,
    /// Points copied from the source (zero values are skipped)
    pub copied_points: u64,
    /// File a heap array moved into after outgrowing the heap limit
    pub spilled_to: Option<PathBuf>,
}

pub struct StorageMigrator {
    selector: BackendSelector,
    policy: Box<dyn BlockSizePolicy>,
    spill_path: Option<PathBuf>,
}

impl std::fmt::Debug for StorageMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMigrator")
            .field("config", self.selector.config())
            .field("spill_path", &self.spill_path)
            .finish()
    }
}

impl StorageMigrator {
    /// Migrator using the config's block-size policy
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_policy(config, Box::new(config.block_policy()))
    }

    pub fn with_policy(config: &StoreConfig, policy: Box<dyn BlockSizePolicy>) -> Self {
        StorageMigrator {
            selector: BackendSelector::new(config),
            policy,
            spill_path: None,
        }
    }

    /// File used when a heap array grows past the heap limit
    pub fn with_spill_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.spill_path = Some(path.into());
        self
    }

    /// Migrate `source` to `new_sizes`, replacing it with the new backend
    ///
    /// On failure `source` is left as it was before the call.
    pub fn migrate(
        &self,
        source: &mut StorageBackend,
        header: &Header,
        new_sizes: &[usize],
    ) -> Result<MigrationReport> {
        if source.is_closed() {
            return Err(StoreError::state("cannot migrate a closed array"));
        }
        if !source.is_writable() {
            return Err(StoreError::state("cannot migrate a read-only array"));
        }
        if new_sizes.len() != source.layout().n_dim() {
            return Err(StoreError::DimensionMismatch {
                expected: source.layout().n_dim(),
                actual: new_sizes.len(),
            });
        }

        let target_layout = source.layout().reshaped(new_sizes, self.policy.as_ref())?;
        let target_header = header.reshaped(&target_layout);
        target_header.validate()?;
        let from_kind = source.kind();

        info!(
            from = ?source.layout().sizes(),
            to = ?new_sizes,
            ?from_kind,
            "starting migration"
        );

        let Some(original) = source.path().map(Path::to_path_buf) else {
            return self.migrate_in_memory(source, target_header, from_kind);
        };

        let temp = temp_path(&original);
        let mut target = self
            .selector
            .create(&temp, &target_header)
            .map_err(|e| abort(&temp, "allocate", e))?;
        let to_kind = target.kind();

        let copied = match copy_points(source, &mut target).and_then(|copied| {
            target.force_to_stable()?;
            Ok(copied)
        }) {
            Ok(copied) => copied,
            Err(e) => {
                discard(target, &temp);
                return Err(StoreError::Migration {
                    phase: "copy",
                    source: Box::new(e),
                });
            }
        };
        debug!(copied, temp = %temp.display(), "copy phase complete");

        // point of no return: release the source and swap files
        if let Err(e) = source.close() {
            warn!(error = %e, "source close failed before rename");
        }
        if let Err(e) = fs::rename(&temp, &original) {
            discard(target, &temp);
            let rename_error = StoreError::Migration {
                phase: "rename",
                source: Box::new(StoreError::io_at(
                    format!("renaming {} over {}", temp.display(), original.display()),
                    e,
                )),
            };
            return match self.selector.open(&original, true) {
                Ok((_, reopened)) => {
                    *source = reopened;
                    Err(rename_error)
                }
                Err(reopen) => {
                    warn!(error = %reopen, "failed to reopen source after rename failure");
                    Err(rename_error)
                }
            };
        }

        target.rebind_path(original.clone());
        *source = target;
        source
            .write_header(&target_header)
            .and_then(|()| source.force_to_stable())
            .map_err(|e| StoreError::Migration {
                phase: "header",
                source: Box::new(e),
            })?;

        info!(path = %original.display(), ?to_kind, copied, "migration complete");
        Ok(MigrationReport {
            header: target_header,
            from_kind,
            to_kind,
            copied_points: copied,
            spilled_to: None,
        })
    }

    fn migrate_in_memory(
        &self,
        source: &mut StorageBackend,
        target_header: Header,
        from_kind: BackendKind,
    ) -> Result<MigrationReport> {
        let layout = target_header.layout()?;
        let target_bytes = layout.data_bytes();
        // a heap source already holds its own size, so shrinking never spills
        let stays_on_heap = target_bytes <= self.selector.config().heap_max_bytes
            || target_bytes <= source.layout().data_bytes();
        if !stays_on_heap {
            return self.spill_to_file(source, target_header, from_kind);
        }

        let mut target = self
            .selector
            .build(None, layout, target_header.codec(), StorageMode::Heap)
            .map_err(|e| StoreError::Migration {
                phase: "allocate",
                source: Box::new(e),
            })?;

        let copied = copy_points(source, &mut target).map_err(|e| StoreError::Migration {
            phase: "copy",
            source: Box::new(e),
        })?;

        let to_kind = target.kind();
        let mut old = std::mem::replace(source, target);
        if let Err(e) = old.close() {
            warn!(error = %e, "failed to release migrated heap buffer");
        }

        info!(?to_kind, copied, "in-memory migration complete");
        Ok(MigrationReport {
            header: target_header,
            from_kind,
            to_kind,
            copied_points: copied,
            spilled_to: None,
        })
    }

    /// Move a heap source that outgrew the heap limit into a mapped file
    ///
    /// The file is the configured spill path, or a fresh scratch file in the
    /// system temp directory.
    fn spill_to_file(
        &self,
        source: &mut StorageBackend,
        target_header: Header,
        from_kind: BackendKind,
    ) -> Result<MigrationReport> {
        let path = match &self.spill_path {
            Some(path) => path.clone(),
            None => scratch_path().map_err(|e| StoreError::Migration {
                phase: "allocate",
                source: Box::new(e),
            })?,
        };

        let mut target = self
            .selector
            .create(&path, &target_header)
            .map_err(|e| abort(&path, "allocate", e))?;
        let to_kind = target.kind();

        let copied = match copy_points(source, &mut target).and_then(|copied| {
            target.force_to_stable()?;
            Ok(copied)
        }) {
            Ok(copied) => copied,
            Err(e) => {
                discard(target, &path);
                return Err(StoreError::Migration {
                    phase: "copy",
                    source: Box::new(e),
                });
            }
        };

        let mut old = std::mem::replace(source, target);
        if let Err(e) = old.close() {
            warn!(error = %e, "failed to release spilled heap buffer");
        }

        info!(path = %path.display(), ?to_kind, copied, "heap array spilled to file");
        Ok(MigrationReport {
            header: target_header,
            from_kind,
            to_kind,
            copied_points: copied,
            spilled_to: Some(path),
        })
    }

    /// Copy `source` into a new array file at `path` with the same shape
    ///
    /// Used to persist heap arrays. `source` is not modified.
    pub fn materialize<P: AsRef<Path>>(
        &self,
        source: &StorageBackend,
        header: &Header,
        path: P,
    ) -> Result<StorageBackend> {
        let path = path.as_ref();
        let mut target = self
            .selector
            .create(path, header)
            .map_err(|e| abort(path, "allocate", e))?;

        let result = copy_points(source, &mut target).and_then(|copied| {
            target.force_to_stable()?;
            Ok(copied)
        });
        match result {
            Ok(copied) => {
                info!(path = %path.display(), copied, "materialized array");
                Ok(target)
            }
            Err(e) => {
                discard(target, path);
                Err(StoreError::Migration {
                    phase: "copy",
                    source: Box::new(e),
                })
            }
        }
    }
}

/// Copy every source point that lies inside the target shape
///
/// Targets start zero-filled, so zero values are not written.
fn copy_points(source: &StorageBackend, target: &mut StorageBackend) -> Result<u64> {
    let bounds = target.layout().sizes().to_vec();
    let mut copied = 0u64;
    for index in IndexIter::new(source.layout().sizes()) {
        if index.iter().zip(&bounds).any(|(&i, &size)| i >= size) {
            continue;
        }
        let value = source.read_point(&index)?;
        if value.to_bits() == 0 {
            continue;
        }
        target.write_point(&index, value)?;
        copied += 1;
    }
    Ok(copied)
}

/// `<name>.migrating` next to `path`
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("array"));
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

fn discard(mut target: StorageBackend, path: &Path) {
    if let Err(e) = target.close() {
        warn!(error = %e, "failed to close abandoned migration target");
    }
    drop(target);
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove migration file");
    }
}

fn abort(path: &Path, phase: &'static str, error: StoreError) -> StoreError {
    // creation may have left a partial file behind
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove migration file");
        }
    }
    StoreError::Migration {
        phase,
        source: Box::new(error),
    }
}

/// Reserve a uniquely named file in the system temp directory
fn scratch_path() -> Result<PathBuf> {
    let file = tempfile::Builder::new()
        .prefix("specstore-")
        .suffix(".spst")
        .tempfile()
        .map_err(|e| StoreError::io_at("creating scratch array file", e))?;
    file.into_temp_path()
        .keep()
        .map_err(|e| StoreError::io_at("keeping scratch array file", e.error))
}

/// Whether a stale migration file exists next to `path`
pub fn has_stale_migration(path: &Path) -> bool {
    temp_path(path).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::HeapBackend;
    use crate::core::codec::ElementCodec;
    use crate::core::header::HEADER_SIZE;
    use crate::core::io::ArrayFile;
    use crate::core::layout::BlockLayout;
    use tempfile::TempDir;

    fn reread_header(path: &Path) -> Header {
        ArrayFile::open(path, false).unwrap().read_header().unwrap()
    }

    fn pattern(index: &[usize]) -> f64 {
        (1 + index[0] + 10 * index[1]) as f64
    }

    fn filled_file(dir: &TempDir, config: &StoreConfig, sizes: &[usize]) -> (PathBuf, Header, StorageBackend) {
        let path = dir.path().join("array.spst");
        let layout = BlockLayout::create_full_matrix(HEADER_SIZE as u64, sizes).unwrap();
        let header = Header::for_layout(&layout, ElementCodec::default());
        let mut backend = BackendSelector::new(config).create(&path, &header).unwrap();
        for index in IndexIter::new(sizes) {
            backend.write_point(&index, pattern(&index)).unwrap();
        }
        (path, header, backend)
    }

    #[test]
    fn test_grow_file_backed() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default();
        let (path, header, mut backend) = filled_file(&dir, &config, &[4, 3]);

        let report = StorageMigrator::new(&config)
            .migrate(&mut backend, &header, &[6, 5])
            .unwrap();
        assert_eq!(report.copied_points, 12);
        assert_eq!(report.header.sizes(), vec![6, 5]);
        assert_eq!(backend.path(), Some(path.as_path()));
        assert!(!has_stale_migration(&path));

        for index in IndexIter::new(&[6, 5]) {
            let expected = if index[0] < 4 && index[1] < 3 {
                pattern(&index)
            } else {
                0.0
            };
            assert_eq!(backend.read_point(&index).unwrap(), expected);
        }
        assert_eq!(reread_header(&path), report.header);
    }

    #[test]
    fn test_shrink_drops_outside_points() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default();
        let (_path, header, mut backend) = filled_file(&dir, &config, &[4, 4]);

        StorageMigrator::new(&config)
            .migrate(&mut backend, &header, &[2, 2])
            .unwrap();
        assert_eq!(backend.layout().sizes(), &[2, 2]);
        assert_eq!(backend.sum_all().unwrap(), 1.0 + 2.0 + 11.0 + 12.0);
    }

    #[test]
    fn test_heap_stays_on_heap() {
        let config = StoreConfig::default();
        let (header, mut backend) = heap_source(&[3, 3]);
        backend.write_point(&[2, 2], 5.0).unwrap();

        let report = StorageMigrator::new(&config)
            .migrate(&mut backend, &header, &[5, 5])
            .unwrap();
        assert_eq!(report.to_kind, BackendKind::Heap);
        assert_eq!(backend.read_point(&[2, 2]).unwrap(), 5.0);
        assert_eq!(backend.read_point(&[4, 4]).unwrap(), 0.0);
    }

    fn heap_source(sizes: &[usize]) -> (Header, StorageBackend) {
        let layout = BlockLayout::create_full_matrix(HEADER_SIZE as u64, sizes).unwrap();
        let header = Header::for_layout(&layout, ElementCodec::default());
        let backend = StorageBackend::Heap(HeapBackend::new(layout, ElementCodec::default()));
        (header, backend)
    }

    #[test]
    fn test_heap_past_limit_spills_to_file() {
        let dir = TempDir::new().unwrap();
        let spill = dir.path().join("spilled.spst");
        let config = StoreConfig::default().with_heap_max_bytes(64);
        let (header, mut backend) = heap_source(&[4]);
        backend.write_point(&[1], 2.0).unwrap();

        let report = StorageMigrator::new(&config)
            .with_spill_path(&spill)
            .migrate(&mut backend, &header, &[100])
            .unwrap();
        assert_eq!(report.from_kind, BackendKind::Heap);
        assert_eq!(report.to_kind, BackendKind::SingleWindow);
        assert_eq!(report.spilled_to.as_deref(), Some(spill.as_path()));
        assert_eq!(backend.path(), Some(spill.as_path()));
        assert_eq!(backend.read_point(&[1]).unwrap(), 2.0);
        assert_eq!(backend.read_point(&[99]).unwrap(), 0.0);

        backend.close().unwrap();
        assert_eq!(reread_header(&spill).sizes(), vec![100]);
    }

    #[test]
    fn test_heap_spill_without_path_uses_scratch_file() {
        let config = StoreConfig::default().with_heap_max_bytes(64);
        let (header, mut backend) = heap_source(&[4]);
        backend.write_point(&[3], -1.0).unwrap();

        let report = StorageMigrator::new(&config)
            .migrate(&mut backend, &header, &[64])
            .unwrap();
        let scratch = report.spilled_to.clone().unwrap();
        assert!(scratch.starts_with(std::env::temp_dir()));
        assert_eq!(backend.read_point(&[3]).unwrap(), -1.0);

        backend.close().unwrap();
        std::fs::remove_file(&scratch).unwrap();
    }

    #[test]
    fn test_oversized_heap_can_shrink() {
        // explicit heap arrays may already exceed the limit
        let config = StoreConfig::default().with_heap_max_bytes(64);
        let (header, mut backend) = heap_source(&[64]);
        backend.write_point(&[31], 4.0).unwrap();
        backend.write_point(&[63], 8.0).unwrap();

        let report = StorageMigrator::new(&config)
            .migrate(&mut backend, &header, &[32])
            .unwrap();
        assert_eq!(report.to_kind, BackendKind::Heap);
        assert_eq!(report.spilled_to, None);
        assert_eq!(backend.sum_all().unwrap(), 4.0);
    }

    #[test]
    fn test_rename_failure_discards_temp_file() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default();
        let (path, header, mut backend) = filled_file(&dir, &config, &[3, 3]);

        // a non-empty directory cannot be replaced by a file
        let occupied = dir.path().join("occupied");
        std::fs::create_dir(&occupied).unwrap();
        std::fs::write(occupied.join("keep"), b"x").unwrap();
        backend.rebind_path(occupied.clone());

        let err = StorageMigrator::new(&config)
            .migrate(&mut backend, &header, &[4, 4])
            .unwrap_err();
        assert!(matches!(err, StoreError::Migration { phase: "rename", .. }));
        assert!(err.is_retriable());
        assert!(!has_stale_migration(&occupied));
        assert!(occupied.join("keep").exists());

        // the real file was never touched
        assert_eq!(reread_header(&path), header);
        let (_, reopened) = BackendSelector::new(&config).open(&path, false).unwrap();
        assert_eq!(reopened.read_point(&[2, 2]).unwrap(), pattern(&[2, 2]));
    }

    #[test]
    fn test_discard_removes_abandoned_target() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default();
        let (path, _header, backend) = filled_file(&dir, &config, &[2, 2]);

        discard(backend, &path);
        assert!(!path.exists());
    }

    #[test]
    fn test_read_only_source_rejected() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default();
        let (_path, header, mut backend) = filled_file(&dir, &config, &[2, 2]);
        backend.set_writable(false).unwrap();

        assert!(matches!(
            StorageMigrator::new(&config).migrate(&mut backend, &header, &[4, 4]),
            Err(StoreError::State(_))
        ));
        assert_eq!(backend.read_point(&[1, 1]).unwrap(), pattern(&[1, 1]));
    }

    #[test]
    fn test_temp_path_sits_beside_original() {
        let temp = temp_path(Path::new("/data/run1/fid.spst"));
        assert_eq!(temp, PathBuf::from("/data/run1/fid.spst.migrating"));
    }
}
