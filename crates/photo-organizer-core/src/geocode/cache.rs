use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::media::COORDINATE_PRECISION;

/// Current cache file format version
const CACHE_VERSION: u32 = 1;

/// Default cache filename
pub const CACHE_FILENAME: &str = "geocoding_cache.json";

/// Save after this many new entries...
const SAVE_EVERY_ENTRIES: usize = 25;
/// ...or when this much time has passed since the last save.
const SAVE_EVERY: Duration = Duration::from_secs(30);

/// On-disk layout of the cache.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    precision: usize,
    entries: BTreeMap<String, String>,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, String>,
    unsaved: usize,
    last_save: Instant,
}

/// Quantized coordinate key -> place name.
///
/// Persistent caches are loaded on open and written back incrementally;
/// in-memory caches live for one run only.
#[derive(Debug)]
pub struct LocationCache {
    path: Option<PathBuf>,
    state: Mutex<CacheState>,
}

impl LocationCache {
    fn with_entries(path: Option<PathBuf>, entries: HashMap<String, String>) -> Self {
        Self {
            path,
            state: Mutex::new(CacheState {
                entries,
                unsaved: 0,
                last_save: Instant::now(),
            }),
        }
    }

    /// A cache that never touches the disk.
    pub fn in_memory() -> Self {
        Self::with_entries(None, HashMap::new())
    }

    /// Open the cache at `path`. A missing, unreadable or incompatible file
    /// starts an empty cache that will replace it on the next save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(entries) => {
                tracing::info!(path = %path.display(), entries = entries.len(), "Loaded geocoding cache");
                entries
            }
            Err(e) => {
                tracing::warn!(error = %e, "Starting with an empty geocoding cache");
                HashMap::new()
            }
        };
        Self::with_entries(Some(path), entries)
    }

    /// `~/.photo_organizer/geocoding_cache.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".photo_organizer").join(CACHE_FILENAME))
    }

    /// Read entries from disk. A missing file is an empty cache.
    pub fn load(path: &Path) -> Result<HashMap<String, String>, CacheError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let cache: CacheFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| CacheError::Format {
                path: path.to_path_buf(),
                source,
            })?;

        if cache.version != CACHE_VERSION || cache.precision != COORDINATE_PRECISION {
            tracing::warn!(
                path = %path.display(),
                version = cache.version,
                precision = cache.precision,
                "Geocoding cache has an incompatible format; ignoring it"
            );
            return Ok(HashMap::new());
        }
        Ok(cache.entries.into_iter().collect())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an entry, saving to disk when enough changes have piled up.
    pub fn insert(&self, key: String, place: String) {
        let mut state = self.lock();
        state.entries.insert(key, place);
        state.unsaved += 1;

        let Some(path) = &self.path else {
            return;
        };
        let due = state.unsaved >= SAVE_EVERY_ENTRIES || state.last_save.elapsed() >= SAVE_EVERY;
        if due {
            if let Err(e) = Self::persist(path, &mut state) {
                tracing::warn!(error = %e, "Failed to save geocoding cache; will retry");
            }
        }
    }

    /// Write all entries to disk now. No-op for in-memory caches.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut state = self.lock();
        Self::persist(path, &mut state)
    }

    fn persist(path: &Path, state: &mut CacheState) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let cache = CacheFile {
            version: CACHE_VERSION,
            precision: COORDINATE_PRECISION,
            entries: state.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("json.tmp");
        let written = File::create(&temp_path)
            .and_then(|file| write_cache(file, &cache))
            .and_then(|file| file.sync_all());
        if let Err(source) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(CacheError::Io {
                path: temp_path,
                source,
            });
        }
        fs::rename(&temp_path, path).map_err(io_err)?;

        tracing::debug!(path = %path.display(), entries = cache.entries.len(), "Saved geocoding cache");
        state.unsaved = 0;
        state.last_save = Instant::now();
        Ok(())
    }
}

/// Serialize `cache` into `inner`, surfacing buffered-write errors.
fn write_cache<W: Write>(inner: W, cache: &CacheFile) -> io::Result<W> {
    let mut writer = BufWriter::new(inner);
    serde_json::to_writer_pretty(&mut writer, cache)?;
    writer.into_inner().map_err(|e| e.into_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CACHE_FILENAME);

        let cache = LocationCache::open(&path);
        assert!(cache.is_empty());
        cache.insert("37.7749,-122.4194".to_string(), "San Francisco".to_string());
        cache.save().unwrap();

        let reopened = LocationCache::open(&path);
        assert_eq!(reopened.get("37.7749,-122.4194").as_deref(), Some("San Francisco"));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_incremental_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        let cache = LocationCache::open(&path);

        for i in 0..SAVE_EVERY_ENTRIES {
            cache.insert(format!("{i}.0000,0.0000"), format!("Place {i}"));
        }
        // No explicit save: the threshold triggered one
        assert_eq!(LocationCache::load(&path).unwrap().len(), SAVE_EVERY_ENTRIES);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(LocationCache::load(&path), Err(CacheError::Format { .. })));
        let cache = LocationCache::open(&path);
        assert!(cache.is_empty());

        cache.insert("1.0000,2.0000".to_string(), "Somewhere".to_string());
        cache.save().unwrap();
        assert_eq!(LocationCache::load(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_incompatible_precision_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        fs::write(
            &path,
            r#"{"version":1,"precision":2,"entries":{"37.77,-122.42":"San Francisco"}}"#,
        )
        .unwrap();
        assert!(LocationCache::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_in_memory_never_writes() {
        let cache = LocationCache::in_memory();
        cache.insert("1.0000,2.0000".to_string(), "Somewhere".to_string());
        assert!(cache.save().is_ok());
        assert!(!cache.is_persistent());
        assert_eq!(cache.get("1.0000,2.0000").as_deref(), Some("Somewhere"));
    }

    /// Accepts nothing; every write fails as if the disk were full.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_buffered_write_failure_is_reported() {
        let cache = CacheFile {
            version: CACHE_VERSION,
            precision: COORDINATE_PRECISION,
            entries: BTreeMap::from([("1.0000,2.0000".to_string(), "Somewhere".to_string())]),
        };
        // Small enough to sit in the buffer until it is flushed
        assert!(write_cache(FullDisk, &cache).is_err());
        assert!(write_cache(Vec::new(), &cache).is_ok());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        let cache = LocationCache::open(&path);
        cache.insert("1.0000,2.0000".to_string(), "Somewhere".to_string());
        cache.save().unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert!(path.exists());
    }
}
