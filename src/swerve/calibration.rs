// Persistent azimuth zero offsets
//
// Offsets are raw sensor ticks keyed by module name, stored as a flat JSON
// object: {"front_left": 1021.0, "front_right": 3990.0, ...}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("Calibration file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Calibration file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Calibration storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable key-value storage for calibration offsets
pub trait CalibrationStore: Send {
    fn load(&self, key: &str) -> Result<Option<f64>, CalibrationError>;
    fn store(&mut self, key: &str, value: f64) -> Result<(), CalibrationError>;
}

/// Offsets kept in a JSON file, rewritten on every store
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, f64>,
}

impl JsonFileStore {
    /// Open the store, starting empty if the file is missing or unreadable
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match Self::read(&path) {
            Ok(values) => values,
            Err(CalibrationError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No calibration file at {}", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!("Ignoring calibration file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self { path, values }
    }

    fn read(path: &Path) -> Result<BTreeMap<String, f64>, CalibrationError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<f64>, CalibrationError> {
        Ok(self.values.get(key).copied())
    }

    fn store(&mut self, key: &str, value: f64) -> Result<(), CalibrationError> {
        let mut values = self.values.clone();
        values.insert(key.to_string(), value);

        // Write to a sibling file and rename so a crash never leaves half a file
        let json = serde_json::to_string_pretty(&values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!("Could not remove {}: {}", tmp.display(), cleanup);
            }
            return Err(e.into());
        }

        self.values = values;
        Ok(())
    }
}

/// In-memory store, optionally failing every write
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    pub values: BTreeMap<String, f64>,
    pub fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(values: &[(&str, f64)]) -> Self {
        Self {
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            fail_writes: false,
        }
    }
}

impl CalibrationStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<f64>, CalibrationError> {
        Ok(self.values.get(key).copied())
    }

    fn store(&mut self, key: &str, value: f64) -> Result<(), CalibrationError> {
        if self.fail_writes {
            return Err(CalibrationError::Unavailable("writes disabled".to_string()));
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "swerve-calibration-{}-{}.json",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn test_json_store_persists_across_open() {
        let path = temp_path("persist");
        let _ = fs::remove_file(&path);

        let mut store = JsonFileStore::open(&path);
        assert_eq!(store.load("front_left").unwrap(), None);
        store.store("front_left", 1021.0).unwrap();
        store.store("back_right", -12.5).unwrap();

        let reopened = JsonFileStore::open(&path);
        assert_eq!(reopened.load("front_left").unwrap(), Some(1021.0));
        assert_eq!(reopened.load("back_right").unwrap(), Some(-12.5));
        assert_eq!(reopened.load("front_right").unwrap(), None);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_json_store_ignores_corrupt_file() {
        let path = temp_path("corrupt");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::open(&path);
        assert_eq!(store.load("front_left").unwrap(), None);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_json_store_write_failure_keeps_memory() {
        // Parent directory does not exist, so the write fails
        let path = std::env::temp_dir()
            .join(format!("swerve-missing-dir-{}", std::process::id()))
            .join("calibration.json");
        let mut store = JsonFileStore::open(&path);

        assert!(store.store("front_left", 5.0).is_err());
        assert_eq!(store.load("front_left").unwrap(), None);
    }

    #[test]
    fn test_json_store_failed_rename_leaves_no_temp_file() {
        // A directory in place of the file makes the rename fail
        let path = temp_path("rename");
        let _ = fs::remove_dir_all(&path);
        fs::create_dir(&path).unwrap();
        let tmp = path.with_extension("json.tmp");

        let mut store = JsonFileStore::open(&path);
        assert!(store.store("front_left", 5.0).is_err());
        assert!(!tmp.exists());
        assert_eq!(store.load("front_left").unwrap(), None);

        fs::remove_dir(&path).unwrap();
    }

    #[test]
    fn test_memory_store_failing_writes() {
        let mut store = MemoryStore::with(&[("front_left", 3.0)]);
        assert_eq!(store.load("front_left").unwrap(), Some(3.0));
        store.fail_writes = true;
        assert!(store.store("front_left", 4.0).is_err());
        assert_eq!(store.load("front_left").unwrap(), Some(3.0));
    }
}
