use std::path::Path;

use log::debug;

use super::{SettingsError, SettingsStore};

const TREE_SETTINGS: &str = "settings";

/// Sled-backed settings. Every write is flushed before returning.
pub struct SledStore {
    _db: sled::Db,
    settings: sled::Tree,
}

impl SledStore {
    /// Open (or create) the database directory at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let settings = db.open_tree(TREE_SETTINGS)?;
        debug!("Opened settings store at {}", path_ref.display());
        Ok(Self { _db: db, settings })
    }
}

impl SettingsStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let Some(bytes) = self.settings.get(key.as_bytes())? else {
            return Ok(None);
        };
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| SettingsError::Encoding {
                key: key.to_string(),
            })
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.settings.insert(key.as_bytes(), value.as_bytes())?;
        self.settings.flush()?;
        Ok(())
    }

    fn put_many(&mut self, entries: &[(&str, &str)]) -> Result<(), SettingsError> {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            batch.insert(key.as_bytes(), value.as_bytes());
        }
        self.settings.apply_batch(batch)?;
        self.settings.flush()?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), SettingsError> {
        self.settings.remove(key.as_bytes())?;
        self.settings.flush()?;
        Ok(())
    }
}
