//! JSON-file intent store.
//!
//! The whole file is one object keyed by address:
//!
//! ```json
//! { "AA:BB:CC:DD:EE:FF": { "code": 1, "saved_at": "2026-01-01T00:00:00Z" } }
//! ```
//!
//! `code` is [`Intent::to_disk_value`]. Unknown codes read back as "nothing
//! stored" rather than an error. Writes go to a sibling temp file first and
//! are renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::Intent;
use crate::error::{BleqError, Result};
use crate::ports::{DisconnectIntentStore, StoredIntent};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntry {
    code: u8,
    saved_at: DateTime<Utc>,
}

type DiskFile = BTreeMap<String, DiskEntry>;

#[derive(Debug)]
pub struct JsonFileIntentStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    guard: Mutex<()>,
}

impl JsonFileIntentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<DiskFile> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(DiskFile::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DiskFile::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_file(&self, file: &DiskFile) -> Result<()> {
        let text = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|err| {
                BleqError::IntentStore(format!("writing {}: {err}", self.path.display()))
            })
    }
}

impl DisconnectIntentStore for JsonFileIntentStore {
    fn save(&self, address: &str, intent: Intent) -> Result<()> {
        let _held = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read_file()?;
        file.insert(
            address.to_string(),
            DiskEntry {
                code: intent.to_disk_value(),
                saved_at: Utc::now(),
            },
        );
        self.write_file(&file)?;
        debug!(address, ?intent, path = %self.path.display(), "saved disconnect intent");
        Ok(())
    }

    fn load(&self, address: &str) -> Result<Option<StoredIntent>> {
        let _held = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let file = self.read_file()?;
        let Some(entry) = file.get(address) else {
            return Ok(None);
        };
        match Intent::from_disk_value(entry.code) {
            Some(intent) => Ok(Some(StoredIntent {
                intent,
                saved_at: entry.saved_at,
            })),
            None => {
                warn!(address, code = entry.code, "unknown intent code on disk");
                Ok(None)
            }
        }
    }

    fn clear(&self, address: &str) -> Result<()> {
        let _held = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read_file()?;
        if file.remove(address).is_some() {
            self.write_file(&file)?;
        }
        Ok(())
    }
}
