//! In-memory intent store (tests, or when nothing should touch disk).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::domain::Intent;
use crate::error::Result;
use crate::ports::{DisconnectIntentStore, StoredIntent};

#[derive(Debug, Default)]
pub struct InMemoryIntentStore {
    entries: Mutex<HashMap<String, StoredIntent>>,
}

impl InMemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisconnectIntentStore for InMemoryIntentStore {
    fn save(&self, address: &str, intent: Intent) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            address.to_string(),
            StoredIntent {
                intent,
                saved_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn load(&self, address: &str) -> Result<Option<StoredIntent>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(address).cloned())
    }

    fn clear(&self, address: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(address);
        Ok(())
    }
}
