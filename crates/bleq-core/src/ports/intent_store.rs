//! DisconnectIntentStore port - last-disconnect intent, kept across sessions.
//!
//! Consulted when an entity is re-created: an `Unintentional` last disconnect
//! usually means the app may reconnect without asking the user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Intent;
use crate::error::Result;

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIntent {
    pub intent: Intent,
    pub saved_at: DateTime<Utc>,
}

/// Key-value store keyed by entity address.
pub trait DisconnectIntentStore: Send + Sync {
    fn save(&self, address: &str, intent: Intent) -> Result<()>;

    fn load(&self, address: &str) -> Result<Option<StoredIntent>>;

    fn clear(&self, address: &str) -> Result<()>;
}
