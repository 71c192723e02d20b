//! Strongly-typed identifiers.
//!
//! Every identifier is a ULID wrapped in `Id<T>`, where `T` is a zero-sized
//! marker. The marker only exists at compile time, so a `TaskId` can never be
//! passed where an `EntityId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for identifier kinds.
///
/// Provides the prefix used by `Display` ("entity-", "task-", ...).
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

// Manual impls: deriving would put bounds on `T`, and markers are uninhabited enums.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<T: IdMarker> Id<T> {
    /// Fresh identifier from the current time plus randomness.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ========================================
// Markers
// ========================================

/// The manager: owner of the radio and the task queue.
pub enum Manager {}

impl IdMarker for Manager {
    fn prefix() -> &'static str {
        "manager-"
    }
}

/// A connectable entity (device or server).
pub enum Entity {}

impl IdMarker for Entity {
    fn prefix() -> &'static str {
        "entity-"
    }
}

/// One submitted task instance.
pub enum TaskInstance {}

impl IdMarker for TaskInstance {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// One started transaction.
pub enum Txn {}

impl IdMarker for Txn {
    fn prefix() -> &'static str {
        "txn-"
    }
}

pub type ManagerId = Id<Manager>;
pub type EntityId = Id<Entity>;
pub type TaskId = Id<TaskInstance>;
pub type TxnId = Id<Txn>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        assert!(EntityId::generate().to_string().starts_with("entity-"));
        assert!(TaskId::generate().to_string().starts_with("task-"));
        assert!(TxnId::generate().to_string().starts_with("txn-"));
        assert!(ManagerId::generate().to_string().starts_with("manager-"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = EntityId::generate();
        let b = EntityId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn phantom_marker_costs_nothing() {
        assert_eq!(std::mem::size_of::<TaskId>(), std::mem::size_of::<Ulid>());
    }

    #[test]
    fn id_serializes_as_plain_ulid() {
        let id = EntityId::generate();
        let s = serde_json::to_string(&id).unwrap();
        let back: EntityId = serde_json::from_str(&s).unwrap();
        assert_eq!(id, back);
        assert_eq!(s, format!("\"{}\"", id.as_ulid()));
    }
}
