//! bleq-core
//!
//! Scheduling and sequencing core for talking to a BLE stack.
//!
//! # Modules
//! - **domain**: ids, task kinds and priorities, intents, status codes, entity states
//! - **ports**: seams to the outside (Task, RadioBackend, DisconnectIntentStore, AssertionReporter)
//! - **queue**: single-flight priority task queue
//! - **app**: the update loop that owns the queue, and the handle used to reach it
//! - **tracker**: bit-vector state tracking with intent attribution
//! - **policy**: timeout and reconnect filters
//! - **txn**: transactions and the per-entity transaction manager
//! - **reconnect**: reconnection loop driven by the filters
//! - **entity**: client-role devices and server-role peers
//! - **impls**: port implementations shipped with the core
//! - **config**: layered device/manager configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod entity;
pub mod error;
pub mod impls;
pub mod policy;
pub mod ports;
pub mod queue;
pub mod reconnect;
pub mod tracker;
pub mod txn;

pub use self::app::{RunningLoop, SchedulerHandle, UpdateLoop};
pub use self::config::{DeviceConfig, ManagerConfig, ResolvedConfig};
pub use self::entity::{Device, EntityEnv, Server};
pub use self::error::{BleqError, Result};
