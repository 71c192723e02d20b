//! Transactions: multi-step workflows sequenced on top of the task queue.

pub mod lock_task;
pub mod manager;
pub mod transaction;

pub use self::lock_task::TxnLockTask;
pub use self::manager::{TransactionHost, TransactionManager};
pub use self::transaction::{EndReason, Transaction, TxnHandle, TxnRole};
