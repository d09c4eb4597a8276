//! Transaction coordinator.
//!
//! A lifecycle operation runs inside [`with_transaction`], which opens a
//! `BEGIN IMMEDIATE` transaction, hands the closure a [`UnitOfWork`], and
//! commits only when the closure returns `Ok`. Any `Err` (or a panic, via
//! `Drop`) rolls the whole unit back, notifications included.
//!
//! Notifications persisted inside the unit are queued on its outbox and
//! returned in [`Committed`] so the caller can push them to live clients
//! strictly after commit.

use std::ops::Deref;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::Result;
use crate::model::notification::Notification;
use crate::model::now_us;

/// An open transaction plus the notifications it has persisted so far.
///
/// Derefs to [`Connection`] so the `db::query` and `db::write` helpers can be
/// called with it directly.
pub struct UnitOfWork<'c> {
    tx: Transaction<'c>,
    now_us: i64,
    outbox: Vec<Notification>,
}

impl UnitOfWork<'_> {
    /// Timestamp shared by every row written in this unit.
    #[must_use]
    pub const fn now_us(&self) -> i64 {
        self.now_us
    }

    pub(crate) fn queue(&mut self, notification: Notification) {
        self.outbox.push(notification);
    }

    /// Notifications persisted so far in this unit.
    #[must_use]
    pub fn queued(&self) -> &[Notification] {
        &self.outbox
    }
}

impl Deref for UnitOfWork<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

/// Result of a committed unit of work.
#[derive(Debug)]
#[must_use]
pub struct Committed<T> {
    pub value: T,
    /// Notifications that are now durable and may be pushed.
    pub notifications: Vec<Notification>,
}

/// Run `f` inside an immediate transaction.
///
/// Commits on `Ok`, rolls back on `Err`. The write lock is taken up front so
/// two concurrent writers serialize instead of failing at upgrade time.
///
/// # Errors
///
/// Returns the closure's error after rolling back, or a store error if the
/// transaction cannot be opened or committed.
pub fn with_transaction<T, F>(conn: &mut Connection, f: F) -> Result<Committed<T>>
where
    F: FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut unit = UnitOfWork {
        tx,
        now_us: now_us(),
        outbox: Vec::new(),
    };

    match f(&mut unit) {
        Ok(value) => {
            let UnitOfWork { tx, outbox, .. } = unit;
            tx.commit()?;
            Ok(Committed {
                value,
                notifications: outbox,
            })
        }
        Err(err) => {
            let discarded = unit.outbox.len();
            if let Err(rollback_err) = unit.tx.rollback() {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            tracing::debug!(error = %err, discarded, "unit of work rolled back");
            Err(err)
        }
    }
}
