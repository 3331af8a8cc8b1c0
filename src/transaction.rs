//! Transaction guard.
//!
//! [`Transaction`] runs `BEGIN` on creation and must be consumed by
//! [`commit`](Transaction::commit) or [`rollback`](Transaction::rollback),
//! so each guard performs exactly one begin/terminate cycle. For the
//! common commit-on-success / rollback-on-error shape, prefer
//! [`Connection::with_transaction`](crate::connection::Connection::with_transaction).

use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::driver::Driver;
use crate::error::DbResult;

/// An open transaction on a borrowed connection.
///
/// Dereferences to [`Connection`], so statements run directly on the
/// guard:
///
/// ```ignore
/// let mut tx = conn.transaction().await?;
/// tx.execute("insert into t (a) values (?)", &[1.into()]).await?;
/// tx.commit().await?;
/// ```
pub struct Transaction<'c, D: Driver> {
    conn: &'c mut Connection<D>,
    finished: bool,
}

impl<'c, D: Driver> Transaction<'c, D> {
    pub(crate) async fn begin(conn: &'c mut Connection<D>) -> DbResult<Self> {
        conn.run_command("BEGIN").await?;
        debug!(connection = %conn.log_target(), "transaction started");
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// Commit the transaction, consuming the guard.
    pub async fn commit(mut self) -> DbResult<()> {
        self.finished = true;
        self.conn.run_command("COMMIT").await?;
        debug!(connection = %self.conn.log_target(), "transaction committed");
        Ok(())
    }

    /// Roll the transaction back, consuming the guard.
    pub async fn rollback(mut self) -> DbResult<()> {
        self.finished = true;
        self.conn.run_command("ROLLBACK").await?;
        debug!(connection = %self.conn.log_target(), "transaction rolled back");
        Ok(())
    }
}

impl<D: Driver> Deref for Transaction<'_, D> {
    type Target = Connection<D>;

    fn deref(&self) -> &Self::Target {
        self.conn
    }
}

impl<D: Driver> DerefMut for Transaction<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
    }
}

impl<D: Driver> Drop for Transaction<'_, D> {
    fn drop(&mut self) {
        // No async rollback possible here; the next BEGIN or the session
        // teardown resolves the dangling transaction on the server side.
        if !self.finished {
            warn!(
                connection = %self.conn.log_target(),
                "transaction dropped without commit or rollback"
            );
        }
    }
}
