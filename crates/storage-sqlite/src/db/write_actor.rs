//! Single writer actor serializing all SQLite mutations.
//!
//! SQLite allows one writer at a time; funneling every mutation through one
//! dedicated thread avoids SQLITE_BUSY storms between the foreground engine
//! and the background worker. Each job runs inside an immediate transaction,
//! so a job that returns an error rolls back atomically.

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use tokio::sync::{mpsc, oneshot};

use grovesync_core::errors::{DatabaseError, Error, Result};

use super::DbPool;
use crate::errors::StorageError;

type WriteJob = Box<dyn FnOnce(&mut SqliteConnection) + Send>;

/// Handle for submitting write jobs to the writer thread. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<WriteJob>,
}

/// Spawn the writer thread. The thread owns its own pooled connection per
/// job and exits when every `WriteHandle` has been dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();

    std::thread::Builder::new()
        .name("grovesync-sqlite-writer".to_string())
        .spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                match pool.get() {
                    Ok(mut conn) => job(&mut conn),
                    // Dropping the job drops its completion channel; the
                    // caller observes a writer-unavailable error.
                    Err(e) => log::error!("[Storage] Writer could not get a connection: {}", e),
                }
            }
        })
        .expect("failed to spawn sqlite writer thread");

    WriteHandle { tx }
}

enum TxError {
    App(Error),
    Db(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Db(err)
    }
}

impl WriteHandle {
    /// Run `job` on the writer thread inside an immediate transaction and
    /// await its result. An `Err` from the job rolls the transaction back.
    pub async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel::<Result<T>>();

        let wrapped: WriteJob = Box::new(move |conn| {
            let outcome = conn
                .immediate_transaction::<T, TxError, _>(|tx_conn| {
                    job(tx_conn).map_err(TxError::App)
                })
                .map_err(|e| match e {
                    TxError::App(err) => err,
                    TxError::Db(err) => StorageError::from(err).into(),
                });
            let _ = done_tx.send(outcome);
        });

        self.tx.send(wrapped).map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "SQLite writer is no longer running".to_string(),
            ))
        })?;

        done_rx.await.map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "SQLite writer dropped the job before completion".to_string(),
            ))
        })?
    }
}
