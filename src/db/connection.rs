use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use tokio::sync::oneshot;

use crate::db::migrations::ensure_complete;
use crate::error::{DdtError, Result};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to dataset thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join dataset thread: {join_err:?}");
            }
        }
    }
}

/// Read-only handle on a completed merged dataset. All statements run on one
/// dedicated thread that owns the SQLite connection; callers await the result.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("ddt-dataset".into())
            .spawn(move || {
                let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
                    | OpenFlags::SQLITE_OPEN_URI;
                let mut conn = match Connection::open_with_flags(&path_for_thread, flags) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(DdtError::Database(err)));
                        return;
                    }
                };

                let init_result = ensure_complete(&conn);
                let ready = init_result.is_ok();
                if ready_tx.send(init_result).is_err() {
                    error!("Dataset initialization receiver dropped before ready signal");
                    return;
                }
                if !ready {
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Dataset thread shutting down");
            })?;

        ready_rx.recv().map_err(|_| {
            DdtError::Worker("dataset worker exited before signaling readiness".into())
        })??;

        info!("Merged dataset opened at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Dataset caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| DdtError::Worker(format!("failed to send command to dataset thread: {err}")))?;

        reply_rx
            .await
            .map_err(|_| DdtError::Worker("dataset thread terminated unexpectedly".into()))?
    }
}
