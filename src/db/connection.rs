use std::{
    path::Path,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const WORKER_NAME: &str = "emosense-journal";
/// A second process (another `emosense` run) may hold the write lock briefly.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

type JournalJob = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Owns the worker thread. Dropping the last handle closes the job queue,
/// which lets the worker drain what is left and exit.
struct Worker {
    jobs: Option<mpsc::Sender<JournalJob>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn submit(&self, job: JournalJob) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("journal worker already stopped"))?;
        jobs.send(job)
            .map_err(|_| anyhow!("journal worker is no longer accepting writes"))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        drop(self.jobs.take());

        let thread = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Journal worker panicked before shutting down");
            }
        }
    }
}

/// Session journal backed by SQLite. The connection lives on a dedicated
/// thread; async callers hand it closures and await the reply.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite journal at {}", path.display()))?;

    // Journal writes happen once at session start and once at the end;
    // WAL keeps a crash between them from corrupting the file.
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set journal synchronous mode")?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set journal busy timeout")?;

    run_migrations(&mut conn).context("failed to run journal migrations")?;
    Ok(conn)
}

fn run_worker(mut conn: Connection, jobs: mpsc::Receiver<JournalJob>) {
    let mut handled = 0u64;
    for job in jobs {
        job(&mut conn);
        handled += 1;
    }
    debug!("Journal worker handled {handled} job(s)");
    info!("Journal worker shutting down");
}

impl Database {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create journal directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<JournalJob>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let path = db_path.clone();

        let thread = thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || match open_connection(&path) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        run_worker(conn, jobs_rx);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn journal worker thread")?;

        ready_rx
            .recv()
            .context("journal worker exited before signaling readiness")??;

        info!("Session journal opened at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: Some(jobs_tx),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Runs `task` on the journal thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.worker.submit(Box::new(move |conn| {
            // Caller gave up (e.g. its task was aborted); nothing to report to.
            let _ = reply_tx.send(task(conn));
        }))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("journal worker dropped the request"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn concurrent_callers_share_one_connection() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("nested").join("journal.sqlite3")).unwrap();

        db.execute(|conn| {
            conn.execute_batch("CREATE TABLE marks (n INTEGER NOT NULL);")?;
            Ok(())
        })
        .await
        .unwrap();

        let pending: Vec<_> = (0..5)
            .map(|n| {
                let db = db.clone();
                tokio::spawn(async move {
                    db.execute(move |conn| {
                        conn.execute("INSERT INTO marks (n) VALUES (?1)", [n])?;
                        Ok(())
                    })
                    .await
                })
            })
            .collect();
        for job in pending {
            job.await.unwrap().unwrap();
        }

        let count: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM marks", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn task_errors_reach_the_caller() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("journal.sqlite3")).unwrap();

        let err = db
            .execute(|conn| {
                conn.execute("INSERT INTO no_such_table VALUES (1)", [])?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no_such_table"), "{err}");

        // The worker survives a failed job.
        let version: i64 = db
            .execute(|conn| Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert!(version >= 1);
    }
}
