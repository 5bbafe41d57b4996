use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::{params, Connection, Row};
use tokio::sync::oneshot;

mod migrations;

use crate::models::{Alarm, WeekdaySet};
use migrations::run_migrations;

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
            if self.sender.send(DbCommand::Shutdown).is_err() {
                error!("database worker was already gone at drop");
            }
            if handle.join().is_err() {
                error!("database worker panicked");
            }
        }
    }
}

/// Body of the worker thread: open the connection, apply migrations, signal
/// readiness, then serve tasks until shutdown.
fn worker_loop(
    path: PathBuf,
    ready_tx: mpsc::Sender<Result<()>>,
    command_rx: mpsc::Receiver<DbCommand>,
) {
    let mut conn = match Connection::open(&path) {
        Ok(conn) => conn,
        Err(err) => {
            let _ = ready_tx
                .send(Err(anyhow::Error::new(err).context("failed to open SQLite database")));
            return;
        }
    };

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("could not enable WAL mode: {err}");
    }
    if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
        error!("could not enable foreign keys: {err}");
    }

    let migrated = run_migrations(&mut conn).context("failed to run database migrations");
    if ready_tx.send(migrated).is_err() {
        return;
    }

    while let Ok(command) = command_rx.recv() {
        match command {
            DbCommand::Execute(task) => task(&mut conn),
            DbCommand::Shutdown => break,
        }
    }
    info!("database worker stopped");
}

fn alarm_from_row(row: &Row<'_>) -> Result<Alarm> {
    let days_csv: String = row.get(4)?;
    Ok(Alarm {
        id: row.get(0)?,
        hour: row.get::<_, i64>(1)? as u32,
        minute: row.get::<_, i64>(2)? as u32,
        enabled: row.get::<_, i64>(3)? != 0,
        days: WeekdaySet::from_csv(&days_csv)
            .with_context(|| format!("alarm row has invalid days '{days_csv}'"))?,
        label: row.get(5)?,
    })
}

const ALARM_COLUMNS: &str = "id, hour, minute, enabled, days, label";

/// Handle to the alarm database. The rusqlite connection lives on a
/// dedicated worker thread; callers submit closures and await the reply.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let path_for_worker = db_path.clone();
        let worker = thread::Builder::new()
            .name("chimer-db".into())
            .spawn(move || worker_loop(path_for_worker, ready_tx, command_rx))
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;
        info!("database ready at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = DbCommand::Execute(Box::new(move |conn| {
            // The caller may have given up waiting; nothing to do then.
            let _ = reply_tx.send(task(conn));
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| anyhow!("database worker rejected task: {err}"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the reply"))?
    }

    /// Inserts the alarm and returns its assigned id.
    pub async fn insert_alarm(&self, alarm: &Alarm) -> Result<i64> {
        let record = alarm.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO alarms (hour, minute, enabled, days, label)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    i64::from(record.hour),
                    i64::from(record.minute),
                    record.enabled as i64,
                    record.days.to_csv(),
                    record.label,
                ],
            )
            .with_context(|| "failed to insert alarm")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn update_alarm(&self, alarm: &Alarm) -> Result<()> {
        let record = alarm.clone();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE alarms
                     SET hour = ?1,
                         minute = ?2,
                         enabled = ?3,
                         days = ?4,
                         label = ?5
                     WHERE id = ?6",
                    params![
                        i64::from(record.hour),
                        i64::from(record.minute),
                        record.enabled as i64,
                        record.days.to_csv(),
                        record.label,
                        record.id,
                    ],
                )
                .with_context(|| "failed to update alarm")?;
            if changed == 0 {
                return Err(anyhow!("alarm {} does not exist", record.id));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_alarm_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE alarms SET enabled = ?1 WHERE id = ?2",
                    params![enabled as i64, id],
                )
                .with_context(|| "failed to toggle alarm")?;
            if changed == 0 {
                return Err(anyhow!("alarm {id} does not exist"));
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_alarm(&self, id: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM alarms WHERE id = ?1", params![id])
                .with_context(|| "failed to delete alarm")?;
            Ok(())
        })
        .await
    }

    pub async fn get_alarm(&self, id: i64) -> Result<Option<Alarm>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALARM_COLUMNS} FROM alarms WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(alarm_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_alarms(&self) -> Result<Vec<Alarm>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALARM_COLUMNS} FROM alarms ORDER BY hour, minute, id"
            ))?;
            let mut rows = stmt.query([])?;
            let mut alarms = Vec::new();
            while let Some(row) = rows.next()? {
                alarms.push(alarm_from_row(row)?);
            }
            Ok(alarms)
        })
        .await
    }

    pub async fn list_enabled_alarms(&self) -> Result<Vec<Alarm>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALARM_COLUMNS} FROM alarms WHERE enabled = 1 ORDER BY hour, minute, id"
            ))?;
            let mut rows = stmt.query([])?;
            let mut alarms = Vec::new();
            while let Some(row) = rows.next()? {
                alarms.push(alarm_from_row(row)?);
            }
            Ok(alarms)
        })
        .await
    }
}
