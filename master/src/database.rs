//! SQLite-backed persistence for the scheduling control plane
//!
//! One `rusqlite::Connection`, opened once, guarded by a tokio mutex at the
//! call site.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use shared::model::{
    Assignment, ResourceVector, Task, TaskHistoryRow, TaskOutcome, TaskStatus, TaskType, Worker,
    WorkerStats,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Manages the SQLite database backing the master.
pub struct SqliteStore {
    db_path: PathBuf,
    connection: tokio::sync::Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `db_path`, in WAL mode with
    /// `busy_timeout` and `foreign_keys` on, then runs schema migrations.
    pub async fn open<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create data directory {}", parent.display()))?;
            }
        }

        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(busy_timeout)?;

        let store = SqliteStore {
            db_path,
            connection: tokio::sync::Mutex::new(conn),
        };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        let conn = self.connection.lock().await;
        info!(path = %self.db_path.display(), "initializing scheduler database");

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                docker_image TEXT NOT NULL,
                command TEXT NOT NULL,
                req_cpu REAL NOT NULL,
                req_memory REAL NOT NULL,
                req_storage REAL NOT NULL,
                req_gpu REAL NOT NULL,
                task_type TEXT NOT NULL,
                sla_multiplier REAL NOT NULL,
                tau REAL NOT NULL,
                deadline REAL NOT NULL,
                status TEXT NOT NULL,
                created_at REAL NOT NULL,
                started_at REAL,
                completed_at REAL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
            "#,
            [],
        )
        .context("failed to create tasks table")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS assignments (
                task_id TEXT PRIMARY KEY,
                worker_id TEXT NOT NULL,
                assigned_at REAL NOT NULL,
                load_at_start REAL NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks (task_id)
            )
            "#,
            [],
        )
        .context("failed to create assignments table")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                task_id TEXT PRIMARY KEY,
                worker_id TEXT NOT NULL,
                status TEXT NOT NULL,
                logs TEXT NOT NULL,
                completed_at REAL NOT NULL,
                sla_success INTEGER NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks (task_id)
            )
            "#,
            [],
        )
        .context("failed to create results table")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS workers (
                worker_id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                total_cpu REAL NOT NULL DEFAULT 0,
                total_memory REAL NOT NULL DEFAULT 0,
                total_storage REAL NOT NULL DEFAULT 0,
                total_gpu REAL NOT NULL DEFAULT 0,
                allocated_cpu REAL NOT NULL DEFAULT 0,
                allocated_memory REAL NOT NULL DEFAULT 0,
                allocated_storage REAL NOT NULL DEFAULT 0,
                allocated_gpu REAL NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 0,
                last_heartbeat REAL NOT NULL DEFAULT 0
            )
            "#,
            [],
        )
        .context("failed to create workers table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_assignments_worker_id ON assignments(worker_id)",
            [],
        )?;

        info!("scheduler database initialization complete");
        Ok(())
    }

    /// Checkpoints the WAL, returning the number of frames checkpointed.
    pub async fn checkpoint_wal(&self) -> Result<i64> {
        let conn = self.connection.lock().await;
        let (_, log, checkpointed): (i64, i64, i64) = conn.query_row(
            "PRAGMA wal_checkpoint(PASSIVE)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let _ = log;
        Ok(checkpointed)
    }
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let task_type_raw: String = row.get("task_type")?;
    let status_raw: String = row.get("status")?;
    Ok(Task {
        task_id: row.get("task_id")?,
        user_id: row.get("user_id")?,
        docker_image: row.get("docker_image")?,
        command: row.get("command")?,
        req_cpu: row.get("req_cpu")?,
        req_memory: row.get("req_memory")?,
        req_storage: row.get("req_storage")?,
        req_gpu: row.get("req_gpu")?,
        task_type: TaskType::parse(&task_type_raw).unwrap_or(TaskType::Mixed),
        sla_multiplier: row.get("sla_multiplier")?,
        tau: row.get("tau")?,
        deadline: row.get("deadline")?,
        status: parse_status(&status_raw),
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        retry_count: row.get("retry_count")?,
        last_error: row.get("last_error")?,
    })
}

fn status_wire(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn parse_status(raw: &str) -> TaskStatus {
    match raw {
        "pending" => TaskStatus::Pending,
        "queued" => TaskStatus::Queued,
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "cancelled" => TaskStatus::Cancelled,
        _ => TaskStatus::Pending,
    }
}

impl SqliteStore {
    pub async fn create_task(&self, task: &Task) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            r#"
            INSERT INTO tasks (
                task_id, user_id, docker_image, command, req_cpu, req_memory, req_storage,
                req_gpu, task_type, sla_multiplier, tau, deadline, status, created_at,
                started_at, completed_at, retry_count, last_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
            params![
                task.task_id,
                task.user_id,
                task.docker_image,
                task.command,
                task.req_cpu,
                task.req_memory,
                task.req_storage,
                task.req_gpu,
                task.task_type.wire_name(),
                task.sla_multiplier,
                task.tau,
                task.deadline,
                status_wire(task.status),
                task.created_at,
                task.started_at,
                task.completed_at,
                task.retry_count,
                task.last_error,
            ],
        )
        .context("failed to insert task")?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE task_id = ?1")?;
        let task = stmt
            .query_row(params![task_id], row_to_task)
            .optional()
            .context("failed to query task")?;
        Ok(task)
    }

    pub async fn update_task_status(&self, task_id: &str, status: TaskStatus, timestamp: f64) -> Result<()> {
        let conn = self.connection.lock().await;
        // Cancel stickiness: never overwrite a cancelled task's status with
        // anything else.
        conn.execute(
            "UPDATE tasks SET status = ?1,
                started_at = CASE WHEN ?1 = 'running' THEN ?2 ELSE started_at END,
                completed_at = CASE WHEN ?1 IN ('completed', 'failed', 'cancelled') THEN ?2 ELSE completed_at END
             WHERE task_id = ?3 AND status != 'cancelled'",
            params![status_wire(status), timestamp, task_id],
        )
        .context("failed to update task status")?;
        Ok(())
    }

    pub async fn update_task_sla_fields(
        &self,
        task_id: &str,
        deadline: f64,
        tau: f64,
        task_type: TaskType,
    ) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "UPDATE tasks SET deadline = ?1, tau = ?2, task_type = ?3 WHERE task_id = ?4",
            params![deadline, tau, task_type.wire_name(), task_id],
        )
        .context("failed to update task SLA fields")?;
        Ok(())
    }

    pub async fn record_retry(&self, task_id: &str, retry_count: u32, last_error: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "UPDATE tasks SET retry_count = ?1, last_error = ?2 WHERE task_id = ?3 AND status != 'cancelled'",
            params![retry_count, last_error, task_id],
        )
        .context("failed to record retry")?;
        Ok(())
    }

    pub async fn list_queued_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE status = 'queued' ORDER BY created_at ASC")?;
        let rows = stmt
            .query_map([], row_to_task)
            .context("failed to query queued tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    pub async fn create_assignment(&self, assignment: &Assignment) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO assignments (task_id, worker_id, assigned_at, load_at_start)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                assignment.task_id,
                assignment.worker_id,
                assignment.assigned_at,
                assignment.load_at_start
            ],
        )
        .context("failed to insert assignment")?;
        Ok(())
    }

    pub async fn get_assignment(&self, task_id: &str) -> Result<Option<Assignment>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare("SELECT task_id, worker_id, assigned_at, load_at_start FROM assignments WHERE task_id = ?1")?;
        let assignment = stmt
            .query_row(params![task_id], |row| {
                Ok(Assignment {
                    task_id: row.get(0)?,
                    worker_id: row.get(1)?,
                    assigned_at: row.get(2)?,
                    load_at_start: row.get(3)?,
                })
            })
            .optional()
            .context("failed to query assignment")?;
        Ok(assignment)
    }

    pub async fn create_result(&self, outcome: &TaskOutcome) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO results (task_id, worker_id, status, logs, completed_at, sla_success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                outcome.task_id,
                outcome.worker_id,
                status_wire(outcome.status),
                outcome.logs,
                outcome.completed_at,
                outcome.sla_success as i64,
            ],
        )
        .context("failed to insert result")?;
        Ok(())
    }

    pub async fn get_result(&self, task_id: &str) -> Result<Option<TaskOutcome>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT task_id, worker_id, status, logs, completed_at, sla_success FROM results WHERE task_id = ?1",
        )?;
        let outcome = stmt
            .query_row(params![task_id], |row| {
                let status_raw: String = row.get(2)?;
                let sla_success: i64 = row.get(5)?;
                Ok(TaskOutcome {
                    task_id: row.get(0)?,
                    worker_id: row.get(1)?,
                    status: parse_status(&status_raw),
                    logs: row.get(3)?,
                    completed_at: row.get(4)?,
                    sla_success: sla_success != 0,
                })
            })
            .optional()
            .context("failed to query result")?;
        Ok(outcome)
    }

    pub async fn register_worker(&self, worker: &Worker) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO workers (
                worker_id, address, total_cpu, total_memory, total_storage, total_gpu,
                allocated_cpu, allocated_memory, allocated_storage, allocated_gpu,
                is_active, last_heartbeat
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                worker.worker_id,
                worker.address,
                worker.total.cpu,
                worker.total.memory,
                worker.total.storage,
                worker.total.gpu,
                worker.allocated.cpu,
                worker.allocated.memory,
                worker.allocated.storage,
                worker.allocated.gpu,
                worker.is_active as i64,
                worker.last_heartbeat,
            ],
        )
        .context("failed to register worker")?;
        Ok(())
    }

    pub async fn activate_worker(&self, worker_id: &str, total: &ResourceVector) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "UPDATE workers SET total_cpu = ?1, total_memory = ?2, total_storage = ?3, total_gpu = ?4, is_active = 1
             WHERE worker_id = ?5",
            params![total.cpu, total.memory, total.storage, total.gpu, worker_id],
        )
        .context("failed to activate worker")?;
        Ok(())
    }

    pub async fn update_worker_heartbeat(&self, worker_id: &str, now: f64) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "UPDATE workers SET last_heartbeat = ?1, is_active = 1 WHERE worker_id = ?2",
            params![now, worker_id],
        )
        .context("failed to update worker heartbeat")?;
        Ok(())
    }

    pub async fn update_worker_allocation(&self, worker_id: &str, allocated: &ResourceVector) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "UPDATE workers SET allocated_cpu = ?1, allocated_memory = ?2, allocated_storage = ?3, allocated_gpu = ?4
             WHERE worker_id = ?5",
            params![allocated.cpu, allocated.memory, allocated.storage, allocated.gpu, worker_id],
        )
        .context("failed to update worker allocation")?;
        Ok(())
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM workers")?;
        let rows = stmt.query_map([], |row| {
            let is_active: i64 = row.get("is_active")?;
            Ok(Worker {
                worker_id: row.get("worker_id")?,
                address: row.get("address")?,
                total: ResourceVector {
                    cpu: row.get("total_cpu")?,
                    memory: row.get("total_memory")?,
                    storage: row.get("total_storage")?,
                    gpu: row.get("total_gpu")?,
                },
                allocated: ResourceVector {
                    cpu: row.get("allocated_cpu")?,
                    memory: row.get("allocated_memory")?,
                    storage: row.get("allocated_storage")?,
                    gpu: row.get("allocated_gpu")?,
                },
                is_active: is_active != 0,
                last_heartbeat: row.get("last_heartbeat")?,
                running_tasks: Vec::new(),
            })
        })?;
        let mut workers = Vec::new();
        for row in rows {
            workers.push(row?);
        }
        Ok(workers)
    }

    pub async fn delete_worker(&self, worker_id: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute("DELETE FROM workers WHERE worker_id = ?1", params![worker_id])
            .context("failed to delete worker")?;
        Ok(())
    }

    pub async fn get_task_history(&self, since: f64, until: f64) -> Result<Vec<TaskHistoryRow>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.task_type, a.worker_id, t.created_at, r.completed_at, t.started_at,
                   r.sla_success, t.req_cpu, t.req_memory, t.req_storage, t.req_gpu,
                   a.load_at_start, t.tau, t.sla_multiplier
            FROM tasks t
            JOIN assignments a ON a.task_id = t.task_id
            JOIN results r ON r.task_id = t.task_id
            WHERE t.status IN ('completed', 'failed')
              AND t.created_at >= ?1 AND t.created_at <= ?2
            "#,
        )?;
        let rows = stmt.query_map(params![since, until], |row| {
            let task_type_raw: String = row.get(0)?;
            let started_at: Option<f64> = row.get(4)?;
            let completed_at: f64 = row.get(3)?;
            let sla_success: i64 = row.get(5)?;
            let task_type = TaskType::parse(&task_type_raw);
            Ok((task_type, row, started_at, completed_at, sla_success))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (task_type, row, started_at, completed_at, sla_success) = row?;
            let Some(task_type) = task_type else {
                continue;
            };
            let arrival_time: f64 = row.get(2)?;
            let started_at = started_at.unwrap_or(arrival_time);
            history.push(TaskHistoryRow {
                task_type,
                worker_id: row.get(1)?,
                arrival_time,
                finish_time: completed_at,
                actual_runtime: (completed_at - started_at).max(0.0),
                sla_success: sla_success != 0,
                requested: ResourceVector {
                    cpu: row.get(6)?,
                    memory: row.get(7)?,
                    storage: row.get(8)?,
                    gpu: row.get(9)?,
                },
                load_at_start: row.get(10)?,
                tau: row.get(11)?,
                sla_multiplier: row.get(12)?,
            });
        }
        Ok(history)
    }

    pub async fn get_worker_stats(&self, since: f64, until: f64) -> Result<Vec<WorkerStats>> {
        let history = self.get_task_history(since, until).await?;
        let mut by_worker: std::collections::HashMap<String, WorkerStats> = std::collections::HashMap::new();

        for row in &history {
            let stats = by_worker.entry(row.worker_id.clone()).or_insert_with(|| WorkerStats {
                worker_id: row.worker_id.clone(),
                ..WorkerStats::default()
            });
            stats.tasks_run += 1;
            if !row.sla_success {
                stats.sla_violations += 1;
            }
            if row.load_at_start > 0.8 {
                stats.overload_time += row.actual_runtime;
            }
            stats.total_time += row.actual_runtime;
            stats.cpu_seconds += row.requested.cpu * row.actual_runtime;
            stats.memory_seconds += row.requested.memory * row.actual_runtime;
            stats.gpu_seconds += row.requested.gpu * row.actual_runtime;
        }

        for stats in by_worker.values_mut() {
            let count = history.iter().filter(|r| r.worker_id == stats.worker_id).count();
            if count > 0 {
                let sum_load: f64 = history
                    .iter()
                    .filter(|r| r.worker_id == stats.worker_id)
                    .map(|r| r.load_at_start)
                    .sum();
                stats.average_load = sum_load / count as f64;
            }
        }

        Ok(by_worker.into_values().collect())
    }
}
