//! AOD offline trainer (SPEC_FULL.md §4.9)
//!
//! Runs on its own interval, independent of the live scheduler state: reads
//! history and per-worker stats from the persistence layer, fits θ by linear
//! regression, builds the affinity matrix and penalty vector, then publishes
//! the result via write-rename so RTS never observes a partially-written
//! params file.

use crate::database::SqliteStore;
use nalgebra::{Matrix4, Vector4};
use shared::model::{RiskWeights, RtsParams, TaskHistoryRow, TaskType, Theta, WorkerStats};
use shared::utils::{calculate_string_checksum, unix_timestamp};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Unweighted affinity/penalty coefficients (SPEC_FULL.md §4.9, resolved
/// open question in §10: the distilled spec names no alternative weights).
const AFFINITY_COEFFICIENTS: (f64, f64, f64) = (1.0, 1.0, 1.0);
const PENALTY_COEFFICIENTS: (f64, f64, f64) = (1.0, 1.0, 1.0);

const OUTLIER_MIN: f64 = -0.9;
const OUTLIER_MAX: f64 = 5.0;
const MIN_ROWS_FOR_REGRESSION: usize = 10;
const MIN_ROWS_PER_AFFINITY_CELL: usize = 3;
const RIDGE_DETERMINANT_THRESHOLD: f64 = 1e-10;
const RIDGE_LAMBDA: f64 = 0.01;

pub struct Trainer {
    store: std::sync::Arc<SqliteStore>,
    params_path: PathBuf,
    n_min_bootstrap: usize,
    n_min_training: usize,
    history_window_hours: f64,
}

impl Trainer {
    pub fn new(
        store: std::sync::Arc<SqliteStore>,
        params_path: PathBuf,
        n_min_bootstrap: usize,
        n_min_training: usize,
        history_window_hours: f64,
    ) -> Self {
        Trainer {
            store,
            params_path,
            n_min_bootstrap,
            n_min_training,
            history_window_hours,
        }
    }

    /// One training pass: fetch, fit, build, publish. Never panics; any
    /// irrecoverable condition degrades to defaults and is logged.
    pub async fn run_once(&self) -> anyhow::Result<()> {
        let until = unix_timestamp();
        let since = until - self.history_window_hours * 3600.0;

        let history = self.store.get_task_history(since, until).await?;
        let stats = self.store.get_worker_stats(since, until).await?;

        if history.len() < self.n_min_bootstrap {
            info!(
                rows = history.len(),
                minimum = self.n_min_bootstrap,
                "insufficient history for bootstrap, publishing defaults"
            );
            return self.publish(RtsParams::default()).await;
        }

        let theta = train_theta(&history, self.n_min_training);
        let affinity = build_affinity_matrix(&history);
        let penalty = build_penalty_vector(&stats);

        let params = RtsParams {
            theta,
            risk: RiskWeights::default(),
            affinity,
            penalty,
        };
        self.publish(params).await
    }

    /// Write-rename publication: write to a sibling temp file, then rename
    /// over the target path so readers never see a half-written file.
    async fn publish(&self, params: RtsParams) -> anyhow::Result<()> {
        let serialized = serde_json::to_string_pretty(&params)?;
        let tmp_path = tmp_path_for(&self.params_path);

        tokio::fs::write(&tmp_path, &serialized).await?;
        tokio::fs::rename(&tmp_path, &self.params_path).await?;

        info!(
            path = %self.params_path.display(),
            checksum = %calculate_string_checksum(&serialized),
            "published RTS parameters"
        );
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let name = tmp
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "params".to_string());
    tmp.set_file_name(format!("{name}.tmp"));
    tmp
}

/// Feature row for the θ regression: [cpu_ratio, mem_ratio, gpu_ratio, load].
fn features(row: &TaskHistoryRow) -> Option<(Vector4<f64>, f64)> {
    if row.tau <= 0.0 {
        return None;
    }
    let cpu_ratio = ratio(row.requested.cpu, row.load_at_start);
    let mem_ratio = ratio(row.requested.memory, row.load_at_start);
    let gpu_ratio = ratio(row.requested.gpu, row.load_at_start);
    let x = Vector4::new(cpu_ratio, mem_ratio, gpu_ratio, row.load_at_start);
    let y = row.actual_runtime / row.tau - 1.0;
    Some((x, y))
}

/// The history rows only record the request vector and the load at
/// assignment time, not a live "available" snapshot, so ratios reuse the
/// requested quantity directly; `load_at_start` already captures the
/// worker-side denominator the live Ê formula divides by.
fn ratio(requested: f64, load_at_start: f64) -> f64 {
    if load_at_start <= 0.0 {
        requested
    } else {
        requested / load_at_start
    }
}

fn train_theta(history: &[TaskHistoryRow], n_min_training: usize) -> Theta {
    let mut rows = Vec::new();
    for row in history {
        if let Some((x, y)) = features(row) {
            if y >= OUTLIER_MIN && y <= OUTLIER_MAX {
                rows.push((x, y));
            }
        }
    }

    if rows.len() < n_min_training.max(MIN_ROWS_FOR_REGRESSION) {
        return Theta::default();
    }

    let mut xtx = Matrix4::<f64>::zeros();
    let mut xty = Vector4::<f64>::zeros();
    for (x, y) in &rows {
        xtx += x * x.transpose();
        xty += x * *y;
    }

    let det = xtx.determinant();
    let solved = if det.abs() < RIDGE_DETERMINANT_THRESHOLD {
        let ridge = xtx + Matrix4::<f64>::identity() * RIDGE_LAMBDA;
        ridge.try_inverse().map(|inv| inv * xty)
    } else {
        xtx.try_inverse().map(|inv| inv * xty)
    };

    match solved {
        Some(theta_vec) => {
            let clamp = |v: f64| -> f64 {
                if v.is_finite() {
                    v.clamp(0.0, 2.0)
                } else {
                    0.0
                }
            };
            let theta = Theta {
                theta1: clamp(theta_vec[0]),
                theta2: clamp(theta_vec[1]),
                theta3: clamp(theta_vec[2]),
                theta4: clamp(theta_vec[3]),
            };
            if theta_vec.iter().any(|v| !v.is_finite() || *v < 0.0) {
                warn!(?theta_vec, "theta regression produced out-of-range values, clamped");
            }
            theta
        }
        None => {
            warn!("theta regression matrix was singular even after ridge, using defaults");
            Theta::default()
        }
    }
}

fn build_affinity_matrix(history: &[TaskHistoryRow]) -> HashMap<String, HashMap<String, f64>> {
    let mut by_type_worker: HashMap<TaskType, HashMap<String, Vec<&TaskHistoryRow>>> = HashMap::new();
    for row in history {
        by_type_worker
            .entry(row.task_type)
            .or_default()
            .entry(row.worker_id.clone())
            .or_default()
            .push(row);
    }

    let mut affinity = HashMap::new();
    for (task_type, by_worker) in &by_type_worker {
        let all_runtimes: Vec<f64> = by_worker.values().flatten().map(|r| r.actual_runtime).collect();
        if all_runtimes.is_empty() {
            continue;
        }
        let mean_all = all_runtimes.iter().sum::<f64>() / all_runtimes.len() as f64;

        let mut row_map = HashMap::new();
        for (worker_id, rows) in by_worker {
            if rows.len() < MIN_ROWS_PER_AFFINITY_CELL {
                row_map.insert(worker_id.clone(), 0.0);
                continue;
            }
            let mean_w = rows.iter().map(|r| r.actual_runtime).sum::<f64>() / rows.len() as f64;
            let speed = if mean_w > 0.0 { mean_all / mean_w } else { 0.0 };
            let violations = rows.iter().filter(|r| !r.sla_success).count() as f64;
            let sla = 1.0 - violations / rows.len() as f64;
            let overload_mean = rows.iter().map(|r| r.load_at_start).sum::<f64>() / rows.len() as f64;

            let (a1, a2, a3) = AFFINITY_COEFFICIENTS;
            let raw = a1 * speed + a2 * sla - a3 * overload_mean;
            row_map.insert(worker_id.clone(), raw.clamp(-5.0, 5.0));
        }
        affinity.insert(task_type.wire_name().to_string(), row_map);
    }
    affinity
}

fn build_penalty_vector(stats: &[WorkerStats]) -> HashMap<String, f64> {
    let max_energy = stats
        .iter()
        .map(|s| s.cpu_seconds + s.memory_seconds + s.gpu_seconds)
        .fold(0.0_f64, f64::max);

    let mut penalty = HashMap::new();
    for s in stats {
        if s.tasks_run == 0 {
            penalty.insert(s.worker_id.clone(), 0.0);
            continue;
        }
        let sla_fail = s.sla_violations as f64 / s.tasks_run as f64;
        let overload = if s.total_time > 0.0 { s.overload_time / s.total_time } else { 0.0 };
        let energy_sum = s.cpu_seconds + s.memory_seconds + s.gpu_seconds;
        let energy = if max_energy > 0.0 { energy_sum / max_energy } else { 0.0 };

        let (g1, g2, g3) = PENALTY_COEFFICIENTS;
        let raw = g1 * sla_fail + g2 * overload + g3 * energy;
        penalty.insert(s.worker_id.clone(), raw.clamp(0.0, 5.0));
    }
    penalty
}
