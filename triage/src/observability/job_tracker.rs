use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::info;

use crate::model::{JobId, JobStatus};

/// Format a table with headers and rows
fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    output.push_str(&format!("| {} |\n", header_line.join(" | ")));

    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&format!("|-{}-|\n", separator.join("-|-")));

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(cell.len());
                format!("{:width$}", cell, width = width)
            })
            .collect();
        output.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    output
}

#[derive(Debug, Clone, Default)]
pub struct JobProgress {
    pub total_records: usize,
    pub processed_records: usize,
    pub included_records: usize,
}

impl JobProgress {
    pub fn percentage(&self) -> f32 {
        if self.total_records == 0 {
            0.0
        } else {
            (self.processed_records as f32 / self.total_records as f32) * 100.0
        }
    }

    fn format_progress(&self) -> String {
        format!(
            "{}/{} ({:.0}%)",
            self.processed_records,
            self.total_records,
            self.percentage()
        )
    }
}

#[derive(Debug, Clone)]
pub struct JobEntry {
    pub job_id: JobId,
    pub owner_id: i64,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub started_at: Instant,
}

impl JobEntry {
    fn new(job_id: JobId, owner_id: i64) -> Self {
        Self {
            job_id,
            owner_id,
            status: JobStatus::Created,
            progress: JobProgress::default(),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn format_elapsed(&self) -> String {
        let secs = self.elapsed_secs();
        if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}s", secs)
        }
    }
}

/// Thread-safe tracker for jobs currently being driven by a runner.
#[derive(Clone)]
pub struct JobTracker {
    active_jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            active_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a job and log the status table.
    pub fn register_job(&self, job_id: JobId, owner_id: i64) {
        let entry = JobEntry::new(job_id, owner_id);
        self.active_jobs.write().unwrap().insert(job_id, entry);
        if let Some(table) = self.get_jobs_table() {
            info!("Job Status Update:\n{}", table);
        }
    }

    /// Update the status of an active job and log the status table.
    pub fn set_status(&self, job_id: JobId, status: JobStatus) {
        {
            let mut jobs = self.active_jobs.write().unwrap();
            if let Some(entry) = jobs.get_mut(&job_id) {
                entry.status = status;
            }
        }
        // Log the status table after releasing the write lock
        if let Some(table) = self.get_jobs_table() {
            info!("Job Status Update:\n{}", table);
        }
    }

    pub fn set_total_records(&self, job_id: JobId, total: usize) {
        if let Some(entry) = self.active_jobs.write().unwrap().get_mut(&job_id) {
            entry.progress.total_records = total;
        }
    }

    pub fn increment_processed(&self, job_id: JobId, count: usize, included: usize) {
        if let Some(entry) = self.active_jobs.write().unwrap().get_mut(&job_id) {
            entry.progress.processed_records += count;
            entry.progress.included_records += included;
        }
    }

    /// Mark a job terminal, log the table, then drop the entry.
    pub fn finish_job(&self, job_id: JobId, status: JobStatus) {
        {
            let mut jobs = self.active_jobs.write().unwrap();
            if let Some(entry) = jobs.get_mut(&job_id) {
                entry.status = status;
            }
        }
        if let Some(table) = self.get_jobs_table() {
            info!("Job Status Update:\n{}", table);
        }
        self.active_jobs.write().unwrap().remove(&job_id);
    }

    pub fn job_count(&self) -> usize {
        self.active_jobs.read().unwrap().len()
    }

    pub fn get_job(&self, job_id: JobId) -> Option<JobEntry> {
        self.active_jobs.read().unwrap().get(&job_id).cloned()
    }

    pub fn get_jobs_table(&self) -> Option<String> {
        let jobs = self.active_jobs.read().unwrap();
        if jobs.is_empty() {
            return None;
        }

        let headers = ["Job", "Owner", "Status", "Progress", "Included", "Elapsed"];
        let mut rows: Vec<Vec<String>> = jobs
            .values()
            .map(|j| {
                vec![
                    j.job_id.to_string(),
                    j.owner_id.to_string(),
                    j.status.to_string(),
                    j.progress.format_progress(),
                    j.progress.included_records.to_string(),
                    j.format_elapsed(),
                ]
            })
            .collect();

        rows.sort_by(|a, b| a[0].cmp(&b[0]));

        Some(format!(
            "Active Jobs ({}):\n{}",
            jobs.len(),
            format_table(&headers, &rows)
        ))
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}
