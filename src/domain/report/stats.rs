use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::job::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusMetrics {
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub error: usize,
    pub stopped: usize,
}

/// Progress of every scan issued on behalf of one requester.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub requester: String,
    pub total: usize,
    pub completed: usize,
    pub metrics: StatusMetrics,
    pub ongoing: bool,
}

impl ScanStats {
    /// Builds the stats from `(track_id, status)` pairs; each track id is
    /// counted at most once per status.
    pub fn from_rows<'a>(
        requester: impl Into<String>,
        rows: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut seen: HashMap<&'static str, HashSet<&'a str>> = HashMap::new();
        let mut metrics = StatusMetrics::default();
        for (track_id, status) in rows {
            let bucket = bucket_of(status);
            if !seen.entry(bucket).or_default().insert(track_id) {
                continue;
            }
            match bucket {
                "pending" => metrics.pending += 1,
                "running" => metrics.running += 1,
                "success" => metrics.success += 1,
                "stopped" => metrics.stopped += 1,
                _ => metrics.error += 1,
            }
        }

        let completed = metrics.success + metrics.error + metrics.stopped;
        let total = completed + metrics.pending + metrics.running;
        ScanStats {
            requester: requester.into(),
            total,
            completed,
            metrics,
            ongoing: completed < total,
        }
    }
}

fn bucket_of(status: &str) -> &'static str {
    match status.parse::<JobStatus>() {
        Ok(JobStatus::Pending | JobStatus::Scheduled) => "pending",
        Ok(JobStatus::Running) => "running",
        Ok(JobStatus::Success) => "success",
        Ok(JobStatus::Stopped) => "stopped",
        Ok(JobStatus::Error) | Err(_) => "error",
    }
}
