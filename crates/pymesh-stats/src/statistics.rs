//! Probe job scheduler
//!
//! Each [`tick`](Statistics::tick) advances every unfinished job by at most
//! one step:
//!
//! - `Started`: queue one probe message and move to `WaitAns`
//! - `WaitAns`: on ACK or once the period has run out, either finish the
//!   job or pause for a random time in `[s1, s2]` and go back to `Started`
//!
//! The pause is a deadline checked on later ticks, never a blocking sleep.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pymesh_core::format_mac;
use pymesh_messaging::{Meshaging, MessageKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StatsError, StatsResult};
use crate::job::{JobState, JobSummary, ProbePayload, StatJob, StatRequest};
use crate::store::JobStore;

/// Status id that lists every job
pub const STATUS_ALL: u32 = 0;

/// Status id that deletes finished jobs
pub const STATUS_DELETE_DONE: u32 = 123_456;

/// Status id that deletes every job
pub const STATUS_DELETE_ALL: u32 = 654_321;

/// Default location of the job file
pub const DEFAULT_STATS_PATH: &str = "./pymesh-data/statistics.jsonl";

/// Configuration for [`Statistics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Job file; `None` keeps jobs in memory only
    pub path: Option<PathBuf>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(DEFAULT_STATS_PATH)),
        }
    }
}

impl StatsConfig {
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

/// What a status id asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusQuery {
    All,
    DeleteDone,
    DeleteAll,
    Job(u32),
}

impl From<u32> for StatusQuery {
    fn from(id: u32) -> Self {
        match id {
            STATUS_ALL => StatusQuery::All,
            STATUS_DELETE_DONE => StatusQuery::DeleteDone,
            STATUS_DELETE_ALL => StatusQuery::DeleteAll,
            id => StatusQuery::Job(id),
        }
    }
}

/// Answer to a status id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatusReport {
    Job(JobSummary),
    All(Vec<JobSummary>),
    /// Number of jobs removed
    Deleted(usize),
    NotFound(u32),
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsTick {
    pub probes_queued: usize,
    pub acked: usize,
    pub timed_out: usize,
    pub completed: usize,
}

/// Reliability-probe jobs for one node
#[derive(Debug)]
pub struct Statistics {
    jobs: BTreeMap<u32, StatJob>,
    store: Option<JobStore>,
    next_probe_id: u16,
}

impl Statistics {
    /// Jobs kept in memory only
    pub fn in_memory() -> Self {
        Self {
            jobs: BTreeMap::new(),
            store: None,
            next_probe_id: 1,
        }
    }

    /// Open the job file and reload surviving jobs
    pub async fn open(config: StatsConfig) -> StatsResult<Self> {
        let Some(path) = config.path else {
            return Ok(Self::in_memory());
        };
        let store = JobStore::new(path);
        let jobs = store.load().await?;
        Ok(Self {
            jobs,
            store: Some(store),
            next_probe_id: 1,
        })
    }

    pub fn job(&self, id: u32) -> Option<&StatJob> {
        self.jobs.get(&id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &StatJob> {
        self.jobs.values()
    }

    pub fn active_count(&self) -> usize {
        self.jobs.values().filter(|job| !job.is_done()).count()
    }

    /// Lowest positive id not in use and not reserved
    fn allocate_id(&self) -> StatsResult<u32> {
        (1..=u32::MAX)
            .filter(|id| *id != STATUS_DELETE_DONE && *id != STATUS_DELETE_ALL)
            .find(|id| !self.jobs.contains_key(id))
            .ok_or(StatsError::IdsExhausted)
    }

    /// Create a job; it sends its first probe on the next tick
    pub async fn start_job(
        &mut self,
        request: StatRequest,
        now: DateTime<Utc>,
    ) -> StatsResult<u32> {
        request.validate()?;
        let id = self.allocate_id()?;
        let job = StatJob::new(id, &request, now);

        if let Some(store) = &self.store {
            store.append(&job).await?;
        }
        info!(
            job = id,
            mac = %format_mac(request.mac),
            repetitions = request.repetitions,
            period_secs = request.period_secs,
            "Statistics job started"
        );
        self.jobs.insert(id, job);
        Ok(id)
    }

    fn advance_probe_id(&mut self) {
        self.next_probe_id = self.next_probe_id.wrapping_add(1).max(1);
    }

    /// Advance every unfinished job by one step
    pub async fn tick(
        &mut self,
        messaging: &mut Meshaging,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> StatsTick {
        let mut result = StatsTick::default();
        let ids: Vec<u32> = self
            .jobs
            .values()
            .filter(|job| !job.is_done() && !job.is_sleeping(now))
            .map(|job| job.id)
            .collect();

        for id in ids {
            let probe_id = self.next_probe_id;
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            match job.state {
                JobState::Started => {
                    let seq = job.last_mess_num.saturating_add(1);
                    let payload = ProbePayload { job_id: id, seq }.encode();
                    if !messaging.send(job.mac, MessageKind::Probe, payload, probe_id, now_utc) {
                        warn!(job = id, "Probe rejected by messaging");
                        continue;
                    }
                    job.probe_id = probe_id;
                    job.last_mess_num = seq;
                    job.sent_at = Some(now);
                    job.resume_at = None;
                    job.state = JobState::WaitAns;
                    debug!(job = id, seq, probe_id, "Probe queued");
                    result.probes_queued += 1;
                    self.advance_probe_id();
                }
                JobState::WaitAns => {
                    let acked = messaging.was_acked(job.mac, job.probe_id);
                    let timed_out = job
                        .sent_at
                        .is_none_or(|at| now.saturating_duration_since(at) >= job.period());
                    if !acked && !timed_out {
                        continue;
                    }

                    if acked {
                        job.ack_num = job.ack_num.saturating_add(1);
                        result.acked += 1;
                    } else {
                        result.timed_out += 1;
                        debug!(job = id, seq = job.last_mess_num, "Probe timed out");
                    }

                    if job.last_mess_num >= job.repetitions {
                        job.state = JobState::Done;
                        job.sent_at = None;
                        result.completed += 1;
                        info!(
                            job = id,
                            sent = job.last_mess_num,
                            acked = job.ack_num,
                            "Statistics job done"
                        );
                    } else {
                        let pause = random_pause(job.sleep_min_secs, job.sleep_max_secs);
                        job.resume_at = Some(now + pause);
                        job.state = JobState::Started;
                    }
                }
                JobState::Done => {}
            }
        }

        if result.completed > 0 {
            if let Err(e) = self.persist().await {
                warn!(error = %e, "Failed to persist statistics");
            }
        }
        result
    }

    /// Status of one job, all jobs, or a delete command
    pub async fn status(&mut self, id: u32) -> StatsResult<StatusReport> {
        let report = match StatusQuery::from(id) {
            StatusQuery::All => StatusReport::All(self.jobs.values().map(StatJob::summary).collect()),
            StatusQuery::Job(id) => match self.jobs.get(&id) {
                Some(job) => StatusReport::Job(job.summary()),
                None => StatusReport::NotFound(id),
            },
            StatusQuery::DeleteDone => {
                let before = self.jobs.len();
                self.jobs.retain(|_, job| !job.is_done());
                let deleted = before - self.jobs.len();
                self.persist().await?;
                info!(deleted, "Deleted finished statistics jobs");
                StatusReport::Deleted(deleted)
            }
            StatusQuery::DeleteAll => {
                let deleted = self.jobs.len();
                self.jobs.clear();
                self.persist().await?;
                info!(deleted, "Deleted all statistics jobs");
                StatusReport::Deleted(deleted)
            }
        };
        Ok(report)
    }

    /// Reload jobs as after a reboot
    ///
    /// Probes in flight are abandoned; their jobs go back to `Started`.
    pub async fn reload(&mut self) -> StatsResult<()> {
        match &self.store {
            Some(store) => {
                store.rewrite(self.jobs.values()).await?;
                self.jobs = store.load().await?;
            }
            None => {
                for job in self.jobs.values_mut() {
                    if job.state == JobState::WaitAns {
                        job.state = JobState::Started;
                    }
                    job.sent_at = None;
                    job.resume_at = None;
                }
            }
        }
        Ok(())
    }

    /// Flush job state before the node stops
    pub async fn shutdown(&self) -> StatsResult<()> {
        self.persist().await?;
        debug!(jobs = self.jobs.len(), "Statistics flushed");
        Ok(())
    }

    /// Write every job to disk
    pub async fn persist(&self) -> StatsResult<()> {
        match &self.store {
            Some(store) => store.rewrite(self.jobs.values()).await,
            None => Ok(()),
        }
    }
}

fn random_pause(min_secs: u32, max_secs: u32) -> Duration {
    if max_secs <= min_secs {
        return Duration::from_secs(u64::from(min_secs));
    }
    let secs = rand::rng().random_range(min_secs..=max_secs);
    Duration::from_secs(u64::from(secs))
}
