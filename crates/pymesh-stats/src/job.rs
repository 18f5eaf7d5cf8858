//! Probe job records

use std::time::{Duration, Instant};

use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};
use pymesh_core::Mac;
use serde::{Deserialize, Serialize};

use crate::error::{StatsError, StatsResult};

/// Job lifecycle
///
/// ```text
/// Started -> WaitAns -> Started -> ... -> WaitAns -> Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Next probe goes out on the coming tick
    Started,
    /// Probe sent, waiting for its ACK or the period to run out
    WaitAns,
    /// All repetitions done
    Done,
}

/// Parameters for a new probe job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRequest {
    /// Node to probe
    pub mac: Mac,
    pub repetitions: u16,
    /// Seconds to wait for each ACK
    pub period_secs: u32,
    /// Lower bound of the random pause after each probe
    pub sleep_min_secs: u32,
    /// Upper bound of the random pause after each probe
    pub sleep_max_secs: u32,
}

impl StatRequest {
    pub fn new(mac: Mac, repetitions: u16, period_secs: u32) -> Self {
        Self {
            mac,
            repetitions,
            period_secs,
            sleep_min_secs: 0,
            sleep_max_secs: 0,
        }
    }

    pub fn with_sleep(mut self, min_secs: u32, max_secs: u32) -> Self {
        self.sleep_min_secs = min_secs;
        self.sleep_max_secs = max_secs;
        self
    }

    pub fn validate(&self) -> StatsResult<()> {
        if self.mac == 0 {
            return Err(StatsError::invalid("target mac must be non-zero"));
        }
        if self.repetitions == 0 {
            return Err(StatsError::invalid("repetitions must be at least 1"));
        }
        if self.period_secs == 0 {
            return Err(StatsError::invalid("period must be at least 1s"));
        }
        if self.sleep_min_secs > self.sleep_max_secs {
            return Err(StatsError::invalid(format!(
                "sleep bounds reversed: {} > {}",
                self.sleep_min_secs, self.sleep_max_secs
            )));
        }
        Ok(())
    }
}

/// One reliability-probing job, persisted as a JSON line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatJob {
    pub id: u32,
    pub mac: Mac,
    pub repetitions: u16,
    pub period_secs: u32,
    #[serde(rename = "s1")]
    pub sleep_min_secs: u32,
    #[serde(rename = "s2")]
    pub sleep_max_secs: u32,
    /// Probes acknowledged
    pub ack_num: u16,
    /// Probes sent
    pub last_mess_num: u16,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    /// Message id of the probe in flight
    #[serde(skip)]
    pub(crate) probe_id: u16,
    #[serde(skip)]
    pub(crate) sent_at: Option<Instant>,
    /// Post-probe pause ends here
    #[serde(skip)]
    pub(crate) resume_at: Option<Instant>,
}

impl StatJob {
    pub fn new(id: u32, request: &StatRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            mac: request.mac,
            repetitions: request.repetitions,
            period_secs: request.period_secs,
            sleep_min_secs: request.sleep_min_secs,
            sleep_max_secs: request.sleep_max_secs,
            ack_num: 0,
            last_mess_num: 0,
            state: JobState::Started,
            created_at,
            probe_id: 0,
            sent_at: None,
            resume_at: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(u64::from(self.period_secs))
    }

    /// Whether the post-probe pause is still running
    pub fn is_sleeping(&self, now: Instant) -> bool {
        self.resume_at.is_some_and(|at| now < at)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            mac: self.mac,
            repetitions: self.repetitions,
            sent: self.last_mess_num,
            acked: self.ack_num,
            state: self.state,
            success_rate: if self.last_mess_num == 0 {
                0.0
            } else {
                f32::from(self.ack_num) / f32::from(self.last_mess_num)
            },
        }
    }
}

/// Progress of one job as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: u32,
    pub mac: Mac,
    pub repetitions: u16,
    pub sent: u16,
    pub acked: u16,
    pub state: JobState,
    /// Acked over sent, 0 before the first probe
    pub success_rate: f32,
}

/// Body of a probe message: `["ST"][job_id:u32][seq:u16]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePayload {
    pub job_id: u32,
    pub seq: u16,
}

impl ProbePayload {
    pub const MAGIC: [u8; 2] = *b"ST";
    pub const PACKED_SIZE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::PACKED_SIZE);
        buf.put_slice(&Self::MAGIC);
        buf.put_u32(self.job_id);
        buf.put_u16(self.seq);
        buf
    }

    /// Recognize a probe among received payloads
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != Self::PACKED_SIZE || data[..2] != Self::MAGIC {
            return None;
        }
        let mut buf = &data[2..];
        Some(Self {
            job_id: buf.get_u32(),
            seq: buf.get_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(StatRequest::new(0x10, 3, 10).validate().is_ok());
        assert!(StatRequest::new(0, 3, 10).validate().is_err());
        assert!(StatRequest::new(0x10, 0, 10).validate().is_err());
        assert!(StatRequest::new(0x10, 3, 0).validate().is_err());
        assert!(
            StatRequest::new(0x10, 3, 10)
                .with_sleep(5, 1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_job_json_line() {
        let job = StatJob::new(4, &StatRequest::new(0x10, 3, 10).with_sleep(1, 2), Utc::now());
        let line = serde_json::to_string(&job).unwrap();

        assert!(line.contains("\"state\":\"STARTED\""));
        assert!(line.contains("\"s1\":1"));
        assert!(!line.contains('\n'));

        let back: StatJob = serde_json::from_str(&line).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_wait_ans_spelling() {
        let json = serde_json::to_string(&JobState::WaitAns).unwrap();
        assert_eq!(json, "\"WAIT_ANS\"");
    }

    #[test]
    fn test_probe_payload() {
        let probe = ProbePayload { job_id: 7, seq: 2 };
        let bytes = probe.encode();
        assert_eq!(&bytes[..2], b"ST");
        assert_eq!(ProbePayload::decode(&bytes), Some(probe));
        assert_eq!(ProbePayload::decode(b"hello"), None);
    }

    #[test]
    fn test_summary_rate() {
        let mut job = StatJob::new(1, &StatRequest::new(0x10, 4, 10), Utc::now());
        assert_eq!(job.summary().success_rate, 0.0);
        job.last_mess_num = 4;
        job.ack_num = 3;
        assert_eq!(job.summary().success_rate, 0.75);
    }
}
