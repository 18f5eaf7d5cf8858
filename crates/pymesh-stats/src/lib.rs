//! # Pymesh Statistics
//!
//! Message-reliability probing between mesh nodes.
//!
//! A job sends a fixed number of probe messages to one node, waiting up to a
//! period for each ACK and pausing a random time between probes. Jobs are
//! kept in a JSON-lines file so they survive restarts.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pymesh_stats::{Statistics, StatsConfig, StatRequest};
//!
//! let mut stats = Statistics::open(StatsConfig::default()).await?;
//! let id = stats.start_job(StatRequest::new(0x10, 5, 10).with_sleep(1, 3), Utc::now()).await?;
//!
//! // every node tick
//! stats.tick(&mut messaging, Instant::now(), Utc::now()).await;
//!
//! let report = stats.status(id).await?;
//! ```

pub mod error;
pub mod job;
pub mod statistics;
pub mod store;

pub use error::{StatsError, StatsResult};
pub use job::{JobState, JobSummary, ProbePayload, StatJob, StatRequest};
pub use statistics::{
    DEFAULT_STATS_PATH, STATUS_ALL, STATUS_DELETE_ALL, STATUS_DELETE_DONE, Statistics,
    StatsConfig, StatsTick, StatusQuery, StatusReport,
};
pub use store::JobStore;
