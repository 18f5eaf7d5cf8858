//! JSON-lines job file
//!
//! One [`StatJob`] per line. New jobs are appended; the whole file is
//! rewritten (temp file + rename) when a job completes, when jobs are
//! deleted and on shutdown. When a job id appears on several lines the last
//! one wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

use crate::error::StatsResult;
use crate::job::{JobState, StatJob};

#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> StatsResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Read every job, skipping lines that do not parse
    ///
    /// Jobs that were waiting for an ACK when the file was written restart
    /// at `Started`; the in-flight probe is lost with the reset.
    pub async fn load(&self) -> StatsResult<BTreeMap<u32, StatJob>> {
        let mut jobs = BTreeMap::new();
        if !tokio::fs::try_exists(&self.path).await? {
            debug!(path = ?self.path, "No statistics file, starting fresh");
            return Ok(jobs);
        }

        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut skipped = 0;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StatJob>(&line) {
                Ok(mut job) => {
                    if job.state == JobState::WaitAns {
                        job.state = JobState::Started;
                    }
                    jobs.insert(job.id, job);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(error = %e, "Failed to parse statistics line, skipping");
                }
            }
        }

        info!(path = ?self.path, jobs = jobs.len(), skipped, "Loaded statistics jobs");
        Ok(jobs)
    }

    /// Append one job line
    pub async fn append(&self, job: &StatJob) -> StatsResult<()> {
        self.ensure_parent().await?;
        let mut line = serde_json::to_string(job)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Replace the file with exactly these jobs
    pub async fn rewrite<'a>(&self, jobs: impl IntoIterator<Item = &'a StatJob>) -> StatsResult<()> {
        self.ensure_parent().await?;
        let temp_path = self.path.with_extension("tmp");

        {
            let file = File::create(&temp_path).await?;
            let mut writer = BufWriter::new(file);
            for job in jobs {
                let line = serde_json::to_string(job)?;
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            writer.flush().await?;
        }

        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!(path = ?self.path, "Rewrote statistics file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::job::StatRequest;

    fn job(id: u32) -> StatJob {
        StatJob::new(id, &StatRequest::new(0x10, 3, 10), Utc::now())
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("none.jsonl"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_and_load_last_wins() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("nested/stats.jsonl"));

        let mut first = job(1);
        store.append(&first).await.unwrap();
        store.append(&job(2)).await.unwrap();
        first.state = JobState::Done;
        store.append(&first).await.unwrap();

        let jobs = store.load().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[&1].state, JobState::Done);
    }

    #[tokio::test]
    async fn test_corrupt_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.jsonl");
        let good = serde_json::to_string(&job(3)).unwrap();
        let contents = format!("{{not json\n\n{}\n{{\"id\":4}}\n", good);
        tokio::fs::write(&path, contents).await.unwrap();

        let jobs = JobStore::new(&path).load().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs.contains_key(&3));
    }

    #[tokio::test]
    async fn test_wait_ans_reloads_as_started() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("stats.jsonl"));
        let mut waiting = job(1);
        waiting.state = JobState::WaitAns;
        store.append(&waiting).await.unwrap();

        let jobs = store.load().await.unwrap();
        assert_eq!(jobs[&1].state, JobState::Started);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("stats.jsonl"));
        for id in 1..=3 {
            store.append(&job(id)).await.unwrap();
        }

        let keep = job(2);
        store.rewrite([&keep]).await.unwrap();

        let jobs = store.load().await.unwrap();
        assert_eq!(jobs.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert!(!dir.path().join("stats.tmp").exists());
    }
}
