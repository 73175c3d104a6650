//! Thread table: one isolated session per delegation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    Idle,
    Running,
    Finished,
}

#[derive(Clone, Debug)]
pub struct ThreadRecord {
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: ThreadState,
}

impl ThreadRecord {
    /// Idle and finished threads expire `ttl` after their last transition.
    /// Running threads never expire.
    fn expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let since = match self.state {
            ThreadState::Running => return false,
            ThreadState::Idle => self.created_at,
            ThreadState::Finished => self.finished_at.unwrap_or(self.created_at),
        };
        (now - since).to_std().is_ok_and(|age| age >= ttl)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ThreadError {
    #[error("thread {0} not found")]
    NotFound(String),
    #[error("thread {0} already has a run")]
    AlreadyRun(String),
}

#[derive(Default)]
pub struct ThreadTable {
    threads: DashMap<String, ThreadRecord>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> (String, DateTime<Utc>) {
        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now();
        let _ = self.threads.insert(
            id.clone(),
            ThreadRecord {
                created_at,
                finished_at: None,
                state: ThreadState::Idle,
            },
        );
        (id, created_at)
    }

    /// Claim the thread's single run. Only an idle thread can be claimed.
    pub fn begin_run(&self, id: &str) -> Result<(), ThreadError> {
        match self.threads.entry(id.to_string()) {
            Entry::Vacant(_) => Err(ThreadError::NotFound(id.to_string())),
            Entry::Occupied(mut entry) => {
                if entry.get().state != ThreadState::Idle {
                    return Err(ThreadError::AlreadyRun(id.to_string()));
                }
                entry.get_mut().state = ThreadState::Running;
                Ok(())
            }
        }
    }

    pub fn finish_run(&self, id: &str) {
        if let Some(mut record) = self.threads.get_mut(id) {
            record.state = ThreadState::Finished;
            record.finished_at = Some(Utc::now());
        }
    }

    /// Drop threads abandoned by their clients. Returns how many were removed.
    pub fn evict_expired(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let before = self.threads.len();
        self.threads.retain(|_, record| !record.expired(ttl, now));
        before.saturating_sub(self.threads.len())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.threads.contains_key(id)
    }

    pub fn state(&self, id: &str) -> Option<ThreadState> {
        self.threads.get(id).map(|r| r.state)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.threads.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
