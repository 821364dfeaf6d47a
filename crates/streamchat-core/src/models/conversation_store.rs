use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::thread::Thread;
use super::turn::Turn;
use crate::repositories::ThreadRepository;

/// Calendar-day bucket used by the thread picker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecencyBucket {
    Today,
    Yesterday,
    /// 2 to 7 days ago
    PastWeek,
    /// 8 to 30 days ago
    PastMonth,
    Older,
}

impl RecencyBucket {
    pub const ALL: [RecencyBucket; 5] = [
        Self::Today,
        Self::Yesterday,
        Self::PastWeek,
        Self::PastMonth,
        Self::Older,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Today => "Today",
            Self::Yesterday => "Yesterday",
            Self::PastWeek => "Previous 7 days",
            Self::PastMonth => "Previous 30 days",
            Self::Older => "Older",
        }
    }

    fn for_days_ago(days: i64) -> Self {
        match days {
            ..=0 => Self::Today,
            1 => Self::Yesterday,
            2..=7 => Self::PastWeek,
            8..=30 => Self::PastMonth,
            _ => Self::Older,
        }
    }
}

/// Threads partitioned by [`RecencyBucket`], newest first within each bucket
#[derive(Debug, Default)]
pub struct RecencyGroups<'a> {
    pub today: Vec<&'a Thread>,
    pub yesterday: Vec<&'a Thread>,
    pub past_week: Vec<&'a Thread>,
    pub past_month: Vec<&'a Thread>,
    pub older: Vec<&'a Thread>,
}

impl<'a> RecencyGroups<'a> {
    pub fn bucket(&self, bucket: RecencyBucket) -> &[&'a Thread] {
        match bucket {
            RecencyBucket::Today => &self.today,
            RecencyBucket::Yesterday => &self.yesterday,
            RecencyBucket::PastWeek => &self.past_week,
            RecencyBucket::PastMonth => &self.past_month,
            RecencyBucket::Older => &self.older,
        }
    }

    fn bucket_mut(&mut self, bucket: RecencyBucket) -> &mut Vec<&'a Thread> {
        match bucket {
            RecencyBucket::Today => &mut self.today,
            RecencyBucket::Yesterday => &mut self.yesterday,
            RecencyBucket::PastWeek => &mut self.past_week,
            RecencyBucket::PastMonth => &mut self.past_month,
            RecencyBucket::Older => &mut self.older,
        }
    }

    /// Non-empty buckets in display order
    pub fn iter(&self) -> impl Iterator<Item = (RecencyBucket, &[&'a Thread])> + '_ {
        RecencyBucket::ALL
            .into_iter()
            .map(|bucket| (bucket, self.bucket(bucket)))
            .filter(|(_, threads)| !threads.is_empty())
    }

    pub fn len(&self) -> usize {
        RecencyBucket::ALL
            .into_iter()
            .map(|bucket| self.bucket(bucket).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory thread list plus the active thread reference, written through
/// to durable storage after every mutation
pub struct ConversationStore {
    repository: ThreadRepository,
    threads: Vec<Thread>,
    active_thread_id: Option<String>,
    system_prompt: Option<String>,
}

impl ConversationStore {
    /// Load threads and the system prompt. Storage problems are logged and
    /// produce an empty store rather than an error.
    pub async fn load(repository: ThreadRepository) -> Self {
        let mut threads = match repository.load_threads().await {
            Ok(threads) => threads,
            Err(e) => {
                warn!(error = ?e, "Failed to load threads, starting empty");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        threads.retain(|thread| seen.insert(thread.id.clone()));

        let settled: usize = threads.iter_mut().map(Thread::settle_interrupted).sum();
        if settled > 0 {
            info!(count = settled, "Settled turns left loading by an interrupted session");
        }

        let system_prompt = match repository.load_system_prompt().await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = ?e, "Failed to load system prompt");
                None
            }
        };

        debug!(count = threads.len(), "Conversation store loaded");
        Self {
            repository,
            threads,
            active_thread_id: None,
            system_prompt,
        }
    }

    /// All threads, newest first
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn thread(&self, id: &str) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.id == id)
    }

    pub fn active_thread_id(&self) -> Option<&str> {
        self.active_thread_id.as_deref()
    }

    pub fn active_thread(&self) -> Option<&Thread> {
        self.active_thread_id.as_deref().and_then(|id| self.thread(id))
    }

    /// Create a thread holding `initial_turns`, make it active and persist.
    /// Returns the new thread's id.
    pub async fn create_thread(
        &mut self,
        initial_turns: Vec<Turn>,
        created_at: DateTime<Utc>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.threads
            .insert(0, Thread::new(id.clone(), created_at, initial_turns));
        self.active_thread_id = Some(id.clone());
        info!(thread_id = %id, "Created thread");

        self.persist().await;
        id
    }

    /// Replace the active thread's turns and persist.
    /// Returns false, touching nothing, when no thread is active.
    pub async fn update_active_thread_turns(&mut self, turns: &[Turn]) -> bool {
        let Some(active_id) = self.active_thread_id.as_deref() else {
            return false;
        };
        let Some(thread) = self.threads.iter_mut().find(|thread| thread.id == active_id) else {
            return false;
        };

        thread.turns = turns.to_vec();
        self.persist().await;
        true
    }

    /// Partition threads by calendar day of creation, as seen in `now`'s time zone
    pub fn group_by_recency<Tz: TimeZone>(&self, now: DateTime<Tz>) -> RecencyGroups<'_> {
        let zone = now.timezone();
        let today = now.date_naive();

        let mut sorted: Vec<&Thread> = self.threads.iter().collect();
        sorted.sort_by_key(|thread| std::cmp::Reverse(thread.created_at));

        let mut groups = RecencyGroups::default();
        for thread in sorted {
            let created_day = thread.created_at.with_timezone(&zone).date_naive();
            let days_ago = (today - created_day).num_days();
            groups
                .bucket_mut(RecencyBucket::for_days_ago(days_ago))
                .push(thread);
        }
        groups
    }

    /// Delete every thread and persist the empty list
    pub async fn clear_all(&mut self) {
        let count = self.threads.len();
        self.threads.clear();
        self.active_thread_id = None;
        info!(count, "Cleared all threads");

        self.persist().await;
    }

    /// Make `id` the active thread. An unknown id clears the active reference.
    pub fn set_active_thread(&mut self, id: &str) -> Option<&Thread> {
        if self.thread(id).is_some() {
            self.active_thread_id = Some(id.to_string());
            debug!(thread_id = %id, "Activated thread");
            self.thread(id)
        } else {
            warn!(thread_id = %id, "Unknown thread, clearing active thread");
            self.active_thread_id = None;
            None
        }
    }

    pub fn clear_active(&mut self) {
        self.active_thread_id = None;
    }

    /// Remove a thread. Deleting the active thread leaves no thread active.
    pub async fn delete_thread(&mut self, id: &str) -> bool {
        let before = self.threads.len();
        self.threads.retain(|thread| thread.id != id);
        if self.threads.len() == before {
            return false;
        }

        if self.active_thread_id.as_deref() == Some(id) {
            self.active_thread_id = None;
        }
        info!(thread_id = %id, "Deleted thread");

        self.persist().await;
        true
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub async fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        if let Err(e) = self.repository.save_system_prompt(&prompt).await {
            warn!(error = ?e, "Failed to save system prompt");
        }
        self.system_prompt = Some(prompt);
    }

    async fn persist(&self) {
        if let Err(e) = self.repository.save_threads(&self.threads).await {
            warn!(error = ?e, "Failed to persist threads");
        }
    }
}
