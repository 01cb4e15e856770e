use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::job::Job;

/// In-memory table of generation jobs keyed by job id.
///
/// Each entry is written only by the runner that owns the job; status
/// readers take cloned snapshots and never hold a shard lock across awaits.
/// Once `capacity` jobs are stored, the oldest finished jobs are evicted to
/// make room. Concurrent inserts may overshoot the bound by the number of
/// racing submitters.
pub struct JobRegistry {
    jobs: DashMap<Uuid, Job>,
    capacity: usize,
}

impl JobRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, job: Job) -> Result<Uuid, RegistryError> {
        if self.jobs.len() >= self.capacity {
            let excess = self.jobs.len() + 1 - self.capacity;
            let evicted = self.evict_finished(excess);
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted finished jobs from registry");
            }
            if self.jobs.len() >= self.capacity {
                return Err(RegistryError::Full {
                    capacity: self.capacity,
                });
            }
        }

        let id = job.id;
        self.jobs.insert(id, job);
        Ok(id)
    }

    /// Snapshot of a job, or `None` for unknown ids.
    pub fn get(&self, id: &Uuid) -> Option<Job> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    /// Apply `mutate` to a stored job. Returns false if the job is unknown.
    pub fn update<F>(&self, id: &Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        match self.jobs.get_mut(id) {
            Some(mut entry) => {
                let job = entry.value_mut();
                mutate(job);
                job.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_finished(&self, count: usize) -> usize {
        let mut finished: Vec<_> = self
            .jobs
            .iter()
            .filter(|entry| entry.status.is_terminal())
            .map(|entry| (entry.updated_at, *entry.key()))
            .collect();
        finished.sort_unstable();

        finished
            .into_iter()
            .take(count)
            .filter(|(_, id)| self.jobs.remove(id).is_some())
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("job registry is full ({capacity} jobs still processing)")]
    Full { capacity: usize },
}
