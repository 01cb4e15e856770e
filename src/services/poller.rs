use std::time::Duration;

use tokio::time::{sleep_until, timeout_at, Instant};

use crate::models::job::GenerationError;
use crate::models::task::{ExternalTask, QueueEntry, TaskStatus};
use crate::services::credentials::mask;
use crate::services::extractor;
use crate::services::render::RenderClient;

/// Progress reported once a task has been accepted upstream.
pub const POLL_PROGRESS_FLOOR: u8 = 10;

/// Highest progress reachable while polling; 100 is reserved for completion.
pub const POLL_PROGRESS_CEILING: u8 = 95;

/// Where to find a submitted task and how long to wait for it.
#[derive(Debug, Clone)]
pub struct PollTarget<'a> {
    pub credential: &'a str,
    pub task_id: Option<i64>,
    pub queue_id: Option<i64>,
    pub interval: Duration,
    pub timeout: Duration,
}

/// What a single observation of the task means for the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollUpdate {
    Pending,
    Completed { result_url: String },
    Failed(GenerationError),
}

/// Poll the queue list until the task reaches a terminal state or the
/// budget runs out. `on_progress` receives non-decreasing values.
///
/// Transport and decode errors on a single poll are logged and retried at
/// the next interval; only the deadline ends the loop without a terminal
/// upstream status.
pub async fn poll_until_terminal<F>(
    client: &RenderClient,
    target: PollTarget<'_>,
    mut on_progress: F,
) -> Result<String, GenerationError>
where
    F: FnMut(u8),
{
    let started = Instant::now();
    let deadline = started + target.timeout;
    let mut progress = POLL_PROGRESS_FLOOR;
    on_progress(progress);

    loop {
        sleep_until((Instant::now() + target.interval).min(deadline)).await;
        if Instant::now() >= deadline {
            return Err(GenerationError::GenerationTimeout);
        }

        match timeout_at(deadline, client.list_queue(target.credential)).await {
            Err(_) => return Err(GenerationError::GenerationTimeout),
            Ok(Err(e)) => {
                tracing::warn!(
                    credential = %mask(target.credential),
                    error = %e,
                    "Queue poll failed, retrying next interval"
                );
            }
            Ok(Ok(entries)) => match locate_task(&entries, target.task_id, target.queue_id) {
                Some(task) => match interpret(task, client.origin()) {
                    PollUpdate::Completed { result_url } => return Ok(result_url),
                    PollUpdate::Failed(e) => return Err(e),
                    PollUpdate::Pending => {}
                },
                None => {
                    tracing::debug!(
                        task_id = ?target.task_id,
                        queue_id = ?target.queue_id,
                        "Task not visible in queue list yet"
                    );
                }
            },
        }

        progress = advance(progress, started.elapsed(), target.timeout);
        on_progress(progress);
    }
}

/// Find the job's task in a queue listing.
///
/// An exact task id match wins. Otherwise, when the job's queue holds exactly
/// one task, that task is taken as the job's.
pub fn locate_task(
    entries: &[QueueEntry],
    task_id: Option<i64>,
    queue_id: Option<i64>,
) -> Option<&ExternalTask> {
    if let Some(id) = task_id {
        let exact = entries
            .iter()
            .flat_map(|entry| &entry.tasks)
            .find(|task| task.id == Some(id));
        if exact.is_some() {
            return exact;
        }
    }

    let queue_id = queue_id?;
    let mut candidates = entries
        .iter()
        .filter(|entry| entry.id == queue_id)
        .flat_map(|entry| &entry.tasks);

    match (candidates.next(), candidates.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// Map an upstream task state onto the job state machine.
pub fn interpret(task: &ExternalTask, origin: &str) -> PollUpdate {
    match task.status {
        TaskStatus::Pending | TaskStatus::Running => PollUpdate::Pending,
        TaskStatus::Completed => match extractor::extract(task, origin) {
            Some(result_url) => PollUpdate::Completed { result_url },
            None => PollUpdate::Failed(GenerationError::ResultMissing),
        },
        TaskStatus::Failed => PollUpdate::Failed(GenerationError::GenerationFailed {
            message: task
                .error_message()
                .unwrap_or_else(|| "unknown error".to_string()),
        }),
    }
}

/// Time-scaled progress between the floor and the ceiling, never below `previous`.
pub fn advance(previous: u8, elapsed: Duration, budget: Duration) -> u8 {
    let span = f64::from(POLL_PROGRESS_CEILING - POLL_PROGRESS_FLOOR);
    let fraction = if budget.is_zero() {
        1.0
    } else {
        (elapsed.as_secs_f64() / budget.as_secs_f64()).min(1.0)
    };
    let scaled = POLL_PROGRESS_FLOOR + (span * fraction) as u8;
    scaled.clamp(previous, POLL_PROGRESS_CEILING.max(previous))
}
