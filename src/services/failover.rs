use crate::models::generation::GenerationRequest;
use crate::services::credentials::{mask, CredentialPool};
use crate::services::render::{RenderClient, SubmitOutcome};

/// Result of walking the credential snapshot for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverOutcome {
    Submitted {
        credential: String,
        task_id: Option<i64>,
        queue_id: Option<i64>,
    },
    Failed {
        message: String,
    },
    /// Every credential tried was out of balance. `tried == 0` means the
    /// snapshot was empty to begin with.
    AllExhausted {
        tried: usize,
    },
}

/// Submit `request` with each credential of `snapshot` in order until one is
/// accepted. Exhausted credentials are removed from `pool` on the way; any
/// other rejection stops the walk, since another credential would not help.
pub async fn submit_with_failover(
    client: &RenderClient,
    pool: &CredentialPool,
    snapshot: &[String],
    request: &GenerationRequest,
) -> FailoverOutcome {
    let mut tried = 0;

    for credential in snapshot {
        tried += 1;

        match client.submit(credential, request).await {
            SubmitOutcome::Submitted { task_id, queue_id } => {
                tracing::info!(
                    credential = %mask(credential),
                    task_id = ?task_id,
                    queue_id = ?queue_id,
                    attempts = tried,
                    "Rendering request accepted"
                );
                return FailoverOutcome::Submitted {
                    credential: credential.clone(),
                    task_id,
                    queue_id,
                };
            }
            SubmitOutcome::Exhausted => {
                metrics::counter!("render_credentials_exhausted").increment(1);
                tracing::warn!(
                    credential = %mask(credential),
                    "Credential exhausted, failing over to next"
                );
                if let Err(e) = pool.remove(credential).await {
                    tracing::error!(
                        credential = %mask(credential),
                        error = %e,
                        "Failed to remove exhausted credential"
                    );
                }
            }
            SubmitOutcome::Failed { message } => {
                tracing::warn!(
                    credential = %mask(credential),
                    error = %message,
                    "Rendering request rejected"
                );
                return FailoverOutcome::Failed { message };
            }
        }
    }

    FailoverOutcome::AllExhausted { tried }
}
