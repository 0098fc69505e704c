//! Background jobs: delayed survey invitations and housekeeping.
use crate::bot::survey;
use crate::db::{self, invitations};
use crate::state::SharedState;
use crate::time_utils;
use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

const INVITATION_BATCH: i64 = 50;

pub async fn start_scheduler(state: SharedState) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let shared_for_invitations = state.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let state = shared_for_invitations.clone();
            Box::pin(async move {
                if let Err(e) = send_due_invitations(&state).await {
                    tracing::error!("Failed to send survey invitations: {}", e);
                }
            })
        })?)
        .await?;

    let shared_for_cleanup = state.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                match db::purge_expired_sessions(&state.pool, time_utils::now()).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!("Cleaned up {} expired survey sessions", purged),
                    Err(e) => tracing::error!("Failed to purge survey sessions: {}", e),
                }
                let pruned = state.bill_limiter.prune().await;
                if pruned > 0 {
                    tracing::debug!("Pruned {} idle bill rate-limit entries", pruned);
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started:");
    tracing::info!("  - Survey invitations: every minute");
    tracing::info!("  - Session cleanup: hourly");
    Ok(scheduler)
}

/// Sends invitations whose delay has passed. A failed send stays pending and
/// is retried on the next tick.
pub async fn send_due_invitations(state: &SharedState) -> Result<usize> {
    let due = invitations::due_invitations(&state.pool, time_utils::now(), INVITATION_BATCH).await?;
    if due.is_empty() {
        return Ok(0);
    }

    let mut success_count = 0;
    let mut error_count = 0;
    for invitation in due {
        match survey::send_invitation(&state.bot, state, &invitation).await {
            Ok(opened) => {
                invitations::mark_invitation_sent(&state.pool, &invitation.bill_id, time_utils::now())
                    .await?;
                if opened {
                    success_count += 1;
                } else {
                    tracing::debug!("Skipped invitation for used bill {}", invitation.bill_id);
                }
            }
            Err(e) => {
                error_count += 1;
                tracing::error!(
                    "Failed to send invitation for bill {} (chat {}): {}",
                    invitation.bill_id,
                    invitation.chat_id,
                    e
                );
            }
        }

        // Telegram allows about 30 messages per second
        tokio::time::sleep(tokio::time::Duration::from_millis(35)).await;
    }

    tracing::info!(
        "Survey invitations sent: {} successful, {} failed",
        success_count,
        error_count
    );
    Ok(success_count)
}
