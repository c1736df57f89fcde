//! The deferred-work runner: one `run_one` call executes the earliest ready
//! task and reschedules failures with bounded exponential backoff. Production
//! drains the queue in a background loop; functional tests call `run_one`
//! directly to advance the system one deterministic step at a time.

use tracing::{info, warn};

use crate::database;
use crate::errors::Result;
use crate::models::{now_millis, Task, TaskKind};
use crate::service::{split_task_subject, Mint};

impl Mint {
    /// Executes the earliest ready task, if any. Returns whether a task ran.
    pub async fn run_one(&self) -> Result<bool> {
        let task = {
            let mut conn = self.db().acquire().await?;
            match database::next_ready_task(&mut conn, now_millis()).await? {
                Some(task) => task,
                None => return Ok(false),
            }
        };

        match self.execute_task(&task).await {
            Ok(()) => {
                let mut conn = self.db().acquire().await?;
                database::complete_task(&mut conn, task.id).await?;
            }
            Err(e) => {
                let attempts = task.attempts + 1;
                let mut conn = self.db().acquire().await?;
                if attempts >= self.config().propagation.max_retry_attempts as i64 {
                    warn!(
                        "Task {} ({} {}) failed permanently after {} attempts: {}",
                        task.id,
                        task.kind.as_str(),
                        task.subject,
                        attempts,
                        e
                    );
                    database::fail_task(&mut conn, task.id).await?;
                } else {
                    let ready_at = now_millis() + self.backoff_ms(attempts);
                    info!(
                        "Task {} ({} {}) failed, retry {} scheduled: {}",
                        task.id,
                        task.kind.as_str(),
                        task.subject,
                        attempts,
                        e
                    );
                    database::reschedule_task(&mut conn, task.id, attempts, ready_at).await?;
                }
            }
        }
        Ok(true)
    }

    /// `base * 2^attempts`, capped at one hour.
    fn backoff_ms(&self, attempts: i64) -> i64 {
        let base = self.config().propagation.retry_delay_seconds as i64 * 1_000;
        let delay = base.saturating_mul(1_i64 << attempts.clamp(0, 20));
        delay.min(3_600_000)
    }

    async fn execute_task(&self, task: &Task) -> Result<()> {
        match task.kind {
            TaskKind::PropagateOffer => {
                let (id, host) = split_task_subject(&task.subject)?;
                self.transport().propagate_offer(host, id).await?;
            }
            TaskKind::PropagateOperation => {
                let (id, host) = split_task_subject(&task.subject)?;
                self.transport().propagate_operation(host, id).await?;
            }
            TaskKind::ExpireTransaction => {
                self.expire_transaction(&task.subject).await?;
            }
            TaskKind::PropagateSettle => {
                let (id, host) = split_task_subject(&task.subject)?;
                let lock = self.local_lock(id).await?;
                self.transport().settle_transaction(host, id, &lock).await?;
            }
            TaskKind::PropagateCancel => {
                let (id, host) = split_task_subject(&task.subject)?;
                let lock = self.local_lock(id).await?;
                match self.transport().cancel_transaction(host, id, &lock).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn local_lock(&self, id: &str) -> Result<String> {
        let parsed = id
            .parse()
            .map_err(|e| crate::errors::MintError::Internal(format!("task subject: {}", e)))?;
        let mut conn = self.db().acquire().await?;
        let transaction = database::load_transaction(&mut conn, &parsed)
            .await?
            .ok_or_else(|| {
                crate::errors::MintError::TransactionNotFound(id.to_string())
            })?;
        Ok(transaction.lock)
    }
}
