//! Daily batch loop: every user whose ACTIVE schedule is due gets a
//! fresh 7-day plan. Users are processed strictly one at a time; a
//! second scheduler instance running concurrently is not supported.

use std::future::Future;

use serde::Serialize;
use time::{Date, OffsetDateTime};
use tracing::{error, info};
use uuid::Uuid;

use crate::plans::error::PlanError;
use crate::plans::generator::{consolidate_shopping_list, generate_plan};
use crate::plans::persist::{advance_schedule, save_plan};
use crate::profiles::repo::{self, DueSchedule};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RunError {
    pub stage: String,
    pub user_id: Option<Uuid>,
    pub error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub success_count: u32,
    pub failure_count: u32,
    pub errors: Vec<RunError>,
}

impl RunReport {
    fn record_failure(&mut self, stage: &str, user_id: Option<Uuid>, error: String) {
        self.failure_count += 1;
        self.errors.push(RunError {
            stage: stage.to_string(),
            user_id,
            error,
            timestamp: OffsetDateTime::now_utc(),
        });
    }
}

/// Re-run `step` until it succeeds or `max_retries` retries are spent
/// (so at most `max_retries + 1` attempts). Retries are immediate and
/// monotonic: no backoff, no jitter. Returns the last error together
/// with the number of attempts made.
pub async fn retry<T, E, F, Fut>(max_retries: u32, mut step: F) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match step().await {
            Ok(value) => return Ok(value),
            Err(e) if attempts > max_retries => return Err((e, attempts)),
            Err(_) => {}
        }
    }
}

/// Run the generation loop for every user due on `target_date`.
pub async fn run_for_date(state: &AppState, target_date: Date) -> RunReport {
    let mut report = RunReport::default();

    info!(%target_date, "fetching users needing plans");
    let due = match repo::fetch_due_schedules(&state.db, target_date).await {
        Ok(due) => due,
        Err(e) => {
            error!(error = %e, "failed to fetch due schedules");
            report.record_failure("fetch_users", None, e.to_string());
            return report;
        }
    };

    info!(count = due.len(), "users to process");

    for schedule in &due {
        let outcome = retry(state.config.max_retries, || {
            process_user(state, schedule)
        })
        .await;

        match outcome {
            Ok(plan_id) => {
                info!(user_id = %schedule.user_id, %plan_id, "plan generated and saved");
                report.success_count += 1;
            }
            Err((e, attempts)) => {
                error!(
                    user_id = %schedule.user_id,
                    attempts,
                    error = %e,
                    "giving up on user after retries"
                );
                report.record_failure(e.stage(), Some(schedule.user_id), e.to_string());
            }
        }
        // The per-user retry budget does not carry over to the next user.
    }

    info!(
        success = report.success_count,
        failures = report.failure_count,
        "plan generation run complete"
    );
    report
}

/// One full pass for one user: aggregate → generate → consolidate →
/// persist → advance schedule. Any error sends the whole pass back
/// through the retry loop.
async fn process_user(state: &AppState, schedule: &DueSchedule) -> Result<Uuid, PlanError> {
    let data = repo::load_user_data(&state.db, schedule.user_id)
        .await
        .map_err(|e| PlanError::Aggregate(e.to_string()))?;

    // The schedule's own cursor anchors the plan week.
    let start_date = schedule.next_plan_date;

    let mut generated = generate_plan(state.agent_ref(), &data, start_date).await;
    consolidate_shopping_list(state.agent_ref(), &mut generated.plan).await;

    let plan_id = save_plan(
        &state.db,
        schedule.user_id,
        schedule.schedule_id,
        &generated.plan,
        generated.generated_by,
        start_date,
    )
    .await?;

    advance_schedule(&state.db, schedule.user_id, schedule.schedule_id).await?;

    Ok(plan_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_gives_up_after_bound_and_reports_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), (String, u32)> = retry(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("persist failed".to_string()) }
        })
        .await;

        let (error, attempts) = result.unwrap_err();
        assert_eq!(error, "persist failed");
        // max_retries = 3 bounds retries, so 4 attempts in total.
        assert_eq!(attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, (String, u32)> = retry(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err("not yet".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_with_zero_budget_attempts_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), (String, u32)> = retry(0, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope".to_string()) }
        })
        .await;
        assert_eq!(result.unwrap_err().1, 1);
    }

    #[test]
    fn a_permanently_failing_user_is_recorded_as_one_failure() {
        let mut report = RunReport::default();
        let user = Uuid::new_v4();

        // The loop records exactly one failure per exhausted user; the
        // retry counter is owned by the combinator and starts fresh for
        // the next user rather than lingering at the bound.
        report.record_failure("persist_plan", Some(user), "db down".into());

        assert_eq!(report.failure_count, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].stage, "persist_plan");
        assert_eq!(report.errors[0].user_id, Some(user));
    }
}
