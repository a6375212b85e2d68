use crate::application::planner::plan_week_suggestions;
use crate::domain::models::{
    parse_naive_datetime, BlockStatus, PlanBlock, PlannerPolicy, TimeSlot,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::plan_block_repository::PlanBlockRepository;
use chrono::NaiveDate;
use std::sync::Arc;

/// Owns the plan-block state machine: suggested → accepted → locked, with
/// delete reachable from every state. There is no transition backward.
pub struct PlanLifecycleService<P>
where
    P: PlanBlockRepository,
{
    repository: Arc<P>,
}

impl<P> PlanLifecycleService<P>
where
    P: PlanBlockRepository,
{
    pub fn new(repository: Arc<P>) -> Self {
        Self { repository }
    }

    fn require(&self, block_id: i64) -> Result<PlanBlock, InfraError> {
        self.repository
            .get_by_id(block_id)?
            .ok_or_else(|| InfraError::NotFound(format!("plan block not found: {block_id}")))
    }

    /// suggested → accepted.
    pub fn accept(&self, block_id: i64) -> Result<PlanBlock, InfraError> {
        let block = self.require(block_id)?;
        if block.status != BlockStatus::Suggested {
            return Err(InfraError::Validation(format!(
                "cannot accept block {} from status '{}'",
                block_id,
                block.status.as_str()
            )));
        }
        self.repository.set_status(block_id, BlockStatus::Accepted)
    }

    /// suggested|accepted → locked. Locking marks the block a firm
    /// commitment rather than a mutable draft.
    pub fn lock(&self, block_id: i64) -> Result<PlanBlock, InfraError> {
        let block = self.require(block_id)?;
        if block.status == BlockStatus::Locked {
            return Err(InfraError::Validation(format!(
                "block {} is already locked",
                block_id
            )));
        }
        self.repository.set_status(block_id, BlockStatus::Locked)
    }

    /// Terminal from any status.
    pub fn delete(&self, block_id: i64) -> Result<bool, InfraError> {
        self.repository.delete(block_id)
    }

    /// Moves the block in time only; status, type and title are untouched.
    pub fn reschedule(
        &self,
        block_id: i64,
        start_at: &str,
        end_at: &str,
    ) -> Result<PlanBlock, InfraError> {
        let start = parse_naive_datetime(start_at).ok_or_else(|| {
            InfraError::Validation("start_at must be a local date-time".to_string())
        })?;
        let end = parse_naive_datetime(end_at).ok_or_else(|| {
            InfraError::Validation("end_at must be a local date-time".to_string())
        })?;
        if end <= start {
            return Err(InfraError::Validation(
                "end_at must be after start_at".to_string(),
            ));
        }
        self.repository.update_time(block_id, start_at, end_at)
    }

    /// Regenerates the week's suggestions: clears the old `suggested`
    /// blocks, then inserts one focus-block suggestion per day that still
    /// has room. Accepted and locked blocks survive untouched, so running
    /// this twice yields the same suggestions.
    pub fn generate_week(
        &self,
        week_start: NaiveDate,
        busy_by_day: &[(NaiveDate, Vec<TimeSlot>)],
        policy: &PlannerPolicy,
    ) -> Result<Vec<PlanBlock>, InfraError> {
        policy.validate().map_err(InfraError::Validation)?;
        let week_start_date = week_start.to_string();
        self.repository.clear_suggested(&week_start_date)?;

        let drafts = plan_week_suggestions(week_start, busy_by_day, policy);
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        self.repository.bulk_create(&drafts)
    }
}
