use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const PLAN_BLOCK_ID_PREFIX: &str = "wpb_";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    CourseMeeting,
    CalendarEvent,
    Assignment,
    Exam,
    PlanBlock,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Suggested,
    Accepted,
    Locked,
}

impl BlockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Suggested => "suggested",
            Self::Accepted => "accepted",
            Self::Locked => "locked",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Study,
    Assignment,
    ExamPrep,
    Break,
    WeeklyTask,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Study => "study",
            Self::Assignment => "assignment",
            Self::ExamPrep => "exam_prep",
            Self::Break => "break",
            Self::WeeklyTask => "weekly_task",
        }
    }
}

pub fn parse_block_status(value: &str) -> Result<BlockStatus, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "suggested" => Ok(BlockStatus::Suggested),
        "accepted" => Ok(BlockStatus::Accepted),
        "locked" => Ok(BlockStatus::Locked),
        other => Err(format!("unsupported block status: {}", other)),
    }
}

pub fn parse_block_type(value: &str) -> Result<BlockType, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "study" => Ok(BlockType::Study),
        "assignment" => Ok(BlockType::Assignment),
        "exam_prep" => Ok(BlockType::ExamPrep),
        "break" => Ok(BlockType::Break),
        "weekly_task" => Ok(BlockType::WeeklyTask),
        other => Err(format!("unsupported block type: {}", other)),
    }
}

/// One renderable occurrence in the requested range, from any source.
///
/// Items from sources other than `PlanBlock` are read-only projections; a
/// plan-block item's id is always `wpb_<persisted id>` so the grid can map
/// it back to the record it mutates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarItem {
    pub id: String,
    pub source: ItemSource,
    pub title: String,
    pub start_at: String,
    pub end_at: String,
    pub all_day: bool,
    pub color: Option<String>,
    pub course_id: Option<i64>,
    pub course_name: Option<String>,
    pub category: Option<String>,
    pub status: Option<BlockStatus>,
    pub locked: bool,
    pub editable: bool,
    pub metadata_json: Option<String>,
}

impl CalendarItem {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "item.id")?;
        validate_non_empty(&self.title, "item.title")?;
        validate_non_empty(&self.start_at, "item.start_at")?;
        if self.source == ItemSource::PlanBlock && self.plan_block_id().is_none() {
            return Err(format!(
                "item.id '{}' is not reversible to a plan block id",
                self.id
            ));
        }
        Ok(())
    }

    /// Recovers the persisted plan-block id from a `wpb_<n>` item id.
    pub fn plan_block_id(&self) -> Option<i64> {
        parse_plan_block_item_id(&self.id)
    }

    /// Calendar date key (`yyyy-MM-dd`) derived from `start_at`.
    pub fn day_key(&self) -> String {
        date_key(&self.start_at)
    }
}

pub fn plan_block_item_id(block_id: i64) -> String {
    format!("{}{}", PLAN_BLOCK_ID_PREFIX, block_id)
}

pub fn parse_plan_block_item_id(item_id: &str) -> Option<i64> {
    item_id
        .trim()
        .strip_prefix(PLAN_BLOCK_ID_PREFIX)?
        .parse::<i64>()
        .ok()
}

/// Persisted week-plan block, the only mutable entity in the aggregated view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanBlock {
    pub id: i64,
    pub week_start_date: String,
    pub start_at: String,
    pub end_at: String,
    pub block_type: BlockType,
    pub course_id: Option<i64>,
    pub weekly_task_id: Option<i64>,
    pub title: Option<String>,
    pub status: BlockStatus,
    pub created_at: Option<String>,
}

impl PlanBlock {
    pub fn validate(&self) -> Result<(), String> {
        validate_date(&self.week_start_date, "block.week_start_date")?;
        let start = parse_naive_datetime(&self.start_at)
            .ok_or_else(|| "block.start_at must be a local date-time".to_string())?;
        let end = parse_naive_datetime(&self.end_at)
            .ok_or_else(|| "block.end_at must be a local date-time".to_string())?;
        if end <= start {
            return Err("block.end_at must be after block.start_at".to_string());
        }
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.status == BlockStatus::Locked
    }
}

/// Unsaved plan block handed to create/bulk-create.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanBlockDraft {
    pub week_start_date: String,
    pub start_at: String,
    pub end_at: String,
    pub block_type: BlockType,
    #[serde(default)]
    pub course_id: Option<i64>,
    #[serde(default)]
    pub weekly_task_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<BlockStatus>,
}

impl PlanBlockDraft {
    pub fn validate(&self) -> Result<(), String> {
        validate_date(&self.week_start_date, "draft.week_start_date")?;
        let start = parse_naive_datetime(&self.start_at)
            .ok_or_else(|| "draft.start_at must be a local date-time".to_string())?;
        let end = parse_naive_datetime(&self.end_at)
            .ok_or_else(|| "draft.end_at must be a local date-time".to_string())?;
        if end <= start {
            return Err("draft.end_at must be after draft.start_at".to_string());
        }
        Ok(())
    }
}

/// Planning-window policy for the slot finder and plan generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannerPolicy {
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub slot_step_minutes: u32,
    pub focus_block_minutes: u32,
    pub focus_block_title: String,
}

impl Default for PlannerPolicy {
    fn default() -> Self {
        Self {
            window_start: NaiveTime::from_hms_opt(8, 0, 0).expect("valid fixed time"),
            window_end: NaiveTime::from_hms_opt(20, 0, 0).expect("valid fixed time"),
            slot_step_minutes: 15,
            focus_block_minutes: 90,
            focus_block_title: "Focus block".to_string(),
        }
    }
}

impl PlannerPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.window_end <= self.window_start {
            return Err("planner.window_end must be after planner.window_start".to_string());
        }
        if self.slot_step_minutes == 0 {
            return Err("planner.slot_step_minutes must be > 0".to_string());
        }
        if self.focus_block_minutes == 0 {
            return Err("planner.focus_block_minutes must be > 0".to_string());
        }
        validate_non_empty(&self.focus_block_title, "planner.focus_block_title")?;
        Ok(())
    }

    pub fn window_minutes(&self) -> i64 {
        (self.window_end - self.window_start).num_minutes()
    }
}

/// Half-open time range; touching endpoints do not count as overlap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeSlot {
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Exponential-backoff gate for the remote sync call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 30_000,
            cap_ms: 600_000,
        }
    }
}

impl BackoffPolicy {
    pub fn backoff_ms(&self, failure_count: u32) -> u64 {
        if failure_count == 0 {
            return 0;
        }
        let doubled = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(failure_count - 1));
        doubled.min(self.cap_ms)
    }
}

/// Single versioned backoff record; `version` guards compare-and-swap
/// updates in the repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    pub failure_count: u32,
    pub last_failure_at_ms: i64,
    pub version: i64,
}

impl BackoffState {
    pub fn should_skip(&self, policy: &BackoffPolicy, now_ms: i64) -> bool {
        let backoff_ms = policy.backoff_ms(self.failure_count);
        backoff_ms > 0 && now_ms.saturating_sub(self.last_failure_at_ms) < backoff_ms as i64
    }

    pub fn after_failure(&self, now_ms: i64) -> BackoffState {
        BackoffState {
            failure_count: self.failure_count.saturating_add(1),
            last_failure_at_ms: now_ms,
            version: self.version + 1,
        }
    }

    pub fn after_success(&self) -> BackoffState {
        BackoffState {
            failure_count: 0,
            last_failure_at_ms: 0,
            version: self.version + 1,
        }
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}

/// Parses the store's local naive date-times, with or without seconds.
pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        .ok()
}

pub fn format_naive_datetime(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Date part of a stored timestamp; bare dates pass through unchanged.
pub fn date_key(start_at: &str) -> String {
    start_at
        .trim()
        .split('T')
        .next()
        .unwrap_or(start_at)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_block() -> PlanBlock {
        PlanBlock {
            id: 7,
            week_start_date: "2026-02-16".to_string(),
            start_at: "2026-02-17T09:00:00".to_string(),
            end_at: "2026-02-17T10:30:00".to_string(),
            block_type: BlockType::Study,
            course_id: None,
            weekly_task_id: None,
            title: Some("Focus block".to_string()),
            status: BlockStatus::Suggested,
            created_at: None,
        }
    }

    fn sample_item() -> CalendarItem {
        CalendarItem {
            id: plan_block_item_id(7),
            source: ItemSource::PlanBlock,
            title: "Focus block".to_string(),
            start_at: "2026-02-17T09:00:00".to_string(),
            end_at: "2026-02-17T10:30:00".to_string(),
            all_day: false,
            color: None,
            course_id: None,
            course_name: None,
            category: Some("study".to_string()),
            status: Some(BlockStatus::Suggested),
            locked: false,
            editable: true,
            metadata_json: None,
        }
    }

    #[test]
    fn block_validate_accepts_valid_block() {
        assert!(sample_block().validate().is_ok());
    }

    #[test]
    fn block_validate_rejects_reversed_range() {
        let mut block = sample_block();
        block.end_at = block.start_at.clone();
        assert!(block.validate().is_err());
    }

    #[test]
    fn plan_block_item_id_roundtrip() {
        assert_eq!(parse_plan_block_item_id("wpb_42"), Some(42));
        assert_eq!(parse_plan_block_item_id("wpb_"), None);
        assert_eq!(parse_plan_block_item_id("cm_42"), None);
        assert_eq!(parse_plan_block_item_id("asgn_9"), None);
    }

    #[test]
    fn item_validate_requires_reversible_plan_block_id() {
        let mut item = sample_item();
        item.id = "wpb_not_a_number".to_string();
        assert!(item.validate().is_err());
    }

    #[test]
    fn day_key_handles_bare_dates_and_datetimes() {
        assert_eq!(date_key("2026-02-17T09:00:00"), "2026-02-17");
        assert_eq!(date_key("2026-02-17"), "2026-02-17");
    }

    #[test]
    fn status_and_type_parse_roundtrip() {
        for status in [BlockStatus::Suggested, BlockStatus::Accepted, BlockStatus::Locked] {
            assert_eq!(parse_block_status(status.as_str()), Ok(status));
        }
        for block_type in [
            BlockType::Study,
            BlockType::Assignment,
            BlockType::ExamPrep,
            BlockType::Break,
            BlockType::WeeklyTask,
        ] {
            assert_eq!(parse_block_type(block_type.as_str()), Ok(block_type));
        }
        assert!(parse_block_status("done").is_err());
        assert!(parse_block_type("gym").is_err());
    }

    #[test]
    fn planner_policy_defaults_validate() {
        let policy = PlannerPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.window_minutes(), 12 * 60);
    }

    #[test]
    fn backoff_examples_match_expected_windows() {
        let policy = BackoffPolicy::default();
        let state = BackoffState::default().after_failure(0);
        assert!(state.should_skip(&policy, 29_999));
        assert!(!state.should_skip(&policy, 30_001));

        let state = state.after_failure(1_000);
        assert!(state.should_skip(&policy, 1_000 + 59_999));
        assert!(!state.should_skip(&policy, 1_000 + 60_001));
    }

    #[test]
    fn backoff_success_clears_counters() {
        let state = BackoffState::default()
            .after_failure(5_000)
            .after_failure(9_000)
            .after_success();
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.last_failure_at_ms, 0);
        let policy = BackoffPolicy::default();
        assert!(!state.should_skip(&policy, 9_001));
        assert!(!state.should_skip(&policy, i64::MAX));
    }

    proptest! {
        #[test]
        fn backoff_window_is_monotonic_and_capped(
            failures in 0u32..64,
            base in 1u64..120_000,
            cap in 1u64..3_600_000
        ) {
            let policy = BackoffPolicy { base_ms: base, cap_ms: cap };
            let current = policy.backoff_ms(failures);
            let next = policy.backoff_ms(failures + 1);
            prop_assert!(next >= current);
            prop_assert!(current <= cap);
            prop_assert!(next <= cap);
        }
    }

    #[test]
    fn domain_models_support_serde_roundtrip() {
        let block = sample_block();
        let item = sample_item();

        let block_roundtrip: PlanBlock =
            serde_json::from_str(&serde_json::to_string(&block).expect("serialize block"))
                .expect("deserialize block");
        let item_roundtrip: CalendarItem =
            serde_json::from_str(&serde_json::to_string(&item).expect("serialize item"))
                .expect("deserialize item");

        assert_eq!(block_roundtrip, block);
        assert_eq!(item_roundtrip, item);
    }
}
