use crate::domain::models::{
    format_naive_datetime, parse_block_type, parse_naive_datetime, BlockStatus, BlockType,
    CalendarItem, ItemSource,
};
use crate::infrastructure::error::InfraError;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

pub const MIN_BLOCK_MINUTES: i64 = 15;

/// Geometry of the day column the pointer is moving in, supplied by the
/// rendering layer at drag start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GridMetrics {
    /// Screen y of the column's midnight line.
    pub column_top: f64,
    pub pixels_per_minute: f64,
    pub day_length_minutes: u32,
    pub snap_minutes: u32,
}

impl GridMetrics {
    pub fn validate(&self) -> Result<(), String> {
        if !self.pixels_per_minute.is_finite() || self.pixels_per_minute <= 0.0 {
            return Err("metrics.pixels_per_minute must be positive".to_string());
        }
        if !self.column_top.is_finite() {
            return Err("metrics.column_top must be finite".to_string());
        }
        if self.day_length_minutes == 0 {
            return Err("metrics.day_length_minutes must be > 0".to_string());
        }
        if self.snap_minutes == 0 {
            return Err("metrics.snap_minutes must be > 0".to_string());
        }
        Ok(())
    }
}

/// Live candidate range for the block being moved. Rendering shows this
/// instead of the stale persisted position for the dragged item only.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DragPreview {
    pub item_id: String,
    pub day_index: usize,
    pub start_at: String,
    pub end_at: String,
}

/// Update payload produced by releasing a drag. Time fields are the only
/// change; type, title and status ride along untouched.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DragCommit {
    pub block_id: i64,
    pub start_at: String,
    pub end_at: String,
    pub block_type: BlockType,
    pub title: Option<String>,
    pub status: BlockStatus,
}

impl DragCommit {
    /// A moved draft stays local; accepted and locked blocks are externally
    /// visible and should be pushed once committed.
    pub fn wants_push(&self) -> bool {
        matches!(self.status, BlockStatus::Accepted | BlockStatus::Locked)
    }
}

#[derive(Debug, Clone)]
struct DragSession {
    block_id: i64,
    item_id: String,
    day: NaiveDate,
    day_index: usize,
    duration_minutes: i64,
    grab_offset: f64,
    metrics: GridMetrics,
    start_minute: i64,
    block_type: BlockType,
    title: Option<String>,
    status: BlockStatus,
}

/// Pointer-driven reschedule state machine: idle → dragging → idle.
///
/// The session is the acquire/release resource standing in for global
/// pointer listeners: `release` consumes it on every path, so a failed
/// commit can never leave the grid stuck mid-drag.
#[derive(Debug, Default)]
pub struct DragController {
    session: Option<DragSession>,
}

impl DragController {
    pub fn is_dragging(&self) -> bool {
        self.session.is_some()
    }

    /// Starts a drag on an editable plan-block item.
    pub fn begin(
        &mut self,
        item: &CalendarItem,
        day_index: usize,
        pointer_y: f64,
        item_top: f64,
        metrics: GridMetrics,
    ) -> Result<DragPreview, InfraError> {
        if self.session.is_some() {
            return Err(InfraError::Validation("a drag is already in progress".to_string()));
        }
        metrics.validate().map_err(InfraError::Validation)?;
        if item.source != ItemSource::PlanBlock || !item.editable {
            return Err(InfraError::Validation(format!(
                "item '{}' is not a draggable plan block",
                item.id
            )));
        }
        let block_id = item.plan_block_id().ok_or_else(|| {
            InfraError::Validation(format!("item id '{}' has no plan block id", item.id))
        })?;
        let start = parse_naive_datetime(&item.start_at).ok_or_else(|| {
            InfraError::Validation(format!("item '{}' start_at is not a date-time", item.id))
        })?;
        let end = parse_naive_datetime(&item.end_at).ok_or_else(|| {
            InfraError::Validation(format!("item '{}' end_at is not a date-time", item.id))
        })?;

        let duration_minutes = (end - start).num_minutes().max(MIN_BLOCK_MINUTES);
        let midnight = start.date().and_hms_opt(0, 0, 0).expect("midnight");
        let start_minute = (start - midnight).num_minutes();
        let block_type = item
            .category
            .as_deref()
            .and_then(|raw| parse_block_type(raw).ok())
            .unwrap_or(BlockType::Study);

        let session = DragSession {
            block_id,
            item_id: item.id.clone(),
            day: start.date(),
            day_index,
            duration_minutes,
            grab_offset: pointer_y - item_top,
            metrics,
            start_minute,
            block_type,
            title: Some(item.title.clone()),
            status: item.status.unwrap_or(BlockStatus::Suggested),
        };
        let preview = preview_of(&session);
        self.session = Some(session);
        Ok(preview)
    }

    /// Recomputes the candidate range from the pointer position, snapped
    /// to the grid and clamped so the block never leaves the column.
    /// Vertical movement never changes the day.
    pub fn update(&mut self, pointer_y: f64) -> Option<DragPreview> {
        let session = self.session.as_mut()?;
        let metrics = session.metrics;

        let block_top = pointer_y - session.grab_offset - metrics.column_top;
        let raw_minutes = block_top / metrics.pixels_per_minute;
        let snap = f64::from(metrics.snap_minutes);
        let snapped = (raw_minutes / snap).round() * snap;
        let max_start = i64::from(metrics.day_length_minutes) - session.duration_minutes;
        let clamped = (snapped as i64).clamp(0, max_start.max(0));

        session.start_minute = clamped;
        Some(preview_of(session))
    }

    /// Ends the drag. The session is discarded unconditionally; the commit
    /// payload is returned for the caller to persist. No-op when idle.
    pub fn release(&mut self) -> Option<DragCommit> {
        let session = self.session.take()?;
        let start = session.day.and_hms_opt(0, 0, 0).expect("midnight")
            + Duration::minutes(session.start_minute);
        let end = start + Duration::minutes(session.duration_minutes);
        Some(DragCommit {
            block_id: session.block_id,
            start_at: format_naive_datetime(start),
            end_at: format_naive_datetime(end),
            block_type: session.block_type,
            title: session.title,
            status: session.status,
        })
    }

    /// Preview for the item currently under drag, if any. Every other item
    /// renders its persisted position.
    pub fn preview_for(&self, item_id: &str) -> Option<DragPreview> {
        let session = self.session.as_ref()?;
        if session.item_id != item_id {
            return None;
        }
        Some(preview_of(session))
    }
}

fn preview_of(session: &DragSession) -> DragPreview {
    let start = session.day.and_hms_opt(0, 0, 0).expect("midnight")
        + Duration::minutes(session.start_minute);
    let end = start + Duration::minutes(session.duration_minutes);
    DragPreview {
        item_id: session.item_id.clone(),
        day_index: session.day_index,
        start_at: format_naive_datetime(start),
        end_at: format_naive_datetime(end),
    }
}
