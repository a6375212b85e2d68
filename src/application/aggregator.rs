use crate::domain::models::{
    parse_naive_datetime, BlockStatus, CalendarItem, ItemSource, PlannerPolicy, TimeSlot,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Render-ready partition of the requested range, keyed by `yyyy-MM-dd`.
///
/// Every requested day has an entry in both maps even when empty, so the
/// grid never has to null-check a day column.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CalendarGrid {
    pub all_day_by_day: BTreeMap<String, Vec<CalendarItem>>,
    pub timed_by_day: BTreeMap<String, Vec<CalendarItem>>,
}

/// Partitions the feed into all-day and timed items per day.
///
/// An item whose start date matches none of the requested days gets its key
/// synthesized instead of being dropped; the collaborator's range filtering
/// is not guaranteed bit-exact.
pub fn aggregate(days: &[NaiveDate], items: Vec<CalendarItem>) -> CalendarGrid {
    let mut grid = CalendarGrid::default();
    for day in days {
        let key = day.to_string();
        grid.all_day_by_day.entry(key.clone()).or_default();
        grid.timed_by_day.entry(key).or_default();
    }

    for item in items {
        let key = item.day_key();
        if item.all_day {
            grid.all_day_by_day.entry(key).or_default().push(item);
        } else {
            grid.timed_by_day.entry(key).or_default().push(item);
        }
    }

    grid
}

/// Derives the busy intervals the slot finder must avoid on `day`.
///
/// Suggested plan blocks do not count as busy (they are about to be
/// regenerated); all-day items occupy the entire planning window; timed
/// items are clipped to it. The result is merged and sorted.
pub fn busy_slots_for_day(
    day: NaiveDate,
    items: &[CalendarItem],
    policy: &PlannerPolicy,
) -> Vec<TimeSlot> {
    let window = TimeSlot {
        start: day.and_time(policy.window_start),
        end: day.and_time(policy.window_end),
    };
    let day_key = day.to_string();

    let mut busy = Vec::new();
    for item in items {
        if item.day_key() != day_key {
            continue;
        }
        if item.source == ItemSource::PlanBlock && item.status == Some(BlockStatus::Suggested) {
            continue;
        }
        if item.all_day {
            busy.push(window);
            continue;
        }
        let (Some(start), Some(end)) = (
            parse_naive_datetime(&item.start_at),
            parse_naive_datetime(&item.end_at),
        ) else {
            continue;
        };
        if end <= start {
            continue;
        }
        let clipped = TimeSlot {
            start: start.max(window.start),
            end: end.min(window.end),
        };
        if clipped.end > clipped.start {
            busy.push(clipped);
        }
    }

    merge_slots(busy)
}

fn merge_slots(mut slots: Vec<TimeSlot>) -> Vec<TimeSlot> {
    if slots.is_empty() {
        return slots;
    }

    slots.sort_unstable_by(|left, right| left.start.cmp(&right.start));
    let mut iter = slots.into_iter();
    let mut merged = vec![iter.next().expect("slots is non-empty")];
    for slot in iter {
        let last = merged
            .last_mut()
            .expect("merged always contains at least one slot");
        if slot.start <= last.end {
            if slot.end > last.end {
                last.end = slot.end;
            }
            continue;
        }
        merged.push(slot);
    }
    merged
}
