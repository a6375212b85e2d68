use crate::domain::models::{
    format_naive_datetime, BlockStatus, BlockType, PlanBlockDraft, PlannerPolicy, TimeSlot,
};
use chrono::{Duration, NaiveDate};

/// Earliest-fit slot search inside the day's planning window.
///
/// Candidate starts advance in `slot_step_minutes` steps; the first
/// candidate that overlaps no busy interval wins. Half-open semantics:
/// a candidate ending exactly where a busy interval starts is free.
/// `None` means the day is full, which is a normal outcome.
pub fn find_first_slot(
    day: NaiveDate,
    busy: &[TimeSlot],
    duration_minutes: u32,
    policy: &PlannerPolicy,
) -> Option<TimeSlot> {
    if duration_minutes == 0 {
        return None;
    }
    let window_start = day.and_time(policy.window_start);
    let window_end = day.and_time(policy.window_end);
    let duration = Duration::minutes(duration_minutes as i64);
    let step = Duration::minutes(policy.slot_step_minutes.max(1) as i64);

    let mut cursor = window_start;
    while cursor + duration <= window_end {
        let candidate = TimeSlot {
            start: cursor,
            end: cursor + duration,
        };
        if !busy.iter().any(|interval| candidate.overlaps(interval)) {
            return Some(candidate);
        }
        cursor += step;
    }
    None
}

/// One focus-block suggestion per day of the week, skipping full days.
///
/// Drafts always come out `Suggested`; the generator never creates a
/// locked block.
pub fn plan_week_suggestions(
    week_start: NaiveDate,
    busy_by_day: &[(NaiveDate, Vec<TimeSlot>)],
    policy: &PlannerPolicy,
) -> Vec<PlanBlockDraft> {
    let week_start_date = week_start.to_string();
    let mut drafts = Vec::new();
    for (day, busy) in busy_by_day {
        let Some(slot) = find_first_slot(*day, busy, policy.focus_block_minutes, policy) else {
            continue;
        };
        drafts.push(PlanBlockDraft {
            week_start_date: week_start_date.clone(),
            start_at: format_naive_datetime(slot.start),
            end_at: format_naive_datetime(slot.end),
            block_type: BlockType::Study,
            course_id: None,
            weekly_task_id: None,
            title: Some(policy.focus_block_title.clone()),
            status: Some(BlockStatus::Suggested),
        });
    }
    drafts
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 16).expect("date")
    }

    fn slot(day: NaiveDate, start: (u32, u32), end: (u32, u32)) -> TimeSlot {
        TimeSlot {
            start: day.and_hms_opt(start.0, start.1, 0).expect("time"),
            end: day.and_hms_opt(end.0, end.1, 0).expect("time"),
        }
    }

    #[test]
    fn empty_day_yields_window_start() {
        let policy = PlannerPolicy::default();
        let found = find_first_slot(monday(), &[], 90, &policy).expect("slot");
        assert_eq!(found, slot(monday(), (8, 0), (9, 30)));
    }

    #[test]
    fn earliest_slot_wins_even_before_a_busy_interval() {
        let policy = PlannerPolicy::default();
        let busy = vec![slot(monday(), (9, 0), (10, 30))];
        // 08:00-09:30 overlaps the 09:00 busy start, so the earliest free
        // candidate is 10:30-12:00.
        let found = find_first_slot(monday(), &busy, 90, &policy).expect("slot");
        assert_eq!(found, slot(monday(), (10, 30), (12, 0)));
    }

    #[test]
    fn touching_endpoints_do_not_overlap() {
        let policy = PlannerPolicy::default();
        let busy = vec![slot(monday(), (9, 30), (10, 30))];
        let found = find_first_slot(monday(), &busy, 90, &policy).expect("slot");
        // 08:00-09:30 ends exactly where the busy interval starts.
        assert_eq!(found, slot(monday(), (8, 0), (9, 30)));
    }

    #[test]
    fn full_day_returns_none() {
        let policy = PlannerPolicy::default();
        let busy = vec![slot(monday(), (8, 0), (20, 0))];
        assert!(find_first_slot(monday(), &busy, 90, &policy).is_none());
    }

    #[test]
    fn duration_longer_than_window_returns_none() {
        let policy = PlannerPolicy::default();
        assert!(find_first_slot(monday(), &[], 13 * 60, &policy).is_none());
    }

    proptest! {
        #[test]
        fn found_slot_is_free_and_earliest(
            busy_specs in proptest::collection::vec((0u32..47, 1u32..8), 0..10),
            duration_steps in 1u32..12
        ) {
            let policy = PlannerPolicy::default();
            let day = monday();
            let step = policy.slot_step_minutes;
            let duration = duration_steps * step;

            let busy = busy_specs
                .iter()
                .map(|(start_step, len_steps)| {
                    let start_minute = 8 * 60 + start_step * step;
                    let end_minute = (start_minute + len_steps * step).min(20 * 60);
                    TimeSlot {
                        start: day
                            .and_hms_opt(start_minute / 60, start_minute % 60, 0)
                            .expect("time"),
                        end: day.and_hms_opt(end_minute / 60, end_minute % 60, 0).expect("time"),
                    }
                })
                .filter(|interval| interval.end > interval.start)
                .collect::<Vec<_>>();

            let found = find_first_slot(day, &busy, duration, &policy);

            // Brute-force every candidate at step granularity for comparison.
            let window_start = day.and_time(policy.window_start);
            let window_end = day.and_time(policy.window_end);
            let mut expected = None;
            let mut cursor = window_start;
            while cursor + Duration::minutes(duration as i64) <= window_end {
                let candidate = TimeSlot {
                    start: cursor,
                    end: cursor + Duration::minutes(duration as i64),
                };
                if !busy.iter().any(|interval| candidate.overlaps(interval)) {
                    expected = Some(candidate);
                    break;
                }
                cursor += Duration::minutes(step as i64);
            }

            prop_assert_eq!(found, expected);
            if let Some(found) = found {
                prop_assert_eq!(found.duration_minutes(), duration as i64);
                prop_assert!(busy.iter().all(|interval| !found.overlaps(interval)));
            }
        }
    }

    #[test]
    fn week_suggestions_skip_full_days() {
        let policy = PlannerPolicy::default();
        let tuesday = monday() + Duration::days(1);
        let busy_by_day = vec![
            (monday(), vec![slot(monday(), (8, 0), (20, 0))]),
            (tuesday, Vec::new()),
        ];

        let drafts = plan_week_suggestions(monday(), &busy_by_day, &policy);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].week_start_date, "2026-02-16");
        assert_eq!(drafts[0].start_at, "2026-02-17T08:00:00");
        assert_eq!(drafts[0].end_at, "2026-02-17T09:30:00");
        assert_eq!(drafts[0].status, Some(BlockStatus::Suggested));
        assert_eq!(drafts[0].title.as_deref(), Some("Focus block"));
    }
}
