use crate::domain::models::{
    parse_naive_datetime, plan_block_item_id, BlockStatus, CalendarItem, ItemSource,
};
use crate::infrastructure::error::InfraError;
use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CalendarQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub include_assignments: bool,
    pub include_exams: bool,
}

/// Read-only source feed over the collaborator store, already filtered to
/// the requested range.
pub trait CalendarFeed: Send + Sync {
    fn calendar_items(&self, query: &CalendarQuery) -> Result<Vec<CalendarItem>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteCalendarFeed {
    db_path: PathBuf,
}

impl SqliteCalendarFeed {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl CalendarFeed for SqliteCalendarFeed {
    fn calendar_items(&self, query: &CalendarQuery) -> Result<Vec<CalendarItem>, InfraError> {
        let connection = self.connect()?;
        let mut items = Vec::new();

        collect_course_meetings(&connection, query, &mut items)?;
        collect_calendar_events(&connection, query, &mut items)?;
        collect_plan_blocks(&connection, query, &mut items)?;
        if query.include_assignments {
            collect_assignments(&connection, query, &mut items)?;
        }
        if query.include_exams {
            collect_exams(&connection, query, &mut items)?;
        }

        items.sort_by(|left, right| left.start_at.cmp(&right.start_at));
        Ok(items)
    }
}

/// Weekly course meetings expand to one occurrence per matching day in the
/// range. `day_of_week` counts from Sunday, matching the stored schedule.
fn collect_course_meetings(
    connection: &Connection,
    query: &CalendarQuery,
    items: &mut Vec<CalendarItem>,
) -> Result<(), InfraError> {
    let mut statement = connection.prepare(
        "SELECT cm.id, cm.course_id, cm.day_of_week, cm.start_time, cm.end_time,
                cm.location, cm.meeting_type, c.name, c.color
         FROM course_meetings cm
         JOIN courses c ON c.id = cm.course_id
         WHERE c.is_active = 1",
    )?;
    let meetings = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (id, course_id, day_of_week, start_time, end_time, location, meeting_type, course_name, color) in
        meetings
    {
        let mut current = query.start_date;
        while current <= query.end_date {
            if current.weekday().num_days_from_sunday() as i64 == day_of_week {
                let title = format!(
                    "{} - {}",
                    course_name.as_deref().unwrap_or("Course"),
                    meeting_type.as_deref().unwrap_or("Class")
                );
                items.push(CalendarItem {
                    id: format!("cm_{}_{}", id, current),
                    source: ItemSource::CourseMeeting,
                    title,
                    start_at: format!("{}T{}:00", current, start_time),
                    end_at: format!("{}T{}:00", current, end_time),
                    all_day: false,
                    color: color.clone(),
                    course_id: Some(course_id),
                    course_name: course_name.clone(),
                    category: Some("class".to_string()),
                    status: None,
                    locked: true,
                    editable: false,
                    metadata_json: location
                        .as_ref()
                        .map(|value| format!(r#"{{"location":"{}"}}"#, value)),
                });
            }
            current += Duration::days(1);
        }
    }
    Ok(())
}

/// One-off events land as-is when their date falls in the range; recurring
/// events carry a `WEEKLY:<d>,<d>,…` rule and expand per matching weekday.
fn collect_calendar_events(
    connection: &Connection,
    query: &CalendarQuery,
    items: &mut Vec<CalendarItem>,
) -> Result<(), InfraError> {
    let mut statement = connection.prepare(
        "SELECT id, title, start_at, end_at, rrule, start_time, end_time, category, locked
         FROM calendar_events",
    )?;
    let events = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<i64>>(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let range_start = query.start_date.to_string();
    let range_end = query.end_date.to_string();

    for (id, title, start_at, end_at, rrule, start_time, end_time, category, locked) in events {
        let is_locked = locked.unwrap_or(0) == 1;
        if let Some(rule) = rrule.as_deref() {
            let Some(days_raw) = rule.strip_prefix("WEEKLY:") else {
                continue;
            };
            let days: Vec<i64> = days_raw.split(',').filter_map(|d| d.parse().ok()).collect();
            let st = start_time.as_deref().unwrap_or("09:00");
            let et = end_time.as_deref().unwrap_or("10:00");

            let mut current = query.start_date;
            while current <= query.end_date {
                let dow = current.weekday().num_days_from_sunday() as i64;
                if days.contains(&dow) {
                    items.push(CalendarItem {
                        id: format!("ce_{}_{}", id, current),
                        source: ItemSource::CalendarEvent,
                        title: title.clone(),
                        start_at: format!("{}T{}:00", current, st),
                        end_at: format!("{}T{}:00", current, et),
                        all_day: false,
                        color: None,
                        course_id: None,
                        course_name: None,
                        category: Some(category.clone()),
                        status: None,
                        locked: is_locked,
                        editable: false,
                        metadata_json: None,
                    });
                }
                current += Duration::days(1);
            }
        } else if let (Some(sa), Some(ea)) = (start_at, end_at) {
            let event_date = sa.split('T').next().unwrap_or("");
            if event_date >= range_start.as_str() && event_date <= range_end.as_str() {
                items.push(CalendarItem {
                    id: format!("ce_{}", id),
                    source: ItemSource::CalendarEvent,
                    title: title.clone(),
                    start_at: sa,
                    end_at: ea,
                    all_day: false,
                    color: None,
                    course_id: None,
                    course_name: None,
                    category: Some(category.clone()),
                    status: None,
                    locked: is_locked,
                    editable: false,
                    metadata_json: None,
                });
            }
        }
    }
    Ok(())
}

fn collect_plan_blocks(
    connection: &Connection,
    query: &CalendarQuery,
    items: &mut Vec<CalendarItem>,
) -> Result<(), InfraError> {
    let mut statement = connection.prepare(
        "SELECT wpb.id, wpb.start_at, wpb.end_at, wpb.block_type, wpb.course_id,
                wpb.title, wpb.status, c.color
         FROM week_plan_blocks wpb
         LEFT JOIN courses c ON c.id = wpb.course_id
         WHERE date(wpb.start_at) >= ?1 AND date(wpb.start_at) <= ?2",
    )?;
    let blocks = statement
        .query_map(
            params![query.start_date.to_string(), query.end_date.to_string()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    for (id, start_at, end_at, block_type, course_id, title, status, color) in blocks {
        let status = status
            .as_deref()
            .and_then(|raw| crate::domain::models::parse_block_status(raw).ok());
        let is_locked = status == Some(BlockStatus::Locked);
        items.push(CalendarItem {
            id: plan_block_item_id(id),
            source: ItemSource::PlanBlock,
            title: title.unwrap_or_else(|| block_type.clone()),
            start_at,
            end_at,
            all_day: false,
            color,
            course_id,
            course_name: None,
            category: Some(block_type),
            status,
            locked: is_locked,
            editable: !is_locked,
            metadata_json: None,
        });
    }
    Ok(())
}

/// Open assignments surface as all-day deadline markers.
fn collect_assignments(
    connection: &Connection,
    query: &CalendarQuery,
    items: &mut Vec<CalendarItem>,
) -> Result<(), InfraError> {
    let mut statement = connection.prepare(
        "SELECT a.id, a.title, a.due_date, a.course_id, c.color
         FROM assignments a
         JOIN courses c ON c.id = a.course_id
         WHERE a.is_completed = 0
           AND date(a.due_date) >= ?1 AND date(a.due_date) <= ?2",
    )?;
    let assignments = statement
        .query_map(
            params![query.start_date.to_string(), query.end_date.to_string()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    for (id, title, due_date, course_id, color) in assignments {
        items.push(CalendarItem {
            id: format!("asgn_{}", id),
            source: ItemSource::Assignment,
            title: format!("Due: {}", title),
            start_at: due_date.clone(),
            end_at: due_date,
            all_day: true,
            color,
            course_id: Some(course_id),
            course_name: None,
            category: Some("deadline".to_string()),
            status: None,
            locked: true,
            editable: false,
            metadata_json: None,
        });
    }
    Ok(())
}

/// Exams with a duration render as timed items; undated durations fall back
/// to an all-day marker.
fn collect_exams(
    connection: &Connection,
    query: &CalendarQuery,
    items: &mut Vec<CalendarItem>,
) -> Result<(), InfraError> {
    let mut statement = connection.prepare(
        "SELECT e.id, e.title, e.exam_date, e.duration_minutes, e.course_id, c.color
         FROM exams e
         JOIN courses c ON c.id = e.course_id
         WHERE date(e.exam_date) >= ?1 AND date(e.exam_date) <= ?2",
    )?;
    let exams = statement
        .query_map(
            params![query.start_date.to_string(), query.end_date.to_string()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    for (id, title, exam_date, duration, course_id, color) in exams {
        let Some(exam_date) = exam_date else {
            continue;
        };
        let all_day = duration.is_none();
        let end_at = match duration {
            Some(minutes) => match parse_naive_datetime(&exam_date) {
                Some(start) => (start + Duration::minutes(minutes))
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string(),
                None => exam_date.clone(),
            },
            None => exam_date.clone(),
        };

        items.push(CalendarItem {
            id: format!("exam_{}", id),
            source: ItemSource::Exam,
            title: format!("Exam: {}", title),
            start_at: exam_date,
            end_at,
            all_day,
            color,
            course_id: Some(course_id),
            course_name: None,
            category: Some("exam".to_string()),
            status: None,
            locked: true,
            editable: false,
            metadata_json: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDb {
        path: PathBuf,
    }

    impl TempDb {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "studygrid-feed-tests-{}-{}.sqlite",
                std::process::id(),
                sequence
            ));
            initialize_database(&path).expect("initialize database");
            Self { path }
        }

        fn connection(&self) -> Connection {
            Connection::open(&self.path).expect("open connection")
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn week_query() -> CalendarQuery {
        CalendarQuery {
            // 2026-02-16 is a Monday
            start_date: NaiveDate::from_ymd_opt(2026, 2, 16).expect("date"),
            end_date: NaiveDate::from_ymd_opt(2026, 2, 22).expect("date"),
            include_assignments: true,
            include_exams: true,
        }
    }

    fn seed_course(connection: &Connection) -> i64 {
        connection
            .execute(
                "INSERT INTO courses (name, color, is_active) VALUES ('Algorithms', '#ff0000', 1)",
                [],
            )
            .expect("insert course");
        connection.last_insert_rowid()
    }

    #[test]
    fn course_meetings_expand_weekly_in_range() {
        let db = TempDb::new();
        let connection = db.connection();
        let course_id = seed_course(&connection);
        // day_of_week 1 = Monday (counted from Sunday)
        connection
            .execute(
                "INSERT INTO course_meetings (course_id, day_of_week, start_time, end_time, \
                 location, meeting_type) VALUES (?1, 1, '10:00', '11:30', 'Hall B', 'Lecture')",
                params![course_id],
            )
            .expect("insert meeting");

        let feed = SqliteCalendarFeed::new(&db.path);
        let items = feed.calendar_items(&week_query()).expect("items");

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, ItemSource::CourseMeeting);
        assert_eq!(items[0].start_at, "2026-02-16T10:00:00");
        assert_eq!(items[0].title, "Algorithms - Lecture");
        assert!(items[0].id.starts_with("cm_"));
        assert!(!items[0].editable);
        assert!(items[0].metadata_json.as_deref().unwrap_or("").contains("Hall B"));
    }

    #[test]
    fn recurring_event_expands_on_listed_weekdays() {
        let db = TempDb::new();
        let connection = db.connection();
        connection
            .execute(
                "INSERT INTO calendar_events (title, rrule, start_time, end_time, category) \
                 VALUES ('Gym', 'WEEKLY:1,3', '18:00', '19:00', 'personal')",
                [],
            )
            .expect("insert recurring event");

        let feed = SqliteCalendarFeed::new(&db.path);
        let items = feed.calendar_items(&week_query()).expect("items");

        // Monday + Wednesday of the requested week
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.source == ItemSource::CalendarEvent));
        assert_eq!(items[0].start_at, "2026-02-16T18:00:00");
        assert_eq!(items[1].start_at, "2026-02-18T18:00:00");
    }

    #[test]
    fn one_off_event_outside_range_is_excluded() {
        let db = TempDb::new();
        let connection = db.connection();
        connection
            .execute(
                "INSERT INTO calendar_events (title, start_at, end_at, category) \
                 VALUES ('In range', '2026-02-17T12:00:00', '2026-02-17T13:00:00', 'general')",
                [],
            )
            .expect("insert event");
        connection
            .execute(
                "INSERT INTO calendar_events (title, start_at, end_at, category) \
                 VALUES ('Out of range', '2026-03-05T12:00:00', '2026-03-05T13:00:00', 'general')",
                [],
            )
            .expect("insert far event");

        let feed = SqliteCalendarFeed::new(&db.path);
        let items = feed.calendar_items(&week_query()).expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "In range");
    }

    #[test]
    fn plan_blocks_carry_status_and_reversible_ids() {
        let db = TempDb::new();
        let connection = db.connection();
        connection
            .execute(
                "INSERT INTO week_plan_blocks (week_start_date, start_at, end_at, block_type, \
                 title, status) VALUES ('2026-02-16', '2026-02-17T09:00:00', \
                 '2026-02-17T10:30:00', 'study', 'Focus block', 'locked')",
                [],
            )
            .expect("insert block");
        let block_id = connection.last_insert_rowid();

        let feed = SqliteCalendarFeed::new(&db.path);
        let items = feed.calendar_items(&week_query()).expect("items");

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].plan_block_id(), Some(block_id));
        assert_eq!(items[0].status, Some(BlockStatus::Locked));
        assert!(items[0].locked);
        assert!(!items[0].editable);
    }

    #[test]
    fn assignments_and_exams_render_as_markers() {
        let db = TempDb::new();
        let connection = db.connection();
        let course_id = seed_course(&connection);
        connection
            .execute(
                "INSERT INTO assignments (course_id, title, due_date, is_completed) \
                 VALUES (?1, 'Problem set 3', '2026-02-19', 0)",
                params![course_id],
            )
            .expect("insert assignment");
        connection
            .execute(
                "INSERT INTO assignments (course_id, title, due_date, is_completed) \
                 VALUES (?1, 'Done already', '2026-02-19', 1)",
                params![course_id],
            )
            .expect("insert completed assignment");
        connection
            .execute(
                "INSERT INTO exams (course_id, title, exam_date, duration_minutes) \
                 VALUES (?1, 'Midterm', '2026-02-20T14:00:00', 120)",
                params![course_id],
            )
            .expect("insert exam");

        let feed = SqliteCalendarFeed::new(&db.path);
        let items = feed.calendar_items(&week_query()).expect("items");

        assert_eq!(items.len(), 2);
        let assignment = items
            .iter()
            .find(|item| item.source == ItemSource::Assignment)
            .expect("assignment item");
        assert!(assignment.all_day);
        assert_eq!(assignment.title, "Due: Problem set 3");

        let exam = items.iter().find(|item| item.source == ItemSource::Exam).expect("exam item");
        assert!(!exam.all_day);
        assert_eq!(exam.end_at, "2026-02-20T16:00:00");
    }

    #[test]
    fn optional_sources_can_be_excluded() {
        let db = TempDb::new();
        let connection = db.connection();
        let course_id = seed_course(&connection);
        connection
            .execute(
                "INSERT INTO assignments (course_id, title, due_date, is_completed) \
                 VALUES (?1, 'Hidden', '2026-02-19', 0)",
                params![course_id],
            )
            .expect("insert assignment");

        let mut query = week_query();
        query.include_assignments = false;
        query.include_exams = false;

        let feed = SqliteCalendarFeed::new(&db.path);
        let items = feed.calendar_items(&query).expect("items");
        assert!(items.is_empty());
    }
}
