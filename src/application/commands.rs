use crate::application::aggregator::{aggregate, busy_slots_for_day, CalendarGrid};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::drag::{DragController, DragPreview, GridMetrics};
use crate::application::lifecycle::PlanLifecycleService;
use crate::application::sync::{SyncOrchestrator, SyncOutcome, SyncScheduler};
use crate::domain::models::{BackoffPolicy, CalendarItem, PlanBlock, PlanBlockDraft};
use crate::infrastructure::backoff_repository::SqliteBackoffStateRepository;
use crate::infrastructure::calendar_feed::{CalendarFeed, CalendarQuery, SqliteCalendarFeed};
use crate::infrastructure::config::{
    ensure_default_configs, load_planner_policy, load_sync_settings, read_remote_sync_base_url,
    read_timezone,
};
use crate::infrastructure::credential_store::{KeyringCredentialStore, SyncCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::plan_block_repository::{PlanBlockRepository, SqlitePlanBlockRepository};
use crate::infrastructure::remote_calendar::{HttpRemoteCalendar, RemoteCalendar, RemoteSyncStatus};
use crate::infrastructure::storage::initialize_database;
use chrono::{Duration, NaiveDate, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;
use url::Url;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    credential_store: Arc<dyn SyncCredentialStore>,
    runtime: Mutex<RuntimeState>,
    scheduler: Mutex<Option<SyncScheduler>>,
    log_guard: Mutex<()>,
}

#[derive(Debug, Default)]
struct RuntimeState {
    drag: DragController,
    selected_block_id: Option<i64>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_credential_store(workspace_root, Arc::new(KeyringCredentialStore::default()))
    }

    pub fn with_credential_store(
        workspace_root: PathBuf,
        credential_store: Arc<dyn SyncCredentialStore>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config_dir = workspace_root.join("config");
        let logs_dir = workspace_root.join("logs");

        ensure_default_configs(&config_dir)?;
        initialize_database(&bootstrap.database_path)?;

        Ok(Self {
            config_dir,
            database_path: bootstrap.database_path,
            logs_dir,
            credential_store,
            runtime: Mutex::new(RuntimeState::default()),
            scheduler: Mutex::new(None),
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("runtime lock poisoned: {error}")))
}

fn parse_date_input(value: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|error| {
        InfraError::Validation(format!("{field_name} must be YYYY-MM-DD: {error}"))
    })
}

fn plan_repository(state: &AppState) -> Arc<SqlitePlanBlockRepository> {
    Arc::new(SqlitePlanBlockRepository::new(state.database_path()))
}

fn lifecycle_service(state: &AppState) -> PlanLifecycleService<SqlitePlanBlockRepository> {
    PlanLifecycleService::new(plan_repository(state))
}

fn calendar_feed(state: &AppState) -> SqliteCalendarFeed {
    SqliteCalendarFeed::new(state.database_path())
}

/// Builds the remote client when a bridge base URL is configured; `None`
/// means the user never connected an account.
fn build_remote(state: &AppState) -> Result<Option<HttpRemoteCalendar>, InfraError> {
    let Some(base_url) = read_remote_sync_base_url(state.config_dir())? else {
        return Ok(None);
    };
    let base_url = Url::parse(&base_url)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid remoteSyncBaseUrl: {error}")))?;
    let token = state.credential_store.load_token()?;
    let timezone = read_timezone(state.config_dir())?
        .and_then(|name| name.parse::<chrono_tz::Tz>().ok())
        .unwrap_or(chrono_tz::UTC);
    Ok(Some(HttpRemoteCalendar::new(base_url, token, timezone)))
}

fn build_orchestrator(
    state: &AppState,
    remote: HttpRemoteCalendar,
) -> SyncOrchestrator<HttpRemoteCalendar, SqliteBackoffStateRepository> {
    let settings = load_sync_settings(state.config_dir());
    let backoff_repository = Arc::new(SqliteBackoffStateRepository::new(state.database_path()));
    SyncOrchestrator::new(Arc::new(remote), backoff_repository).with_policy(BackoffPolicy {
        base_ms: settings.backoff_base_ms,
        cap_ms: settings.backoff_cap_ms,
    })
}

/// Fires a gated sync push when the remote reports connected. Sync
/// problems are logged, never propagated into the triggering mutation.
async fn push_if_connected(state: &AppState, trigger: &str) -> Option<SyncOutcome> {
    let remote = match build_remote(state) {
        Ok(Some(remote)) => remote,
        Ok(None) => return None,
        Err(error) => {
            state.log_error(trigger, &format!("sync push unavailable: {error}"));
            return None;
        }
    };
    let connected = match remote.sync_status().await {
        Ok(status) => status.connected,
        Err(error) => {
            state.log_error(trigger, &format!("sync status check failed: {error}"));
            false
        }
    };
    if !connected {
        return None;
    }

    let orchestrator = build_orchestrator(state, remote);
    match orchestrator.attempt().await {
        Ok(outcome) => {
            state.log_info(trigger, &format!("sync push outcome: {outcome:?}"));
            Some(outcome)
        }
        Err(error) => {
            state.log_error(trigger, &format!("sync push failed: {error}"));
            None
        }
    }
}

pub fn get_calendar_grid_impl(
    state: &AppState,
    start_date: String,
    end_date: String,
    include_assignments: Option<bool>,
    include_exams: Option<bool>,
) -> Result<CalendarGrid, InfraError> {
    let start = parse_date_input(&start_date, "start_date")?;
    let end = parse_date_input(&end_date, "end_date")?;
    if end < start {
        return Err(InfraError::Validation(
            "end_date must not be before start_date".to_string(),
        ));
    }

    let query = CalendarQuery {
        start_date: start,
        end_date: end,
        include_assignments: include_assignments.unwrap_or(true),
        include_exams: include_exams.unwrap_or(true),
    };
    let items = calendar_feed(state).calendar_items(&query)?;

    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        days.push(current);
        current += Duration::days(1);
    }

    let grid = aggregate(&days, items);
    state.log_info(
        "get_calendar_grid",
        &format!("aggregated range {start}..{end} over {} days", days.len()),
    );
    Ok(grid)
}

pub fn generate_week_plan_impl(
    state: &AppState,
    week_start_date: String,
) -> Result<Vec<PlanBlock>, InfraError> {
    let week_start = parse_date_input(&week_start_date, "week_start_date")?;
    let week_end = week_start + Duration::days(6);
    let policy = load_planner_policy(state.config_dir());

    let items = calendar_feed(state).calendar_items(&CalendarQuery {
        start_date: week_start,
        end_date: week_end,
        include_assignments: true,
        include_exams: true,
    })?;

    let busy_by_day = (0..7)
        .map(|offset| {
            let day = week_start + Duration::days(offset);
            (day, busy_slots_for_day(day, &items, &policy))
        })
        .collect::<Vec<_>>();

    let generated = lifecycle_service(state).generate_week(week_start, &busy_by_day, &policy)?;
    state.log_info(
        "generate_week_plan",
        &format!("generated {} suggestions for week {}", generated.len(), week_start),
    );
    Ok(generated)
}

pub async fn accept_plan_block_impl(
    state: &AppState,
    block_id: i64,
) -> Result<PlanBlock, InfraError> {
    let accepted = lifecycle_service(state).accept(block_id)?;
    state.log_info("accept_plan_block", &format!("accepted block_id={block_id}"));
    let _ = push_if_connected(state, "accept_plan_block").await;
    Ok(accepted)
}

pub async fn lock_plan_block_impl(
    state: &AppState,
    block_id: i64,
) -> Result<PlanBlock, InfraError> {
    let locked = lifecycle_service(state).lock(block_id)?;
    state.log_info("lock_plan_block", &format!("locked block_id={block_id}"));
    let _ = push_if_connected(state, "lock_plan_block").await;
    Ok(locked)
}

/// Deletion never pushes: a removed local draft has no guaranteed remote
/// counterpart to remove.
pub fn delete_plan_block_impl(state: &AppState, block_id: i64) -> Result<bool, InfraError> {
    let deleted = lifecycle_service(state).delete(block_id)?;
    if deleted {
        let mut runtime = lock_runtime(state)?;
        if runtime.selected_block_id == Some(block_id) {
            runtime.selected_block_id = None;
        }
    }
    state.log_info(
        "delete_plan_block",
        &format!("deleted block_id={block_id} removed={deleted}"),
    );
    Ok(deleted)
}

pub fn select_block_impl(state: &AppState, block_id: Option<i64>) -> Result<(), InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.selected_block_id = block_id;
    Ok(())
}

pub fn selected_block_impl(state: &AppState) -> Result<Option<i64>, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(runtime.selected_block_id)
}

pub fn create_plan_block_impl(
    state: &AppState,
    draft: PlanBlockDraft,
) -> Result<PlanBlock, InfraError> {
    let created = plan_repository(state).create(&draft)?;
    state.log_info("create_plan_block", &format!("created block_id={}", created.id));
    Ok(created)
}

pub fn update_plan_block_impl(
    state: &AppState,
    block_id: i64,
    draft: PlanBlockDraft,
) -> Result<PlanBlock, InfraError> {
    let updated = plan_repository(state).update(block_id, &draft)?;
    state.log_info("update_plan_block", &format!("updated block_id={block_id}"));
    Ok(updated)
}

pub fn list_week_plan_blocks_impl(
    state: &AppState,
    week_start_date: String,
) -> Result<Vec<PlanBlock>, InfraError> {
    let week_start = parse_date_input(&week_start_date, "week_start_date")?;
    plan_repository(state).list_week(&week_start.to_string())
}

pub fn begin_block_drag_impl(
    state: &AppState,
    item: CalendarItem,
    day_index: usize,
    pointer_y: f64,
    item_top: f64,
    metrics: GridMetrics,
) -> Result<DragPreview, InfraError> {
    let mut runtime = lock_runtime(state)?;
    let preview = runtime
        .drag
        .begin(&item, day_index, pointer_y, item_top, metrics)?;
    state.log_info("begin_block_drag", &format!("dragging item_id={}", item.id));
    Ok(preview)
}

pub fn move_block_drag_impl(
    state: &AppState,
    pointer_y: f64,
) -> Result<Option<DragPreview>, InfraError> {
    let mut runtime = lock_runtime(state)?;
    Ok(runtime.drag.update(pointer_y))
}

/// Commits the drag. The ephemeral drag state is consumed before the
/// store is touched, so the grid leaves "dragging" even when the commit
/// fails.
pub async fn release_block_drag_impl(
    state: &AppState,
) -> Result<Option<PlanBlock>, InfraError> {
    let commit = {
        let mut runtime = lock_runtime(state)?;
        runtime.drag.release()
    };
    let Some(commit) = commit else {
        return Ok(None);
    };

    let updated = lifecycle_service(state).reschedule(
        commit.block_id,
        &commit.start_at,
        &commit.end_at,
    )?;
    state.log_info(
        "release_block_drag",
        &format!(
            "rescheduled block_id={} start={} end={}",
            commit.block_id, commit.start_at, commit.end_at
        ),
    );

    if commit.wants_push() {
        let _ = push_if_connected(state, "release_block_drag").await;
    }
    Ok(Some(updated))
}

pub fn cancel_block_drag_impl(state: &AppState) -> Result<bool, InfraError> {
    let mut runtime = lock_runtime(state)?;
    Ok(runtime.drag.release().is_some())
}

pub async fn sync_now_impl(state: &AppState) -> Result<SyncOutcome, InfraError> {
    let Some(remote) = build_remote(state)? else {
        return Ok(SyncOutcome::NotConnected);
    };
    let orchestrator = build_orchestrator(state, remote);
    let outcome = orchestrator.attempt().await?;
    state.log_info("sync_now", &format!("sync outcome: {outcome:?}"));
    Ok(outcome)
}

pub async fn get_sync_status_impl(state: &AppState) -> Result<RemoteSyncStatus, InfraError> {
    let Some(remote) = build_remote(state)? else {
        return Ok(RemoteSyncStatus::disconnected());
    };
    remote.sync_status().await
}

pub fn set_sync_token_impl(state: &AppState, token: String) -> Result<(), InfraError> {
    state.credential_store.save_token(&token)?;
    state.log_info("set_sync_token", "stored remote sync token");
    Ok(())
}

pub fn clear_sync_token_impl(state: &AppState) -> Result<(), InfraError> {
    state.credential_store.delete_token()?;
    state.log_info("clear_sync_token", "cleared remote sync token");
    Ok(())
}

/// Starts the periodic sync loop. Returns false when the remote is not
/// configured or a scheduler is already running. Async so the spawned
/// loop lands on the runtime driving the command.
pub async fn start_sync_scheduler_impl(state: &AppState) -> Result<bool, InfraError> {
    let mut scheduler = state
        .scheduler
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("scheduler lock poisoned: {error}")))?;
    if scheduler.as_ref().is_some_and(|running| !running.is_finished()) {
        return Ok(false);
    }
    let Some(remote) = build_remote(state)? else {
        return Ok(false);
    };

    let settings = load_sync_settings(state.config_dir());
    let orchestrator = Arc::new(build_orchestrator(state, remote));
    let interval = StdDuration::from_secs(u64::from(settings.interval_minutes) * 60);
    *scheduler = Some(SyncScheduler::spawn(orchestrator, interval));
    state.log_info(
        "start_sync_scheduler",
        &format!("sync scheduler started, interval={}m", settings.interval_minutes),
    );
    Ok(true)
}

/// Stops the loop on view teardown so no background work leaks.
pub fn stop_sync_scheduler_impl(state: &AppState) -> Result<bool, InfraError> {
    let mut scheduler = state
        .scheduler
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("scheduler lock poisoned: {error}")))?;
    let Some(running) = scheduler.take() else {
        return Ok(false);
    };
    running.stop();
    state.log_info("stop_sync_scheduler", "sync scheduler stopped");
    Ok(true)
}
