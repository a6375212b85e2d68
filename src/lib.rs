mod application;
mod domain;
mod infrastructure;

use application::aggregator::CalendarGrid;
use application::bootstrap::bootstrap_workspace;
use application::commands::{
    accept_plan_block_impl, begin_block_drag_impl, cancel_block_drag_impl,
    clear_sync_token_impl, create_plan_block_impl, delete_plan_block_impl,
    get_calendar_grid_impl, get_sync_status_impl, generate_week_plan_impl,
    list_week_plan_blocks_impl, lock_plan_block_impl, move_block_drag_impl,
    release_block_drag_impl, select_block_impl, set_sync_token_impl,
    start_sync_scheduler_impl, stop_sync_scheduler_impl, sync_now_impl,
    update_plan_block_impl, AppState,
};
use application::drag::{DragPreview, GridMetrics};
use application::sync::SyncOutcome;
use domain::models::{CalendarItem, PlanBlock, PlanBlockDraft};
use infrastructure::remote_calendar::RemoteSyncStatus;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct BootstrapResponse {
    workspace_root: String,
    database_path: String,
}

#[tauri::command]
fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
    })
}

#[tauri::command]
fn ping() -> &'static str {
    "pong"
}

#[tauri::command]
fn get_calendar_grid(
    state: tauri::State<'_, AppState>,
    start_date: String,
    end_date: String,
    include_assignments: Option<bool>,
    include_exams: Option<bool>,
) -> Result<CalendarGrid, String> {
    get_calendar_grid_impl(
        state.inner(),
        start_date,
        end_date,
        include_assignments,
        include_exams,
    )
    .map_err(|error| state.command_error("get_calendar_grid", &error))
}

#[tauri::command]
fn generate_week_plan(
    state: tauri::State<'_, AppState>,
    week_start_date: String,
) -> Result<Vec<PlanBlock>, String> {
    generate_week_plan_impl(state.inner(), week_start_date)
        .map_err(|error| state.command_error("generate_week_plan", &error))
}

#[tauri::command]
async fn accept_plan_block(
    state: tauri::State<'_, AppState>,
    block_id: i64,
) -> Result<PlanBlock, String> {
    accept_plan_block_impl(state.inner(), block_id)
        .await
        .map_err(|error| state.command_error("accept_plan_block", &error))
}

#[tauri::command]
async fn lock_plan_block(
    state: tauri::State<'_, AppState>,
    block_id: i64,
) -> Result<PlanBlock, String> {
    lock_plan_block_impl(state.inner(), block_id)
        .await
        .map_err(|error| state.command_error("lock_plan_block", &error))
}

#[tauri::command]
fn delete_plan_block(state: tauri::State<'_, AppState>, block_id: i64) -> Result<bool, String> {
    delete_plan_block_impl(state.inner(), block_id)
        .map_err(|error| state.command_error("delete_plan_block", &error))
}

#[tauri::command]
fn select_block(state: tauri::State<'_, AppState>, block_id: Option<i64>) -> Result<(), String> {
    select_block_impl(state.inner(), block_id)
        .map_err(|error| state.command_error("select_block", &error))
}

#[tauri::command]
fn create_plan_block(
    state: tauri::State<'_, AppState>,
    draft: PlanBlockDraft,
) -> Result<PlanBlock, String> {
    create_plan_block_impl(state.inner(), draft)
        .map_err(|error| state.command_error("create_plan_block", &error))
}

#[tauri::command]
fn update_plan_block(
    state: tauri::State<'_, AppState>,
    block_id: i64,
    draft: PlanBlockDraft,
) -> Result<PlanBlock, String> {
    update_plan_block_impl(state.inner(), block_id, draft)
        .map_err(|error| state.command_error("update_plan_block", &error))
}

#[tauri::command]
fn list_week_plan_blocks(
    state: tauri::State<'_, AppState>,
    week_start_date: String,
) -> Result<Vec<PlanBlock>, String> {
    list_week_plan_blocks_impl(state.inner(), week_start_date)
        .map_err(|error| state.command_error("list_week_plan_blocks", &error))
}

#[tauri::command]
fn begin_block_drag(
    state: tauri::State<'_, AppState>,
    item: CalendarItem,
    day_index: usize,
    pointer_y: f64,
    item_top: f64,
    metrics: GridMetrics,
) -> Result<DragPreview, String> {
    begin_block_drag_impl(state.inner(), item, day_index, pointer_y, item_top, metrics)
        .map_err(|error| state.command_error("begin_block_drag", &error))
}

#[tauri::command]
fn move_block_drag(
    state: tauri::State<'_, AppState>,
    pointer_y: f64,
) -> Result<Option<DragPreview>, String> {
    move_block_drag_impl(state.inner(), pointer_y)
        .map_err(|error| state.command_error("move_block_drag", &error))
}

#[tauri::command]
async fn release_block_drag(
    state: tauri::State<'_, AppState>,
) -> Result<Option<PlanBlock>, String> {
    release_block_drag_impl(state.inner())
        .await
        .map_err(|error| state.command_error("release_block_drag", &error))
}

#[tauri::command]
fn cancel_block_drag(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    cancel_block_drag_impl(state.inner())
        .map_err(|error| state.command_error("cancel_block_drag", &error))
}

#[tauri::command]
async fn sync_now(state: tauri::State<'_, AppState>) -> Result<SyncOutcome, String> {
    sync_now_impl(state.inner())
        .await
        .map_err(|error| state.command_error("sync_now", &error))
}

#[tauri::command]
async fn get_sync_status(state: tauri::State<'_, AppState>) -> Result<RemoteSyncStatus, String> {
    get_sync_status_impl(state.inner())
        .await
        .map_err(|error| state.command_error("get_sync_status", &error))
}

#[tauri::command]
fn set_sync_token(state: tauri::State<'_, AppState>, token: String) -> Result<(), String> {
    set_sync_token_impl(state.inner(), token)
        .map_err(|error| state.command_error("set_sync_token", &error))
}

#[tauri::command]
fn clear_sync_token(state: tauri::State<'_, AppState>) -> Result<(), String> {
    clear_sync_token_impl(state.inner())
        .map_err(|error| state.command_error("clear_sync_token", &error))
}

#[tauri::command]
async fn start_sync_scheduler(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    start_sync_scheduler_impl(state.inner())
        .await
        .map_err(|error| state.command_error("start_sync_scheduler", &error))
}

#[tauri::command]
fn stop_sync_scheduler(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    stop_sync_scheduler_impl(state.inner())
        .map_err(|error| state.command_error("stop_sync_scheduler", &error))
}

pub fn run() {
    let workspace_root = std::env::current_dir().expect("failed to resolve current directory");
    let app_state = AppState::new(workspace_root).expect("failed to initialize app state");

    tauri::Builder::default()
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            ping,
            bootstrap,
            get_calendar_grid,
            generate_week_plan,
            accept_plan_block,
            lock_plan_block,
            delete_plan_block,
            select_block,
            create_plan_block,
            update_plan_block,
            list_week_plan_blocks,
            begin_block_drag,
            move_block_drag,
            release_block_drag,
            cancel_block_drag,
            sync_now,
            get_sync_status,
            set_sync_token,
            clear_sync_token,
            start_sync_scheduler,
            stop_sync_scheduler
        ])
        .run(tauri::generate_context!())
        .expect("failed to run tauri app");
}
