use crate::domain::models::{
    parse_block_status, parse_block_type, BlockStatus, PlanBlock, PlanBlockDraft,
};
use crate::infrastructure::error::InfraError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Narrow contract over the persisted plan-block store.
pub trait PlanBlockRepository: Send + Sync {
    fn create(&self, draft: &PlanBlockDraft) -> Result<PlanBlock, InfraError>;
    fn bulk_create(&self, drafts: &[PlanBlockDraft]) -> Result<Vec<PlanBlock>, InfraError>;
    fn get_by_id(&self, id: i64) -> Result<Option<PlanBlock>, InfraError>;
    fn list_week(&self, week_start_date: &str) -> Result<Vec<PlanBlock>, InfraError>;
    fn update(&self, id: i64, draft: &PlanBlockDraft) -> Result<PlanBlock, InfraError>;
    fn update_time(&self, id: i64, start_at: &str, end_at: &str) -> Result<PlanBlock, InfraError>;
    fn set_status(&self, id: i64, status: BlockStatus) -> Result<PlanBlock, InfraError>;
    fn delete(&self, id: i64) -> Result<bool, InfraError>;
    fn clear_suggested(&self, week_start_date: &str) -> Result<i64, InfraError>;
}

fn validated(draft: &PlanBlockDraft) -> Result<BlockStatus, InfraError> {
    draft.validate().map_err(InfraError::Validation)?;
    Ok(draft.status.unwrap_or(BlockStatus::Suggested))
}

#[derive(Debug, Clone)]
pub struct SqlitePlanBlockRepository {
    db_path: PathBuf,
}

impl SqlitePlanBlockRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

fn row_to_block(row: &Row<'_>) -> Result<PlanBlock, rusqlite::Error> {
    let block_type_raw: String = row.get("block_type")?;
    let status_raw: String = row.get("status")?;
    let block_type = parse_block_type(&block_type_raw).map_err(|message| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            message.into(),
        )
    })?;
    let status = parse_block_status(&status_raw).map_err(|message| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            message.into(),
        )
    })?;

    Ok(PlanBlock {
        id: row.get("id")?,
        week_start_date: row.get("week_start_date")?,
        start_at: row.get("start_at")?,
        end_at: row.get("end_at")?,
        block_type,
        course_id: row.get("course_id")?,
        weekly_task_id: row.get("weekly_task_id")?,
        title: row.get("title")?,
        status,
        created_at: row.get("created_at")?,
    })
}

const SELECT_BLOCK: &str = "SELECT id, week_start_date, start_at, end_at, block_type, course_id, \
                            weekly_task_id, title, status, created_at FROM week_plan_blocks";

impl SqlitePlanBlockRepository {
    fn fetch(&self, connection: &Connection, id: i64) -> Result<Option<PlanBlock>, InfraError> {
        let block = connection
            .query_row(
                &format!("{SELECT_BLOCK} WHERE id = ?1"),
                params![id],
                row_to_block,
            )
            .optional()?;
        Ok(block)
    }

    fn require(&self, connection: &Connection, id: i64) -> Result<PlanBlock, InfraError> {
        self.fetch(connection, id)?
            .ok_or_else(|| InfraError::NotFound(format!("plan block not found: {id}")))
    }
}

impl PlanBlockRepository for SqlitePlanBlockRepository {
    fn create(&self, draft: &PlanBlockDraft) -> Result<PlanBlock, InfraError> {
        let status = validated(draft)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO week_plan_blocks (week_start_date, start_at, end_at, block_type, \
             course_id, weekly_task_id, title, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                draft.week_start_date,
                draft.start_at,
                draft.end_at,
                draft.block_type.as_str(),
                draft.course_id,
                draft.weekly_task_id,
                draft.title,
                status.as_str(),
            ],
        )?;
        let id = connection.last_insert_rowid();
        self.require(&connection, id)
    }

    fn bulk_create(&self, drafts: &[PlanBlockDraft]) -> Result<Vec<PlanBlock>, InfraError> {
        for draft in drafts {
            let _ = validated(draft)?;
        }
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let mut created_ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let status = draft.status.unwrap_or(BlockStatus::Suggested);
            transaction.execute(
                "INSERT INTO week_plan_blocks (week_start_date, start_at, end_at, block_type, \
                 course_id, weekly_task_id, title, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    draft.week_start_date,
                    draft.start_at,
                    draft.end_at,
                    draft.block_type.as_str(),
                    draft.course_id,
                    draft.weekly_task_id,
                    draft.title,
                    status.as_str(),
                ],
            )?;
            created_ids.push(transaction.last_insert_rowid());
        }
        transaction.commit()?;

        let mut created = Vec::with_capacity(created_ids.len());
        for id in created_ids {
            created.push(self.require(&connection, id)?);
        }
        Ok(created)
    }

    fn get_by_id(&self, id: i64) -> Result<Option<PlanBlock>, InfraError> {
        let connection = self.connect()?;
        self.fetch(&connection, id)
    }

    fn list_week(&self, week_start_date: &str) -> Result<Vec<PlanBlock>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(&format!("{SELECT_BLOCK} WHERE week_start_date = ?1 ORDER BY start_at"))?;
        let blocks = statement
            .query_map(params![week_start_date], row_to_block)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(blocks)
    }

    fn update(&self, id: i64, draft: &PlanBlockDraft) -> Result<PlanBlock, InfraError> {
        let status = validated(draft)?;
        let connection = self.connect()?;
        let affected = connection.execute(
            "UPDATE week_plan_blocks
             SET week_start_date = ?1, start_at = ?2, end_at = ?3, block_type = ?4,
                 course_id = ?5, weekly_task_id = ?6, title = ?7, status = ?8
             WHERE id = ?9",
            params![
                draft.week_start_date,
                draft.start_at,
                draft.end_at,
                draft.block_type.as_str(),
                draft.course_id,
                draft.weekly_task_id,
                draft.title,
                status.as_str(),
                id,
            ],
        )?;
        if affected == 0 {
            return Err(InfraError::NotFound(format!("plan block not found: {id}")));
        }
        self.require(&connection, id)
    }

    fn update_time(&self, id: i64, start_at: &str, end_at: &str) -> Result<PlanBlock, InfraError> {
        let connection = self.connect()?;
        let affected = connection.execute(
            "UPDATE week_plan_blocks SET start_at = ?1, end_at = ?2 WHERE id = ?3",
            params![start_at, end_at, id],
        )?;
        if affected == 0 {
            return Err(InfraError::NotFound(format!("plan block not found: {id}")));
        }
        self.require(&connection, id)
    }

    fn set_status(&self, id: i64, status: BlockStatus) -> Result<PlanBlock, InfraError> {
        let connection = self.connect()?;
        let affected = connection.execute(
            "UPDATE week_plan_blocks SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if affected == 0 {
            return Err(InfraError::NotFound(format!("plan block not found: {id}")));
        }
        self.require(&connection, id)
    }

    fn delete(&self, id: i64) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let affected = connection.execute("DELETE FROM week_plan_blocks WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn clear_suggested(&self, week_start_date: &str) -> Result<i64, InfraError> {
        let connection = self.connect()?;
        let affected = connection.execute(
            "DELETE FROM week_plan_blocks WHERE week_start_date = ?1 AND status = 'suggested'",
            params![week_start_date],
        )?;
        Ok(affected as i64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPlanBlockRepository {
    state: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    blocks: HashMap<i64, PlanBlock>,
    next_id: i64,
}

impl InMemoryPlanBlockRepository {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("plan block lock poisoned: {error}")))
    }

    fn insert(state: &mut InMemoryState, draft: &PlanBlockDraft, status: BlockStatus) -> PlanBlock {
        state.next_id += 1;
        let block = PlanBlock {
            id: state.next_id,
            week_start_date: draft.week_start_date.clone(),
            start_at: draft.start_at.clone(),
            end_at: draft.end_at.clone(),
            block_type: draft.block_type,
            course_id: draft.course_id,
            weekly_task_id: draft.weekly_task_id,
            title: draft.title.clone(),
            status,
            created_at: None,
        };
        state.blocks.insert(block.id, block.clone());
        block
    }
}

impl PlanBlockRepository for InMemoryPlanBlockRepository {
    fn create(&self, draft: &PlanBlockDraft) -> Result<PlanBlock, InfraError> {
        let status = validated(draft)?;
        let mut state = self.lock()?;
        Ok(Self::insert(&mut state, draft, status))
    }

    fn bulk_create(&self, drafts: &[PlanBlockDraft]) -> Result<Vec<PlanBlock>, InfraError> {
        for draft in drafts {
            let _ = validated(draft)?;
        }
        let mut state = self.lock()?;
        Ok(drafts
            .iter()
            .map(|draft| {
                let status = draft.status.unwrap_or(BlockStatus::Suggested);
                Self::insert(&mut state, draft, status)
            })
            .collect())
    }

    fn get_by_id(&self, id: i64) -> Result<Option<PlanBlock>, InfraError> {
        let state = self.lock()?;
        Ok(state.blocks.get(&id).cloned())
    }

    fn list_week(&self, week_start_date: &str) -> Result<Vec<PlanBlock>, InfraError> {
        let state = self.lock()?;
        let mut blocks = state
            .blocks
            .values()
            .filter(|block| block.week_start_date == week_start_date)
            .cloned()
            .collect::<Vec<_>>();
        blocks.sort_by(|left, right| left.start_at.cmp(&right.start_at));
        Ok(blocks)
    }

    fn update(&self, id: i64, draft: &PlanBlockDraft) -> Result<PlanBlock, InfraError> {
        let status = validated(draft)?;
        let mut state = self.lock()?;
        let block = state
            .blocks
            .get_mut(&id)
            .ok_or_else(|| InfraError::NotFound(format!("plan block not found: {id}")))?;
        block.week_start_date = draft.week_start_date.clone();
        block.start_at = draft.start_at.clone();
        block.end_at = draft.end_at.clone();
        block.block_type = draft.block_type;
        block.course_id = draft.course_id;
        block.weekly_task_id = draft.weekly_task_id;
        block.title = draft.title.clone();
        block.status = status;
        Ok(block.clone())
    }

    fn update_time(&self, id: i64, start_at: &str, end_at: &str) -> Result<PlanBlock, InfraError> {
        let mut state = self.lock()?;
        let block = state
            .blocks
            .get_mut(&id)
            .ok_or_else(|| InfraError::NotFound(format!("plan block not found: {id}")))?;
        block.start_at = start_at.to_string();
        block.end_at = end_at.to_string();
        Ok(block.clone())
    }

    fn set_status(&self, id: i64, status: BlockStatus) -> Result<PlanBlock, InfraError> {
        let mut state = self.lock()?;
        let block = state
            .blocks
            .get_mut(&id)
            .ok_or_else(|| InfraError::NotFound(format!("plan block not found: {id}")))?;
        block.status = status;
        Ok(block.clone())
    }

    fn delete(&self, id: i64) -> Result<bool, InfraError> {
        let mut state = self.lock()?;
        Ok(state.blocks.remove(&id).is_some())
    }

    fn clear_suggested(&self, week_start_date: &str) -> Result<i64, InfraError> {
        let mut state = self.lock()?;
        let before = state.blocks.len();
        state.blocks.retain(|_, block| {
            !(block.week_start_date == week_start_date && block.status == BlockStatus::Suggested)
        });
        Ok((before - state.blocks.len()) as i64)
    }
}
