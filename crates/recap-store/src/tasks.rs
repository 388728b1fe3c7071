use chrono::{DateTime, Utc};
use rusqlite::{params, Row, Transaction};

use recap_core::types::{ScheduledTask, TaskExecution};

use crate::error::{Result, StoreError};
use crate::Store;

const TASK_COLUMNS: &str = "id, name, channel_id, guild_id, schedule, destinations, options, \
     active, created_at, created_by, last_run, next_run, consecutive_failures, \
     max_failures, retry_delay_minutes";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<(ScheduledTask, [String; 3])> {
    Ok((
        ScheduledTask {
            id: row.get(0)?,
            name: row.get(1)?,
            channel_id: row.get(2)?,
            guild_id: row.get(3)?,
            schedule: recap_core::types::Schedule::Once { at: Utc::now() },
            destinations: Vec::new(),
            options: Default::default(),
            active: row.get::<_, i64>(7)? != 0,
            created_at: parse_ts(row.get::<_, String>(8)?),
            created_by: row.get(9)?,
            last_run: row.get::<_, Option<String>>(10)?.map(parse_ts),
            next_run: row.get::<_, Option<String>>(11)?.map(parse_ts),
            consecutive_failures: row.get::<_, i64>(12)? as u32,
            max_failures: row.get::<_, i64>(13)? as u32,
            retry_delay_minutes: row.get::<_, i64>(14)? as u32,
        },
        [row.get(4)?, row.get(5)?, row.get(6)?],
    ))
}

fn hydrate(pair: (ScheduledTask, [String; 3])) -> Result<ScheduledTask> {
    let (mut task, [schedule, destinations, options]) = pair;
    task.schedule = serde_json::from_str(&schedule)?;
    task.destinations = serde_json::from_str(&destinations)?;
    task.options = serde_json::from_str(&options)?;
    Ok(task)
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Write the task's scheduling state inside an existing transaction so the
/// scheduler can commit it together with the terminal execution record.
pub fn update_task_run_state(tx: &Transaction, task: &ScheduledTask) -> Result<()> {
    tx.execute(
        "UPDATE scheduled_tasks SET
             active = ?2, last_run = ?3, next_run = ?4, consecutive_failures = ?5
         WHERE id = ?1",
        params![
            task.id,
            task.active as i64,
            task.last_run.map(|t| t.to_rfc3339()),
            task.next_run.map(|t| t.to_rfc3339()),
            task.consecutive_failures as i64,
        ],
    )?;
    Ok(())
}

impl Store {
    /// Insert a new task. Fails with `Constraint` when the (guild, name)
    /// pair already exists.
    pub fn save_task(&self, task: &ScheduledTask) -> Result<()> {
        let schedule = serde_json::to_string(&task.schedule)?;
        let destinations = serde_json::to_string(&task.destinations)?;
        let options = serde_json::to_string(&task.options)?;

        self.pool.with_write(|conn| {
            conn.execute(
                "INSERT INTO scheduled_tasks
                 (id, name, channel_id, guild_id, schedule, destinations, options,
                  active, created_at, created_by, last_run, next_run,
                  consecutive_failures, max_failures, retry_delay_minutes)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                params![
                    task.id,
                    task.name,
                    task.channel_id,
                    task.guild_id,
                    schedule,
                    destinations,
                    options,
                    task.active as i64,
                    task.created_at.to_rfc3339(),
                    task.created_by,
                    task.last_run.map(|t| t.to_rfc3339()),
                    task.next_run.map(|t| t.to_rfc3339()),
                    task.consecutive_failures as i64,
                    task.max_failures as i64,
                    task.retry_delay_minutes as i64,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_task(&self, id: &str) -> Result<ScheduledTask> {
        self.pool.with_read(|conn| {
            let pair = conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                    [id],
                    row_to_task,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "scheduled task",
                        id: id.to_string(),
                    },
                    other => other.into(),
                })?;
            hydrate(pair)
        })
    }

    pub fn list_tasks(&self, guild_id: Option<&str>) -> Result<Vec<ScheduledTask>> {
        self.pool.with_read(|conn| {
            let (sql, args) = match guild_id {
                Some(gid) => (
                    format!(
                        "SELECT {TASK_COLUMNS} FROM scheduled_tasks
                         WHERE guild_id = ?1 ORDER BY created_at"
                    ),
                    vec![gid.to_string()],
                ),
                None => (
                    format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks ORDER BY created_at"),
                    Vec::new(),
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<_> = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), row_to_task)?
                .collect::<rusqlite::Result<_>>()?;
            rows.into_iter().map(hydrate).collect()
        })
    }

    /// Active tasks whose `next_run` has arrived, oldest due first.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        self.pool.with_read(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks
                 WHERE active = 1 AND next_run IS NOT NULL AND next_run <= ?1
                 ORDER BY next_run"
            ))?;
            let rows: Vec<_> = stmt
                .query_map([now.to_rfc3339()], row_to_task)?
                .collect::<rusqlite::Result<_>>()?;
            rows.into_iter().map(hydrate).collect()
        })
    }

    /// Duplicate-name probe used by schedule creation (REST 409).
    pub fn task_by_name(&self, guild_id: &str, name: &str) -> Result<Option<ScheduledTask>> {
        self.pool.with_read(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {TASK_COLUMNS} FROM scheduled_tasks
                         WHERE guild_id = ?1 AND name = ?2"
                    ),
                    params![guild_id, name],
                    row_to_task,
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(StoreError::from(other)),
                })?;
            row.map(hydrate).transpose()
        })
    }

    pub fn set_task_active(&self, id: &str, active: bool) -> Result<()> {
        self.pool.with_write(|conn| {
            let n = conn.execute(
                "UPDATE scheduled_tasks SET active = ?2 WHERE id = ?1",
                params![id, active as i64],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "scheduled task",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Reset scheduling fields outside an execution (create/resume paths).
    pub fn set_task_next_run(&self, id: &str, next_run: Option<DateTime<Utc>>) -> Result<()> {
        self.pool.with_write(|conn| {
            let n = conn.execute(
                "UPDATE scheduled_tasks SET next_run = ?2 WHERE id = ?1",
                params![id, next_run.map(|t| t.to_rfc3339())],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "scheduled task",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Executions cascade via the FK.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.pool.with_write(|conn| {
            let n = conn.execute("DELETE FROM scheduled_tasks WHERE id = ?1", [id])?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "scheduled task",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Commit the task's updated run state and its terminal execution in one
    /// transaction, as the at-least-once contract requires.
    pub fn finish_task_run(&self, task: &ScheduledTask, execution: &TaskExecution) -> Result<()> {
        let deliveries = serde_json::to_string(&execution.deliveries)?;
        self.pool.with_tx(|tx| {
            update_task_run_state(tx, task)?;
            tx.execute(
                "UPDATE task_executions SET
                     status = ?2, completed_at = ?3, summary_id = ?4,
                     error = ?5, deliveries = ?6, duration_ms = ?7
                 WHERE id = ?1 AND status IN ('pending', 'running')",
                params![
                    execution.id,
                    execution.status.to_string(),
                    execution.completed_at.map(|t| t.to_rfc3339()),
                    execution.summary_id,
                    execution.error,
                    deliveries,
                    execution.duration_ms as i64,
                ],
            )?;
            Ok(())
        })
    }
}
