use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use recap_core::types::{ExecutionStatus, TaskExecution};

use crate::error::{Result, StoreError};
use crate::Store;

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<(TaskExecution, String, String)> {
    Ok((
        TaskExecution {
            id: row.get(0)?,
            task_id: row.get(1)?,
            status: ExecutionStatus::Pending,
            started_at: parse_ts(row.get::<_, String>(3)?),
            completed_at: row.get::<_, Option<String>>(4)?.map(parse_ts),
            summary_id: row.get(5)?,
            error: row.get(6)?,
            deliveries: Vec::new(),
            duration_ms: row.get::<_, i64>(8)? as u64,
        },
        row.get(2)?,
        row.get(7)?,
    ))
}

fn hydrate(triple: (TaskExecution, String, String)) -> Result<TaskExecution> {
    let (mut exec, status, deliveries) = triple;
    exec.status = status
        .parse()
        .map_err(|e: String| StoreError::Transient(e))?;
    exec.deliveries = serde_json::from_str(&deliveries)?;
    Ok(exec)
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl Store {
    /// Insert a fresh execution row (normally status `running`).
    pub fn insert_execution(&self, execution: &TaskExecution) -> Result<()> {
        let deliveries = serde_json::to_string(&execution.deliveries)?;
        self.pool.with_write(|conn| {
            conn.execute(
                "INSERT INTO task_executions
                 (id, task_id, status, started_at, completed_at, summary_id,
                  error, deliveries, duration_ms)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    execution.id,
                    execution.task_id,
                    execution.status.to_string(),
                    execution.started_at.to_rfc3339(),
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

    /// Most recent executions for a task.
    pub fn executions_for_task(&self, task_id: &str, limit: usize) -> Result<Vec<TaskExecution>> {
        self.pool.with_read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, task_id, status, started_at, completed_at, summary_id,
                        error, deliveries, duration_ms
                 FROM task_executions WHERE task_id = ?1
                 ORDER BY started_at DESC LIMIT {limit}"
            ))?;
            let rows: Vec<_> = stmt
                .query_map([task_id], row_to_execution)?
                .collect::<rusqlite::Result<_>>()?;
            rows.into_iter().map(hydrate).collect()
        })
    }

    /// Flip executions stranded in `running` by a crash to `failed` so the
    /// next tick can re-pick their tasks. Returns how many were touched.
    pub fn fail_stale_executions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.pool.with_write(|conn| {
            let n = conn.execute(
                "UPDATE task_executions SET
                     status = 'failed', completed_at = ?1, error = 'process restart'
                 WHERE status IN ('pending', 'running')",
                [now.to_rfc3339()],
            )?;
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recap_core::types::{
        DeliveryResult, Destination, Schedule, ScheduledTask, SinkFormat, SinkKind,
    };

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recap.db");
        (Store::open(path.to_str().unwrap(), 2).unwrap(), dir)
    }

    fn task(id: &str, name: &str) -> ScheduledTask {
        ScheduledTask {
            id: id.to_string(),
            name: name.to_string(),
            channel_id: "chan-1".into(),
            guild_id: "guild-1".into(),
            schedule: Schedule::Daily { hour: 8, minute: 0 },
            destinations: vec![Destination {
                sink: SinkKind::Channel,
                target: "chan-1".into(),
                format: SinkFormat::Embed,
            }],
            options: Default::default(),
            active: true,
            created_at: Utc::now(),
            created_by: "user-1".into(),
            last_run: None,
            next_run: Some(Utc::now()),
            consecutive_failures: 0,
            max_failures: 3,
            retry_delay_minutes: 5,
        }
    }

    fn execution(id: &str, task_id: &str) -> TaskExecution {
        TaskExecution {
            id: id.to_string(),
            task_id: task_id.to_string(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            summary_id: None,
            error: None,
            deliveries: Vec::new(),
            duration_ms: 0,
        }
    }

    #[test]
    fn execution_round_trip_with_deliveries() {
        let (store, _dir) = store();
        store.save_task(&task("t1", "daily")).unwrap();

        let mut exec = execution("e1", "t1");
        store.insert_execution(&exec).unwrap();

        exec.status = ExecutionStatus::Completed;
        exec.completed_at = Some(Utc::now());
        exec.summary_id = Some("s1".into());
        exec.deliveries = vec![DeliveryResult {
            sink: SinkKind::Webhook,
            target: "https://example.test/hook".into(),
            ok: true,
            error: None,
        }];
        exec.duration_ms = 1234;
        store.finish_task_run(&task("t1", "daily"), &exec).unwrap();

        let got = store.executions_for_task("t1", 10).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].status, ExecutionStatus::Completed);
        assert_eq!(got[0].deliveries.len(), 1);
        assert!(got[0].deliveries[0].ok);
    }

    #[test]
    fn terminal_executions_are_never_rewritten() {
        let (store, _dir) = store();
        store.save_task(&task("t1", "daily")).unwrap();

        let mut exec = execution("e1", "t1");
        exec.status = ExecutionStatus::Failed;
        exec.completed_at = Some(Utc::now());
        exec.error = Some("boom".into());
        store.insert_execution(&exec).unwrap();

        // A later finish write must not overwrite the terminal row.
        exec.status = ExecutionStatus::Completed;
        exec.error = None;
        store.finish_task_run(&task("t1", "daily"), &exec).unwrap();

        let got = store.executions_for_task("t1", 10).unwrap();
        assert_eq!(got[0].status, ExecutionStatus::Failed);
        assert_eq!(got[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn deleting_a_task_cascades_to_executions() {
        let (store, _dir) = store();
        store.save_task(&task("t1", "daily")).unwrap();
        store.insert_execution(&execution("e1", "t1")).unwrap();

        store.delete_task("t1").unwrap();
        assert!(store.executions_for_task("t1", 10).unwrap().is_empty());
    }

    #[test]
    fn stale_running_executions_fail_on_startup() {
        let (store, _dir) = store();
        store.save_task(&task("t1", "daily")).unwrap();
        store.insert_execution(&execution("e1", "t1")).unwrap();

        let touched = store.fail_stale_executions(Utc::now()).unwrap();
        assert_eq!(touched, 1);
        let got = store.executions_for_task("t1", 10).unwrap();
        assert_eq!(got[0].status, ExecutionStatus::Failed);
        assert_eq!(got[0].error.as_deref(), Some("process restart"));
    }

    #[test]
    fn duplicate_task_name_in_guild_is_a_constraint() {
        let (store, _dir) = store();
        store.save_task(&task("t1", "daily")).unwrap();
        let err = store.save_task(&task("t2", "daily")).unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }
}
