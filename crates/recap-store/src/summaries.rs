use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use recap_core::types::Summary;

use crate::error::{Result, StoreError};
use crate::Store;

/// Filter criteria for [`Store::find_summaries`]. `None` fields match all.
#[derive(Debug, Clone, Default)]
pub struct SummaryQuery {
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

const SUMMARY_COLUMNS: &str = "id, channel_id, guild_id, start_at, end_at, message_count, body, \
     key_points, action_items, technical_terms, participants, metadata, warnings, created_at";

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<(Summary, [String; 6])> {
    Ok((
        Summary {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            guild_id: row.get(2)?,
            start: parse_ts(row.get::<_, String>(3)?),
            end: parse_ts(row.get::<_, String>(4)?),
            message_count: row.get::<_, i64>(5)? as usize,
            body: row.get(6)?,
            key_points: Vec::new(),
            action_items: Vec::new(),
            technical_terms: Vec::new(),
            participants: Vec::new(),
            metadata: recap_core::types::GenerationMetadata {
                model: String::new(),
                prompt_tokens: 0,
                completion_tokens: 0,
                duration_ms: 0,
                cost_usd: 0.0,
            },
            created_at: parse_ts(row.get::<_, String>(13)?),
            warnings: Vec::new(),
        },
        [
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
            row.get(11)?,
            row.get(12)?,
        ],
    ))
}

/// Deserialize the JSON columns into their typed fields.
fn hydrate(pair: (Summary, [String; 6])) -> Result<Summary> {
    let (mut s, [key_points, action_items, technical_terms, participants, metadata, warnings]) =
        pair;
    s.key_points = serde_json::from_str(&key_points)?;
    s.action_items = serde_json::from_str(&action_items)?;
    s.technical_terms = serde_json::from_str(&technical_terms)?;
    s.participants = serde_json::from_str(&participants)?;
    s.metadata = serde_json::from_str(&metadata)?;
    s.warnings = serde_json::from_str(&warnings)?;
    Ok(s)
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl Store {
    pub fn save_summary(&self, summary: &Summary) -> Result<()> {
        let key_points = serde_json::to_string(&summary.key_points)?;
        let action_items = serde_json::to_string(&summary.action_items)?;
        let technical_terms = serde_json::to_string(&summary.technical_terms)?;
        let participants = serde_json::to_string(&summary.participants)?;
        let metadata = serde_json::to_string(&summary.metadata)?;
        let warnings = serde_json::to_string(&summary.warnings)?;

        self.pool.with_write(|conn| {
            conn.execute(
                "INSERT INTO summaries
                 (id, channel_id, guild_id, start_at, end_at, message_count, body,
                  key_points, action_items, technical_terms, participants,
                  metadata, warnings, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                params![
                    summary.id,
                    summary.channel_id,
                    summary.guild_id,
                    summary.start.to_rfc3339(),
                    summary.end.to_rfc3339(),
                    summary.message_count as i64,
                    summary.body,
                    key_points,
                    action_items,
                    technical_terms,
                    participants,
                    metadata,
                    warnings,
                    summary.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_summary(&self, id: &str) -> Result<Summary> {
        self.pool.with_read(|conn| {
            let pair = conn
                .query_row(
                    &format!("SELECT {SUMMARY_COLUMNS} FROM summaries WHERE id = ?1"),
                    [id],
                    row_to_summary,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "summary",
                        id: id.to_string(),
                    },
                    other => other.into(),
                })?;
            hydrate(pair)
        })
    }

    pub fn find_summaries(
        &self,
        query: &SummaryQuery,
        limit: usize,
        offset: usize,
        order: SummaryOrder,
    ) -> Result<Vec<Summary>> {
        let (where_clause, params) = build_filter(query);
        let dir = match order {
            SummaryOrder::NewestFirst => "DESC",
            SummaryOrder::OldestFirst => "ASC",
        };
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM summaries {where_clause}
             ORDER BY created_at {dir} LIMIT {limit} OFFSET {offset}"
        );

        self.pool.with_read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<_> = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), row_to_summary)?
                .collect::<rusqlite::Result<_>>()?;
            rows.into_iter().map(hydrate).collect()
        })
    }

    pub fn count_summaries(&self, query: &SummaryQuery) -> Result<usize> {
        let (where_clause, params) = build_filter(query);
        let sql = format!("SELECT COUNT(*) FROM summaries {where_clause}");
        self.pool.with_read(|conn| {
            let count: i64 = conn.query_row(
                &sql,
                rusqlite::params_from_iter(params.iter()),
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    pub fn summaries_by_channel(&self, channel_id: &str, limit: usize) -> Result<Vec<Summary>> {
        self.find_summaries(
            &SummaryQuery {
                channel_id: Some(channel_id.to_string()),
                ..Default::default()
            },
            limit,
            0,
            SummaryOrder::NewestFirst,
        )
    }

    pub fn delete_summary(&self, id: &str) -> Result<()> {
        self.pool.with_write(|conn| {
            let n = conn.execute("DELETE FROM summaries WHERE id = ?1", [id])?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "summary",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    // --- durable cache tier -------------------------------------------------

    /// Record `fingerprint -> summary` in the durable cache tier.
    pub fn cache_put(&self, fingerprint: &str, summary_id: &str) -> Result<()> {
        self.pool.with_write(|conn| {
            conn.execute(
                "INSERT INTO summary_cache (fingerprint, summary_id, cached_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                     summary_id = excluded.summary_id,
                     cached_at = excluded.cached_at",
                params![fingerprint, summary_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Look up the durable cache tier. Entries older than `ttl_secs` are
    /// treated as misses (and lazily removed).
    pub fn cache_get(&self, fingerprint: &str, ttl_secs: i64) -> Result<Option<Summary>> {
        let hit: Option<(String, String)> = self.pool.with_read(|conn| {
            let row = conn
                .query_row(
                    "SELECT summary_id, cached_at FROM summary_cache WHERE fingerprint = ?1",
                    [fingerprint],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(StoreError::from(other)),
                })?;
            Ok(row)
        })?;

        let Some((summary_id, cached_at)) = hit else {
            return Ok(None);
        };

        let age = Utc::now() - parse_ts(cached_at);
        if age.num_seconds() > ttl_secs {
            self.pool.with_write(|conn| {
                conn.execute(
                    "DELETE FROM summary_cache WHERE fingerprint = ?1",
                    [fingerprint],
                )?;
                Ok(())
            })?;
            return Ok(None);
        }

        match self.get_summary(&summary_id) {
            Ok(s) => Ok(Some(s)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn cache_invalidate_channel(&self, channel_id: &str) -> Result<usize> {
        self.pool.with_write(|conn| {
            let n = conn.execute(
                "DELETE FROM summary_cache WHERE summary_id IN
                 (SELECT id FROM summaries WHERE channel_id = ?1)",
                [channel_id],
            )?;
            Ok(n)
        })
    }

    pub fn cache_invalidate_guild(&self, guild_id: &str) -> Result<usize> {
        self.pool.with_write(|conn| {
            let n = conn.execute(
                "DELETE FROM summary_cache WHERE summary_id IN
                 (SELECT id FROM summaries WHERE guild_id = ?1)",
                [guild_id],
            )?;
            Ok(n)
        })
    }
}

fn build_filter(query: &SummaryQuery) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(ref guild) = query.guild_id {
        params.push(guild.clone());
        clauses.push(format!("guild_id = ?{}", params.len()));
    }
    if let Some(ref channel) = query.channel_id {
        params.push(channel.clone());
        clauses.push(format!("channel_id = ?{}", params.len()));
    }
    if let Some(since) = query.since {
        params.push(since.to_rfc3339());
        clauses.push(format!("created_at >= ?{}", params.len()));
    }
    if let Some(until) = query.until {
        params.push(until.to_rfc3339());
        clauses.push(format!("created_at < ?{}", params.len()));
    }
    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_clause, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use recap_core::types::{
        ActionItem, GenerationMetadata, Participant, Priority, Summary, TechnicalTerm,
    };

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recap.db");
        (Store::open(path.to_str().unwrap(), 3).unwrap(), dir)
    }

    fn summary(id: &str, channel: &str, guild: &str) -> Summary {
        Summary {
            id: id.to_string(),
            channel_id: channel.to_string(),
            guild_id: guild.to_string(),
            start: Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 7, 2, 0, 0, 0).unwrap(),
            message_count: 42,
            body: "The team discussed the release.".into(),
            key_points: vec!["Release slipped to Friday".into()],
            action_items: vec![ActionItem {
                description: "Tag the release candidate".into(),
                assignee: Some("Ana".into()),
                deadline: Some("Friday".into()),
                priority: Priority::High,
                source_message_ids: vec!["m17".into()],
            }],
            technical_terms: vec![TechnicalTerm {
                term: "RC".into(),
                definition: "release candidate".into(),
                source_message_id: None,
            }],
            participants: vec![Participant {
                user_id: "u1".into(),
                name: "Ana".into(),
                message_count: 20,
                contributions: vec!["drove the release discussion".into()],
            }],
            metadata: GenerationMetadata {
                model: "gpt-4o-mini".into(),
                prompt_tokens: 900,
                completion_tokens: 250,
                duration_ms: 1800,
                cost_usd: 0.0021,
            },
            created_at: Utc.with_ymd_and_hms(2026, 7, 2, 1, 0, 0).unwrap(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn summary_round_trips_through_storage() {
        let (store, _dir) = store();
        let original = summary("s1", "chan-1", "guild-1");
        store.save_summary(&original).unwrap();

        let got = store.get_summary("s1").unwrap();
        assert_eq!(got.body, original.body);
        assert_eq!(got.key_points, original.key_points);
        assert_eq!(got.action_items, original.action_items);
        assert_eq!(got.technical_terms, original.technical_terms);
        assert_eq!(got.participants, original.participants);
        assert_eq!(got.metadata, original.metadata);
        assert_eq!(got.start, original.start);
        assert_eq!(got.end, original.end);
    }

    #[test]
    fn find_respects_channel_filter_and_order() {
        let (store, _dir) = store();
        for (id, chan) in [("s1", "chan-1"), ("s2", "chan-2"), ("s3", "chan-1")] {
            let mut s = summary(id, chan, "guild-1");
            // Distinct creation times so ordering is observable.
            s.created_at = s.created_at + chrono::Duration::minutes(id.len() as i64)
                + chrono::Duration::seconds(id.as_bytes()[1] as i64);
            store.save_summary(&s).unwrap();
        }

        let query = SummaryQuery {
            channel_id: Some("chan-1".into()),
            ..Default::default()
        };
        let found = store
            .find_summaries(&query, 10, 0, SummaryOrder::NewestFirst)
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|s| s.channel_id == "chan-1"));
        assert!(found[0].created_at >= found[1].created_at);

        assert_eq!(store.count_summaries(&query).unwrap(), 2);
    }

    #[test]
    fn missing_summary_is_not_found() {
        let (store, _dir) = store();
        assert!(matches!(
            store.get_summary("nope"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete_summary("nope"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn cache_tier_honors_ttl_and_invalidation() {
        let (store, _dir) = store();
        store.save_summary(&summary("s1", "chan-1", "guild-1")).unwrap();
        store.cache_put("fp-1", "s1").unwrap();

        let hit = store.cache_get("fp-1", 3600).unwrap();
        assert_eq!(hit.unwrap().id, "s1");

        // Negative TTL expires everything immediately.
        assert!(store.cache_get("fp-1", -1).unwrap().is_none());

        store.cache_put("fp-1", "s1").unwrap();
        store.cache_invalidate_channel("chan-1").unwrap();
        assert!(store.cache_get("fp-1", 3600).unwrap().is_none());

        store.cache_put("fp-1", "s1").unwrap();
        store.cache_invalidate_guild("guild-1").unwrap();
        assert!(store.cache_get("fp-1", 3600).unwrap().is_none());
    }
}
