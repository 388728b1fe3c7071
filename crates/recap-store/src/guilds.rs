use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use recap_core::types::GuildConfig;

use crate::error::{Result, StoreError};
use crate::Store;

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<(GuildConfig, [String; 4])> {
    Ok((
        GuildConfig {
            guild_id: row.get(0)?,
            enabled_channels: Vec::new(),
            excluded_channels: Vec::new(),
            default_options: Default::default(),
            permissions: Default::default(),
            webhook_enabled: row.get::<_, i64>(5)? != 0,
            webhook_secret: row.get(6)?,
            updated_at: parse_ts(row.get::<_, String>(7)?),
        },
        [row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?],
    ))
}

fn hydrate(pair: (GuildConfig, [String; 4])) -> Result<GuildConfig> {
    let (mut cfg, [enabled, excluded, options, permissions]) = pair;
    cfg.enabled_channels = serde_json::from_str(&enabled)?;
    cfg.excluded_channels = serde_json::from_str(&excluded)?;
    cfg.default_options = serde_json::from_str(&options)?;
    cfg.permissions = serde_json::from_str(&permissions)?;
    Ok(cfg)
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl Store {
    /// Upsert a guild's configuration. Validation is the caller's job; the
    /// engine layer validates and invalidates the guild's cache entries.
    pub fn save_guild_config(&self, config: &GuildConfig) -> Result<()> {
        let enabled = serde_json::to_string(&config.enabled_channels)?;
        let excluded = serde_json::to_string(&config.excluded_channels)?;
        let options = serde_json::to_string(&config.default_options)?;
        let permissions = serde_json::to_string(&config.permissions)?;

        self.pool.with_write(|conn| {
            conn.execute(
                "INSERT INTO guild_configs
                 (guild_id, enabled_channels, excluded_channels, default_options,
                  permissions, webhook_enabled, webhook_secret, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
                 ON CONFLICT(guild_id) DO UPDATE SET
                     enabled_channels = excluded.enabled_channels,
                     excluded_channels = excluded.excluded_channels,
                     default_options = excluded.default_options,
                     permissions = excluded.permissions,
                     webhook_enabled = excluded.webhook_enabled,
                     webhook_secret = excluded.webhook_secret,
                     updated_at = excluded.updated_at",
                params![
                    config.guild_id,
                    enabled,
                    excluded,
                    options,
                    permissions,
                    config.webhook_enabled as i64,
                    config.webhook_secret,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_guild_config(&self, guild_id: &str) -> Result<GuildConfig> {
        self.pool.with_read(|conn| {
            let pair = conn
                .query_row(
                    "SELECT guild_id, enabled_channels, excluded_channels, default_options,
                            permissions, webhook_enabled, webhook_secret, updated_at
                     FROM guild_configs WHERE guild_id = ?1",
                    [guild_id],
                    row_to_config,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "guild config",
                        id: guild_id.to_string(),
                    },
                    other => other.into(),
                })?;
            hydrate(pair)
        })
    }

    /// Like [`get_guild_config`](Store::get_guild_config) but synthesizes a
    /// default config for guilds that never saved one.
    pub fn guild_config_or_default(&self, guild_id: &str) -> Result<GuildConfig> {
        match self.get_guild_config(guild_id) {
            Ok(cfg) => Ok(cfg),
            Err(StoreError::NotFound { .. }) => Ok(GuildConfig::new(guild_id)),
            Err(e) => Err(e),
        }
    }

    pub fn delete_guild_config(&self, guild_id: &str) -> Result<()> {
        self.pool.with_write(|conn| {
            let n = conn.execute("DELETE FROM guild_configs WHERE guild_id = ?1", [guild_id])?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "guild config",
                    id: guild_id.to_string(),
                });
            }
            Ok(())
        })
    }

    pub fn list_guild_configs(&self) -> Result<Vec<GuildConfig>> {
        self.pool.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT guild_id, enabled_channels, excluded_channels, default_options,
                        permissions, webhook_enabled, webhook_secret, updated_at
                 FROM guild_configs ORDER BY guild_id",
            )?;
            let rows: Vec<_> = stmt
                .query_map([], row_to_config)?
                .collect::<rusqlite::Result<_>>()?;
            rows.into_iter().map(hydrate).collect()
        })
    }
}
