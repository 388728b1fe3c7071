use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::builder::GetMessages;
use serenity::http::Http;
use serenity::model::channel::{
    Channel, GuildChannel, Message, MessageType, PermissionOverwrite, PermissionOverwriteType,
};
use serenity::model::guild::{Member, Role};
use serenity::model::id::{ChannelId, MessageId, RoleId, UserId};
use serenity::model::permissions::Permissions;
use tracing::debug;

use recap_core::types::{AttachmentInfo, AttachmentKind};

use crate::error::{Result, SourceError};
use crate::source::{MessageSource, RawMessage};

/// First second of 2015, the zero point of Discord snowflakes.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
/// Discord's page size cap for the messages endpoint.
const PAGE_SIZE: u8 = 100;

/// Message source backed by Discord's REST API.
///
/// serenity's `Http` client queues requests behind Discord's rate-limit
/// buckets, so pagination here never sees a 429 — only added latency.
pub struct DiscordSource {
    http: Arc<Http>,
}

impl DiscordSource {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn parse_channel(channel_id: &str) -> Result<ChannelId> {
        channel_id
            .parse::<u64>()
            .map(ChannelId::new)
            .map_err(|_| SourceError::NotFound {
                channel_id: channel_id.to_string(),
            })
    }

    async fn guild_channel(&self, channel_id: ChannelId) -> Result<GuildChannel> {
        let channel = self
            .http
            .get_channel(channel_id)
            .await
            .map_err(|e| map_api_error(e, channel_id))?;
        channel.guild().ok_or(SourceError::NotFound {
            channel_id: channel_id.to_string(),
        })
    }
}

#[async_trait]
impl MessageSource for DiscordSource {
    fn name(&self) -> &str {
        "discord"
    }

    async fn fetch_range(
        &self,
        channel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<RawMessage>> {
        let channel = Self::parse_channel(channel_id)?;
        // Seed the cursor just before the window start; snowflake ordering
        // makes "after" a time-range query.
        let mut cursor = MessageId::new(snowflake_at(start).max(1));
        let mut collected: Vec<RawMessage> = Vec::new();

        loop {
            let page = channel
                .messages(&self.http, GetMessages::new().after(cursor).limit(PAGE_SIZE))
                .await
                .map_err(|e| map_api_error(e, channel))?;
            if page.is_empty() {
                break;
            }

            // Pages arrive newest-first; walk oldest-first and advance the cursor.
            let mut oldest_first: Vec<&Message> = page.iter().collect();
            oldest_first.sort_by_key(|m| m.id);
            cursor = oldest_first.last().map(|m| m.id).unwrap_or(cursor);

            let mut past_end = false;
            for msg in oldest_first {
                let ts = message_timestamp(msg);
                if ts >= end {
                    past_end = true;
                    break;
                }
                if ts >= start {
                    collected.push(convert_message(msg));
                }
            }

            if past_end || page.len() < PAGE_SIZE as usize {
                break;
            }
            if let Some(cap) = limit {
                if collected.len() >= cap {
                    break;
                }
            }
        }

        collected.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(cap) = limit {
            collected.truncate(cap);
        }

        debug!(channel = %channel_id, count = collected.len(), "fetched message range");
        Ok(collected)
    }

    async fn has_read_access(&self, user_id: &str, channel_id: &str) -> Result<bool> {
        let channel = Self::parse_channel(channel_id)?;
        let guild_channel = self.guild_channel(channel).await?;

        let uid = match user_id.parse::<u64>() {
            Ok(v) => UserId::new(v),
            Err(_) => return Ok(false),
        };
        let member = self
            .http
            .get_member(guild_channel.guild_id, uid)
            .await
            .map_err(|e| map_api_error(e, channel))?;
        let guild = self
            .http
            .get_guild(guild_channel.guild_id)
            .await
            .map_err(|e| map_api_error(e, channel))?;

        if guild.owner_id == uid {
            return Ok(true);
        }

        let roles: HashMap<RoleId, Role> = guild.roles;
        let perms = effective_permissions(&member, &roles, &guild_channel.permission_overwrites);
        Ok(perms.contains(Permissions::VIEW_CHANNEL))
    }

    async fn resolve_user_roles(&self, user_id: &str, guild_id: &str) -> Result<Vec<String>> {
        let gid = guild_id
            .parse::<u64>()
            .map(serenity::model::id::GuildId::new)
            .map_err(|_| SourceError::Transient(format!("bad guild id: {guild_id}")))?;
        let uid = match user_id.parse::<u64>() {
            Ok(v) => UserId::new(v),
            Err(_) => return Ok(Vec::new()),
        };

        let member = self
            .http
            .get_member(gid, uid)
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?;
        let roles = self
            .http
            .get_guild_roles(gid)
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?;

        let by_id: HashMap<RoleId, &Role> = roles.iter().map(|r| (r.id, r)).collect();
        Ok(member
            .roles
            .iter()
            .filter_map(|rid| by_id.get(rid).map(|r| r.name.clone()))
            .collect())
    }

    async fn channel_name(&self, channel_id: &str) -> Result<String> {
        let channel = Self::parse_channel(channel_id)?;
        match self
            .http
            .get_channel(channel)
            .await
            .map_err(|e| map_api_error(e, channel))?
        {
            Channel::Guild(gc) => Ok(gc.name),
            Channel::Private(pc) => Ok(pc.name()),
            _ => Ok(channel_id.to_string()),
        }
    }
}

/// Snowflake whose timestamp field encodes `at`.
fn snowflake_at(at: DateTime<Utc>) -> u64 {
    let ms = at.timestamp_millis().saturating_sub(DISCORD_EPOCH_MS);
    (ms.max(0) as u64) << 22
}

fn message_timestamp(msg: &Message) -> DateTime<Utc> {
    DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0).unwrap_or_default()
}

fn convert_message(msg: &Message) -> RawMessage {
    RawMessage {
        id: msg.id.to_string(),
        author_id: msg.author.id.to_string(),
        author_name: display_name(&msg.author),
        author_is_bot: msg.author.bot,
        timestamp: message_timestamp(msg),
        content: msg.content.clone(),
        is_system: !matches!(msg.kind, MessageType::Regular | MessageType::InlineReply),
        mentions: msg
            .mentions
            .iter()
            .map(|u| (u.id.to_string(), display_name(u)))
            .collect(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| AttachmentInfo {
                name: a.filename.clone(),
                size_bytes: a.size as u64,
                kind: classify_attachment(a.content_type.as_deref()),
            })
            .collect(),
        thread_id: msg.thread.as_ref().map(|t| t.id.to_string()),
        reply_to: msg
            .message_reference
            .as_ref()
            .and_then(|r| r.message_id)
            .map(|id| id.to_string()),
    }
}

fn display_name(user: &serenity::model::user::User) -> String {
    user.global_name.clone().unwrap_or_else(|| user.name.clone())
}

fn classify_attachment(content_type: Option<&str>) -> AttachmentKind {
    match content_type {
        Some(ct) if ct.starts_with("image/") => AttachmentKind::Image,
        Some(ct) if ct.starts_with("video/") => AttachmentKind::Video,
        Some(ct) if ct.starts_with("audio/") => AttachmentKind::Audio,
        _ => AttachmentKind::File,
    }
}

/// Standard Discord permission resolution: base role union, then channel
/// overwrites (everyone, member roles, member), administrator short-circuit.
fn effective_permissions(
    member: &Member,
    roles: &HashMap<RoleId, Role>,
    overwrites: &[PermissionOverwrite],
) -> Permissions {
    let everyone_id = RoleId::new(member.guild_id.get());
    let mut perms = roles
        .get(&everyone_id)
        .map(|r| r.permissions)
        .unwrap_or_default();
    for rid in &member.roles {
        if let Some(role) = roles.get(rid) {
            perms |= role.permissions;
        }
    }
    if perms.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    let mut allow = Permissions::empty();
    let mut deny = Permissions::empty();
    for ow in overwrites {
        match ow.kind {
            PermissionOverwriteType::Role(rid)
                if rid == everyone_id || member.roles.contains(&rid) =>
            {
                allow |= ow.allow;
                deny |= ow.deny;
            }
            PermissionOverwriteType::Member(uid) if uid == member.user.id => {
                allow |= ow.allow;
                deny |= ow.deny;
            }
            _ => {}
        }
    }
    (perms & !deny) | allow
}

fn map_api_error(e: serenity::Error, channel: ChannelId) -> SourceError {
    if let serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(ref resp)) = e {
        return match resp.status_code.as_u16() {
            403 => SourceError::ChannelAccess {
                channel_id: channel.to_string(),
            },
            404 => SourceError::NotFound {
                channel_id: channel.to_string(),
            },
            _ => SourceError::Transient(e.to_string()),
        };
    }
    SourceError::Transient(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snowflake_encoding_is_monotonic() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        assert!(snowflake_at(early) < snowflake_at(late));
    }

    #[test]
    fn pre_epoch_times_clamp_to_zero() {
        let before = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(snowflake_at(before), 0);
    }

    #[test]
    fn attachment_classification() {
        assert_eq!(classify_attachment(Some("image/png")), AttachmentKind::Image);
        assert_eq!(classify_attachment(Some("video/mp4")), AttachmentKind::Video);
        assert_eq!(classify_attachment(Some("audio/ogg")), AttachmentKind::Audio);
        assert_eq!(
            classify_attachment(Some("application/zip")),
            AttachmentKind::File
        );
        assert_eq!(classify_attachment(None), AttachmentKind::File);
    }
}
