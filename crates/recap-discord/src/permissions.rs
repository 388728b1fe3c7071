use serenity::model::application::CommandInteraction;
use tracing::warn;

use recap_core::types::GuildConfig;
use recap_core::{RecapError, Result};

use crate::context::BotContext;

/// Gate for channel-read commands: the invoker must hold read access in the
/// target channel, and when the guild restricts roles, hold one of them.
pub async fn check_read<C: BotContext>(
    ctx: &C,
    user_id: &str,
    channel_id: &str,
    guild_config: &GuildConfig,
) -> Result<()> {
    let can_read = ctx
        .source()
        .has_read_access(user_id, channel_id)
        .await
        .map_err(RecapError::from)?;
    if !can_read {
        return Err(RecapError::Permission {
            reason: "you cannot read that channel".to_string(),
        });
    }

    if !guild_config.permissions.allowed_roles.is_empty() {
        let roles = ctx
            .source()
            .resolve_user_roles(user_id, &guild_config.guild_id)
            .await
            .map_err(RecapError::from)?;
        let allowed = roles
            .iter()
            .any(|r| guild_config.permissions.allowed_roles.contains(r));
        if !allowed {
            return Err(RecapError::Permission {
                reason: "your roles are not allowed to request summaries".to_string(),
            });
        }
    }
    Ok(())
}

/// Gate for config/schedule mutations. Guild admins always pass; when the
/// guild relaxes `admin_only_config`, allowed roles pass too.
pub async fn check_admin<C: BotContext>(
    ctx: &C,
    command: &CommandInteraction,
    guild_config: &GuildConfig,
) -> Result<()> {
    let is_admin = command
        .member
        .as_ref()
        .and_then(|m| m.permissions)
        .map(|p| p.administrator() || p.manage_guild())
        .unwrap_or(false);
    if is_admin {
        return Ok(());
    }

    if !guild_config.permissions.admin_only_config {
        let user_id = command.user.id.to_string();
        match ctx
            .source()
            .resolve_user_roles(&user_id, &guild_config.guild_id)
            .await
        {
            Ok(roles) => {
                if roles
                    .iter()
                    .any(|r| guild_config.permissions.allowed_roles.contains(r))
                {
                    return Ok(());
                }
            }
            Err(e) => warn!(error = %e, "role resolution failed during admin check"),
        }
    }

    Err(RecapError::Permission {
        reason: "configuration changes require a guild administrator".to_string(),
    })
}

/// Channel eligibility per the guild config: excluded always loses, an
/// explicit enabled list restricts to its members.
pub fn channel_enabled(guild_config: &GuildConfig, channel_id: &str) -> Result<()> {
    if guild_config
        .excluded_channels
        .iter()
        .any(|c| c == channel_id)
    {
        return Err(RecapError::UserInput(
            "that channel is excluded from summarization".to_string(),
        ));
    }
    if !guild_config.enabled_channels.is_empty()
        && !guild_config.enabled_channels.iter().any(|c| c == channel_id)
    {
        return Err(RecapError::UserInput(
            "that channel is not enabled for summarization".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_channel_is_rejected() {
        let mut cfg = GuildConfig::new("g1");
        cfg.excluded_channels = vec!["c2".into()];
        assert!(channel_enabled(&cfg, "c1").is_ok());
        assert!(channel_enabled(&cfg, "c2").is_err());
    }

    #[test]
    fn enabled_list_restricts_when_present() {
        let mut cfg = GuildConfig::new("g1");
        assert!(channel_enabled(&cfg, "c1").is_ok());

        cfg.enabled_channels = vec!["c1".into()];
        assert!(channel_enabled(&cfg, "c1").is_ok());
        assert!(channel_enabled(&cfg, "c9").is_err());
    }
}
