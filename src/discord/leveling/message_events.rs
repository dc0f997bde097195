// Turns guild messages into experience.

use crate::core::leveling::MessageOutcome;
use crate::discord::leveling::leveling_announcements::{send_level_up_embed, should_announce};
use crate::discord::leveling::SerenityRoleGateway;
use crate::discord::Data;
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Award experience for one message, sync rank roles and announce promotions.
/// Failures are logged; a broken grant must never take the event loop down.
pub async fn handle_message(ctx: &serenity::Context, message: &serenity::Message, data: &Data) {
    // Ignore bot messages (including our own) and DMs
    if message.author.bot {
        return;
    }
    let Some(guild_id) = message.guild_id else {
        return;
    };
    let guild_id = guild_id.get();
    let member_id = message.author.id.get();

    let grant = match data
        .leveling
        .process_message(guild_id, member_id, Utc::now())
        .await
    {
        Ok(MessageOutcome::Granted(grant)) => grant,
        Ok(MessageOutcome::OnCooldown { .. }) => return,
        Err(e) => {
            tracing::error!(guild_id, member_id, "Failed to record message XP: {e}");
            return;
        }
    };

    let gateway = SerenityRoleGateway::new(ctx.http.clone());
    let report = match data.leveling.sync_after_grant(&gateway, &grant).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(guild_id, member_id, "Rank role sync failed: {e}");
            Default::default()
        }
    };

    if grant.lifetime.leveled_up() {
        tracing::info!(
            guild_id,
            member_id,
            old_level = grant.lifetime.old_level,
            new_level = grant.lifetime.new_level,
            total_xp = grant.lifetime_xp,
            "Member leveled up"
        );
    }

    if should_announce(&grant, &report) {
        if let Err(err) = send_level_up_embed(ctx, message, data, &grant, &report).await {
            tracing::warn!("Failed to send level-up embed: {err}");
        }
    }
}
