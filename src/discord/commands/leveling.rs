// Discord commands for the leveling system.
//
// **Notice the pattern:**
// 1. Extract primitive data from Discord types
// 2. Call core service
// 3. Format the response based on the result
//
// This layer is THIN - no business logic, just translation.

use crate::core::leveling::{ExperienceSource, LevelingService, MaintenanceJobs, WindowMode};
use crate::discord::leveling::leveling_announcements::build_progress_bar;
use crate::discord::leveling::role_gateway::SerenityRoleGateway;
use crate::infra::leveling::SqliteLevelingStore;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared state handed to every command and event.
pub struct Data {
    pub leveling: Arc<LevelingService<SqliteLevelingStore>>,
    pub maintenance: Arc<MaintenanceJobs<SqliteLevelingStore>>,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum WindowChoice {
    #[name = "This season"]
    Seasonal,
    #[name = "All time"]
    Lifetime,
}

impl From<WindowChoice> for WindowMode {
    fn from(value: WindowChoice) -> Self {
        match value {
            WindowChoice::Seasonal => WindowMode::Seasonal,
            WindowChoice::Lifetime => WindowMode::Lifetime,
        }
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum GrantSource {
    #[name = "Manual"]
    Manual,
    #[name = "Frog capture"]
    FrogCapture,
}

impl From<GrantSource> for ExperienceSource {
    fn from(value: GrantSource) -> Self {
        match value {
            GrantSource::Manual => ExperienceSource::Manual,
            GrantSource::FrogCapture => ExperienceSource::FrogCapture,
        }
    }
}

fn guild_of(ctx: &Context<'_>) -> Result<u64, Error> {
    Ok(ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get())
}

/// Show level, experience and rank for this season and all time.
#[poise::command(slash_command, guild_only)]
pub async fn rank(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let target_user = user.as_ref().unwrap_or_else(|| ctx.author());
    if target_user.bot {
        ctx.say("Bots don't earn XP! 🤖").await?;
        return Ok(());
    }
    let guild_id = guild_of(&ctx)?;

    let leveling = &ctx.data().leveling;
    let progress = leveling
        .member_progress(guild_id, target_user.id.get(), Utc::now())
        .await?;

    let curve = leveling.level_curve();
    let floor = curve
        .experience_for_level(progress.lifetime_level)
        .unwrap_or(0);
    let progress_field = match progress.next_level_xp {
        Some(next) => {
            let span = next.saturating_sub(floor).max(1);
            let into_level = progress.lifetime_xp.saturating_sub(floor).min(span);
            format!(
                "{}/{} XP\n{}",
                into_level,
                span,
                build_progress_bar(into_level as f64 / span as f64, 15)
            )
        }
        None => "Max level reached".to_string(),
    };
    let role_text = |role: Option<u64>| match role {
        Some(role_id) => format!("<@&{}>", role_id),
        None => "Unranked".to_string(),
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("Rank of {}", target_user.name))
        .color(0x00ff00)
        .thumbnail(target_user.face())
        .field(
            "This season",
            format!(
                "Level **{}** · {} XP\n{}",
                progress.seasonal_level,
                progress.seasonal_xp,
                role_text(progress.seasonal_rank_role)
            ),
            true,
        )
        .field(
            "All time",
            format!(
                "Level **{}** · {} XP\n{}",
                progress.lifetime_level,
                progress.lifetime_xp,
                role_text(progress.lifetime_rank_role)
            ),
            true,
        )
        .field("Progress", progress_field, false);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show the leaderboard around you.
#[poise::command(slash_command, guild_only)]
pub async fn leaderboard(
    ctx: Context<'_>,
    #[description = "Which window to rank (default: this season)"] window: Option<WindowChoice>,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let mode: WindowMode = window.unwrap_or(WindowChoice::Seasonal).into();

    let board = ctx
        .data()
        .leveling
        .leaderboard(
            guild_id,
            mode,
            Some(ctx.author().id.get()),
            Utc::now(),
            move |member_id| resolve_display_name_cached(&ctx, guild_id, member_id),
        )
        .await?;

    if board.is_empty() {
        ctx.say("No one has earned XP yet! Start chatting to get on the leaderboard! 💬")
            .await?;
        return Ok(());
    }

    let title = match mode {
        WindowMode::Seasonal => "Season leaderboard",
        WindowMode::Lifetime => "All-time leaderboard",
    };
    let footer = if board.focus_line.is_some() {
        "You are marked with @"
    } else {
        "You are not ranked yet"
    };
    let embed = serenity::CreateEmbed::new()
        .title(title)
        .color(0x3498db)
        .description(board.to_code_block())
        .footer(serenity::CreateEmbedFooter::new(footer));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Manually award XP to a user (admin only).
///
/// **Command syntax:** `/give_xp @user 100`
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn give_xp(
    ctx: Context<'_>,
    #[description = "User to give XP to"] user: serenity::User,
    #[description = "Amount of XP to give"]
    #[min = 1]
    amount: u64,
    #[description = "Where the XP comes from (default: Manual)"] source: Option<GrantSource>,
) -> Result<(), Error> {
    if user.bot {
        ctx.say("You can't give XP to bots!").await?;
        return Ok(());
    }
    let guild_id = guild_of(&ctx)?;
    let source: ExperienceSource = source.unwrap_or(GrantSource::Manual).into();

    let leveling = &ctx.data().leveling;
    let grant = leveling
        .award_experience(guild_id, user.id.get(), amount, source, Utc::now())
        .await?;

    let gateway = SerenityRoleGateway::new(ctx.serenity_context().http.clone());
    let report = leveling.sync_after_grant(&gateway, &grant).await?;

    let mut reply = format!(
        "✅ Gave {} XP to {} ({})! Total: {} XP, level {}.",
        amount, user.name, source, grant.lifetime_xp, grant.lifetime.new_level
    );
    if grant.lifetime.leveled_up() {
        reply.push_str(&format!(
            "\n🎉 They leveled up from {} to {}!",
            grant.lifetime.old_level, grant.lifetime.new_level
        ));
    }
    for rank_up in &report.ranked_up {
        reply.push_str(&format!("\n🏅 New {} rank: <@&{}>", rank_up.mode, rank_up.role_id));
    }
    if !report.missing_roles.is_empty() {
        reply.push_str("\n⚠️ Some rank roles no longer exist. Check `/ranks list`.");
    }

    ctx.say(reply).await?;
    Ok(())
}

/// Repair cached totals and re-apply rank roles for everyone (admin only).
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn resync(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    ctx.defer().await?;

    let gateway = SerenityRoleGateway::new(ctx.serenity_context().http.clone());
    let report = ctx
        .data()
        .leveling
        .resync_guild(&gateway, guild_id, Utc::now())
        .await?;

    let mut reply = format!(
        "✅ Resynced {} members: {} totals repaired, {} roles added, {} removed.",
        report.members, report.repaired, report.roles_added, report.roles_removed
    );
    if !report.missing_roles.is_empty() {
        let missing: Vec<String> = report
            .missing_roles
            .iter()
            .map(|id| id.to_string())
            .collect();
        reply.push_str(&format!(
            "\n⚠️ Deleted rank roles still configured: {}",
            missing.join(", ")
        ));
    }
    ctx.say(reply).await?;
    Ok(())
}

/// Resolve a display name from the cache only. Leaderboards never wait on HTTP.
fn resolve_display_name_cached(ctx: &Context<'_>, guild_id: u64, user_id: u64) -> String {
    let guild_id_s = serenity::GuildId::new(guild_id);
    let user_id_s = serenity::UserId::new(user_id);

    // display_name() prefers nick over username
    if let Some(guild) = ctx.serenity_context().cache.guild(guild_id_s) {
        if let Some(member) = guild.members.get(&user_id_s) {
            return member.display_name().to_string();
        }
    }

    if let Some(user) = ctx.serenity_context().cache.user(user_id_s) {
        return user.name.clone();
    }

    // Mentions don't render inside code blocks, so fall back to the raw id.
    user_id.to_string()
}
