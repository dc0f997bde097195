// Rank ladder administration: which role a member gets at which level.

use crate::core::leveling::{LevelingError, WindowMode};
use crate::discord::commands::leveling::WindowChoice;
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

/// Manage rank roles
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    subcommands("add", "remove", "list")
)]
pub async fn ranks(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Grant a role once members reach a level
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Role to hand out"] role: serenity::Role,
    #[description = "Level that unlocks it"]
    #[min = 1]
    level: u32,
    #[description = "Season or all-time levels (default: all time)"] window: Option<WindowChoice>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?;
    let mode: WindowMode = window.unwrap_or(WindowChoice::Lifetime).into();

    match ctx
        .data()
        .leveling
        .add_threshold(guild_id.get(), role.id.get(), level, mode)
        .await
    {
        Ok(_) => {
            ctx.say(format!(
                "✅ <@&{}> is now the {} rank for level {}. Run `/resync` to apply it to existing members.",
                role.id, mode, level
            ))
            .await?;
        }
        Err(LevelingError::DuplicateThreshold { .. }) => {
            ctx.say("❌ That role already has a rank, or another role already sits at that level.")
                .await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Stop handing out a rank role
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Role to remove from the ladder"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?;

    match ctx
        .data()
        .leveling
        .remove_threshold(guild_id.get(), role.id.get())
        .await
    {
        Ok(()) => {
            ctx.say(format!("✅ <@&{}> is no longer a rank role.", role.id))
                .await?;
        }
        Err(LevelingError::ThresholdNotFound(_)) => {
            ctx.say("❌ That role isn't a rank role!").await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Show the rank ladders
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();

    let mut embed = serenity::CreateEmbed::default()
        .title("Rank roles")
        .color(0x3498db);
    for mode in WindowMode::ALL {
        let ladder = ctx.data().leveling.thresholds(guild_id, mode).await?;
        let text = if ladder.is_empty() {
            "None configured".to_string()
        } else {
            ladder
                .iter()
                .map(|t| format!("Level {} → <@&{}>", t.level, t.role_id))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let name = match mode {
            WindowMode::Seasonal => "This season",
            WindowMode::Lifetime => "All time",
        };
        embed = embed.field(name, text, false);
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}
