use crate::core::leveling::{ExperienceGrant, RoleSyncReport, WindowMode};
use crate::discord::Data;
use poise::serenity_prelude::{self as serenity, builder::CreateMessage};
use rand::seq::SliceRandom;

/// Whether a grant deserves a public announcement: a lifetime level-up or a
/// new rank role in either window.
pub fn should_announce(grant: &ExperienceGrant, report: &RoleSyncReport) -> bool {
    grant.lifetime.leveled_up() || !report.ranked_up.is_empty()
}

/// Post a level-up / rank-up embed in the channel the message came from.
pub async fn send_level_up_embed(
    ctx: &serenity::Context,
    message: &serenity::Message,
    data: &Data,
    grant: &ExperienceGrant,
    report: &RoleSyncReport,
) -> Result<(), serenity::Error> {
    let curve = data.leveling.level_curve();
    let level = grant.lifetime.new_level;
    let floor = curve.experience_for_level(level).unwrap_or(0);
    let next = curve.experience_for_level(level + 1);

    let mut embed = serenity::CreateEmbed::new()
        .color(level_color(level))
        .field("Total XP", grant.lifetime_xp.to_string(), true)
        .field("Season XP", grant.seasonal_xp.to_string(), true)
        .footer(serenity::CreateEmbedFooter::new(random_flavor_line()));

    embed = if grant.lifetime.leveled_up() {
        embed
            .title("Level Up!")
            .description(format!("<@{}> reached level {}!", grant.event.member_id, level))
    } else {
        embed
            .title("Rank Up!")
            .description(format!("<@{}> climbed the ranks!", grant.event.member_id))
    };

    if let Some(next) = next {
        let span = next.saturating_sub(floor).max(1);
        let into_level = grant.lifetime_xp.saturating_sub(floor).min(span);
        embed = embed.field(
            "Progress",
            format!(
                "{}/{} XP\n{}",
                into_level,
                span,
                build_progress_bar(into_level as f64 / span as f64, 18)
            ),
            false,
        );
    }

    for rank_up in &report.ranked_up {
        let label = match rank_up.mode {
            WindowMode::Seasonal => "New seasonal rank",
            WindowMode::Lifetime => "New rank",
        };
        embed = embed.field(label, format!("<@&{}>", rank_up.role_id), true);
    }

    message
        .channel_id
        .send_message(ctx, CreateMessage::new().embed(embed))
        .await
        .map(|_| ())
}

fn level_color(level: u32) -> serenity::Colour {
    if level >= 50 {
        serenity::Colour::DARK_PURPLE
    } else if level >= 25 {
        serenity::Colour::ORANGE
    } else if level >= 10 {
        serenity::Colour::GOLD
    } else if level >= 5 {
        serenity::Colour::BLURPLE
    } else {
        serenity::Colour::LIGHT_GREY
    }
}

pub fn build_progress_bar(progress: f64, length: usize) -> String {
    let clamped = progress.clamp(0.0, 1.0);
    let mut filled = (clamped * length as f64).round() as usize;
    if clamped > 0.0 && filled == 0 {
        filled = 1;
    }
    filled = filled.min(length);
    let bar = "▰".repeat(filled) + &"▱".repeat(length - filled);
    format!("{} ({}%)", bar, (clamped * 100.0).round() as u32)
}

fn random_flavor_line() -> &'static str {
    const FLAVOR_LINES: [&str; 5] = [
        "Ribbit. The pond approves.",
        "Another lily pad conquered.",
        "Hop, chat, repeat.",
        "That XP bar never stood a chance.",
        "The frogs are taking notes.",
    ];

    FLAVOR_LINES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FLAVOR_LINES[0])
}
