// Discord commands module.
// Each feature gets its own command file.

pub mod leveling;

pub mod ranks;

/// Every slash command the bot registers.
pub fn all() -> Vec<poise::Command<leveling::Data, leveling::Error>> {
    vec![
        leveling::rank(),
        leveling::leaderboard(),
        leveling::give_xp(),
        leveling::resync(),
        ranks::ranks(),
    ]
}
