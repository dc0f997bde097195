// serenity-backed implementation of the RoleGateway port.
//
// Uses HTTP instead of the cache so the member's roles are current even when
// the cache missed a manual role edit.

use crate::core::leveling::{LevelingError, RoleGateway};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::collections::HashSet;
use std::sync::Arc;

const AUDIT_REASON: &str = "Rank role sync";

pub struct SerenityRoleGateway {
    http: Arc<serenity::Http>,
}

impl SerenityRoleGateway {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

fn platform(e: serenity::Error) -> LevelingError {
    LevelingError::PlatformError(e.to_string())
}

#[async_trait]
impl RoleGateway for SerenityRoleGateway {
    async fn current_roles(
        &self,
        guild_id: u64,
        member_id: u64,
    ) -> Result<HashSet<u64>, LevelingError> {
        let member = self
            .http
            .get_member(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(member_id),
            )
            .await
            .map_err(platform)?;
        Ok(member.roles.iter().map(|role| role.get()).collect())
    }

    async fn guild_roles(&self, guild_id: u64) -> Result<HashSet<u64>, LevelingError> {
        let roles = self
            .http
            .get_guild_roles(serenity::GuildId::new(guild_id))
            .await
            .map_err(platform)?;
        Ok(roles.iter().map(|role| role.id.get()).collect())
    }

    async fn add_role(
        &self,
        guild_id: u64,
        member_id: u64,
        role_id: u64,
    ) -> Result<(), LevelingError> {
        self.http
            .add_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(member_id),
                serenity::RoleId::new(role_id),
                Some(AUDIT_REASON),
            )
            .await
            .map_err(platform)
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        member_id: u64,
        role_id: u64,
    ) -> Result<(), LevelingError> {
        self.http
            .remove_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(member_id),
                serenity::RoleId::new(role_id),
                Some(AUDIT_REASON),
            )
            .await
            .map_err(platform)
    }
}
