pub mod leveling_announcements;
pub mod message_events;
pub mod role_gateway;

pub use role_gateway::SerenityRoleGateway;
