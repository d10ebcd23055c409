pub mod agent_tools;
pub mod chat;
pub mod health;
