//! CLI commands

pub mod config;
pub mod mine;
pub mod rate;
pub mod referral;
pub mod server;
pub mod status;
pub mod xp;
