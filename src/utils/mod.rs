pub mod bottle;
pub mod config;
pub mod cooldown;
pub mod db;
pub mod economy;
pub mod error;
pub mod group;
pub mod ledger;
pub mod logger;
pub mod maintenance;
pub mod moderation;
pub mod time;
pub mod user;
