pub mod accounts;
pub mod bans;
pub mod server;
pub mod sessions;
