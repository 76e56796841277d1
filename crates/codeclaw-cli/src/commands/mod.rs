pub mod config;
pub mod daemon;
pub mod diff;
pub mod export;
pub mod helpers;
pub mod init;
pub mod projects;
pub mod quarantine;
pub mod review;
