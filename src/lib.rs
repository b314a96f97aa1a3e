pub mod app;
pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod layout;
pub mod ledger;
pub mod metadata;
pub mod output;
pub mod planner;
pub mod record;
pub mod transfer;
