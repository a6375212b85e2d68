pub mod backoff_repository;
pub mod calendar_feed;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod plan_block_repository;
pub mod remote_calendar;
pub mod storage;
