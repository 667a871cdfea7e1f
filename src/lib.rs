pub mod auth;
pub mod config;
pub mod engine;
pub mod export;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod seed;
pub mod wal;
pub mod web;
