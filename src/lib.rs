pub mod aggregation;
pub mod app;
pub mod config;
pub mod lock;
pub mod logging;
pub mod models;
pub mod query;
pub mod report;
pub mod search;
pub mod storage;
pub mod time;
