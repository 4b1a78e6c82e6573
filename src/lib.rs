pub mod app;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod download;
pub mod error;
pub mod fs_util;
pub mod manifest;
pub mod metadata;
pub mod ngdc;
pub mod output;
pub mod pool;
pub mod runinfo;
pub mod store;
pub mod transport;
