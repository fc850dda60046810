pub mod app;
pub mod config;
pub mod debug;
pub mod engine;
pub mod execution;
pub mod shared;
pub mod transport;
pub mod workspace;
