pub mod app;
pub mod config;
pub mod orchestration;
pub mod shared;
