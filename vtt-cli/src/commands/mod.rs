pub mod agreement;
pub mod config;
pub mod report;
pub mod sample;
