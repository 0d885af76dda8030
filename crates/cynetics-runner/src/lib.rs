pub mod backend;
pub mod config;
pub mod controller;
pub mod implement;
pub mod preflight;
pub mod process;
pub mod report;
pub mod run_tracker;
pub mod scheduler;
pub mod task_parser;
