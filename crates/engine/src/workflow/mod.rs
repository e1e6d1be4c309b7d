//! Workflow storage, execution tracking, and orchestration.

pub mod document;
pub mod runner;
pub mod store;
pub mod tracker;
