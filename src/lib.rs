pub mod assistant;
pub mod catalog;
pub mod config;
pub mod gcp;
pub mod llm;
pub mod query;
pub mod session;
pub mod util;
pub mod web;
