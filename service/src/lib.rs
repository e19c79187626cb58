//! Process-level infrastructure for the deadbolt server: command line and
//! environment configuration, and logger initialisation.

pub mod config;
pub mod logging;
