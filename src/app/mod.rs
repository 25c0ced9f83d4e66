//! The `workline` binary: command line, configuration and built-in pipelines

pub mod cli;
pub mod config;
pub mod demo;
pub mod startup;
