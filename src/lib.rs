//! MCP bridge that runs Go tests and coverage analysis against a local workspace.
//!
//! The binary wires these pieces together: [`config`] builds the validated
//! configuration, [`lifecycle`] runs the [`server`] until a shutdown signal, and
//! [`tools`] exposes the [`coverage`] operations, which execute through
//! [`runner`] and report milestones through [`progress`].

pub mod config;
pub mod coverage;
pub mod lifecycle;
pub mod logging;
pub mod progress;
pub mod runner;
pub mod server;
pub mod test_utils;
pub mod tools;
