//! code-sandbox daemon library
//!
//! This crate provides the core functionality for the code-sandbox daemon:
//! - Configuration and least-privilege identity resolution
//! - Self-restriction (rlimits and a seccomp allowlist) and the guest runner
//! - Isolation backends and the launch/supervise/reap orchestrator
//! - MCP server implementation using rmcp

pub mod backend;
pub mod config;
pub mod guest;
pub mod identity;
pub mod mcp;
pub mod orchestrator;
pub mod request;
pub mod restrict;
pub mod unit;
