//! Core module containing the main functionality of Rtklink
//!
//! This module provides:
//! - Transport layer for the receiver link (serial, in-memory loopback)
//! - The GNSS driver contract and its callback bridge
//! - Session management with bounded connect retries and the blocking
//!   receive loop
//! - Report publishers and downstream sinks
//! - A deterministic scripted driver for tests and demos

pub mod driver;
pub mod publish;
pub mod session;
pub mod transport;
