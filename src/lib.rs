//! Javelin - a source-level debugger for JVM applications.
//!
//! The crate is split into three subsystems:
//!
//! * [`debugger`] - the protocol-driven engine: process launch, JDWP attach,
//!   breakpoint lifecycle, event dispatch, stepping, stack/variable snapshots
//!   and live expression evaluation;
//! * [`analyzer`] - static symbol resolution over a Java source tree
//!   (declaration/reference tables with exact source spans);
//! * [`jdwp`] - the wire-protocol client the engine is built on.

pub mod analyzer;
pub mod config;
pub mod debugger;
pub mod jdwp;
