//! Windlass test runner
//!
//! Loads declarative YAML suites, drives them sequentially over the RPC
//! command bridge, and aggregates pass/fail results into run reports.

pub mod runner;
pub mod suite;

pub use runner::{CommandFailure, RunAggregate, RunReport, SessionTotals, TestRunner};
pub use suite::{LookupSpec, TestStep, TestSuite};
