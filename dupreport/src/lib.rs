//! Run the dupFinder duplicate-code analyzer and render its report.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (run values, the XPath evaluator and the XSLT
//!   stylesheet engine). No process or filesystem access.
//! - **[`io`]**: Side-effecting stages (path resolution, the child process,
//!   the report transform, the viewer) and the persisted settings/config.
//!
//! [`pipeline`] wires the stages together for one run.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
