//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules are free of filesystem and process side effects. The
//! stylesheet engine only writes to a caller-supplied writer.

pub mod stylesheet;
pub mod types;
pub mod xpath;
