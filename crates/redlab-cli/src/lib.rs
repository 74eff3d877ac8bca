//! # Redlab CLI
//!
//! Library part of the `redlab` binary: the mock service used by the
//! caching demonstration.

pub mod demo;
