//! Test fixtures and data patterns for fmalloc development.
//!
//! Fixtures hand out paths inside a private temporary directory that is
//! removed when the fixture drops. They deliberately return plain paths
//! rather than stores or vectors, so this crate can be a dev-dependency of
//! every other crate in the workspace without a dependency cycle.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;
pub mod patterns;

pub use fixtures::{ScratchDir, MIB};
pub use patterns::{byte_pattern, int_ramp, none_na, real_ramp};
