//! Helpers shared by the experiment binaries.
//!
//! - **`perf`**: reads the peak resident set size on Linux, used to report the
//!   memory footprint of dense versus blocked multiplication.

pub mod perf;
