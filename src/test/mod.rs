//! Hypothesis tests on fitted models.

pub mod wald;

pub use wald::{test_wald_contrasts, two_sided_p, WaldResult, WaldResultSingle};
