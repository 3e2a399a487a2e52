//! Count models fitted per gene.

pub mod nb;

pub use nb::{model_nb, NbFit, NbFitSingle, DISPERSION_PRIOR_DF};
