//! Data structures: count matrices, annotations, contrasts, designs and priors.

mod contrast;
mod count_matrix;
mod design_matrix;
mod formula;
mod metadata;
mod prior;
mod schema;
pub mod table;

pub use contrast::{Contrast, ContrastGroup, ContrastGroupTable, ContrastMatrix, ContrastSet};
pub use count_matrix::CountMatrix;
pub use design_matrix::DesignMatrix;
pub use formula::Formula;
pub use metadata::{Metadata, Variable, VariableType};
pub use prior::{
    LigandReceptorNetwork, LigandReceptorPair, LigandTargetMatrix, Organism, PriorNetworks,
};
pub use schema::{CellAnnotation, ColumnSchema, SampleInfo};
