// Query Planner Module
//
// This module is responsible for translating decomposed queries into
// executable physical plans, using cardinality estimates from the sources
// to pick the operator strategies.

pub mod cardinality;
pub mod compiler;
pub mod error;
pub mod physical;

pub use self::cardinality::{Cardinality, CardinalityEstimator};
pub use self::compiler::{compile, prefers_nested_join, PlanCompiler};
pub use self::error::{PlanningError, PlanningResult};
pub use self::physical::{BinaryPlanNode, CorrelatedLeafOperator, LeafOperator, PlanNode};
