// Common definitions shared across the engine

pub mod types;

pub use self::types::{var_set, Message, Row, VarSet};
