//! Convenient imports for typical `pgmodel` usage.
//!
//! ```ignore
//! use pgmodel::prelude::*;
//! ```

pub use crate::{
    Agg, Cond, FieldOptions, FieldType, Key, Model, ModelOptions, OrmError, OrmResult, Query,
    QueryRunner, Record, Registry, Rows, Value,
};

#[cfg(feature = "pool")]
pub use crate::{create_pool, create_pool_with_config};
