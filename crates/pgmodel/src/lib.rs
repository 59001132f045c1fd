//! # pgmodel
//!
//! A model-driven query builder for PostgreSQL.
//!
//! ## Features
//!
//! - **Declarative models**: fields, foreign keys, mixins and inheritance,
//!   checked once when the model is built
//! - **Lookup paths**: `filter(("blog_id__name__contains", "rust"))` follows
//!   foreign keys and registers joins (`T1`, `T2`, ...) automatically
//! - **Full statements**: SELECT with aggregates and set operations, INSERT,
//!   UPDATE, DELETE, upsert, and CTE-based bulk `merge` / `updates`
//! - **Inline literals**: statements are plain SQL text with escaped values,
//!   run over the simple-query protocol
//! - **Pluggable execution**: anything implementing [`QueryRunner`]
//!   (`tokio_postgres` clients, transactions, pools, or a test double)
//!
//! ## Example
//!
//! ```ignore
//! use pgmodel::prelude::*;
//!
//! let blog = Model::build(
//!     ModelOptions::new("blog").field(FieldOptions::char("name", 255).unique()),
//! )?;
//! let entry = Model::build(
//!     ModelOptions::new("entry")
//!         .field(FieldOptions::foreign_key("blog_id", &blog))
//!         .field(FieldOptions::text("headline")),
//! )?;
//!
//! // SELECT * FROM entry T INNER JOIN blog T1 ON (T.blog_id = T1.id)
//! //   WHERE T1.name LIKE '%my blog%'
//! let rows = entry
//!     .query()
//!     .filter(("blog_id__name__contains", "my blog"))
//!     .exec(&client)
//!     .await?;
//!
//! // Insert only the blogs that do not exist yet
//! blog.query()
//!     .merge(
//!         vec![
//!             Record::new().with("name", "First Blog"),
//!             Record::new().with("name", "New Blog"),
//!         ],
//!         "name",
//!     )
//!     .exec(&client)
//!     .await?;
//! ```

pub mod assemble;
pub mod client;
pub mod condition;
pub mod error;
pub mod field;
pub mod ident;
pub mod join;
pub mod model;
pub mod monitor;
pub mod prelude;
pub mod query;
pub mod record;
pub mod registry;
pub mod value;

pub use assemble::{Clauses, assemble};
pub use client::{QueryRunner, Row};
pub use condition::{Cond, Op};
pub use error::{OrmError, OrmResult};
pub use field::{Field, FieldDefault, FieldOptions, FieldType, Reference};
pub use join::{JoinEntry, JoinRegistry, JoinType};
pub use model::{Model, ModelOptions};
pub use monitor::{LogConfig, LoggedRunner, StatementKind};
pub use query::{Agg, Key, Query, SetOp};
pub use record::{Record, Rows};
pub use registry::Registry;
pub use value::{Value, as_literal, as_token};

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use pool::{PoolConfig, create_pool, create_pool_with_config};
