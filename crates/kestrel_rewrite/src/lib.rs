//! Rewrite builder: replays the statement's tokens over the logical SQL once
//! per routing unit and produces the physical SQL plus bind parameters for
//! that unit.

pub mod builder;
pub mod engine;
pub mod pagination;
pub mod sql_unit;

pub use builder::SqlBuilder;
pub use engine::{rewrite, SqlRewriteEngine};
pub use pagination::{PaginationRewrite, MAX_ROW_COUNT};
pub use sql_unit::SqlUnit;
