//! Statement model handed over by the SQL parser collaborator: the
//! substitutable-region tokens anchored in the original SQL text, plus the
//! semantic detail (sharding conditions, SELECT and INSERT context) that the
//! router, rewrite builder and merge engine need.

pub mod statement;
pub mod token;

pub use statement::{
    AggregationItem, AggregationKind, DerivedAvg, InsertContext, InsertValue, InsertValueExpr,
    Limit, LimitValue, OrderDirection, OrderItem, RangeBound, SelectContext, ShardingCondition,
    ShardingConditions, ShardingOperand, ShardingPredicate, ShardingValue, SqlStatement,
    StatementKind,
};
pub use token::{
    decode_tokens, IndexToken, InsertColumnToken, InsertValuesToken, ItemsToken, OffsetToken,
    OrderByToken, RowCountToken, SchemaToken, SqlToken, TableToken,
};
