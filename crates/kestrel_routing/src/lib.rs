//! Routing engine: turns sharding rules plus a statement's sharding
//! conditions into the set of routing units (data source + actual tables)
//! the statement must run on, and picks master or replica for read/write
//! split data sources.
//!
//! - **Standard routing**: one logical table, or tables of one binding group,
//!   routed through the primary table's database and table strategies.
//! - **Cartesian routing**: unbound sharded tables are routed independently
//!   and combined per data source.
//! - **Broadcast**: TCL goes to every data source.
//! - **Unicast**: statements without tables go to one data source.

pub mod data_node;
pub mod key_generator;
pub mod master_slave;
pub mod router;
pub mod rule;
pub mod strategy;
pub mod unit;

pub use data_node::DataNode;
pub use key_generator::{apply_generated_keys, GeneratedKey, KeyGenerator, SnowflakeKeyGenerator};
pub use master_slave::{
    LoadBalanceStrategy, MasterSlaveRouter, MasterSlaveRule, MasterSlaveSession, RandomStrategy,
    RoundRobinStrategy,
};
pub use router::ShardingRouter;
pub use rule::{BindingTableRule, ShardingRule, TableRule};
pub use strategy::ShardingStrategy;
pub use unit::{RoutingResult, RoutingUnit, TableUnit};
