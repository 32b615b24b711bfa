use std::collections::BTreeMap;
use std::sync::Arc;

use kestrel_common::error::{ConfigError, KestrelResult};
use kestrel_sql_frontend::{ShardingCondition, ShardingValue, SqlStatement, StatementKind};

use crate::data_node::DataNode;
use crate::rule::{ShardingRule, TableRule};
use crate::strategy::ShardingStrategy;
use crate::unit::{RoutingResult, RoutingUnit, TableUnit};

/// Computes the routing units of a statement from the sharding rule.
///
/// Stateless apart from the shared rule; one router serves every session.
#[derive(Debug, Clone)]
pub struct ShardingRouter {
    rule: Arc<ShardingRule>,
}

/// Nodes selected for one binding group, keyed by position in the primary
/// table's node list so output order follows the rule declaration.
type GroupRoute = BTreeMap<usize, (DataNode, Option<Vec<usize>>)>;

impl ShardingRouter {
    pub fn new(rule: Arc<ShardingRule>) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &Arc<ShardingRule> {
        &self.rule
    }

    pub fn route(&self, stmt: &SqlStatement) -> KestrelResult<RoutingResult> {
        let result = if stmt.kind == StatementKind::Tcl {
            self.broadcast_data_sources()
        } else if stmt.tables.is_empty() {
            self.unicast()?
        } else {
            self.route_tables(stmt)?
        };
        tracing::debug!(
            kind = stmt.kind.as_str(),
            units = result.len(),
            "Routed statement"
        );
        Ok(result)
    }

    /// Every data source, no table units.
    fn broadcast_data_sources(&self) -> RoutingResult {
        RoutingResult::new(
            self.rule
                .all_data_source_names()
                .into_iter()
                .map(RoutingUnit::new)
                .collect(),
        )
    }

    fn unicast(&self) -> KestrelResult<RoutingResult> {
        let ds = match &self.rule.default_data_source {
            Some(ds) => ds.clone(),
            None => self
                .rule
                .all_data_source_names()
                .into_iter()
                .next()
                .ok_or(ConfigError::MissingContext("a data source for unicast routing"))?,
        };
        Ok(RoutingResult::new(vec![RoutingUnit::new(ds)]))
    }

    fn route_tables(&self, stmt: &SqlStatement) -> KestrelResult<RoutingResult> {
        let mut sharded: Vec<String> = Vec::new();
        let mut unruled: Vec<String> = Vec::new();
        for table in &stmt.tables {
            let table = table.to_lowercase();
            if sharded.contains(&table) || unruled.contains(&table) {
                continue;
            }
            if self.rule.table_rule(&table).is_some() {
                sharded.push(table);
            } else {
                unruled.push(table);
            }
        }

        let default_ds = match (&self.rule.default_data_source, unruled.first()) {
            (Some(ds), _) => Some(ds.as_str()),
            (None, Some(table)) => return Err(ConfigError::MissingTableRule(table.clone()).into()),
            (None, None) => None,
        };

        if sharded.is_empty() {
            let mut unit = RoutingUnit::new(default_ds.unwrap_or_default());
            for t in &unruled {
                unit = unit.with_table(t, t);
            }
            return Ok(RoutingResult::new(vec![unit]));
        }

        let mut group_units: Vec<Vec<RoutingUnit>> = Vec::new();
        let mut assigned: Vec<&str> = Vec::new();
        for table in &sharded {
            if assigned.contains(&table.as_str()) {
                continue;
            }
            let group: Vec<&str> = sharded
                .iter()
                .map(String::as_str)
                .filter(|t| *t == table.as_str() || self.rule.is_bound(table, t))
                .collect();
            assigned.extend(group.iter().copied());
            group_units.push(self.route_group(&group, stmt)?);
        }

        let mut units = if group_units.len() == 1 {
            group_units.pop().unwrap_or_default()
        } else {
            cartesian(group_units)
        };

        if !unruled.is_empty() {
            // Unruled tables only exist on the default data source.
            units.retain(|u| Some(u.data_source_name.as_str()) == default_ds);
            for unit in &mut units {
                for t in &unruled {
                    unit.table_units.push(TableUnit::new(t.as_str(), t.as_str()));
                }
            }
        }
        Ok(RoutingResult::new(units))
    }

    /// Route the tables of one binding group through the primary table.
    fn route_group(&self, group: &[&str], stmt: &SqlStatement) -> KestrelResult<Vec<RoutingUnit>> {
        let primary = self.rule.require_table_rule(group[0])?;
        let mut routed = GroupRoute::new();

        if stmt.conditions.is_empty() {
            for (pos, node) in primary.actual_data_nodes.iter().enumerate() {
                routed.insert(pos, (node.clone(), None));
            }
        } else {
            for condition in &stmt.conditions.conditions {
                self.route_condition(primary, group, condition, stmt, &mut routed)?;
            }
        }

        let mut units = Vec::with_capacity(routed.len());
        for (_, (node, insert_rows)) in routed {
            let mut unit = RoutingUnit::new(node.data_source.as_str())
                .with_table(&primary.logical_table, &node.table);
            for other in &group[1..] {
                let actual = self.rule.binding_actual_table(
                    &node.data_source,
                    other,
                    &primary.logical_table,
                    &node.table,
                )?;
                unit = unit.with_table(other, &actual);
            }
            unit.insert_rows = insert_rows;
            units.push(unit);
        }
        Ok(units)
    }

    fn route_condition(
        &self,
        primary: &TableRule,
        group: &[&str],
        condition: &ShardingCondition,
        stmt: &SqlStatement,
        routed: &mut GroupRoute,
    ) -> KestrelResult<()> {
        let data_sources = primary.data_source_names();
        let data_sources = match self.rule.database_strategy(primary) {
            Some(strategy) => match find_value(condition, group, strategy) {
                Some(value) => strategy.do_sharding(&data_sources, value, &stmt.parameters)?,
                None => to_owned(&data_sources),
            },
            None => to_owned(&data_sources),
        };

        for ds in &data_sources {
            let tables = primary.actual_tables(ds);
            let tables = match self.rule.table_strategy(primary) {
                Some(strategy) => match find_value(condition, group, strategy) {
                    Some(value) => strategy.do_sharding(&tables, value, &stmt.parameters)?,
                    None => to_owned(&tables),
                },
                None => to_owned(&tables),
            };
            for table in tables {
                let node = DataNode::new(ds.as_str(), table);
                let pos = primary.node_position(&node);
                let entry = routed.entry(pos).or_insert_with(|| {
                    let rows = condition.insert_row.map(|_| Vec::new());
                    (node, rows)
                });
                if let (Some(rows), Some(row)) = (entry.1.as_mut(), condition.insert_row) {
                    if !rows.contains(&row) {
                        rows.push(row);
                        rows.sort_unstable();
                    }
                }
            }
        }
        Ok(())
    }
}

/// Sharding value for the strategy column on any table of the group. Bound
/// tables share their sharding columns, so `t_order_item.order_id = 7`
/// narrows `t_order` as well.
fn find_value<'a>(
    condition: &'a ShardingCondition,
    group: &[&str],
    strategy: &ShardingStrategy,
) -> Option<&'a ShardingValue> {
    group
        .iter()
        .find_map(|t| condition.value_for(t, &strategy.sharding_column))
}

fn to_owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Combine the units of independently routed groups: for each data source
/// every group has units on, emit the product of those units.
fn cartesian(groups: Vec<Vec<RoutingUnit>>) -> Vec<RoutingUnit> {
    let mut iter = groups.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut acc = first;
    for group in iter {
        let mut next = Vec::new();
        for left in &acc {
            for right in group
                .iter()
                .filter(|u| u.data_source_name == left.data_source_name)
            {
                let mut unit = left.clone();
                unit.table_units.extend(right.table_units.iter().cloned());
                match (&mut unit.insert_rows, &right.insert_rows) {
                    (None, Some(rows)) => unit.insert_rows = Some(rows.clone()),
                    (Some(_), Some(rows)) => unit.add_insert_rows(rows),
                    _ => {}
                }
                next.push(unit);
            }
        }
        acc = next;
    }
    acc
}
