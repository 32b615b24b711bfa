use std::fmt;

/// One logical table resolved to its actual table for a routing unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableUnit {
    pub logical_table_name: String,
    pub actual_table_name: String,
}

impl TableUnit {
    pub fn new(logical: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            logical_table_name: logical.into().to_lowercase(),
            actual_table_name: actual.into().to_lowercase(),
        }
    }
}

/// One physical destination for a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingUnit {
    pub data_source_name: String,
    pub table_units: Vec<TableUnit>,
    /// INSERT value rows routed here. `None` means every row (the statement
    /// was not narrowed by per-row conditions).
    pub insert_rows: Option<Vec<usize>>,
}

impl RoutingUnit {
    pub fn new(data_source_name: impl Into<String>) -> Self {
        Self {
            data_source_name: data_source_name.into().to_lowercase(),
            table_units: Vec::new(),
            insert_rows: None,
        }
    }

    pub fn with_table(mut self, logical: &str, actual: &str) -> Self {
        self.table_units.push(TableUnit::new(logical, actual));
        self
    }

    /// Actual table for a logical table name (case-insensitive).
    pub fn find_actual_table(&self, logical_table: &str) -> Option<&str> {
        self.table_units
            .iter()
            .find(|t| t.logical_table_name.eq_ignore_ascii_case(logical_table))
            .map(|t| t.actual_table_name.as_str())
    }

    pub(crate) fn add_insert_rows(&mut self, rows: &[usize]) {
        if let Some(existing) = self.insert_rows.as_mut() {
            for row in rows {
                if !existing.contains(row) {
                    existing.push(*row);
                }
            }
            existing.sort_unstable();
        }
    }
}

impl fmt::Display for RoutingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.data_source_name)?;
        for (i, t) in self.table_units.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}->{}", t.logical_table_name, t.actual_table_name)?;
        }
        write!(f, "]")
    }
}

/// Ordered routing units for one statement. Order is deterministic: data
/// sources and actual tables follow the order in which rules declare them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingResult {
    pub units: Vec<RoutingUnit>,
}

impl RoutingResult {
    pub fn new(units: Vec<RoutingUnit>) -> Self {
        Self { units }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// A single unit needs no pagination rewrite and no result merge.
    pub fn is_single_routing(&self) -> bool {
        self.units.len() == 1
    }

    /// Distinct data sources in unit order.
    pub fn data_source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for unit in &self.units {
            if !names.contains(&unit.data_source_name.as_str()) {
                names.push(&unit.data_source_name);
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_actual_table_case_insensitive() {
        let unit = RoutingUnit::new("ds_0").with_table("T_Order", "T_ORDER_1");
        assert_eq!(unit.find_actual_table("t_order"), Some("t_order_1"));
        assert_eq!(unit.find_actual_table("t_item"), None);
        assert_eq!(unit.to_string(), "ds_0[t_order->t_order_1]");
    }

    #[test]
    fn test_data_source_names_distinct_in_order() {
        let result = RoutingResult::new(vec![
            RoutingUnit::new("ds_1").with_table("t", "t_0"),
            RoutingUnit::new("ds_0").with_table("t", "t_0"),
            RoutingUnit::new("ds_1").with_table("t", "t_1"),
        ]);
        assert_eq!(result.data_source_names(), vec!["ds_1", "ds_0"]);
        assert!(!result.is_single_routing());
    }
}
