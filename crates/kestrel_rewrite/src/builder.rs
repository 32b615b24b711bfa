use kestrel_common::error::KestrelResult;

/// A region whose text depends on the routing unit being rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// Actual table name, wrapped in the delimiters the original used.
    Table {
        logical_table: String,
        open: &'static str,
        close: &'static str,
    },
    /// Data source name of the unit.
    Schema { logical_table: String },
    /// `<index>_<actual table>`.
    Index {
        index_name: String,
        logical_table: String,
        open: &'static str,
        close: &'static str,
    },
    /// The VALUES rows routed to the unit.
    InsertValues,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder(Placeholder),
}

/// Logical SQL split into fixed text and unit-dependent placeholders. Built
/// once per statement, rendered once per routing unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlBuilder {
    segments: Vec<Segment>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
    }

    pub fn append_placeholder(&mut self, placeholder: Placeholder) {
        self.segments.push(Segment::Placeholder(placeholder));
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(p) => Some(p),
            Segment::Text(_) => None,
        })
    }

    /// Render with `resolve` supplying the text of every placeholder.
    pub fn to_sql<F>(&self, mut resolve: F) -> KestrelResult<String>
    where
        F: FnMut(&Placeholder) -> KestrelResult<String>,
    {
        let mut sql = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Placeholder(p) => sql.push_str(&resolve(p)?),
            }
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_literals_merge() {
        let mut b = SqlBuilder::new();
        b.append_literal("SELECT * ");
        b.append_literal("FROM ");
        b.append_literal("");
        b.append_placeholder(Placeholder::Schema {
            logical_table: "t".into(),
        });
        assert_eq!(b.segments.len(), 2);
        assert_eq!(b.placeholders().count(), 1);
    }

    #[test]
    fn test_to_sql_resolves_each_placeholder() {
        let mut b = SqlBuilder::new();
        b.append_literal("SELECT * FROM ");
        b.append_placeholder(Placeholder::Table {
            logical_table: "t_order".into(),
            open: "`",
            close: "`",
        });
        b.append_literal(" WHERE 1 = 1");
        let sql = b
            .to_sql(|p| match p {
                Placeholder::Table { logical_table, open, close } => {
                    Ok(format!("{}{}_0{}", open, logical_table, close))
                }
                _ => Ok(String::new()),
            })
            .unwrap();
        assert_eq!(sql, "SELECT * FROM `t_order_0` WHERE 1 = 1");
    }
}
