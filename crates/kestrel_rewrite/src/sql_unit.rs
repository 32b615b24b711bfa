use std::fmt;

use kestrel_common::datum::Datum;

/// Physical SQL for one routing unit together with its bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlUnit {
    pub sql: String,
    pub parameters: Vec<Datum>,
}

impl SqlUnit {
    pub fn new(sql: impl Into<String>, parameters: Vec<Datum>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }
}

impl fmt::Display for SqlUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.parameters.is_empty() {
            let params: Vec<String> = self.parameters.iter().map(|p| p.to_sql_literal()).collect();
            write!(f, " ::: [{}]", params.join(", "))?;
        }
        Ok(())
    }
}
