use std::fmt;

use kestrel_common::error::{ConfigError, KestrelResult};

/// One actual table on one data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into().to_lowercase(),
            table: table.into().to_lowercase(),
        }
    }

    /// Parse `<data_source>.<table>`.
    pub fn parse(text: &str) -> KestrelResult<Self> {
        let text = text.trim();
        match text.split_once('.') {
            Some((ds, table)) if !ds.is_empty() && !table.is_empty() && !table.contains('.') => {
                Ok(Self::new(ds, table))
            }
            _ => Err(ConfigError::InvalidDataNode(text.to_string()).into()),
        }
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

/// Expand inline groups in a data node expression into the cartesian product
/// of their values, left to right.
///
/// `{0..2}` is an inclusive integer range, `{a,b}` a literal list; a leading
/// `$` before the brace is accepted. `ds_{0..1}.t_{0..1}` yields
/// `ds_0.t_0, ds_0.t_1, ds_1.t_0, ds_1.t_1`.
pub fn expand_inline(expr: &str) -> KestrelResult<Vec<String>> {
    let Some(open) = expr.find('{') else {
        return Ok(vec![expr.to_string()]);
    };
    let close = expr[open..]
        .find('}')
        .map(|i| open + i)
        .ok_or_else(|| ConfigError::InvalidDataNode(expr.to_string()))?;
    let prefix_end = if open > 0 && expr.as_bytes()[open - 1] == b'$' {
        open - 1
    } else {
        open
    };
    let prefix = &expr[..prefix_end];
    let body = &expr[open + 1..close];
    let rest = expand_inline(&expr[close + 1..])?;

    let values: Vec<String> = if let Some((lo, hi)) = body.split_once("..") {
        let lo: i64 = lo
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidDataNode(expr.to_string()))?;
        let hi: i64 = hi
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidDataNode(expr.to_string()))?;
        if hi < lo {
            return Err(ConfigError::InvalidDataNode(expr.to_string()).into());
        }
        (lo..=hi).map(|v| v.to_string()).collect()
    } else {
        body.split(',').map(|s| s.trim().to_string()).collect()
    };

    let mut out = Vec::with_capacity(values.len() * rest.len());
    for v in &values {
        for r in &rest {
            out.push(format!("{}{}{}", prefix, v, r));
        }
    }
    Ok(out)
}

/// Expand and parse every configured data node expression.
pub fn parse_data_nodes(exprs: &[String]) -> KestrelResult<Vec<DataNode>> {
    let mut nodes = Vec::new();
    for expr in exprs {
        for text in expand_inline(expr)? {
            let node = DataNode::parse(&text)?;
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_node_lowercases() {
        let node = DataNode::parse("DS_0.T_Order_1").unwrap();
        assert_eq!(node, DataNode::new("ds_0", "t_order_1"));
        assert_eq!(node.to_string(), "ds_0.t_order_1");
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!(DataNode::parse("t_order").is_err());
        assert!(DataNode::parse(".t").is_err());
        assert!(DataNode::parse("ds.").is_err());
        assert!(DataNode::parse("a.b.c").is_err());
    }

    #[test]
    fn test_expand_inline_cartesian_order() {
        let out = expand_inline("ds_{0..1}.t_order_{0..1}").unwrap();
        assert_eq!(
            out,
            vec!["ds_0.t_order_0", "ds_0.t_order_1", "ds_1.t_order_0", "ds_1.t_order_1"]
        );
    }

    #[test]
    fn test_expand_inline_list_and_dollar_prefix() {
        let out = expand_inline("ds_${a,b}.t").unwrap();
        assert_eq!(out, vec!["ds_a.t", "ds_b.t"]);
        assert_eq!(expand_inline("ds_0.t").unwrap(), vec!["ds_0.t"]);
    }

    #[test]
    fn test_expand_inline_rejects_bad_range() {
        assert!(expand_inline("ds_{3..1}.t").is_err());
        assert!(expand_inline("ds_{x..1}.t").is_err());
        assert!(expand_inline("ds_{0..1.t").is_err());
    }

    #[test]
    fn test_parse_data_nodes_dedups() {
        let nodes =
            parse_data_nodes(&["ds_0.t_{0..1}".to_string(), "ds_0.t_1".to_string()]).unwrap();
        assert_eq!(nodes.len(), 2);
    }
}
