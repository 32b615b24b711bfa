use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use kestrel_common::config::KestrelConfig;
use kestrel_common::datum::Datum;
use kestrel_routing::{ShardingRouter, ShardingRule};
use kestrel_sql_frontend::{
    decode_tokens, ShardingCondition, ShardingConditions, ShardingValue, SqlStatement,
    StatementKind,
};

#[derive(Parser, Debug)]
#[command(name = "kestrel", about = "Kestrel sharding rule inspector", version)]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "kestrel.toml")]
    config: String,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build every sharding and master-slave rule and report problems.
    Check,
    /// Show the routing units for one sharding value.
    Route {
        /// Logical table.
        #[arg(long)]
        table: String,
        /// Sharding column; defaults to every sharding column of the table.
        #[arg(long)]
        column: Option<String>,
        /// Sharding value. Integers are routed as integers, anything else as text.
        #[arg(long)]
        value: String,
    },
    /// Rewrite a statement for every unit of its tables.
    Rewrite {
        /// Logical SQL text.
        #[arg(long)]
        sql: String,
        /// JSON token list produced by the parser.
        #[arg(long)]
        tokens: String,
        /// Logical tables referenced by the statement.
        #[arg(long = "table")]
        tables: Vec<String>,
        /// ddl, dml, dql, dal or tcl.
        #[arg(long, default_value = "dql")]
        kind: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        let text = KestrelConfig::default()
            .to_toml_string()
            .context("serialize default config")?;
        println!("{}", text);
        return Ok(());
    }

    kestrel_observability::init_tracing();
    let config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Command::Check) {
        Command::Check => check(&config),
        Command::Route {
            table,
            column,
            value,
        } => route(&config, &table, column.as_deref(), &value),
        Command::Rewrite {
            sql,
            tokens,
            tables,
            kind,
        } => rewrite(&config, &sql, &tokens, tables, &kind),
    }
}

/// A missing file means defaults; a file that does not parse is an error.
fn load_config(path: &str) -> Result<KestrelConfig> {
    if !Path::new(path).exists() {
        tracing::info!("Config file {} not found, using defaults", path);
        return Ok(KestrelConfig::default());
    }
    KestrelConfig::load(path).with_context(|| format!("load config {}", path))
}

fn check(config: &KestrelConfig) -> Result<()> {
    let rule = ShardingRule::from_config(&config.sharding).context("sharding rule")?;
    kestrel_routing::MasterSlaveRouter::from_config(&config.master_slave)
        .context("master-slave rule")?;
    for table in rule.table_rules() {
        println!(
            "{}: {} actual table(s) on {}",
            table.logical_table,
            table.actual_data_nodes.len(),
            table.data_source_names().join(", ")
        );
    }
    for ms in &config.master_slave {
        println!("{}: master {} slaves [{}]", ms.name, ms.master, ms.slaves.join(", "));
    }
    println!("OK");
    Ok(())
}

fn route(config: &KestrelConfig, table: &str, column: Option<&str>, value: &str) -> Result<()> {
    let rule = Arc::new(ShardingRule::from_config(&config.sharding)?);
    let Some(table_rule) = rule.table_rule(table) else {
        bail!("no table rule for '{}'", table);
    };
    let value = parse_value(value);
    let columns: Vec<String> = match column {
        Some(c) => vec![c.to_string()],
        None => [rule.database_strategy(table_rule), rule.table_strategy(table_rule)]
            .into_iter()
            .flatten()
            .map(|s| s.sharding_column.clone())
            .collect(),
    };
    let values = columns
        .iter()
        .map(|c| ShardingValue::equal(table, c.as_str(), value.clone()))
        .collect();
    let stmt = SqlStatement::new(StatementKind::Dql, format!("SELECT * FROM {}", table))
        .with_tables([table])
        .with_conditions(ShardingConditions::new(vec![ShardingCondition::new(values)]));

    let result = ShardingRouter::new(rule).route(&stmt)?;
    if result.is_empty() {
        println!("(no routing unit)");
    }
    for unit in &result.units {
        println!("{}", unit);
    }
    Ok(())
}

fn rewrite(
    config: &KestrelConfig,
    sql: &str,
    tokens_path: &str,
    tables: Vec<String>,
    kind: &str,
) -> Result<()> {
    let kind = match kind.to_ascii_lowercase().as_str() {
        "ddl" => StatementKind::Ddl,
        "dml" => StatementKind::Dml,
        "dql" => StatementKind::Dql,
        "dal" => StatementKind::Dal,
        "tcl" => StatementKind::Tcl,
        other => bail!("unknown statement kind '{}'", other),
    };
    let json = std::fs::read_to_string(tokens_path)
        .with_context(|| format!("read tokens {}", tokens_path))?;
    let stmt = SqlStatement::new(kind, sql)
        .with_tables(tables)
        .with_tokens(decode_tokens(&json)?);

    let rule = Arc::new(ShardingRule::from_config(&config.sharding)?);
    let routing = ShardingRouter::new(rule.clone()).route(&stmt)?;
    for (unit, sql_unit) in kestrel_rewrite::rewrite(&rule, &stmt, &routing)? {
        println!("{} => {}", unit, sql_unit);
    }
    Ok(())
}

fn parse_value(raw: &str) -> Datum {
    match raw.parse::<i64>() {
        Ok(v) => Datum::Int64(v),
        Err(_) => Datum::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), Datum::Int64(42));
        assert_eq!(parse_value("-1"), Datum::Int64(-1));
        assert_eq!(parse_value("abc"), Datum::Text("abc".into()));
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let config = load_config("/nonexistent/kestrel.toml").unwrap();
        assert!(config.sharding.tables.is_empty());
    }

    #[test]
    fn test_cli_parses_route() {
        let cli = Cli::parse_from(["kestrel", "-c", "x.toml", "route", "--table", "t_order", "--value", "7"]);
        assert_eq!(cli.config, "x.toml");
        match cli.command {
            Some(Command::Route { table, value, column }) => {
                assert_eq!(table, "t_order");
                assert_eq!(value, "7");
                assert!(column.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
