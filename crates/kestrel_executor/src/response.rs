use kestrel_common::datum::OwnedRow;
use kestrel_common::types::ColumnMeta;

/// Raw result of one physical statement on one data source.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardResponse {
    Update {
        affected_rows: u64,
        /// 0 when the backend generated no key.
        last_insert_id: u64,
    },
    Query {
        columns: Vec<ColumnMeta>,
        /// Rows in the order the backend produced them.
        rows: Vec<OwnedRow>,
    },
}

impl ShardResponse {
    pub fn update(affected_rows: u64) -> Self {
        ShardResponse::Update {
            affected_rows,
            last_insert_id: 0,
        }
    }

    pub fn query(columns: Vec<ColumnMeta>, rows: Vec<OwnedRow>) -> Self {
        ShardResponse::Query { columns, rows }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ShardResponse::Update { .. } => "update",
            ShardResponse::Query { .. } => "query",
        }
    }
}
