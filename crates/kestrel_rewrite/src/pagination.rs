//! LIMIT/OFFSET correction for statements that fan out to several units.
//!
//! Each shard must return enough rows for the merged result to be paginated
//! after the merge: the offset moves into the row count and every shard
//! starts at 0. When groups or aggregates are folded after the merge and the
//! shards cannot pre-sort by the group key, every shard must return all of
//! its rows.

use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelResult, RoutingError};
use kestrel_sql_frontend::{Limit, SelectContext};

/// Widened row count: the largest LIMIT every supported backend accepts.
pub const MAX_ROW_COUNT: i64 = i32::MAX as i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationRewrite {
    /// Resolved offset of the logical statement.
    pub offset: i64,
    /// Resolved row count of the logical statement.
    pub row_count: Option<i64>,
    /// False for single-unit statements, which run the LIMIT unchanged.
    pub rewrite: bool,
    pub max_row_count: bool,
    pub absorb_offset: bool,
}

impl PaginationRewrite {
    pub fn new(
        select: &SelectContext,
        limit: &Limit,
        parameters: &[Datum],
        is_single_routing: bool,
    ) -> KestrelResult<Self> {
        Ok(Self {
            offset: limit.offset_value(parameters)?,
            row_count: limit.row_count_value(parameters)?,
            rewrite: !is_single_routing,
            max_row_count: select.has_group_by_or_aggregation()
                && !select.is_same_group_by_and_order_by(),
            absorb_offset: limit.rewrite_row_count,
        })
    }

    pub fn revised_row_count(&self, original: i64) -> i64 {
        if !self.rewrite {
            original
        } else if self.max_row_count {
            MAX_ROW_COUNT
        } else if self.absorb_offset {
            original.saturating_add(self.offset)
        } else {
            original
        }
    }

    pub fn revised_offset(&self, original: i64) -> i64 {
        if self.rewrite {
            0
        } else {
            original
        }
    }

    /// Apply the same correction to LIMIT/OFFSET operands bound as parameters.
    pub fn revise_parameters(&self, limit: &Limit, parameters: &mut [Datum]) -> KestrelResult<()> {
        if !self.rewrite {
            return Ok(());
        }
        if let (Some(idx), Some(row_count)) = (
            limit.row_count.and_then(|v| v.parameter_index),
            self.row_count,
        ) {
            let slot = parameters
                .get_mut(idx)
                .ok_or(RoutingError::ParamMissing(idx))?;
            *slot = Datum::Int64(self.revised_row_count(row_count));
        }
        if let Some(idx) = limit.offset.and_then(|v| v.parameter_index) {
            let slot = parameters
                .get_mut(idx)
                .ok_or(RoutingError::ParamMissing(idx))?;
            *slot = Datum::Int64(self.revised_offset(self.offset));
        }
        Ok(())
    }
}
