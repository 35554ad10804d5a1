//! Id-range partitioning of a source table
//!
//! Splits `[n_min, n_max]` into contiguous inclusive ranges of `stride` ids.
//! Boundaries are `n_min, n_min + stride, ...` strictly below `n_max`; each
//! partition ends one id before the next boundary and the last one ends at
//! `n_max`.

use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::error::{ConnectorError, Result};
use crate::pool::ConnectionPool;
use crate::query::QueryBuilder;
use crate::types::Partition;

/// Smallest and largest id in a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionBounds {
    pub min: i64,
    pub max: i64,
}

/// Compute the ordered partitions covering `[n_min, n_max]`
///
/// `n_min == n_max` yields the single partition `(n, n)`; `n_min > n_max`
/// yields nothing. A non-positive stride is rejected.
pub fn partition_ranges(
    table: &str,
    id_column: &str,
    n_min: i64,
    n_max: i64,
    stride: i64,
) -> Result<Vec<Partition>> {
    if stride <= 0 {
        return Err(ConnectorError::config(format!(
            "partition stride must be greater than 0, got {}",
            stride
        )));
    }

    if n_min > n_max {
        return Ok(Vec::new());
    }

    if n_min == n_max {
        return Ok(vec![Partition::new(table, id_column, n_min, n_max)]);
    }

    let mut boundaries = Vec::new();
    let mut next = Some(n_min);
    while let Some(boundary) = next.filter(|b| *b < n_max) {
        boundaries.push(boundary);
        next = boundary.checked_add(stride);
    }

    let partitions = boundaries
        .iter()
        .enumerate()
        .map(|(i, &low)| {
            let high = boundaries.get(i + 1).map_or(n_max, |successor| successor - 1);
            Partition::new(table, id_column, low, high)
        })
        .collect();

    Ok(partitions)
}

/// Resolve the id bounds, querying `MIN`/`MAX` for any bound not configured
///
/// Returns `None` when the table is empty and no explicit bounds were given.
pub async fn resolve_bounds(
    config: &SourceConfig,
    pool: &dyn ConnectionPool,
    builder: &dyn QueryBuilder,
) -> Result<Option<PartitionBounds>> {
    if let (Some(min), Some(max)) = (config.lower_bound, config.upper_bound) {
        debug!(table = %config.table, min, max, "Using configured partition bounds");
        return Ok(Some(PartitionBounds { min, max }));
    }

    let statement = builder.select_bounds(&config.table, &config.id_column)?;
    let rows = pool
        .query(&statement)
        .await
        .map_err(|e| e.during_init("querying table bounds"))?;

    let row = rows.into_iter().next();
    let queried = |column: &str| row.as_ref().and_then(|r| r.get(column)).and_then(|v| v.as_i64());

    let min = config.lower_bound.or_else(|| queried("min_id"));
    let max = config.upper_bound.or_else(|| queried("max_id"));

    match (min, max) {
        (Some(min), Some(max)) => {
            info!(table = %config.table, id_column = %config.id_column, min, max, "Resolved partition bounds");
            Ok(Some(PartitionBounds { min, max }))
        }
        _ => {
            info!(table = %config.table, "Source table is empty, no partitions to deliver");
            Ok(None)
        }
    }
}

/// Resolve bounds and compute the partitions for `config`
pub async fn plan_partitions(
    config: &SourceConfig,
    pool: &dyn ConnectionPool,
    builder: &dyn QueryBuilder,
) -> Result<Vec<Partition>> {
    match resolve_bounds(config, pool, builder).await? {
        Some(bounds) => partition_ranges(
            &config.table,
            &config.id_column,
            bounds.min,
            bounds.max,
            config.rows_per_partition,
        ),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ranges(n_min: i64, n_max: i64, stride: i64) -> Vec<(i64, i64)> {
        partition_ranges("t", "id", n_min, n_max, stride)
            .unwrap()
            .into_iter()
            .map(|p| (p.low, p.high))
            .collect()
    }

    #[test]
    fn test_ten_ids_stride_three() {
        assert_eq!(ranges(1, 10, 3), vec![(1, 3), (4, 6), (7, 10)]);
    }

    #[test]
    fn test_exact_multiple() {
        assert_eq!(ranges(0, 9, 5), vec![(0, 4), (5, 9)]);
    }

    #[test]
    fn test_stride_larger_than_range() {
        assert_eq!(ranges(1, 3, 100), vec![(1, 3)]);
    }

    #[test]
    fn test_single_id_is_one_partition() {
        assert_eq!(ranges(7, 7, 3), vec![(7, 7)]);
    }

    #[test]
    fn test_inverted_bounds_are_empty() {
        assert!(ranges(5, 1, 3).is_empty());
    }

    #[test]
    fn test_zero_stride_rejected() {
        assert!(partition_ranges("t", "id", 1, 10, 0).is_err());
    }

    #[test]
    fn test_near_i64_max_does_not_overflow() {
        let result = ranges(i64::MAX - 5, i64::MAX, 4);
        assert_eq!(result, vec![(i64::MAX - 5, i64::MAX - 2), (i64::MAX - 1, i64::MAX)]);
    }

    #[test]
    fn test_partitions_carry_table_and_column() {
        let parts = partition_ranges("orders", "order_id", 1, 2, 1).unwrap();
        assert!(parts.iter().all(|p| p.table == "orders" && p.id_column == "order_id"));
    }

    proptest! {
        #[test]
        fn prop_partitions_cover_range_without_gaps(
            n_min in -10_000i64..10_000,
            width in 0i64..5_000,
            stride in 1i64..700,
        ) {
            let n_max = n_min + width;
            let parts = ranges(n_min, n_max, stride);

            prop_assert!(!parts.is_empty());
            prop_assert_eq!(parts[0].0, n_min);
            prop_assert_eq!(parts[parts.len() - 1].1, n_max);

            for (low, high) in &parts {
                prop_assert!(low <= high);
            }
            for pair in parts.windows(2) {
                prop_assert_eq!(pair[0].1 + 1, pair[1].0);
            }
        }
    }
}
