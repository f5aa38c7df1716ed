//! Cluster partition detection and UUID key ranges
//!
//! Each node of a deployment owns a contiguous slice of the 128-bit UUID
//! key space. A [`PartitionDetector`] reports the node's partition number
//! and the cluster size; [`partition_range`] converts that assignment into
//! the `[from, to)` link ID range the node is responsible for (with the
//! last partition closed at the maximum UUID).

use std::env;

use thiserror::Error;
use uuid::Uuid;

/// Errors reported by partition detection and range computation.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// Partition data is not available yet; the caller should defer its
    /// pass and retry later.
    #[error("no partition data available yet")]
    NotYetAvailable,

    #[error("invalid partition assignment: partition {partition} of {total}")]
    InvalidAssignment { partition: u32, total: u32 },

    #[error("partition detector: {0}")]
    Detector(String),
}

/// Result type for partition operations.
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Implemented by types that can assign a cluster partition to this node.
pub trait PartitionDetector: Send + Sync {
    /// Returns `(partition, total_partitions)` for this node.
    fn partition_info(&self) -> PartitionResult<(u32, u32)>;
}

/// A detector that always reports the same static assignment.
#[derive(Debug, Clone, Copy)]
pub struct FixedPartitionDetector {
    pub partition: u32,
    pub num_partitions: u32,
}

impl PartitionDetector for FixedPartitionDetector {
    fn partition_info(&self) -> PartitionResult<(u32, u32)> {
        Ok((self.partition, self.num_partitions))
    }
}

/// A detector that reads the assignment from environment variables, as
/// exported by a stateful-set style deployment. Missing variables mean the
/// cluster has not published the data yet and the pass is deferred.
pub struct EnvPartitionDetector {
    partition_var: String,
    total_var: String,
}

impl EnvPartitionDetector {
    /// Reads `TRAWLER_PARTITION` and `TRAWLER_NUM_PARTITIONS`.
    pub fn new() -> Self {
        Self::with_vars("TRAWLER_PARTITION", "TRAWLER_NUM_PARTITIONS")
    }

    pub fn with_vars(partition_var: impl Into<String>, total_var: impl Into<String>) -> Self {
        Self {
            partition_var: partition_var.into(),
            total_var: total_var.into(),
        }
    }

    fn read_var(&self, name: &str) -> PartitionResult<u32> {
        let raw = env::var(name).map_err(|_| PartitionError::NotYetAvailable)?;
        raw.parse()
            .map_err(|_| PartitionError::Detector(format!("{name} is not a number: {raw:?}")))
    }
}

impl Default for EnvPartitionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionDetector for EnvPartitionDetector {
    fn partition_info(&self) -> PartitionResult<(u32, u32)> {
        let partition = self.read_var(&self.partition_var)?;
        let total = self.read_var(&self.total_var)?;
        Ok((partition, total))
    }
}

/// Computes the UUID range owned by `partition` when the key space is
/// sliced into `total` contiguous intervals.
///
/// The space is the unsigned 128-bit integers `[0, 2^128 - 1]`; every
/// partition gets `floor(2^128 / total)` keys. Ranges are half-open
/// `[from, to)` except the last, whose returned `to` is the maximum UUID
/// and is treated as inclusive by the stores' range scans.
pub fn partition_range(partition: u32, total: u32) -> PartitionResult<(Uuid, Uuid)> {
    if total == 0 || partition >= total {
        return Err(PartitionError::InvalidAssignment { partition, total });
    }
    if total == 1 {
        return Ok((Uuid::nil(), Uuid::max()));
    }

    // floor(2^128 / total) without overflowing u128:
    // 2^128 = u128::MAX + 1, so the quotient gains one when the remainder
    // of u128::MAX / total is total - 1.
    let total = u128::from(total);
    let partition = u128::from(partition);
    let mut size = u128::MAX / total;
    if u128::MAX % total == total - 1 {
        size += 1;
    }

    let from = partition * size;
    let to = if partition == total - 1 {
        u128::MAX
    } else {
        (partition + 1) * size
    };
    Ok((Uuid::from_u128(from), Uuid::from_u128(to)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_detector_reports_assignment() {
        let detector = FixedPartitionDetector {
            partition: 3,
            num_partitions: 8,
        };
        assert_eq!(detector.partition_info().unwrap(), (3, 8));
    }

    #[test]
    fn test_env_detector_defers_when_unset() {
        let detector = EnvPartitionDetector::with_vars(
            "TRAWLER_TEST_UNSET_PARTITION",
            "TRAWLER_TEST_UNSET_TOTAL",
        );
        assert!(matches!(
            detector.partition_info(),
            Err(PartitionError::NotYetAvailable)
        ));
    }

    #[test]
    fn test_env_detector_reads_assignment() {
        env::set_var("TRAWLER_TEST_PARTITION", "2");
        env::set_var("TRAWLER_TEST_TOTAL", "5");
        let detector = EnvPartitionDetector::with_vars("TRAWLER_TEST_PARTITION", "TRAWLER_TEST_TOTAL");
        assert_eq!(detector.partition_info().unwrap(), (2, 5));
        env::remove_var("TRAWLER_TEST_PARTITION");
        env::remove_var("TRAWLER_TEST_TOTAL");
    }

    #[test]
    fn test_single_partition_owns_everything() {
        let (from, to) = partition_range(0, 1).unwrap();
        assert_eq!(from, Uuid::nil());
        assert_eq!(to, Uuid::max());
    }

    #[test]
    fn test_invalid_assignments_are_rejected() {
        assert!(partition_range(0, 0).is_err());
        assert!(partition_range(3, 3).is_err());
    }

    #[test]
    fn test_ranges_tile_the_key_space() {
        for total in [2u32, 3, 7, 11, 16] {
            let mut previous_to: Option<u128> = None;
            for partition in 0..total {
                let (from, to) = partition_range(partition, total).unwrap();
                match previous_to {
                    // Partition 0 starts at the nil UUID.
                    None => assert_eq!(from, Uuid::nil(), "total={total}"),
                    // Each range begins where the previous one ended.
                    Some(previous) => {
                        assert_eq!(from.as_u128(), previous, "total={total} part={partition}")
                    }
                }
                assert!(from.as_u128() < to.as_u128());
                previous_to = Some(to.as_u128());
            }
            // The last range is closed at the maximum UUID.
            assert_eq!(previous_to, Some(u128::MAX));
        }
    }

    #[test]
    fn test_partition_sizes_are_uniform() {
        let total = 11u32;
        let (first_from, first_to) = partition_range(0, total).unwrap();
        let expected = first_to.as_u128() - first_from.as_u128();
        for partition in 1..total - 1 {
            let (from, to) = partition_range(partition, total).unwrap();
            assert_eq!(to.as_u128() - from.as_u128(), expected);
        }
    }
}
