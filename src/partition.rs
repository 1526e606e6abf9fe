//! Collection Partitioning
//!
//! Splits an input sequence into contiguous, order-preserving chunks for
//! parallel execution.
//!
//! ## Sizing
//!
//! ```text
//! batch_size = max(N / P, 1)
//! if cap > 0 && batch_size > cap:
//!     batch_size = cap
//!     P = N / batch_size + 1
//! ```
//!
//! Partitions are emitted lazily in one pass. Concatenating them in
//! emission order reproduces the input exactly and no partition is empty.

/// Default number of partitions: `partitions_per_cpu` for every core.
pub fn default_target(partitions_per_cpu: usize) -> usize {
    partitions_per_cpu.max(1) * num_cpus::get()
}

/// Partition sizing for one input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Items per partition (the last one may be shorter)
    pub batch_size: usize,
    /// Expected number of partitions
    pub partitions: usize,
}

impl PartitionPlan {
    /// Size partitions for `total` items split `target` ways, with
    /// `max_batch` (0 = unlimited) as the per-partition cap.
    pub fn new(total: usize, target: usize, max_batch: usize) -> Self {
        let mut partitions = target.max(1);
        let mut batch_size = (total / partitions).max(1);
        if max_batch > 0 && batch_size > max_batch {
            batch_size = max_batch;
            partitions = total / batch_size + 1;
        }
        PartitionPlan {
            batch_size,
            partitions,
        }
    }

    /// Lazily partition `items` according to this plan.
    pub fn split<I: IntoIterator>(&self, items: I) -> Partitions<I::IntoIter> {
        Partitions {
            items: items.into_iter(),
            batch_size: self.batch_size,
        }
    }
}

/// Iterator over the partitions of an input
pub struct Partitions<I> {
    items: I,
    batch_size: usize,
}

impl<I: Iterator> Iterator for Partitions<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut partition = Vec::with_capacity(self.batch_size);
        for item in self.items.by_ref() {
            partition.push(item);
            if partition.len() == self.batch_size {
                break;
            }
        }
        (!partition.is_empty()).then_some(partition)
    }
}
