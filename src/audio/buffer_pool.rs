// BufferPool - lock-free sample block pool with dual SPSC queues
//
// Carries raw input audio from the capture callback to the analysis task
// without allocating on the callback side.
//
// Architecture:
// - DATA_QUEUE: capture side pushes filled blocks, analysis side consumes
// - POOL_QUEUE: analysis side returns emptied blocks, capture side recycles
//
// Block flow:
// 1. AudioInput pops an empty block from POOL_QUEUE
// 2. AudioInput copies the callback's samples into it
// 3. AudioInput pushes the filled block to DATA_QUEUE
// 4. AnalysisInput pops it, hands the samples to the analyzer
// 5. AnalysisInput pushes the block back to POOL_QUEUE

use rtrb::{Consumer, Producer};

/// Configuration constants for the block pool
pub const DEFAULT_BUFFER_COUNT: usize = 16;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Sample block - pre-allocated vector of mono f32 samples
pub type AudioBuffer = Vec<f32>;

/// Lock-free pool of sample blocks
pub struct BufferPool;

impl BufferPool {
    /// Create the two ends of a pool with `buffer_count` blocks of
    /// `buffer_size` samples capacity each
    ///
    /// # Panics
    /// Panics if buffer_count is 0 or buffer_size is 0
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, buffer_size: usize) -> (AudioInput, AnalysisInput) {
        assert!(buffer_count > 0, "buffer_count must be greater than 0");
        assert!(buffer_size > 0, "buffer_size must be greater than 0");

        let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = rtrb::RingBuffer::new(buffer_count);

        // Every block is allocated here; the capture side only reuses them
        for _ in 0..buffer_count {
            let pushed = pool_producer.push(Vec::with_capacity(buffer_size));
            debug_assert!(pushed.is_ok(), "pool queue sized for every block");
        }

        (
            AudioInput {
                data_producer,
                pool_consumer,
                buffer_size,
                dropped_blocks: 0,
            },
            AnalysisInput {
                data_consumer,
                pool_producer,
            },
        )
    }
}

/// Capture-side end of the pool
pub struct AudioInput {
    data_producer: Producer<AudioBuffer>,
    pool_consumer: Consumer<AudioBuffer>,
    buffer_size: usize,
    dropped_blocks: u64,
}

impl AudioInput {
    /// Copy `samples` into pooled blocks and hand them to analysis
    ///
    /// Returns the number of samples accepted. Samples are dropped (and
    /// counted) when analysis has fallen behind and no empty block is free.
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let mut accepted = 0;
        for chunk in samples.chunks(self.buffer_size) {
            let Ok(mut block) = self.pool_consumer.pop() else {
                self.dropped_blocks += 1;
                break;
            };
            block.clear();
            block.extend_from_slice(chunk);
            if self.data_producer.push(block).is_err() {
                self.dropped_blocks += 1;
                break;
            }
            accepted += chunk.len();
        }
        accepted
    }

    /// Blocks dropped because the analysis side fell behind
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }
}

/// Analysis-side end of the pool
pub struct AnalysisInput {
    data_consumer: Consumer<AudioBuffer>,
    pool_producer: Producer<AudioBuffer>,
}

impl AnalysisInput {
    /// Hand every pending block to `f` and recycle it
    ///
    /// Returns the number of samples drained.
    pub fn drain<F: FnMut(&[f32])>(&mut self, mut f: F) -> usize {
        let mut drained = 0;
        while let Ok(block) = self.data_consumer.pop() {
            drained += block.len();
            f(&block);
            // Pool queue has room for every block, so this cannot fail
            let _ = self.pool_producer.push(block);
        }
        drained
    }

    /// Number of filled blocks waiting
    pub fn pending_blocks(&self) -> usize {
        self.data_consumer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_flow_through_pool() {
        let (mut input, mut analysis) = BufferPool::new(4, 8);

        assert_eq!(input.push_samples(&[0.5; 20]), 20);
        assert_eq!(analysis.pending_blocks(), 3);

        let mut received = Vec::new();
        let drained = analysis.drain(|block| received.extend_from_slice(block));
        assert_eq!(drained, 20);
        assert_eq!(received, vec![0.5; 20]);
        assert_eq!(analysis.pending_blocks(), 0);
    }

    #[test]
    fn test_blocks_are_recycled() {
        let (mut input, mut analysis) = BufferPool::new(2, 4);

        for _ in 0..10 {
            assert_eq!(input.push_samples(&[1.0; 8]), 8);
            analysis.drain(|_| {});
        }
        assert_eq!(input.dropped_blocks(), 0);
    }

    #[test]
    fn test_overrun_drops_and_counts() {
        let (mut input, mut analysis) = BufferPool::new(2, 4);

        // Room for two blocks only
        assert_eq!(input.push_samples(&[1.0; 12]), 8);
        assert_eq!(input.dropped_blocks(), 1);

        analysis.drain(|_| {});
        assert_eq!(input.push_samples(&[1.0; 4]), 4);
    }

    #[test]
    #[should_panic(expected = "buffer_count must be greater than 0")]
    fn test_zero_buffer_count_panics() {
        let _ = BufferPool::new(0, 16);
    }
}
