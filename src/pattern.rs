/// Source of the bytes a test file is filled with.
///
/// Implementations must be pure: the verify pass regenerates every block
/// from the index alone and compares it with what the media returns.
pub trait Pattern {
    /// Length of every block returned by [`Pattern::create`].
    fn block_size(&self) -> usize;

    /// Build the block for the file with the given 1-based index.
    fn create(&self, index: u64) -> Vec<u8>;
}

/// The decimal index repeated over the whole block, e.g. `"121212..."` for file 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedPattern {
    block_size: usize,
}

impl IndexedPattern {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }
}

impl Pattern for IndexedPattern {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn create(&self, index: u64) -> Vec<u8> {
        let digits = index.to_string();
        digits
            .as_bytes()
            .iter()
            .copied()
            .cycle()
            .take(self.block_size)
            .collect()
    }
}
