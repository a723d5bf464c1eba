// Audio module - hand-off of raw input samples to the analysis task

pub mod buffer_pool;

pub use buffer_pool::{
    AnalysisInput, AudioBuffer, AudioInput, BufferPool, DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE,
};
