//! Offline frontend
//!
//! Drives the graph the way an audio backend would, without any device:
//! fixed-size zeroed input blocks at full speed. Used by the CLI and by
//! end-to-end tests.

use reef_core::Sample;
use reef_engine::AudioGraph;

pub struct OfflineFrontend {
    graph: AudioGraph,
    input: Vec<Sample>,
    output: Vec<Sample>,
    blocks_processed: u64,
}

impl OfflineFrontend {
    pub fn new(graph: AudioGraph) -> Self {
        let block_size = graph.block_size();
        Self {
            graph,
            input: vec![0.0; reef_core::MAX_ENGINE_CHANNELS * block_size],
            output: vec![0.0; reef_core::MAX_ENGINE_CHANNELS * block_size],
            blocks_processed: 0,
        }
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    /// Last processed block, channel-major
    pub fn output(&self) -> &[Sample] {
        &self.output
    }

    /// Process one block of silence
    pub fn process_block(&mut self) {
        self.graph.process(&self.input, &mut self.output);
        self.blocks_processed += 1;
    }

    /// Process one block from caller-provided input
    pub fn process_block_with_input(&mut self, input: &[Sample]) {
        let len = input.len().min(self.input.len());
        self.input[..len].copy_from_slice(&input[..len]);
        self.graph.process(&self.input, &mut self.output);
        self.blocks_processed += 1;
    }

    /// Run for a wall-clock duration's worth of blocks
    pub fn run_for_seconds(&mut self, seconds: f64) {
        let blocks =
            (seconds * self.graph.sample_rate() as f64 / self.graph.block_size() as f64) as u64;
        for _ in 0..blocks {
            self.process_block();
        }
        log::info!("processed {blocks} blocks offline");
    }
}
