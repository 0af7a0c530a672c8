// THEORY:
// This file is the main entry point for the `patch_vision` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API that will be exposed to external consumers (like an AR view host or a
// desktop visualizer).
//
// The primary goal is to export the `FramePipeline` and its associated data
// structures (`PipelineConfig`, `SegmentationResult`, etc.) as the clean,
// high-level interface for the entire engine. The internal modules
// (`core_modules`) stay available for consumers that only need a slice of the
// stack, such as running the component extractor on scores they produced
// themselves.

pub mod core_modules;
pub mod error;
pub mod pipeline;
