//! Capture orchestration: event loop, path selection and output delivery

pub mod orchestrator;
pub mod sink;

pub use orchestrator::{
    CaptureOrchestrator, CaptureOrchestratorBuilder, CaptureOutput, OrchestratorState, OutputSink,
};
pub use sink::ChannelSink;
