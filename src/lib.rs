pub mod assembler;
pub mod chunker;
pub mod config;
pub mod discovery;
pub mod handoff;
pub mod model;
pub mod orchestrator;
pub mod publish;
pub mod python_index;
pub mod quality;
pub mod rewriter;
pub mod scanners;
pub mod writer;
