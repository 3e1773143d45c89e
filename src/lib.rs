pub mod compiler;
pub mod config;
pub mod coverage;
pub mod error;
pub mod executor;
pub mod generator;
pub mod injector;
pub mod mutants;
pub mod operators;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod reporter;
pub mod rollback;
pub mod runtime;
pub mod state;
pub mod workspace;
