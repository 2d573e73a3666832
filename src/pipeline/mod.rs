//! Chunked synthesis pipeline.
//!
//! One job runs strictly in order on a single thread: each chunk goes through
//! the [`ChunkWorker`] state machine, the ledger is saved after every outcome,
//! and the [`Assembler`] joins the accepted chunks once all are present.

pub mod assembler;
pub mod cancel;
pub mod runner;
pub mod worker;

pub use assembler::{Assembler, AssemblyOutcome, AssemblySettings, concat_with_padding};
pub use cancel::CancelToken;
pub use runner::{JobOutcome, JobRunner};
pub use worker::{ChunkOutcome, ChunkState, ChunkWorker, VerifySettings, WorkerSettings};
