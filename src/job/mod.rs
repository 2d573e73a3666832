pub mod ledger;
pub mod model;
pub mod params;
pub mod recovery;
pub mod store;

pub use ledger::{FileLedger, JobLedger, MemoryLedger};
pub use model::{Chunk, Job, JobStatus, Verification, chunk_file_name, final_file_name};
pub use params::{JobParameters, ParamView};
pub use recovery::{Recovery, RecoveryPlan, recover};
pub use store::{JobStore, atomic_write};
