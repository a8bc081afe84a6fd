// Worker execution: process runner and dispatch supervisor

pub mod runner;
pub mod supervisor;

pub use runner::{ProcessWorkerRunner, WorkerError, WorkerOutcome, WorkerRequest, WorkerRunner};
pub use supervisor::{DispatchResult, WorkerSupervisor};
