//! Execution and lifecycle orchestration for Keeper operations
//!
//! Turns Check and Backup resources into batch Jobs:
//! - `check` / `backup`: the concrete executors behind the [`Executor`] contract
//! - `env` / `volumes` / `template`: job assembly
//! - `retention`: bounded cleanup of finished operations
//! - `arbiter`: admission from declared concurrency limits and exclusivity
//! - `completion`: maps finished jobs back onto operation status
//! - `client` / `hooks`: collaborator traits and their kube-rs implementations

pub mod arbiter;
pub mod backup;
pub mod check;
pub mod client;
pub mod completion;
pub mod env;
pub mod error;
pub mod generic;
pub mod hooks;
pub mod operation;
pub mod retention;
pub mod template;
pub mod volumes;

pub use error::SchedulingError;
pub use generic::{executor_for, Executor, ExecutorContext};
pub use operation::Operation;
