//! Durable append-only segmented write-ahead log.
//!
//! This crate stores a dense, monotonically increasing sequence of
//! indexed entries across multiple on-disk segment files, suitable as
//! the persistence substrate of a replicated state machine or a storage
//! engine's redo log:
//!
//! - Append-only writes with at-most-once semantics for ordered indices
//! - Random reads by index through an in-memory position table
//! - Truncation at both ends via a rename-committed two-phase protocol
//! - Crash recovery from any on-disk state the log itself can produce
//! - A bounded LRU cache of decoded cold segments
//!
//! Correctness is defined by what survives a process kill at any
//! instruction, using only rename, remove, write, and fsync as
//! filesystem primitives: every truncation commits through a single
//! atomic rename, and the directory loader reconciles whatever a crash
//! left behind on the next open.
//!
//! ```no_run
//! use seglog::{Batch, Log, Options};
//!
//! # fn main() -> seglog::Result<()> {
//! let log = Log::open("mylog", Options::default())?;
//!
//! log.write(1, b"first")?;
//! let mut batch = Batch::new();
//! batch.write(2, b"second");
//! batch.write(3, b"third");
//! log.write_batch(&mut batch)?;
//!
//! assert_eq!(log.read(2)?, b"second");
//! assert_eq!(log.last_index()?, 3);
//! log.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod config;
pub mod error;
pub mod format;

mod cache;
mod log;
mod segment;

pub use batch::Batch;
pub use config::{LogFormat, Options, OptionsError};
pub use error::{Error, Result};
pub use log::Log;
