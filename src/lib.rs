//! Ringtail: read-mostly telemetry and configuration primitives.
//! Bounded memory usage, non-blocking readers, predictable producers.
//!
//! Two independent building blocks:
//!
//! - [`BoundedLog`]: a memory-bounded append-only log keeping a
//!   recent-history tail of small records (e.g. the most recent API calls).
//!   Appending is two atomic operations in the common case; a full snapshot
//!   scan never blocks producers beyond a short ring-bookkeeping lock.
//! - [`RcuCell`]: an epoch-protected shared value. Any number of readers run
//!   a closure against the current value without blocking; a single writer
//!   swaps in a replacement and the displaced value is freed only once every
//!   reader that could still see it has departed.
//!
//! # Key Features
//!
//! - **Lock-free appends**: records are prepended with a single CAS.
//! - **Bounded memory**: old records are retired in whole batches once a
//!   configurable threshold is crossed; total usage stays near
//!   `threshold * capacity`.
//! - **Consistent scans**: a scan observes a stable snapshot of every list
//!   it visits, newest records first, while producers keep appending.
//! - **Slot-based read protection**: readers publish their epoch in fixed
//!   cache-line-isolated slots, so reads stay on uncontended lines.
//!
//! # Example
//!
//! ```rust
//! use ringtail::{BoundedLog, RcuCell};
//!
//! // Recent-call log: rotate after ~4 KiB, keep 4 frozen batches.
//! let log = BoundedLog::new(4096, 4).unwrap();
//! log.append(String::from("GET /api/v1/items"));
//! log.append(String::from("PUT /api/v1/items/7"));
//!
//! let mut seen = Vec::new();
//! log.scan(|record: &String| seen.push(record.clone()));
//! assert_eq!(seen[0], "PUT /api/v1/items/7"); // newest first
//!
//! // Shared configuration: many readers, one writer.
//! let config = RcuCell::new(String::from("region=eu-central"));
//! assert_eq!(config.read(|c| c.len()), 17);
//!
//! let retired = config.update(String::from("region=us-east"));
//! assert_eq!(&*retired, "region=eu-central");
//! drop(retired); // waits until no reader can still see the old value
//! ```

#![warn(missing_docs)]

mod append_list;
mod bounded_log;
mod error;
mod rcu_cell;
mod sync;

pub use append_list::{AppendList, Snapshot};
pub use bounded_log::{BoundedLog, MemoryUsage};
pub use error::ConfigError;
pub use rcu_cell::{RcuCell, Retired};
