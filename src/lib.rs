//! icloudpd-mirror: incremental, resumable mirror of an iCloud photo library.
//!
//! Remote asset descriptors are reconciled against a SQLite asset index and a
//! flat data directory; missing renditions are fetched concurrently with
//! bounded retries and written atomically. Any pass can be interrupted and
//! re-run without re-downloading completed files.

#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod download;
pub mod remote;
pub mod retry;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod sync;
pub mod versions;
