//! # Previously, on dgx...
//!
//! 🎬 The buckets needed a home. Not a fancy home. Not a home with a disk, or
//! a network, or a pager rotation. Just a `BTreeMap` behind a `Mutex`, gone the
//! moment the process blinks.
//!
//! `in_mem` provides the in-memory [`AggregateStore`](crate::backends::AggregateStore)
//! and [`ReportHistory`](crate::backends::ReportHistory). The store keeps a version
//! counter per document so optimistic transactions have something to be
//! optimistic about. The file backends are these two plus a disk, so this is
//! also the engine room for them.
//!
//! 🦆
//!
//! ✅ No network calls. No heartbeat. No mortgage on the line. Just heap memory and versions.

mod in_mem_history;
mod in_mem_store;

pub use in_mem_history::InMemoryReportHistory;
pub use in_mem_store::InMemoryAggregateStore;
