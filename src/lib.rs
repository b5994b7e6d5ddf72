//! # mfutar core library
//!
//! Core functionality for `mfutar`, a distributed, parallel archiver for
//! POSIX pax tar archives. It is designed to be used by the `mfutar`
//! command-line application, but its public API can also be used to
//! programmatically create, inspect, and extract archives.
//!
//! ## Key modules
//!
//! - [`flist`]: the file-list abstraction -- enumeration, sorting,
//!   sharding, and path relativization/composition.
//! - [`header`]: the ustar/pax header codec.
//! - [`layout`]: the layout planner, turning a sharded file list into
//!   absolute archive offsets.
//! - [`index`]: the `.idx` sidecar offset index.
//! - [`collective`]: the rank-group abstraction (`Group`) used for the
//!   small set of cross-rank reductions the layout planner and progress
//!   tracker need.
//! - [`worksteal`]: the chunk-level work-stealing execution engine.
//! - [`writer`]: `archive_create`, the parallel archive writer.
//! - [`extractor`]: `archive_extract`, the parallel archive extractor.

#![allow(unused_variables, unused_mut, unused_imports, dead_code)]

pub mod cli;
pub mod collective;
pub mod error;
pub mod extractor;
pub mod flist;
pub mod fsx;
pub mod header;
pub mod index;
pub mod layout;
pub mod memory_pool;
pub mod progress;
pub mod worksteal;
pub mod writer;

pub use error::ArchiverError;
