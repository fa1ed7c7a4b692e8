//! Homespool - Home Infrastructure API Poller
//!
//! Polls small home-infrastructure APIs (hypervisors, network controllers)
//! on independent schedules, wraps each fetched document with lineage
//! metadata and delivers it durably to a remote append-only object store.
//!
//! # Architecture
//!
//! - **Interpolation**: layered `{placeholder}` resolution for job configs
//! - **Spool**: local write-ahead log, one part file per record
//! - **Flush**: moves spooled parts to remote append-only objects
//! - **Collector**: runs one job (fetch, wrap, spool, flush)
//! - **Scheduler**: dispatches due jobs to a bounded worker pool
//!
//! # Data flow
//!
//! ```text
//! job.yaml -> Collector -> Spool (<root>/<path>.parts/*.jsonl.part) -> FlushEngine -> ObjectStore
//!                ^
//!            Scheduler (tick, is_due, worker pool)
//! ```

pub mod collector;
pub mod config;
pub mod fetch;
pub mod flush;
pub mod interpolate;
pub mod record;
pub mod remote;
pub mod scheduler;
pub mod spool;

pub use collector::{CollectionReport, Collector, CollectorError, JobRunner};
pub use config::{AppConfig, ConfigError, JobConfig, JobDefinition};
pub use fetch::{FetchError, FetchRequest, Fetcher, HttpFetcher};
pub use flush::{FlushEngine, FlushReport};
pub use interpolate::{Context, Document, Mode, ResolutionError};
pub use record::{RecordWrapper, SpoolRecord};
pub use remote::{ObjectState, ObjectStore, RemoteError};
pub use scheduler::{ScheduleState, Scheduler, is_due};
pub use spool::{Spool, SpoolError};
