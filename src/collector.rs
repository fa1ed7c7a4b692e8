//! Collector Layer
//!
//! Runs one job definition end to end: resolve endpoints, fetch, wrap each
//! payload with lineage metadata, write it to the spool, then flush the
//! job's own target.
//!
//! # Architecture
//!
//! - [`JobRunner`]: dispatch seam used by the scheduler
//! - [`Collector`]: the production runner, built on [`crate::fetch::HttpFetcher`]
//! - [`CollectionReport`]: collected / flushed / failed counts of one run
//!
//! # Modes
//!
//! - `single`: one fetch of `endpoint`, one record
//! - `loop`: fetch `list_endpoint`, extract the list at `list_json_path`,
//!   then fetch `item_endpoint_template` once per item with a truthy id.
//!   A failing item is logged and counted, the rest of the batch continues.
//!
//! # Example
//!
//! ```rust,no_run
//! use homespool::collector::{Collector, JobRunner};
//! use homespool::config::{AppConfig, JobDefinition};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let app = AppConfig::resolve(None)?;
//! let job = JobDefinition::load("configs/pve_hl2.yaml")?;
//! let report = Collector::from_config(&app).run(job).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

mod items;
mod runner;
mod traits;

pub use items::{extract_items, item_id, item_vars};
pub use runner::Collector;
pub use traits::{CollectionReport, CollectorError, JobRunner};
