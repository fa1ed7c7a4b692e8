//! Job orchestrator: fetch, wrap, spool, flush.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::config::{AppConfig, CollectMode, ConfigError, JobDefinition, RemoteConfig};
use crate::fetch::{FetchRequest, Fetcher, HttpFetcher, HttpMethod};
use crate::flush::{FlushEngine, FlushReport, flush_spool};
use crate::interpolate::{Mode, Vars};
use crate::record::RecordWrapper;
use crate::remote::ObjectStore;
use crate::spool::Spool;

use super::items::{extract_items, item_id, item_vars};
use super::traits::{CollectionReport, CollectorError, JobRunner};

/// Runs jobs against their APIs and delivers the records.
///
/// Each run writes every record to the spool first, then flushes only the
/// run's own target so concurrent jobs never upload each other's parts.
#[derive(Clone)]
pub struct Collector {
    spool: Spool,
    remote: RemoteConfig,
    store: Option<Arc<dyn ObjectStore>>,
    environment: String,
    collector_host: Option<String>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("spool", &self.spool.root())
            .field("container", &self.remote.container)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Create a collector; the remote client is built per flush from `remote`.
    pub fn new(spool: Spool, remote: RemoteConfig, environment: impl Into<String>) -> Self {
        Self {
            spool,
            remote,
            store: None,
            environment: environment.into(),
            collector_host: None,
        }
    }

    /// Create a collector from process configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.spool(), config.remote.clone(), &config.environment)
    }

    /// Upload to `store` instead of connecting with the remote config.
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the collector hostname stamped on records.
    pub fn with_collector_host(mut self, host: impl Into<String>) -> Self {
        self.collector_host = Some(host.into());
        self
    }

    /// Spool the collector writes to.
    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    /// Run `job` using `fetcher`, stamping `host` on every record.
    ///
    /// # Errors
    /// Fails on a single-mode endpoint or loop list that cannot be resolved
    /// or fetched, and on spool write failures. Per-item failures in loop
    /// mode are counted instead.
    pub async fn collect_with(
        &self,
        job: &JobDefinition,
        fetcher: &dyn Fetcher,
        host: &str,
    ) -> Result<CollectionReport, CollectorError> {
        let config = &job.config;
        let collect = &config.collect;
        let target = config.target_path(Utc::now().date_naive());

        let mut wrapper = RecordWrapper::new(
            &config.source,
            &config.entity,
            config.schema_version,
            host,
            &self.environment,
        )
        .with_extra(config.meta.clone());
        if let Some(collector_host) = &self.collector_host {
            wrapper = wrapper.with_collector_host(collector_host);
        }

        tracing::info!(job = %job.name, entity = %config.entity, mode = ?collect.mode, "Running job");
        let mut report = CollectionReport::default();

        match collect.mode {
            CollectMode::Single => {
                let endpoint = config.single_endpoint().ok_or_else(|| {
                    ConfigError::ValidationError("mode 'single' requires 'endpoint'".to_string())
                })?;
                let endpoint = job.context.resolve_str(endpoint, None, Mode::Strict)?;
                let request = FetchRequest::new(HttpMethod::parse_or_get(collect.method.as_deref())?, endpoint)
                    .with_body(collect.body.clone());

                let payload = fetcher.fetch(&request).await?;
                let record = wrapper.wrap(payload, Utc::now(), BTreeMap::new());
                self.spool.write_async(&target, &record).await?;
                report.collected += 1;
            }

            CollectMode::Loop => {
                let list_endpoint = collect.list_endpoint.as_deref().ok_or_else(|| {
                    ConfigError::ValidationError("mode 'loop' requires 'list_endpoint'".to_string())
                })?;
                let template = collect.item_endpoint_template.as_deref().ok_or_else(|| {
                    ConfigError::ValidationError(
                        "mode 'loop' requires 'item_endpoint_template'".to_string(),
                    )
                })?;
                let item_method = HttpMethod::parse_or_get(collect.item_method.as_deref())?;

                let list_endpoint = job.context.resolve_str(list_endpoint, None, Mode::Strict)?;
                let list_request = FetchRequest::new(
                    HttpMethod::parse_or_get(collect.list_method.as_deref())?,
                    list_endpoint,
                )
                .with_body(collect.list_body.clone());

                let list = fetcher.fetch(&list_request).await?;
                let items = extract_items(&list, collect.list_json_path.as_deref())?;
                tracing::debug!(job = %job.name, items = items.len(), "Fetched item list");

                for item in &items {
                    let Some(id) = item_id(item, &collect.id_field) else {
                        report.skipped += 1;
                        continue;
                    };
                    let vars = item_vars(item, id);

                    match self.fetch_item(job, fetcher, template, item_method, &vars).await {
                        Ok(payload) => {
                            let tags = BTreeMap::from([(collect.id_field.clone(), id.clone())]);
                            let record = wrapper.wrap(payload, Utc::now(), tags);
                            self.spool.write_async(&target, &record).await?;
                            report.collected += 1;
                        }
                        Err(e) => {
                            tracing::warn!(job = %job.name, item = %id, error = %e, "Failed to fetch item");
                            report.item_failures += 1;
                        }
                    }
                }
            }
        }

        report.flush = self.flush(&target).await;
        tracing::info!(
            job = %job.name,
            entity = %config.entity,
            collected = report.collected,
            flushed = report.flush.flushed,
            failed = report.flush.failed,
            item_failures = report.item_failures,
            "Finished job"
        );
        Ok(report)
    }

    async fn fetch_item(
        &self,
        job: &JobDefinition,
        fetcher: &dyn Fetcher,
        template: &str,
        method: HttpMethod,
        vars: &Vars,
    ) -> Result<serde_json::Value, CollectorError> {
        let endpoint = job.context.resolve_str(template, Some(vars), Mode::Strict)?;
        let body = match &job.config.collect.item_body {
            Some(body) => Some(resolve_json(job, body, vars)?),
            None => None,
        };
        let request = FetchRequest::new(method, endpoint).with_body(body);
        Ok(fetcher.fetch(&request).await?)
    }

    async fn flush(&self, target: &str) -> FlushReport {
        match &self.store {
            Some(store) => {
                FlushEngine::new(self.spool.clone(), Arc::clone(store))
                    .flush(Some(target))
                    .await
            }
            None => flush_spool(&self.spool, &self.remote, Some(target)).await,
        }
    }
}

/// Strictly resolve string leaves of an item request body.
fn resolve_json(
    job: &JobDefinition,
    body: &serde_json::Value,
    vars: &Vars,
) -> Result<serde_json::Value, CollectorError> {
    Ok(match body {
        serde_json::Value::String(s) => {
            serde_json::Value::String(job.context.resolve_str(s, Some(vars), Mode::Strict)?)
        }
        serde_json::Value::Array(values) => serde_json::Value::Array(
            values
                .iter()
                .map(|v| resolve_json(job, v, vars))
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_json(job, v, vars)?)))
                .collect::<Result<_, CollectorError>>()?,
        ),
        other => other.clone(),
    })
}

#[async_trait::async_trait]
impl JobRunner for Collector {
    async fn run(&self, job: JobDefinition) -> Result<CollectionReport, CollectorError> {
        let fetcher = HttpFetcher::connect(&job.config.http, &job.config.auth).await?;
        self.collect_with(&job, &fetcher, &job.config.host()).await
    }
}
