use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use itertools::iproduct;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use super::service::ForecastService;
use crate::config::{CollectorsConfig, SchedulerConfig};
use crate::domain::{DiseaseType, EpiWeek, ModelKey};
use crate::ingest::{http_client, InfoDengueClient, OpenMeteoClient};
use crate::repo::RecordStore;

/// InfoDengue revises recent estimates, so recent weeks are collected again.
const SURVEILLANCE_BACKFILL_WEEKS: i64 = 8;
const FETCH_CONCURRENCY: usize = 4;

/// Task status tracking
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

/// Jobs the scheduler runs, addressable by their lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TaskName {
    Climate,
    Surveillance,
    Forecast,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Configured to start with the service
    pub enabled: bool,
    pub running: bool,
    pub climate: TaskStatus,
    pub surveillance: TaskStatus,
    pub forecast: TaskStatus,
}

/// Periodic data collection and forecast refresh.
pub struct TaskScheduler {
    config: SchedulerConfig,
    collectors: CollectorsConfig,
    store: Arc<dyn RecordStore>,
    service: Arc<ForecastService>,
    open_meteo: OpenMeteoClient,
    infodengue: InfoDengueClient,
    climate_status: Arc<RwLock<TaskStatus>>,
    surveillance_status: Arc<RwLock<TaskStatus>>,
    forecast_status: Arc<RwLock<TaskStatus>>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        collectors: CollectorsConfig,
        store: Arc<dyn RecordStore>,
        service: Arc<ForecastService>,
    ) -> Result<Self> {
        let client = http_client(collectors.http_timeout_seconds, collectors.max_retries)?;
        Ok(Self {
            open_meteo: OpenMeteoClient::new(client.clone(), collectors.open_meteo_url.clone()),
            infodengue: InfoDengueClient::new(client, collectors.infodengue_url.clone()),
            config,
            collectors,
            store,
            service,
            climate_status: Arc::new(RwLock::new(TaskStatus::default())),
            surveillance_status: Arc::new(RwLock::new(TaskStatus::default())),
            forecast_status: Arc::new(RwLock::new(TaskStatus::default())),
            handles: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Start all periodic tasks. Returns false if they are already running.
    pub fn start(self: Arc<Self>) -> bool {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        if !handles.is_empty() {
            return false;
        }

        for task in TaskName::iter() {
            let scheduler = Arc::clone(&self);
            handles.push(tokio::spawn(async move { scheduler.run_every(task).await }));
        }

        info!(
            municipalities = self.collectors.municipalities.len(),
            "All periodic tasks started"
        );
        true
    }

    /// Abort the periodic tasks. Returns false if none were running.
    pub fn stop(&self) -> bool {
        let mut handles = self.handles.lock();
        if handles.is_empty() {
            return false;
        }
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("Periodic tasks stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.handles.lock().iter().any(|h| !h.is_finished())
    }

    async fn run_every(&self, task: TaskName) {
        let mut interval = interval(hours(self.interval_hours(task)));
        loop {
            interval.tick().await;
            info!(%task, "Running periodic task");
            self.run_once(task).await;
        }
    }

    /// Run `task` once outside its schedule and return its updated status.
    pub async fn run_now(&self, task: TaskName) -> TaskStatus {
        info!(%task, "Running task on demand");
        self.run_once(task).await;
        self.status_of(task).read().await.clone()
    }

    async fn run_once(&self, task: TaskName) {
        let status = self.status_of(task);
        match task {
            TaskName::Climate => track(status, task, self.collect_climate()).await,
            TaskName::Surveillance => track(status, task, self.collect_surveillance()).await,
            TaskName::Forecast => track(status, task, self.refresh_forecasts()).await,
        }
    }

    fn status_of(&self, task: TaskName) -> &RwLock<TaskStatus> {
        match task {
            TaskName::Climate => &*self.climate_status,
            TaskName::Surveillance => &*self.surveillance_status,
            TaskName::Forecast => &*self.forecast_status,
        }
    }

    fn interval_hours(&self, task: TaskName) -> u64 {
        match task {
            TaskName::Climate => self.config.climate_interval_hours,
            TaskName::Surveillance => self.config.surveillance_interval_hours,
            TaskName::Forecast => self.config.forecast_interval_hours,
        }
    }

    /// Fetch the recent daily climate window for every municipality.
    pub async fn collect_climate(&self) -> Result<usize> {
        let end = Utc::now().date_naive() - ChronoDuration::days(1);
        let start = end - ChronoDuration::days(self.config.climate_backfill_days);
        let results: Vec<_> = stream::iter(&self.collectors.municipalities)
            .map(|municipality| async move {
                (municipality, self.open_meteo.fetch_daily(municipality, start, end).await)
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .boxed()
            .collect()
            .await;

        let mut written = 0;
        let mut failures = 0;
        for (municipality, result) in &results {
            match result {
                Ok(collected) => written += self.store.upsert_climate(&collected.records).await?,
                Err(e) => {
                    failures += 1;
                    warn!(municipality = %municipality.code, error = %e, "Climate collection failed");
                }
            }
        }
        finish(written, failures, results.len())
    }

    /// Fetch recent surveillance weeks for every municipality and disease.
    pub async fn collect_surveillance(&self) -> Result<usize> {
        let today = Utc::now().date_naive();
        let to = EpiWeek::containing(today)?;
        let from = EpiWeek::containing(today - ChronoDuration::weeks(SURVEILLANCE_BACKFILL_WEEKS))?;
        let results: Vec<_> = stream::iter(iproduct!(
            &self.collectors.municipalities,
            DiseaseType::iter()
        ))
        .map(|(municipality, disease)| async move {
            let result = self.infodengue.fetch_weeks(municipality, disease, from, to).await;
            (municipality, disease, result)
        })
        .buffer_unordered(FETCH_CONCURRENCY)
        .boxed()
        .collect()
        .await;

        let mut written = 0;
        let mut failures = 0;
        for (municipality, disease, result) in &results {
            match result {
                Ok(collected) => {
                    written += self.store.upsert_surveillance(&collected.records).await?
                }
                Err(e) => {
                    failures += 1;
                    warn!(municipality = %municipality.code, %disease, error = %e, "Surveillance collection failed");
                }
            }
        }
        finish(written, failures, results.len())
    }

    /// Store fresh forecasts for every municipality and disease, training
    /// first where no model exists yet. Runs one key at a time.
    pub async fn refresh_forecasts(&self) -> Result<usize> {
        let mut written = 0;
        let mut failures = 0;
        let mut attempts = 0;
        for (municipality, disease) in iproduct!(&self.collectors.municipalities, DiseaseType::iter()) {
            attempts += 1;
            let key = ModelKey::new(municipality.code.clone(), disease);
            match self
                .service
                .refresh_forecasts(&key, self.config.weeks_ahead)
                .await
            {
                Ok(forecasts) => written += forecasts.len(),
                Err(e) => {
                    failures += 1;
                    warn!(model = %key, error = %e, "Forecast refresh failed");
                }
            }
        }
        finish(written, failures, attempts)
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            enabled: self.config.enabled,
            running: self.is_running(),
            climate: self.climate_status.read().await.clone(),
            surveillance: self.surveillance_status.read().await.clone(),
            forecast: self.forecast_status.read().await.clone(),
        }
    }
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.max(1) * 3600)
}

/// A run fails only when every unit of work failed.
fn finish(written: usize, failures: usize, attempts: usize) -> Result<usize> {
    if attempts > 0 && failures == attempts {
        anyhow::bail!("all {attempts} units failed");
    }
    Ok(written)
}

async fn track(status: &RwLock<TaskStatus>, task: TaskName, job: impl Future<Output = Result<usize>>) {
    let now = Utc::now();
    {
        let mut status = status.write().await;
        status.last_run = Some(now);
        status.run_count += 1;
    }

    match job.await {
        Ok(written) => {
            let mut status = status.write().await;
            status.last_success = Some(now);
            status.success_count += 1;
            status.last_error = None;
            info!(%task, written, "Task completed");
        }
        Err(e) => {
            let mut status = status.write().await;
            status.error_count += 1;
            status.last_error = Some(format!("{e:#}"));
            error!(%task, error = %e, "Task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_track_counts_runs() {
        let status = RwLock::new(TaskStatus::default());
        track(&status, TaskName::Climate, async { Ok(3) }).await;
        track(&status, TaskName::Climate, async { anyhow::bail!("offline") }).await;

        let status = status.read().await.clone();
        assert_eq!(status.run_count, 2);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("offline"));
        assert!(status.last_success.is_some());
    }

    #[test]
    fn test_finish_fails_only_when_everything_failed() {
        assert_eq!(finish(10, 1, 3).unwrap(), 10);
        assert_eq!(finish(0, 0, 0).unwrap(), 0);
        assert!(finish(0, 2, 2).is_err());
    }

    #[test]
    fn test_task_names_parse() {
        assert_eq!("climate".parse::<TaskName>().unwrap(), TaskName::Climate);
        assert_eq!("Forecast".parse::<TaskName>().unwrap(), TaskName::Forecast);
        assert!("weather".parse::<TaskName>().is_err());
        assert_eq!(TaskName::Surveillance.to_string(), "surveillance");
        assert_eq!(TaskName::iter().count(), 3);
    }
}
