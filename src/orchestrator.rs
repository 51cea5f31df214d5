//! Monitoring cycle scheduler.
//!
//! The orchestrator runs one cycle per interval tick:
//!
//! 1. refresh device readings
//! 2. run threat detection over all regions
//! 3. recompute resource metrics for the watch-list
//! 4. sweep expired alerts
//!
//! Cycles are single-flight. A tick (or manual trigger) that arrives while a
//! cycle is running is skipped. Steps 1-3 share one deadline of
//! `cycle_timeout` from cycle start, so a hung provider can never leave the
//! orchestrator stuck in `Running`. A step that overruns or panics is recorded
//! as failed and the next step still runs. The sweep has no deadline and
//! always runs.
//!
//! Alongside the ticker, a worker task drains the detection queue so that
//! critical readings get a scoped detection pass without waiting for the
//! next tick.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout_at};
use tracing::{debug, error, info, warn};

use crate::error::OracleError;
use crate::oracle::Oracle;

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Running,
}

/// The steps of a cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStep {
    RefreshDevices,
    DetectThreats,
    MonitorResources,
    SweepAlerts,
}

impl CycleStep {
    pub fn label(&self) -> &'static str {
        match self {
            CycleStep::RefreshDevices => "refresh_devices",
            CycleStep::DetectThreats => "detect_threats",
            CycleStep::MonitorResources => "monitor_resources",
            CycleStep::SweepAlerts => "sweep_alerts",
        }
    }
}

/// Outcome of one cycle step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step: CycleStep,
    pub ok: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
    pub devices_refreshed: usize,
    pub device_refresh_failures: usize,
    pub alerts_raised: usize,
    pub metrics_computed: usize,
    pub alerts_swept: usize,
}

impl CycleReport {
    /// True when every step finished in time without panicking.
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.ok)
    }
}

/// Result of asking for a cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Another cycle was already running.
    Skipped,
    Completed(CycleReport),
}

/// Scheduler state as reported by `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: CycleState,
    pub cycle_interval_secs: u64,
    pub last_successful_cycle: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
    pub device_count: usize,
    pub active_alert_count: usize,
    pub pending_detections: bool,
}

/// Clears the running flag when dropped, even if the cycle future is cancelled.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives monitoring cycles and the critical-signal worker.
pub struct Orchestrator {
    oracle: Oracle,
    running: AtomicBool,
    last_report: RwLock<Option<CycleReport>>,
    last_success: RwLock<Option<DateTime<Utc>>>,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(oracle: Oracle) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            oracle,
            running: AtomicBool::new(false),
            last_report: RwLock::new(None),
            last_success: RwLock::new(None),
            shutdown,
        })
    }

    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    pub fn state(&self) -> CycleState {
        if self.running.load(Ordering::Acquire) {
            CycleState::Running
        } else {
            CycleState::Idle
        }
    }

    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    pub async fn last_successful_cycle(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read().await
    }

    /// Run one cycle now, unless one is already running.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleOutcome {
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            info!("Cycle already running, skipping");
            return CycleOutcome::Skipped;
        };

        let cycle_timeout = self.oracle.config().cycle_timeout;
        let started = Instant::now();
        let deadline = started + cycle_timeout;
        info!(started_at = %now, "Monitoring cycle started");

        let mut steps = Vec::with_capacity(4);

        let (report, refresh) = run_step(
            CycleStep::RefreshDevices,
            Some(deadline),
            cycle_timeout,
            self.oracle.refresh_devices(now),
        )
        .await;
        steps.push(report);

        let (report, raised) = run_step(
            CycleStep::DetectThreats,
            Some(deadline),
            cycle_timeout,
            async {
                // Signalled regions are covered by this unfiltered pass.
                self.oracle.queue().drain().await;
                self.oracle.detect(None, now).await.len()
            },
        )
        .await;
        steps.push(report);

        let (report, metrics) = run_step(
            CycleStep::MonitorResources,
            Some(deadline),
            cycle_timeout,
            self.oracle.monitor_resources(now),
        )
        .await;
        steps.push(report);

        let (report, swept) = run_step(
            CycleStep::SweepAlerts,
            None,
            cycle_timeout,
            self.oracle.sweep_expired_alerts(now),
        )
        .await;
        steps.push(report);

        let elapsed = started.elapsed();
        let refresh = refresh.unwrap_or_default();
        let took = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        let report = CycleReport {
            started_at: now,
            finished_at: now + took,
            steps,
            devices_refreshed: refresh.updated,
            device_refresh_failures: refresh.failed,
            alerts_raised: raised.unwrap_or(0),
            metrics_computed: metrics.unwrap_or(0),
            alerts_swept: swept.unwrap_or(0),
        };

        if report.succeeded() {
            *self.last_success.write().await = Some(now);
            info!(
                elapsed_ms = elapsed.as_millis() as u64,
                alerts_raised = report.alerts_raised,
                devices_refreshed = report.devices_refreshed,
                alerts_swept = report.alerts_swept,
                "Monitoring cycle completed"
            );
        } else {
            let failed: Vec<&str> = report
                .steps
                .iter()
                .filter(|s| !s.ok)
                .map(|s| s.step.label())
                .collect();
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                failed_steps = ?failed,
                "Monitoring cycle completed with failures"
            );
        }

        *self.last_report.write().await = Some(report.clone());
        CycleOutcome::Completed(report)
    }

    /// Scheduler state plus a snapshot of the oracle.
    pub async fn status(&self, now: DateTime<Utc>) -> StatusReport {
        StatusReport {
            state: self.state(),
            cycle_interval_secs: self.oracle.config().cycle_interval.as_secs(),
            last_successful_cycle: self.last_successful_cycle().await,
            last_report: self.last_report().await,
            device_count: self.oracle.device_count().await,
            active_alert_count: self.oracle.list_active_alerts(None, now).await.len(),
            pending_detections: !self.oracle.queue().is_empty().await,
        }
    }

    /// Spawn the interval ticker and the detection worker.
    ///
    /// Both tasks exit after [`Orchestrator::stop`].
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let period = self.oracle.config().cycle_interval;
        info!(interval_secs = period.as_secs(), "Orchestrator started");

        vec![self.spawn_ticker(period), self.spawn_detection_worker()]
    }

    /// Signal the ticker and worker to exit. An in-flight cycle finishes.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        info!("Orchestrator stopping");
    }

    fn spawn_ticker(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let this = self.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Spawned so that a tick during a long cycle reaches the
                        // single-flight guard and is skipped there.
                        let cycle = this.clone();
                        tokio::spawn(async move {
                            cycle.run_cycle(Utc::now()).await;
                        });
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Cycle ticker stopped");
        })
    }

    fn spawn_detection_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let oracle = self.oracle.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    batch = oracle.queue().next_batch() => {
                        debug!(
                            regions = ?batch.regions,
                            all_regions = batch.all_regions,
                            "Processing critical-signal detections"
                        );
                        let deadline = Instant::now() + oracle.config().cycle_timeout;
                        let work = AssertUnwindSafe(oracle.process_batch(batch, Utc::now())).catch_unwind();
                        match timeout_at(deadline, work).await {
                            Ok(Ok(raised)) => debug!(raised, "Signalled detection finished"),
                            Ok(Err(payload)) => error!(
                                panic = %panic_message(payload.as_ref()),
                                "Signalled detection panicked"
                            ),
                            Err(_) => error!("Signalled detection timed out"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Detection worker stopped");
        })
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Text carried by a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Run one step, stopping it at the cycle deadline (if any) or on panic.
async fn run_step<T, F>(
    step: CycleStep,
    deadline: Option<Instant>,
    cycle_timeout: Duration,
    work: F,
) -> (StepReport, Option<T>)
where
    F: Future<Output = T>,
{
    let started = Instant::now();
    let caught = AssertUnwindSafe(work).catch_unwind();
    let outcome = match deadline {
        Some(deadline) => timeout_at(deadline, caught).await.map_err(|_| OracleError::Timeout {
            operation: step.label().to_string(),
            after: cycle_timeout,
        }),
        None => Ok(caught.await),
    }
    .and_then(|result| {
        result.map_err(|payload| OracleError::Panicked {
            operation: step.label().to_string(),
            message: panic_message(payload.as_ref()),
        })
    });

    match outcome {
        Ok(value) => (
            StepReport {
                step,
                ok: true,
                error: None,
                duration_ms: elapsed_ms(started),
            },
            Some(value),
        ),
        Err(err) => {
            error!(step = step.label(), error = %err, "Cycle step failed");
            (
                StepReport {
                    step,
                    ok: false,
                    error: Some(err.to_string()),
                    duration_ms: elapsed_ms(started),
                },
                None,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleConfig;
    use crate::model::{
        AlertLocation, AlertType, Location, Reading, RegisterDeviceRequest, SensorDevice,
        SensorType,
    };
    use crate::oracle::Sources;
    use crate::providers::{ReadingSource, SimulatedImagery, SimulatedTelemetry};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Sleeps before answering and counts calls.
    struct SlowReadings {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReadingSource for SlowReadings {
        async fn next_reading(&self, _device: &SensorDevice) -> anyhow::Result<Option<Reading>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Some(Reading::value(1.0)))
        }
    }

    /// Panics on every call.
    struct PanickingReadings;

    #[async_trait]
    impl ReadingSource for PanickingReadings {
        async fn next_reading(&self, _device: &SensorDevice) -> anyhow::Result<Option<Reading>> {
            panic!("gateway driver bug");
        }
    }

    /// Reports a magnitude 7.0 for every device.
    struct QuakeReadings;

    #[async_trait]
    impl ReadingSource for QuakeReadings {
        async fn next_reading(&self, _device: &SensorDevice) -> anyhow::Result<Option<Reading>> {
            Ok(Some(Reading::value(7.0)))
        }
    }

    fn oracle_with(readings: Arc<dyn ReadingSource>, cycle_timeout: Duration) -> Oracle {
        let config = OracleConfig {
            cycle_timeout,
            ..OracleConfig::default()
        };
        Oracle::with_sources(
            config,
            Sources {
                observations: Arc::new(SimulatedImagery::seeded(9)),
                readings: Some(readings),
                telemetry: Arc::new(SimulatedTelemetry::seeded(9)),
            },
        )
    }

    fn device(id: &str, sensor_type: SensorType) -> RegisterDeviceRequest {
        RegisterDeviceRequest {
            device_id: id.to_string(),
            location: Location {
                latitude: 2.0,
                longitude: 45.3,
                region: "Horn of Africa".to_string(),
            },
            sensor_type,
            unit: "unit".to_string(),
        }
    }

    async fn orchestrator(delay: Duration, cycle_timeout: Duration) -> (Arc<Orchestrator>, Arc<SlowReadings>) {
        let readings = Arc::new(SlowReadings {
            delay,
            calls: AtomicUsize::new(0),
        });
        let oracle = oracle_with(readings.clone(), cycle_timeout);
        oracle
            .register_device(device("wx-1", SensorType::Weather), Utc::now())
            .await
            .unwrap();
        (Orchestrator::new(oracle), readings)
    }

    #[tokio::test]
    async fn test_overlapping_cycles_run_once() {
        let (orch, readings) = orchestrator(Duration::from_millis(200), Duration::from_secs(5)).await;
        let now = Utc::now();

        let (first, second) = tokio::join!(orch.run_cycle(now), orch.run_cycle(now));

        let completed = [&first, &second]
            .iter()
            .filter(|o| matches!(o, CycleOutcome::Completed(_)))
            .count();
        assert_eq!(completed, 1);
        assert!(matches!(second, CycleOutcome::Skipped));
        assert_eq!(readings.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.state(), CycleState::Idle);
    }

    #[tokio::test]
    async fn test_cycle_runs_every_step() {
        let (orch, _) = orchestrator(Duration::ZERO, Duration::from_secs(5)).await;
        let now = Utc::now();

        let CycleOutcome::Completed(report) = orch.run_cycle(now).await else {
            panic!("cycle should run");
        };

        let steps: Vec<CycleStep> = report.steps.iter().map(|s| s.step).collect();
        assert_eq!(
            steps,
            vec![
                CycleStep::RefreshDevices,
                CycleStep::DetectThreats,
                CycleStep::MonitorResources,
                CycleStep::SweepAlerts
            ]
        );
        assert!(report.succeeded());
        assert_eq!(report.devices_refreshed, 1);
        assert_eq!(report.metrics_computed, 20);
        assert_eq!(orch.last_successful_cycle().await, Some(now));
    }

    #[tokio::test]
    async fn test_hung_step_is_cut_off_and_later_steps_run() {
        let (orch, _) = orchestrator(Duration::from_secs(60), Duration::from_millis(100)).await;
        let now = Utc::now();

        let CycleOutcome::Completed(report) = orch.run_cycle(now).await else {
            panic!("cycle should run");
        };

        assert!(!report.succeeded());
        assert!(!report.steps[0].ok);
        assert!(report.steps[0].error.as_deref().unwrap().contains("timed out"));
        assert!(report.steps[3].ok);
        assert_eq!(orch.state(), CycleState::Idle);
        assert_eq!(orch.last_successful_cycle().await, None);
        assert!(orch.last_report().await.is_some());
    }

    #[tokio::test]
    async fn test_panicking_step_is_contained_and_sweep_runs() {
        let oracle = oracle_with(Arc::new(PanickingReadings), Duration::from_secs(5));
        let now = Utc::now();
        oracle
            .register_device(device("wx-1", SensorType::Weather), now)
            .await
            .unwrap();
        oracle
            .trigger_emergency_alert(
                AlertType::ResourceScarcity,
                AlertLocation {
                    latitude: 2.0,
                    longitude: 45.3,
                    region: "Horn of Africa".to_string(),
                    country: "Somalia".to_string(),
                },
                "Convoy stopped",
                now - chrono::Duration::hours(13),
            )
            .await;
        let orch = Orchestrator::new(oracle);

        let CycleOutcome::Completed(report) = orch.run_cycle(now).await else {
            panic!("cycle should run");
        };

        assert!(!report.steps[0].ok);
        let error = report.steps[0].error.as_deref().unwrap();
        assert!(error.contains("refresh_devices panicked"));
        assert!(error.contains("gateway driver bug"));
        assert!(report.steps[1..].iter().all(|s| s.ok));
        assert_eq!(report.metrics_computed, 20);
        assert_eq!(report.alerts_swept, 1);
        assert_eq!(orch.state(), CycleState::Idle);
        assert!(orch.last_report().await.is_some());
        assert_eq!(orch.last_successful_cycle().await, None);
    }

    #[tokio::test]
    async fn test_cycle_detection_consumes_signals_from_refresh() {
        let oracle = oracle_with(Arc::new(QuakeReadings), Duration::from_secs(5));
        let now = Utc::now();
        oracle
            .register_device(device("seis-1", SensorType::Seismic), now)
            .await
            .unwrap();
        let orch = Orchestrator::new(oracle.clone());

        let CycleOutcome::Completed(report) = orch.run_cycle(now).await else {
            panic!("cycle should run");
        };

        assert_eq!(report.alerts_raised, 1);
        assert!(oracle.queue().is_empty().await);
        assert_eq!(oracle.process_pending_detections(now).await, 0);
        assert_eq!(oracle.list_active_alerts(None, now).await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (orch, readings) = orchestrator(Duration::ZERO, Duration::from_secs(5)).await;

        let handles = orch.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        orch.stop();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }

        // The first interval tick fires immediately.
        assert!(readings.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (orch, _) = orchestrator(Duration::ZERO, Duration::from_secs(5)).await;
        let now = Utc::now();

        let status = orch.status(now).await;
        assert_eq!(status.state, CycleState::Idle);
        assert_eq!(status.device_count, 1);
        assert!(status.last_report.is_none());
        assert_eq!(status.cycle_interval_secs, 600);
    }
}
