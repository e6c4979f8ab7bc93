//! Engine scenarios driven by scripted sources and a recording sink

use super::*;
use crate::error::SampleError;
use crate::source::{async_trait, Reading};
use chrono::TimeZone;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Source whose readings are scripted per target
struct ScriptedSource {
    kind: TargetKind,
    targets: Mutex<Vec<String>>,
    readings: Mutex<HashMap<String, VecDeque<Option<Reading>>>>,
    fail_listing: AtomicBool,
}

impl ScriptedSource {
    fn new(kind: TargetKind) -> Self {
        Self {
            kind,
            targets: Mutex::new(Vec::new()),
            readings: Mutex::new(HashMap::new()),
            fail_listing: AtomicBool::new(false),
        }
    }

    fn set_targets(&self, targets: &[&str]) {
        *self.targets.lock().unwrap() = targets.iter().map(|t| t.to_string()).collect();
    }

    /// Queue readings for a target; `None` makes that sample fail
    fn script(&self, target: &str, readings: impl IntoIterator<Item = Option<(f64, f64)>>) {
        self.readings.lock().unwrap().insert(
            target.to_string(),
            readings
                .into_iter()
                .map(|r| r.map(|(cpu, mem)| Reading::new(cpu, mem)))
                .collect(),
        );
    }
}

#[async_trait]
impl SampleSource for ScriptedSource {
    fn kind(&self) -> TargetKind {
        self.kind
    }

    async fn list_targets(&self) -> anyhow::Result<Vec<String>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            anyhow::bail!("runtime unreachable");
        }
        Ok(self.targets.lock().unwrap().clone())
    }

    async fn sample(&self, target: &str) -> Result<Reading, SampleError> {
        let next = self
            .readings
            .lock()
            .unwrap()
            .get_mut(target)
            .and_then(|queue| queue.pop_front());

        match next {
            Some(Some(reading)) => Ok(reading),
            Some(None) => Err(SampleError::unavailable(target, "scripted failure")),
            None => Err(SampleError::unavailable(target, "no reading scripted")),
        }
    }
}

/// Sink that records every alert it is asked to send
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(Target, AlertDecision, DateTime<Utc>)>>,
    fail: AtomicBool,
}

impl RecordingSink {
    fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    fn sent(&self) -> Vec<(Target, AlertDecision, DateTime<Utc>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, target: &Target, decision: &AlertDecision, at: DateTime<Utc>) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), *decision, at));
        !self.fail.load(Ordering::SeqCst)
    }
}

fn at_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000 + millis).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    at_millis(secs * 1000)
}

/// 1 s interval, 0.01 min (0.6 s) window
fn short_window_config(cpu_threshold: f64) -> EngineConfig {
    EngineConfig::from_units(1.0, 0.01, cpu_threshold, 100.0).unwrap()
}

fn engine_with(
    config: EngineConfig,
    source: Arc<ScriptedSource>,
    sink: Arc<RecordingSink>,
) -> MonitorEngine {
    MonitorEngine::new(config, sink).with_source(source)
}

#[test]
fn test_engine_config_validation() {
    assert!(EngineConfig::from_units(10.0, 1.0, 0.001, 0.001).is_ok());
    assert!(EngineConfig::from_units(10.0, 1.0, 0.0, 0.0).is_ok());

    let err = EngineConfig::from_units(0.0, 1.0, 50.0, 50.0).unwrap_err();
    assert!(err.to_string().contains("interval_secs"));

    let err = EngineConfig::from_units(10.0, -1.0, 50.0, 50.0).unwrap_err();
    assert!(err.to_string().contains("analysis_period_min"));

    let err = EngineConfig::from_units(10.0, 1.0, -5.0, 50.0).unwrap_err();
    assert!(err.to_string().contains("cpu_alarm_threshold"));

    let err = EngineConfig::from_units(10.0, 1.0, 5.0, f64::NAN).unwrap_err();
    assert!(err.to_string().contains("memory_alarm_threshold"));

    assert!(EngineConfig::new(Duration::ZERO, Duration::from_secs(60), 1.0, 1.0).is_err());
}

#[test]
fn test_short_window_is_point_six_seconds() {
    let config = short_window_config(50.0);
    assert_eq!(config.sample_interval, Duration::from_secs(1));
    assert!((config.analysis_window.as_secs_f64() - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_mean_at_threshold_does_not_alert() {
    let source = Arc::new(ScriptedSource::new(TargetKind::Container));
    source.set_targets(&["web"]);
    source.script("web", [Some((40.0, 10.0)), Some((60.0, 10.0))]);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(short_window_config(50.0), source, sink.clone());

    let first = engine.tick(at(0)).await;
    assert_eq!(first.windows_closed, 0);

    let second = engine.tick(at(1)).await;
    assert_eq!(second.windows_closed, 1);
    assert_eq!(second.alerts_sent, 0);
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn test_mean_above_threshold_alerts_cpu_only() {
    let source = Arc::new(ScriptedSource::new(TargetKind::Container));
    source.set_targets(&["web"]);
    source.script("web", [Some((40.0, 10.0)), Some((80.0, 10.0))]);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(short_window_config(50.0), source, sink.clone());

    engine.tick(at(0)).await;
    let report = engine.tick(at(1)).await;

    assert_eq!(report.alerts_sent, 1);
    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, Target::container("web"));
    assert_eq!(
        sent[0].1,
        AlertDecision::CpuOnly {
            value: 60.0,
            threshold: 50.0
        }
    );
    assert_eq!(sent[0].2, at(1));
}

#[tokio::test]
async fn test_failed_sample_is_skipped_without_aborting_tick() {
    let source = Arc::new(ScriptedSource::new(TargetKind::Container));
    source.set_targets(&["db", "web"]);
    // Tick 3 of 5 fails for db
    source.script(
        "db",
        [
            Some((10.0, 20.0)),
            Some((20.0, 30.0)),
            None,
            Some((30.0, 40.0)),
            Some((40.0, 50.0)),
        ],
    );
    source.script("web", (0..5).map(|_| Some((1.0, 1.0))));
    let sink = Arc::new(RecordingSink::default());
    // 4.5 s window: closes on the fifth tick
    let config =
        EngineConfig::new(Duration::from_secs(1), Duration::from_millis(4500), 0.0, 0.0).unwrap();
    let engine = engine_with(config, source, sink.clone());

    for secs in 0..4 {
        let report = engine.tick(at(secs)).await;
        let web = engine.snapshot()[&Target::container("web")];
        assert_eq!(web.sample_count, secs as usize + 1);
        if secs == 2 {
            assert_eq!(report.sample_failures(), 1);
            assert_eq!(report.targets_sampled(), 1);
        }
    }

    let db = engine.snapshot()[&Target::container("db")];
    assert_eq!(db.sample_count, 3);

    let report = engine.tick(at_millis(4600)).await;
    assert_eq!(report.windows_closed, 2);

    let sent = sink.sent();
    let (_, db_decision, _) = sent
        .iter()
        .find(|(t, _, _)| t.name == "db")
        .expect("db alert");
    assert_eq!(
        *db_decision,
        AlertDecision::Both {
            cpu_value: 25.0,
            cpu_threshold: 0.0,
            mem_value: 35.0,
            mem_threshold: 0.0,
        }
    );
}

#[tokio::test]
async fn test_target_churn_keeps_aggregate() {
    let source = Arc::new(ScriptedSource::new(TargetKind::Container));
    source.set_targets(&["web", "worker"]);
    source.script("web", (0..3).map(|_| Some((10.0, 10.0))));
    source.script("worker", [Some((50.0, 60.0)), Some((70.0, 80.0))]);
    let sink = Arc::new(RecordingSink::default());
    let config =
        EngineConfig::new(Duration::from_secs(1), Duration::from_secs(60), 50.0, 50.0).unwrap();
    let engine = engine_with(config, source.clone(), sink);

    engine.tick(at(0)).await;
    let before = engine.snapshot()[&Target::container("worker")];

    // worker disappears for a tick
    source.set_targets(&["web"]);
    engine.tick(at(1)).await;
    let during = engine.snapshot();
    assert_eq!(during[&Target::container("worker")], before);
    assert_eq!(during.len(), 2);

    // and comes back into the same window
    source.set_targets(&["web", "worker"]);
    engine.tick(at(2)).await;
    let after = engine.snapshot()[&Target::container("worker")];
    assert_eq!(after.sample_count, 2);
    assert_eq!(after.window_started_at, at(0));
    assert!((after.cpu_percent - 60.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_sink_failure_still_closes_window() {
    let source = Arc::new(ScriptedSource::new(TargetKind::Host));
    source.set_targets(&["Server"]);
    source.script("Server", [Some((90.0, 90.0)), Some((90.0, 90.0)), Some((1.0, 1.0))]);
    let sink = Arc::new(RecordingSink::failing());
    let engine = engine_with(short_window_config(50.0), source, sink.clone());

    engine.tick(at(0)).await;
    let report = engine.tick(at(1)).await;
    assert_eq!(report.alerts_failed, 1);
    assert_eq!(report.alerts_sent, 0);

    // The window advanced and the failed alert is not retried
    let snapshot = engine.snapshot()[&Target::host("Server")];
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.window_started_at, at(1));

    engine.tick(at(2)).await;
    assert_eq!(sink.sent().len(), 1);
}

#[tokio::test]
async fn test_one_alert_per_window() {
    let source = Arc::new(ScriptedSource::new(TargetKind::Container));
    source.set_targets(&["web"]);
    source.script("web", (0..10).map(|_| Some((95.0, 95.0))));
    let sink = Arc::new(RecordingSink::default());
    // 3.5 s window at 1 s ticks: closes at t=4 and t=8
    let config =
        EngineConfig::new(Duration::from_secs(1), Duration::from_millis(3500), 50.0, 50.0).unwrap();
    let engine = engine_with(config, source, sink.clone());

    for secs in 0..10 {
        engine.tick(at(secs)).await;
    }

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|(_, d, _)| matches!(d, AlertDecision::Both { .. })));
    assert_eq!(sent[0].2, at(4));
    assert_eq!(sent[1].2, at(8));
}

#[tokio::test]
async fn test_clock_backwards_keeps_window_open() {
    let source = Arc::new(ScriptedSource::new(TargetKind::Container));
    source.set_targets(&["web"]);
    source.script("web", (0..3).map(|_| Some((95.0, 95.0))));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(short_window_config(50.0), source, sink.clone());

    engine.tick(at(10)).await;
    let report = engine.tick(at(5)).await;

    assert_eq!(report.windows_closed, 0);
    // The late reading is dropped: nothing in the window predates its start
    let usage = engine.snapshot()[&Target::container("web")];
    assert_eq!(usage.sample_count, 1);
    assert_eq!(usage.window_started_at, at(10));
    {
        let windows = engine.lock_windows();
        let aggregate = &windows[&Target::container("web")];
        assert!(aggregate
            .samples()
            .iter()
            .all(|s| s.observed_at >= aggregate.window_start()));
    }

    // Once the clock is past the window again it closes normally
    let report = engine.tick(at(11)).await;
    assert_eq!(report.windows_closed, 1);
    assert_eq!(sink.sent().len(), 1);
}

#[tokio::test]
async fn test_listing_failure_skips_only_that_source() {
    let containers = Arc::new(ScriptedSource::new(TargetKind::Container));
    containers.fail_listing.store(true, Ordering::SeqCst);
    let host = Arc::new(ScriptedSource::new(TargetKind::Host));
    host.set_targets(&["Server"]);
    host.script("Server", [Some((5.0, 5.0))]);

    let engine = MonitorEngine::new(short_window_config(50.0), Arc::new(RecordingSink::default()))
        .with_source(containers)
        .with_source(host);

    let report = engine.tick(at(0)).await;

    assert!(!report.sources[&TargetKind::Container].listed);
    assert!(report.sources[&TargetKind::Host].listed);
    assert_eq!(report.targets_sampled(), 1);
    assert_eq!(
        engine.source_kinds(),
        vec![TargetKind::Container, TargetKind::Host]
    );
}

#[tokio::test]
async fn test_snapshot_does_not_mutate() {
    let source = Arc::new(ScriptedSource::new(TargetKind::Container));
    source.set_targets(&["web"]);
    source.script("web", [Some((20.0, 30.0)), Some((40.0, 50.0))]);
    let config =
        EngineConfig::new(Duration::from_secs(1), Duration::from_secs(60), 50.0, 50.0).unwrap();
    let engine = engine_with(config, source, Arc::new(RecordingSink::default()));

    assert!(engine.snapshot().is_empty());

    engine.tick(at(0)).await;
    engine.tick(at(1)).await;

    let first = engine.snapshot();
    let second = engine.snapshot();
    assert_eq!(first, second);

    let web = first[&Target::container("web")];
    assert_eq!(web.sample_count, 2);
    assert!((web.cpu_percent - 30.0).abs() < 1e-9);
    assert!((web.memory_percent - 40.0).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_snapshot_never_sees_half_reset_window() {
    let source = Arc::new(ScriptedSource::new(TargetKind::Container));
    source.set_targets(&["web"]);
    source.script("web", (0..200).map(|_| Some((10.0, 10.0))));
    // 1.5 s window at 1 s ticks: every second tick closes
    let config =
        EngineConfig::new(Duration::from_secs(1), Duration::from_millis(1500), 50.0, 50.0).unwrap();
    let engine = Arc::new(engine_with(
        config,
        source,
        Arc::new(RecordingSink::default()),
    ));

    let reader = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut observed = 0usize;
            for _ in 0..5_000 {
                if let Some(web) = engine.snapshot().get(&Target::container("web")) {
                    observed += 1;
                    // Windows open on even seconds. The first holds up to two
                    // samples; later ones reopen empty at the close time and
                    // hold at most one sample between ticks.
                    let start_secs = (web.window_started_at - at(0)).num_seconds();
                    assert_eq!(start_secs % 2, 0, "stale window start {start_secs}");
                    match web.sample_count {
                        0 => assert!(start_secs > 0, "emptied window kept its old start"),
                        1 => {}
                        2 => assert_eq!(start_secs, 0),
                        n => panic!("window holds {n} samples"),
                    }
                }
                tokio::task::yield_now().await;
            }
            observed
        })
    };

    for secs in 0..200 {
        engine.tick(at(secs)).await;
        tokio::task::yield_now().await;
    }

    let observed = reader.await.unwrap();
    assert!(observed > 0);
}
