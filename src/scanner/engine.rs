//! Sweep engine: dispatches scan units to a probe and collects the outcome

use crate::config::SweepConfig;
use crate::network::socket::{RawSocketProvider, TransportProvider};
use crate::network::PortState;
use crate::output::aggregate::ResultAggregator;
use crate::output::metadata::MetadataTable;
use crate::output::ScanReport;
use crate::scanner::probe::{ConnectProbe, NetworkProbe, SynProbe};
use crate::scanner::spec::{ScanUnit, SweepSpec};
use crate::scanner::{ExecutionMode, ResultCollector, ScanResult};
use crate::SweepError;
use indicatif::ProgressBar;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Sweep engine
pub struct SweepEngine {
    config: SweepConfig,
    probe: Arc<dyn NetworkProbe>,
    progress: Option<ProgressBar>,
}

impl SweepEngine {
    /// Create an engine backed by raw-socket SYN probes
    ///
    /// Fails with `PermissionDenied` when raw sockets are refused, unless the
    /// config enables the connect fallback.
    pub fn new(config: SweepConfig) -> crate::Result<Self> {
        Self::with_provider(config, RawSocketProvider::new)
    }

    /// Create an engine whose SYN probes use the provider `open_provider` returns
    ///
    /// `open_provider` runs once, before any unit is dispatched. A
    /// `PermissionDenied` from it switches to connect probes when the config
    /// allows the fallback and is returned otherwise.
    pub fn with_provider<P, F>(config: SweepConfig, open_provider: F) -> crate::Result<Self>
    where
        P: TransportProvider + 'static,
        F: FnOnce() -> crate::Result<P>,
    {
        config.validate()?;

        let probe: Arc<dyn NetworkProbe> = match open_provider() {
            Ok(provider) => {
                log::info!("Raw socket access available, using SYN probes");
                Arc::new(SynProbe::from_config(provider, &config))
            }
            Err(SweepError::PermissionDenied(reason)) if config.connect_fallback => {
                log::warn!(
                    "Raw socket access refused ({}). Falling back to TCP connect probes.",
                    reason
                );
                Arc::new(ConnectProbe::new(config.timeout_duration()))
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            config,
            probe,
            progress: None,
        })
    }

    /// Create an engine around an arbitrary probe
    pub fn with_probe(config: SweepConfig, probe: Arc<dyn NetworkProbe>) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            probe,
            progress: None,
        })
    }

    /// Report per-unit progress on the given bar
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn probe_name(&self) -> &'static str {
        self.probe.name()
    }

    /// Run one sweep
    ///
    /// `spec` is validated and expanded before anything is sent. If `cancel`
    /// fires, the result is an empty report flagged as cancelled.
    pub async fn sweep(
        &self,
        spec: &SweepSpec,
        mode: ExecutionMode,
        cancel: CancellationToken,
        metadata: Option<&MetadataTable>,
    ) -> crate::Result<ScanReport> {
        let start_time = Instant::now();
        let units = spec.expand()?;

        log::info!(
            "Sweeping {} endpoints ({} subnet(s), {} port(s)) with {} probes, {:?} mode",
            units.len(),
            spec.subnets.len(),
            spec.ports.len(),
            self.probe.name(),
            mode
        );

        if let Some(progress) = &self.progress {
            progress.set_length(units.len() as u64);
        }

        let collector: ResultCollector = Arc::new(Mutex::new(Vec::with_capacity(units.len())));
        let retried = Arc::new(AtomicUsize::new(0));

        match mode {
            ExecutionMode::Sequential => {
                self.run_sequential(units, &collector, &retried, &cancel).await
            }
            ExecutionMode::Concurrent => {
                self.run_concurrent(units, &collector, &retried, &cancel).await?
            }
        }

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }

        let elapsed = start_time.elapsed();
        if cancel.is_cancelled() {
            log::info!("Sweep cancelled after {:.2}s", elapsed.as_secs_f64());
            return Ok(ScanReport::cancelled(elapsed));
        }

        let results = std::mem::take(&mut *collector.lock().await);
        let mut stats = ResultAggregator::stats(&results);
        stats.retried = retried.load(Ordering::Relaxed);
        let entries = ResultAggregator::aggregate(&results, metadata);

        log::info!(
            "Sweep finished in {:.2}s: {} open, {} closed, {} down",
            elapsed.as_secs_f64(),
            stats.open,
            stats.closed,
            stats.down
        );

        Ok(ScanReport::new(entries, stats, elapsed))
    }

    async fn run_sequential(
        &self,
        units: Vec<ScanUnit>,
        collector: &ResultCollector,
        retried: &AtomicUsize,
        cancel: &CancellationToken,
    ) {
        for unit in units {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = probe_unit(self.probe.as_ref(), unit, self.config.retries, cancel) => outcome,
            };
            record(collector, retried, self.progress.as_ref(), outcome).await;
        }
    }

    async fn run_concurrent(
        &self,
        units: Vec<ScanUnit>,
        collector: &ResultCollector,
        retried: &Arc<AtomicUsize>,
        cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        for unit in units {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit?,
            };

            // A free permit means a task finished; reap it so the set stays
            // bounded by the worker limit
            while let Some(joined) = tasks.try_join_next() {
                check_joined(joined)?;
            }

            let probe = Arc::clone(&self.probe);
            let collector = Arc::clone(collector);
            let retried = Arc::clone(retried);
            let progress = self.progress.clone();
            let cancel = cancel.clone();
            let retries = self.config.retries;

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    outcome = probe_unit(probe.as_ref(), unit, retries, &cancel) => outcome,
                };
                record(&collector, &retried, progress.as_ref(), outcome).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            check_joined(joined)?;
        }

        Ok(())
    }
}

fn check_joined(joined: Result<(), JoinError>) -> crate::Result<()> {
    joined.map_err(|e| {
        log::error!("Probe task failed: {}", e);
        SweepError::TaskError(format!("probe task failed: {}", e))
    })
}

/// Probe one unit, re-probing while it reports `Down` and retries remain
async fn probe_unit(
    probe: &dyn NetworkProbe,
    unit: ScanUnit,
    retries: u32,
    cancel: &CancellationToken,
) -> (ScanResult, usize) {
    let mut state = probe.probe(unit.target).await;
    let mut attempts = 0;

    while state == PortState::Down && attempts < retries && !cancel.is_cancelled() {
        attempts += 1;
        log::debug!("{} down, retry {}/{}", unit.target, attempts, retries);
        state = probe.probe(unit.target).await;
    }

    (ScanResult::new(unit.target, state), attempts as usize)
}

async fn record(
    collector: &ResultCollector,
    retried: &AtomicUsize,
    progress: Option<&ProgressBar>,
    (result, attempts): (ScanResult, usize),
) {
    retried.fetch_add(attempts, Ordering::Relaxed);
    collector.lock().await.push(result);
    if let Some(progress) = progress {
        progress.inc(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ScanTarget;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Mutex as StdMutex;

    /// Answers from a fixed table and counts calls per target
    struct TableProbe {
        answers: HashMap<ScanTarget, Vec<PortState>>,
        calls: StdMutex<HashMap<ScanTarget, usize>>,
    }

    impl TableProbe {
        fn new(answers: Vec<(ScanTarget, Vec<PortState>)>) -> Self {
            Self {
                answers: answers.into_iter().collect(),
                calls: StdMutex::new(HashMap::new()),
            }
        }

        fn calls(&self, target: ScanTarget) -> usize {
            self.calls.lock().unwrap().get(&target).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl NetworkProbe for TableProbe {
        async fn probe(&self, target: ScanTarget) -> PortState {
            let mut calls = self.calls.lock().unwrap();
            let call = calls.entry(target).or_insert(0);
            let state = self
                .answers
                .get(&target)
                .and_then(|states| states.get(*call).or_else(|| states.last()))
                .copied()
                .unwrap_or(PortState::Down);
            *call += 1;
            state
        }

        fn name(&self) -> &'static str {
            "table"
        }
    }

    fn target(last: u8, port: u16) -> ScanTarget {
        ScanTarget::new(Ipv4Addr::new(10, 1, 134, last), port).unwrap()
    }

    #[tokio::test]
    async fn test_retries_reprobe_down_units() {
        let flaky = target(1, 5989);
        let probe = Arc::new(TableProbe::new(vec![(
            flaky,
            vec![PortState::Down, PortState::Down, PortState::Open],
        )]));
        let config = SweepConfig::default().with_retries(2);
        let engine = SweepEngine::with_probe(config, probe.clone()).unwrap();

        let spec = SweepSpec::new(vec!["10.1.134".to_string()], 1, 2, vec![5989]);
        let report = engine
            .sweep(&spec, ExecutionMode::Sequential, CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(probe.calls(flaky), 3);
        assert_eq!(probe.calls(target(2, 5989)), 3);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].target, flaky);
        assert_eq!(report.stats.retried, 4);
        assert_eq!(report.stats.down, 1);
    }

    #[tokio::test]
    async fn test_no_retries_by_default() {
        let probe = Arc::new(TableProbe::new(vec![]));
        let engine = SweepEngine::with_probe(SweepConfig::default(), probe.clone()).unwrap();

        let spec = SweepSpec::new(vec!["10.1.134.7".to_string()], 1, 254, vec![5989]);
        let report = engine
            .sweep(&spec, ExecutionMode::Concurrent, CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(probe.calls(target(7, 5989)), 1);
        assert_eq!(report.stats.units, 1);
        assert_eq!(report.stats.retried, 0);
        assert!(report.entries.is_empty());
        assert!(!report.cancelled);
    }

    #[test]
    fn test_progress_counts_every_unit() {
        let probe = Arc::new(TableProbe::new(vec![(target(3, 5989), vec![PortState::Open])]));
        let progress = ProgressBar::hidden();
        let engine = SweepEngine::with_probe(SweepConfig::default(), probe)
            .unwrap()
            .with_progress(progress.clone());

        let spec = SweepSpec::new(vec!["10.1.134".to_string()], 1, 5, vec![5989]);
        let report = tokio_test::block_on(engine.sweep(
            &spec,
            ExecutionMode::Concurrent,
            CancellationToken::new(),
            None,
        ))
        .unwrap();

        assert_eq!(progress.position(), 5);
        assert_eq!(progress.length(), Some(5));
        assert_eq!(report.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_large_concurrent_sweep_records_every_unit() {
        let probe = Arc::new(TableProbe::new(vec![(target(9, 443), vec![PortState::Open])]));
        let progress = ProgressBar::hidden();
        let engine = SweepEngine::with_probe(SweepConfig::default().with_concurrency(4), probe.clone())
            .unwrap()
            .with_progress(progress.clone());

        let subnets = (1..=4).map(|i| format!("10.1.{}", 130 + i)).collect();
        let spec = SweepSpec::new(subnets, 1, 254, vec![443]);
        let report = engine
            .sweep(&spec, ExecutionMode::Concurrent, CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.stats.units, 4 * 254);
        assert_eq!(report.stats.down, 4 * 254 - 1);
        assert_eq!(progress.position(), 4 * 254);
        assert_eq!(probe.calls(target(9, 443)), 1);
        assert_eq!(report.entries.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let probe = Arc::new(TableProbe::new(vec![]));
        let config = SweepConfig::default().with_concurrency(0);
        assert!(matches!(
            SweepEngine::with_probe(config, probe),
            Err(SweepError::ConfigError(_))
        ));
    }
}
