//! Sweep engine behaviour with a scripted probe

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use synsweep::network::socket::{PacketTransport, TransportProvider};
use synsweep::output::EndpointMetadata;
use synsweep::scanner::NetworkProbe;
use synsweep::{
    ExecutionMode, MetadataTable, PortState, ScanTarget, SweepConfig, SweepEngine, SweepError,
    SweepSpec,
};
use tokio_util::sync::CancellationToken;

/// Hosts whose last octet is divisible by `open_every` are open, others closed
struct ScriptedProbe {
    open_every: u8,
    delay: Duration,
    seen: Mutex<Vec<ScanTarget>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProbe {
    fn new(open_every: u8, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            open_every,
            delay,
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn seen(&self) -> Vec<ScanTarget> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkProbe for ScriptedProbe {
    async fn probe(&self, target: ScanTarget) -> PortState {
        self.seen.lock().unwrap().push(target);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // Later hosts finish first so completion order differs from dispatch order
        let last = target.ip().octets()[3];
        tokio::time::sleep(self.delay / (u32::from(last) + 1)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if last % self.open_every == 0 {
            PortState::Open
        } else {
            PortState::Closed
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn spec(subnets: &[&str], start: u8, end: u8, ports: &[u16]) -> SweepSpec {
    SweepSpec::new(
        subnets.iter().map(|s| s.to_string()).collect(),
        start,
        end,
        ports.to_vec(),
    )
}

async fn run(
    probe: Arc<ScriptedProbe>,
    config: SweepConfig,
    spec: &SweepSpec,
    mode: ExecutionMode,
) -> synsweep::Result<synsweep::ScanReport> {
    let engine = SweepEngine::with_probe(config, probe)?;
    engine.sweep(spec, mode, CancellationToken::new(), None).await
}

#[tokio::test]
async fn test_empty_ports_rejected_before_probing() {
    let probe = ScriptedProbe::new(1, Duration::ZERO);
    let err = run(
        probe.clone(),
        SweepConfig::default(),
        &spec(&["10.1.134"], 1, 254, &[]),
        ExecutionMode::Concurrent,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SweepError::InvalidSpec(_)));
    assert!(probe.seen().is_empty());
}

#[tokio::test]
async fn test_bad_range_rejected_before_probing() {
    let probe = ScriptedProbe::new(1, Duration::ZERO);
    let err = run(
        probe.clone(),
        SweepConfig::default(),
        &spec(&["10.1.134"], 20, 10, &[5989]),
        ExecutionMode::Sequential,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SweepError::InvalidSpec(_)));
    assert!(probe.seen().is_empty());
}

#[tokio::test]
async fn test_sequential_probes_in_expansion_order() {
    let probe = ScriptedProbe::new(2, Duration::from_millis(2));
    let s = spec(&["10.1.134"], 1, 4, &[5989, 5988]);

    let report = run(probe.clone(), SweepConfig::default(), &s, ExecutionMode::Sequential)
        .await
        .unwrap();

    let expected: Vec<ScanTarget> = s.expand().unwrap().into_iter().map(|u| u.target).collect();
    assert_eq!(probe.seen(), expected);
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(report.stats.units, 8);
    assert_eq!(report.stats.open, 4);
    assert_eq!(report.stats.closed, 4);
}

#[tokio::test]
async fn test_modes_cover_the_same_units() {
    let s = spec(&["10.1.134", "10.1.135"], 1, 30, &[5989, 5988]);

    let sequential = ScriptedProbe::new(3, Duration::from_millis(1));
    let seq_report = run(sequential.clone(), SweepConfig::default(), &s, ExecutionMode::Sequential)
        .await
        .unwrap();

    let concurrent = ScriptedProbe::new(3, Duration::from_millis(20));
    let con_report = run(concurrent.clone(), SweepConfig::default(), &s, ExecutionMode::Concurrent)
        .await
        .unwrap();

    let seq_set: HashSet<ScanTarget> = sequential.seen().into_iter().collect();
    let con_set: HashSet<ScanTarget> = concurrent.seen().into_iter().collect();
    assert_eq!(seq_set.len(), 2 * 2 * 30);
    assert_eq!(seq_set, con_set);

    let seq_open: Vec<ScanTarget> = seq_report.entries.iter().map(|e| e.target).collect();
    let con_open: Vec<ScanTarget> = con_report.entries.iter().map(|e| e.target).collect();
    assert_eq!(seq_open, con_open);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let probe = ScriptedProbe::new(5, Duration::from_millis(30));
    let config = SweepConfig::default().with_concurrency(4);

    let report = run(probe.clone(), config, &spec(&["10.9.9"], 1, 40, &[80]), ExecutionMode::Concurrent)
        .await
        .unwrap();

    assert_eq!(report.stats.units, 40);
    assert!(probe.max_in_flight.load(Ordering::SeqCst) <= 4);
    assert!(probe.max_in_flight.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_report_sorted_for_any_completion_order() {
    let probe = ScriptedProbe::new(1, Duration::from_millis(40));
    let report = run(
        probe,
        SweepConfig::default(),
        &spec(&["10.1.2", "10.1.1"], 1, 12, &[5989, 443]),
        ExecutionMode::Concurrent,
    )
    .await
    .unwrap();

    let targets: Vec<ScanTarget> = report.entries.iter().map(|e| e.target).collect();
    let mut sorted = targets.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(targets, sorted);
    assert_eq!(targets.len(), 2 * 2 * 12);
    assert_eq!(targets[0], "10.1.1.1:443".parse().unwrap());
}

#[tokio::test]
async fn test_cancellation_yields_no_listing() {
    let probe = ScriptedProbe::new(1, Duration::from_millis(200));
    let engine = SweepEngine::with_probe(SweepConfig::default().with_concurrency(2), probe.clone()).unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = engine
        .sweep(
            &spec(&["10.1.134"], 1, 254, &[5989]),
            ExecutionMode::Concurrent,
            cancel,
            None,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.entries.is_empty());
    assert!(probe.seen().len() < 254);
}

#[tokio::test]
async fn test_sequential_cancellation_mid_sweep() {
    let probe = ScriptedProbe::new(1, Duration::from_millis(100));
    let engine = SweepEngine::with_probe(SweepConfig::default(), probe.clone()).unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = engine
        .sweep(
            &spec(&["10.1.134"], 1, 254, &[5989]),
            ExecutionMode::Sequential,
            cancel,
            None,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.entries.is_empty());
    assert_eq!(report.stats.units, 0);
    assert!(!probe.seen().is_empty());
    assert!(probe.seen().len() < 254);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let probe = ScriptedProbe::new(1, Duration::ZERO);
    let engine = SweepEngine::with_probe(SweepConfig::default(), probe.clone()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine
        .sweep(&spec(&["10.1.134"], 1, 3, &[5989]), ExecutionMode::Sequential, cancel, None)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.entries.is_empty());
    assert!(probe.seen().is_empty());
}

#[tokio::test]
async fn test_metadata_join_through_sweep() {
    let probe = ScriptedProbe::new(1, Duration::ZERO);
    let engine = SweepEngine::with_probe(SweepConfig::default(), probe).unwrap();

    let mut table = MetadataTable::new();
    table.insert(
        ScanTarget::new(Ipv4Addr::new(10, 1, 134, 2), 5989).unwrap(),
        EndpointMetadata::new(Some("Acme"), Some("Array"), None),
    );

    let report = engine
        .sweep(
            &spec(&["10.1.134"], 1, 3, &[5989]),
            ExecutionMode::Concurrent,
            CancellationToken::new(),
            Some(&table),
        )
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 3);
    assert!(report.entries[0].metadata.is_none());
    let joined = report.entries[1].metadata.as_ref().unwrap();
    assert_eq!(joined.company.as_deref(), Some("Acme"));
    assert!(joined.version.is_none());
    assert!(report.entries[2].metadata.is_none());
}

/// Provider whose transports never hear back; counts how often it is opened
#[derive(Clone, Default)]
struct QuietProvider {
    opened: Arc<AtomicUsize>,
}

struct QuietTransport;

#[async_trait]
impl PacketTransport for QuietTransport {
    async fn send(&self, packet: &[u8], _dest: Ipv4Addr) -> synsweep::Result<usize> {
        Ok(packet.len())
    }

    async fn recv(&self, _buf: &mut [u8]) -> synsweep::Result<usize> {
        std::future::pending().await
    }
}

impl TransportProvider for QuietProvider {
    type Transport = QuietTransport;

    fn open(&self) -> synsweep::Result<QuietTransport> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(QuietTransport)
    }
}

fn refused() -> synsweep::Result<QuietProvider> {
    Err(SweepError::PermissionDenied("raw sockets need CAP_NET_RAW".to_string()))
}

#[test]
fn test_refused_raw_access_is_an_error_without_fallback() {
    let calls = AtomicUsize::new(0);
    let result = SweepEngine::with_provider(SweepConfig::default(), || {
        calls.fetch_add(1, Ordering::SeqCst);
        refused()
    });

    assert!(matches!(result, Err(SweepError::PermissionDenied(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_refused_raw_access_falls_back_to_connect() {
    let config = SweepConfig::default().with_connect_fallback(true);
    let engine = SweepEngine::with_provider(config, refused).unwrap();

    assert_eq!(engine.probe_name(), "connect");
}

#[test]
fn test_fallback_only_covers_refused_access() {
    let config = SweepConfig::default().with_connect_fallback(true);
    let result = SweepEngine::with_provider(config, || -> synsweep::Result<QuietProvider> {
        Err(SweepError::NetworkError("no route".to_string()))
    });

    assert!(matches!(result, Err(SweepError::NetworkError(_))));
}

#[test]
fn test_invalid_config_rejected_before_opening_provider() {
    let calls = AtomicUsize::new(0);
    let config = SweepConfig::default().with_concurrency(0);
    let result = SweepEngine::with_provider(config, || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(QuietProvider::default())
    });

    assert!(matches!(result, Err(SweepError::ConfigError(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_granted_raw_access_sends_syn() {
    let provider = QuietProvider::default();
    let opened = Arc::clone(&provider.opened);
    let config = SweepConfig::default().with_timeout(20);
    let engine = SweepEngine::with_provider(config, move || Ok(provider)).unwrap();
    assert_eq!(engine.probe_name(), "syn");
    assert_eq!(opened.load(Ordering::SeqCst), 0);

    let report = engine
        .sweep(
            &spec(&["127.0.0"], 1, 3, &[5989]),
            ExecutionMode::Concurrent,
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(opened.load(Ordering::SeqCst), 3);
    assert_eq!(report.stats.down, 3);
    assert!(report.entries.is_empty());
}
