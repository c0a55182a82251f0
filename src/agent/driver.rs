//! The agent loop: register once, then scan, heartbeat, report and ship logs
//! every interval until told to stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::agent::{
    AgentError, CollectorApi, HttpCollectorClient, LatencyProbe, LogTail, Scanner,
    TcpLatencyProbe, TcpSweepScanner,
};
use crate::collector::LogUpload;
use crate::config::{AgentConfig, ProbeIdentity};
use crate::storage::{HostState, ReportSnapshot};

/// Result of one step of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Failed,
    /// Nothing to do, e.g. no log file yet.
    Skipped,
}

/// Per-step outcome of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub scan: StepOutcome,
    pub heartbeat: StepOutcome,
    pub report: StepOutcome,
    pub logs: StepOutcome,
}

impl CycleReport {
    /// True when no step failed.
    pub fn is_clean(&self) -> bool {
        ![self.scan, self.heartbeat, self.report, self.logs].contains(&StepOutcome::Failed)
    }
}

/// Drives the upload protocol for one probe.
pub struct ProbeAgent {
    identity: ProbeIdentity,
    client: Arc<dyn CollectorApi>,
    scanner: Arc<dyn Scanner>,
    latency: Option<Arc<dyn LatencyProbe>>,
    log_tail: Option<LogTail>,
    interval: Duration,
    last_sequence: Option<u64>,
}

impl std::fmt::Debug for ProbeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeAgent")
            .field("probe_id", &self.identity.id)
            .field("interval", &self.interval)
            .field("last_sequence", &self.last_sequence)
            .finish_non_exhaustive()
    }
}

impl ProbeAgent {
    pub fn new(
        identity: ProbeIdentity,
        client: Arc<dyn CollectorApi>,
        scanner: Arc<dyn Scanner>,
    ) -> Self {
        Self {
            identity,
            client,
            scanner,
            latency: None,
            log_tail: None,
            interval: crate::config::DEFAULT_SCAN_INTERVAL,
            last_sequence: None,
        }
    }

    pub fn with_latency_probe(mut self, latency: Arc<dyn LatencyProbe>) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_log_tail(mut self, log_tail: LogTail) -> Self {
        self.log_tail = Some(log_tail);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Build an agent with the HTTP client, TCP sweep scanner and log tail
    /// described by `config`.
    ///
    /// # Errors
    /// Returns `AgentError::Config` if the collector URL or scan targets are invalid.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let client = HttpCollectorClient::from_config(&config.collector)?;
        let scanner = TcpSweepScanner::from_config(&config.scan)?;

        let mut agent = Self::new(config.probe.clone(), Arc::new(client), Arc::new(scanner))
            .with_log_tail(LogTail::from_config(&config.logging))
            .with_interval(config.schedule.interval);

        if let Some(target) = &config.scan.wan_target {
            agent = agent.with_latency_probe(Arc::new(TcpLatencyProbe::new(
                target.clone(),
                config.scan.wan_samples,
                config.scan.connect_timeout,
            )));
        }

        Ok(agent)
    }

    pub fn probe_id(&self) -> &str {
        &self.identity.id
    }

    /// Announce this probe to the collector. Failures are logged only.
    pub async fn register(&self) -> StepOutcome {
        match self
            .client
            .register(&self.identity.id, &self.identity.name)
            .await
        {
            Ok(()) => {
                tracing::info!(probe_id = %self.identity.id, name = %self.identity.name, "Registered with collector");
                StepOutcome::Ok
            }
            Err(e) => {
                tracing::warn!(probe_id = %self.identity.id, error = %e, "Registration failed, continuing");
                StepOutcome::Failed
            }
        }
    }

    /// Run one scan, heartbeat, report, logs cycle. Never fails as a whole.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started_at = Utc::now();
        tracing::info!(probe_id = %self.identity.id, "Starting cycle");

        let (report, scan) = self.build_report(started_at).await;

        let heartbeat = match self.client.heartbeat(&self.identity.id).await {
            Ok(()) => StepOutcome::Ok,
            Err(e) => {
                tracing::warn!(probe_id = %self.identity.id, error = %e, "Heartbeat failed");
                StepOutcome::Failed
            }
        };

        let report_step = match self.client.upload_report(&self.identity.id, &report).await {
            Ok(()) => {
                tracing::info!(
                    probe_id = %self.identity.id,
                    hosts_up = report.summary.hosts_up,
                    ports_open = report.summary.total_ports_open,
                    "Report uploaded"
                );
                StepOutcome::Ok
            }
            Err(e) => {
                tracing::warn!(probe_id = %self.identity.id, error = %e, "Report upload failed");
                StepOutcome::Failed
            }
        };

        let logs = self.ship_logs(started_at).await;

        let cycle = CycleReport {
            scan,
            heartbeat,
            report: report_step,
            logs,
        };
        tracing::info!(probe_id = %self.identity.id, clean = cycle.is_clean(), "Cycle finished");
        cycle
    }

    /// Register, run a single cycle and return its outcome.
    pub async fn run_once(&mut self) -> CycleReport {
        self.register().await;
        self.run_cycle().await
    }

    /// Register, then cycle every interval until `stop` flips to `true` or its
    /// sender is dropped. Stops promptly during registration, a cycle or the sleep.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        if *stop.borrow_and_update() {
            return;
        }

        tokio::select! {
            _ = self.register() => {}
            _ = stopped(&mut stop) => {
                tracing::info!(probe_id = %self.identity.id, "Stop requested during registration");
                return;
            }
        }

        loop {
            tokio::select! {
                _ = self.run_cycle() => {}
                _ = stopped(&mut stop) => {
                    tracing::info!(probe_id = %self.identity.id, "Stop requested mid-cycle");
                    return;
                }
            }

            tracing::debug!(probe_id = %self.identity.id, interval = ?self.interval, "Sleeping until next cycle");
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stopped(&mut stop) => {
                    tracing::info!(probe_id = %self.identity.id, "Agent stopped");
                    return;
                }
            }
        }
    }

    async fn build_report(&self, started_at: DateTime<Utc>) -> (ReportSnapshot, StepOutcome) {
        let clock = Instant::now();

        let (mut report, outcome) = match self.scanner.scan().await {
            Ok(result) => {
                let mut report = ReportSnapshot::from_hosts(&self.identity.id, result.hosts);
                // Only answering hosts are listed; the rest of the range counts as down.
                let total = (result.addresses_scanned as u32).max(report.summary.total_hosts);
                report.summary.total_hosts = total;
                report.summary.hosts_down = total - report.summary.hosts_up;
                (report, StepOutcome::Ok)
            }
            Err(e) => {
                tracing::error!(probe_id = %self.identity.id, error = %e, "Scan failed, uploading error report");
                (
                    ReportSnapshot::failed(&self.identity.id, e.to_string()),
                    StepOutcome::Failed,
                )
            }
        };

        if let Some(latency) = &self.latency {
            report.wan_latency_ms = latency.measure().await;
        }

        report.scan_id = Some(uuid::Uuid::new_v4().to_string());
        report.captured_at = Some(started_at);
        report.scan_duration_seconds = clock.elapsed().as_secs_f64();
        report.network = self.scanner.network();
        report.agent_version = Some(env!("CARGO_PKG_VERSION").to_string());

        tracing::debug!(
            probe_id = %self.identity.id,
            hosts_up = report.hosts.iter().filter(|h| h.state == HostState::Up).count(),
            wan_latency_ms = ?report.wan_latency_ms,
            "Scan complete"
        );
        (report, outcome)
    }

    async fn ship_logs(&mut self, started_at: DateTime<Utc>) -> StepOutcome {
        let Some(log_tail) = &self.log_tail else {
            return StepOutcome::Skipped;
        };

        let excerpt = match log_tail.read().await {
            Ok(Some(excerpt)) => excerpt,
            Ok(None) => {
                tracing::debug!(probe_id = %self.identity.id, "No log file yet");
                return StepOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(probe_id = %self.identity.id, error = %e, "Failed to read log tail");
                return StepOutcome::Failed;
            }
        };

        let upload = LogUpload {
            timestamp: Some(Utc::now()),
            lines: excerpt.lines,
            total_lines: excerpt.total_lines,
            sent_lines: excerpt.sent_lines,
            sequence: Some(self.next_sequence(started_at)),
        };

        match self.client.upload_logs(&self.identity.id, &upload).await {
            Ok(ack) if ack.accepted => StepOutcome::Ok,
            Ok(ack) => {
                tracing::debug!(probe_id = %self.identity.id, reason = ?ack.reason, "Log chunk not accepted");
                StepOutcome::Ok
            }
            Err(e) => {
                tracing::warn!(probe_id = %self.identity.id, error = %e, "Log upload failed");
                StepOutcome::Failed
            }
        }
    }

    /// Cycle start in milliseconds, bumped past the previous value if the clock stalled or went back.
    fn next_sequence(&mut self, started_at: DateTime<Utc>) -> u64 {
        let candidate = u64::try_from(started_at.timestamp_millis()).unwrap_or(0);
        let sequence = match self.last_sequence {
            Some(last) if candidate <= last => last + 1,
            _ => candidate,
        };
        self.last_sequence = Some(sequence);
        sequence
    }
}

/// Resolves once a stop was signalled. A dropped sender counts as a stop.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScanResult;
    use crate::collector::UploadAck;
    use crate::storage::{HostRecord, PortState, ServiceRecord};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<String>>,
        reports: Mutex<Vec<ReportSnapshot>>,
        sequences: Mutex<Vec<Option<u64>>>,
    }

    impl RecordingApi {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CollectorApi for RecordingApi {
        async fn register(&self, probe_id: &str, _display_name: &str) -> Result<(), AgentError> {
            self.calls.lock().unwrap().push(format!("register:{probe_id}"));
            Ok(())
        }

        async fn heartbeat(&self, probe_id: &str) -> Result<(), AgentError> {
            self.calls.lock().unwrap().push(format!("heartbeat:{probe_id}"));
            Ok(())
        }

        async fn upload_report(
            &self,
            probe_id: &str,
            report: &ReportSnapshot,
        ) -> Result<(), AgentError> {
            self.calls.lock().unwrap().push(format!("report:{probe_id}"));
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }

        async fn upload_logs(
            &self,
            probe_id: &str,
            upload: &LogUpload,
        ) -> Result<UploadAck, AgentError> {
            self.calls.lock().unwrap().push(format!("logs:{probe_id}"));
            self.sequences.lock().unwrap().push(upload.sequence);
            Ok(UploadAck::accepted())
        }
    }

    struct FixedScanner;

    #[async_trait::async_trait]
    impl Scanner for FixedScanner {
        async fn scan(&self) -> Result<ScanResult, AgentError> {
            Ok(ScanResult {
                hosts: vec![HostRecord {
                    address: "10.0.0.5".to_string(),
                    hostname: None,
                    state: HostState::Up,
                    mac_address: None,
                    vendor: None,
                    os: None,
                    services: vec![ServiceRecord {
                        port: 22,
                        state: PortState::Open,
                        service: Some("ssh".to_string()),
                        product: None,
                        version: None,
                    }],
                }],
                addresses_scanned: 4,
            })
        }

        fn network(&self) -> Option<String> {
            Some("10.0.0.4/30".to_string())
        }
    }

    struct BrokenScanner;

    #[async_trait::async_trait]
    impl Scanner for BrokenScanner {
        async fn scan(&self) -> Result<ScanResult, AgentError> {
            Err(AgentError::Scan("no interface".to_string()))
        }
    }

    struct HangingScanner;

    #[async_trait::async_trait]
    impl Scanner for HangingScanner {
        async fn scan(&self) -> Result<ScanResult, AgentError> {
            std::future::pending().await
        }
    }

    struct FixedLatency(f64);

    #[async_trait::async_trait]
    impl LatencyProbe for FixedLatency {
        async fn measure(&self) -> Option<f64> {
            Some(self.0)
        }
    }

    fn identity() -> ProbeIdentity {
        ProbeIdentity {
            id: "nw7".to_string(),
            name: "Example FC".to_string(),
        }
    }

    fn log_dir_with_file() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("agent.log.2024-05-01"), "a\nb\nc\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_cycle_order_and_report_shape() {
        let api = Arc::new(RecordingApi::default());
        let logs = log_dir_with_file();
        let mut agent = ProbeAgent::new(identity(), api.clone(), Arc::new(FixedScanner))
            .with_latency_probe(Arc::new(FixedLatency(12.5)))
            .with_log_tail(LogTail::new(logs.path(), "agent.log", 2));

        let cycle = agent.run_once().await;

        assert!(cycle.is_clean());
        assert_eq!(cycle.logs, StepOutcome::Ok);
        assert_eq!(
            api.calls(),
            vec!["register:nw7", "heartbeat:nw7", "report:nw7", "logs:nw7"]
        );

        let reports = api.reports.lock().unwrap();
        let report = &reports[0];
        assert_eq!(report.probe_id, "nw7");
        assert_eq!(report.summary.total_hosts, 4);
        assert_eq!(report.summary.hosts_up, 1);
        assert_eq!(report.summary.hosts_down, 3);
        assert_eq!(report.summary.total_ports_open, 1);
        assert_eq!(report.wan_latency_ms, Some(12.5));
        assert_eq!(report.network.as_deref(), Some("10.0.0.4/30"));
        assert!(report.scan_id.is_some());
        assert!(report.captured_at.is_some());
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_scan_failure_still_uploads_error_report() {
        let api = Arc::new(RecordingApi::default());
        let mut agent = ProbeAgent::new(identity(), api.clone(), Arc::new(BrokenScanner));

        let cycle = agent.run_cycle().await;

        assert_eq!(cycle.scan, StepOutcome::Failed);
        assert_eq!(cycle.report, StepOutcome::Ok);
        assert_eq!(cycle.logs, StepOutcome::Skipped);

        let reports = api.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].summary.total_hosts, 0);
        assert!(reports[0].error.as_deref().unwrap().contains("no interface"));
    }

    #[tokio::test]
    async fn test_unreachable_collector_cycle_completes() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpCollectorClient::new(
            &format!("http://{addr}"),
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .unwrap();
        let logs = log_dir_with_file();
        let mut agent = ProbeAgent::new(identity(), Arc::new(client), Arc::new(FixedScanner))
            .with_log_tail(LogTail::new(logs.path(), "agent.log", 10));

        assert_eq!(agent.register().await, StepOutcome::Failed);
        let cycle = agent.run_cycle().await;

        assert_eq!(cycle.scan, StepOutcome::Ok);
        assert_eq!(cycle.heartbeat, StepOutcome::Failed);
        assert_eq!(cycle.report, StepOutcome::Failed);
        assert_eq!(cycle.logs, StepOutcome::Failed);
        assert!(!cycle.is_clean());
    }

    #[tokio::test]
    async fn test_sequences_increase_across_cycles() {
        let api = Arc::new(RecordingApi::default());
        let logs = log_dir_with_file();
        let mut agent = ProbeAgent::new(identity(), api.clone(), Arc::new(FixedScanner))
            .with_log_tail(LogTail::new(logs.path(), "agent.log", 10));

        for _ in 0..3 {
            agent.run_cycle().await;
        }

        let sequences: Vec<u64> = api
            .sequences
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(sequences.len(), 3);
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sequence_survives_clock_going_back() {
        let mut agent = ProbeAgent::new(
            identity(),
            Arc::new(RecordingApi::default()),
            Arc::new(FixedScanner),
        );
        let later = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let earlier = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let first = agent.next_sequence(later);
        let second = agent.next_sequence(earlier);
        assert_eq!(first, 1_700_000_100_000);
        assert_eq!(second, first + 1);
    }

    #[tokio::test]
    async fn test_stop_during_sleep() {
        let api = Arc::new(RecordingApi::default());
        let mut agent = ProbeAgent::new(identity(), api.clone(), Arc::new(FixedScanner))
            .with_interval(Duration::from_secs(3600));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { agent.run(rx).await });

        // Wait for the first cycle to land, then stop while the agent sleeps.
        for _ in 0..100 {
            if api.calls().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("agent did not stop mid-sleep")
            .unwrap();
        assert_eq!(api.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_stop_mid_cycle() {
        let api = Arc::new(RecordingApi::default());
        let mut agent = ProbeAgent::new(identity(), api.clone(), Arc::new(HangingScanner));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { agent.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("agent did not stop mid-cycle")
            .unwrap();
        assert_eq!(api.calls(), vec!["register:nw7"]);
    }

    #[tokio::test]
    async fn test_already_stopped_does_nothing() {
        let api = Arc::new(RecordingApi::default());
        let mut agent = ProbeAgent::new(identity(), api.clone(), Arc::new(FixedScanner));
        let (_tx, rx) = watch::channel(true);

        agent.run(rx).await;
        assert!(api.calls().is_empty());
    }
}
