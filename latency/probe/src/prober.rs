//! ICMP echo prober
//!
//! Sends the configured number of echo requests one after another and
//! accounts each attempt into a [`ProbeResult`].
//!
//! ## Architecture
//!
//! ```text
//! probe()          -> resolve target, open ICMP socket (fails fast)
//!                     |
//!                     v
//! Prober::run()    -> for each attempt: echo, wait up to timeout, record
//!                     |
//!                     v
//! ProbeResult      -> transport dropped, socket released
//! ```

use crate::types::{PacketOutcome, ProbeConfig, ProbeResult};
use async_trait::async_trait;
use log::{debug, info, warn};
use nettest_common::constants::ICMP_PAYLOAD_SIZE;
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use surge_ping::{Client, Config, Pinger, PingIdentifier, PingSequence, SurgeError, ICMP};
use thiserror::Error;

/// Fatal conditions that stop a run before any attempt is made
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The ICMP socket could not be opened (usually missing privileges)
    #[error("ICMP transport unavailable")]
    TransportUnavailable(#[source] io::Error),
    /// The target host did not resolve to an address
    #[error("failed to resolve target host {host}")]
    UnresolvedTarget {
        host: String,
        #[source]
        source: io::Error,
    },
}

/// Why a single attempt got no reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// No matching reply within the per-packet timeout
    #[error("timed out")]
    Timeout,
    /// Sending or receiving failed
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Sends one echo request and waits for its reply
#[async_trait]
pub trait EchoTransport: Send {
    /// Send echo request `seq` and wait up to `timeout` for the reply
    ///
    /// # Returns
    ///
    /// Time between sending the request and receiving the reply
    async fn echo(&mut self, seq: u16, timeout: Duration) -> Result<Duration, AttemptError>;
}

/// Echo transport backed by an ICMP socket
///
/// The socket lives as long as this value and is closed when it is
/// dropped.
pub struct IcmpTransport {
    _client: Client,
    pinger: Pinger,
    payload: Vec<u8>,
}

impl IcmpTransport {
    /// Open an ICMP socket towards `target`
    pub async fn open(target: IpAddr) -> Result<Self, ProbeError> {
        let config = match target {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).map_err(ProbeError::TransportUnavailable)?;
        let pinger = client.pinger(target, PingIdentifier(rand::random())).await;

        Ok(Self {
            _client: client,
            pinger,
            payload: vec![0; ICMP_PAYLOAD_SIZE],
        })
    }
}

#[async_trait]
impl EchoTransport for IcmpTransport {
    async fn echo(&mut self, seq: u16, timeout: Duration) -> Result<Duration, AttemptError> {
        self.pinger.timeout(timeout);
        let start = Instant::now();
        match self.pinger.ping(PingSequence(seq), &self.payload).await {
            Ok(_) => Ok(start.elapsed()),
            Err(SurgeError::Timeout { .. }) => Err(AttemptError::Timeout),
            Err(e) => Err(AttemptError::Transport(e.to_string())),
        }
    }
}

/// Sequential probe loop over an [`EchoTransport`]
pub struct Prober<T> {
    config: ProbeConfig,
    transport: T,
}

impl<T: EchoTransport> Prober<T> {
    /// Create a prober owning `transport` for the duration of one run
    pub fn new(config: ProbeConfig, transport: T) -> Self {
        Self { config, transport }
    }

    /// Run every attempt and return the accumulated result
    ///
    /// Attempts never overlap: each waits for its reply or timeout
    /// before the next request is sent. Failed attempts are counted as
    /// lost. The transport is dropped when the run ends.
    pub async fn run(mut self) -> ProbeResult {
        let timeout = self.config.per_packet_timeout;
        let mut result = ProbeResult::new();
        let mut transport_failures = 0u64;

        for attempt in 0..self.config.packet_count {
            // ICMP sequence numbers are 16 bits and wrap
            let seq = (attempt % 0x1_0000) as u16;
            let outcome = match self.transport.echo(seq, timeout).await {
                Ok(rtt) => {
                    let latency_ms = rtt.as_nanos() as f64 / 1_000_000.0;
                    debug!("seq={} reply in {:.3} ms", seq, latency_ms);
                    PacketOutcome::Success { latency_ms }
                }
                Err(AttemptError::Timeout) => {
                    debug!("seq={} timed out after {:?}", seq, timeout);
                    PacketOutcome::Lost
                }
                Err(AttemptError::Transport(reason)) => {
                    transport_failures += 1;
                    if transport_failures == 1 {
                        warn!(
                            "seq={} failed: {} (further failures logged at debug level)",
                            seq, reason
                        );
                    } else {
                        debug!("seq={} failed: {}", seq, reason);
                    }
                    PacketOutcome::Lost
                }
            };
            result.record(outcome);
        }

        if transport_failures > 1 {
            info!(
                "{} of {} attempts failed at the transport level",
                transport_failures, result.sent
            );
        }

        result
    }
}

/// Turn the configured target into an address
///
/// Literal IPv4/IPv6 addresses are used as is; names go through the
/// system resolver and the first address returned wins.
pub async fn resolve_target(host: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let unresolved = |source: io::Error| ProbeError::UnresolvedTarget {
        host: host.to_string(),
        source,
    };
    let mut addrs = tokio::net::lookup_host((host, 0)).await.map_err(unresolved)?;
    match addrs.next() {
        Some(addr) => Ok(addr.ip()),
        None => Err(unresolved(io::Error::new(
            io::ErrorKind::NotFound,
            "name has no addresses",
        ))),
    }
}

/// Probe the configured target over ICMP
///
/// Fails before any attempt is counted if the target does not resolve
/// or the ICMP socket cannot be opened.
pub async fn probe(config: &ProbeConfig) -> Result<ProbeResult, ProbeError> {
    probe_with(config, IcmpTransport::open).await
}

/// Probe the configured target over the transport returned by `open`
///
/// `open` receives the resolved address. When it fails no attempt is
/// made and the error is returned as is.
pub async fn probe_with<T, F, Fut>(
    config: &ProbeConfig,
    open: F,
) -> Result<ProbeResult, ProbeError>
where
    T: EchoTransport,
    F: FnOnce(IpAddr) -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let target = resolve_target(&config.target_host).await?;
    let transport = open(target).await?;

    info!(
        "Sending {} ICMP packets to {} ({}), timeout {:?}",
        config.packet_count, config.target_host, target, config.per_packet_timeout
    );

    Ok(Prober::new(config.clone(), transport).run().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays a fixed list of replies and records what was asked of it
    struct ScriptedTransport {
        replies: VecDeque<Result<Duration, AttemptError>>,
        seen: Arc<Mutex<Vec<(u16, Duration)>>>,
        dropped: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<Duration, AttemptError>>) -> Self {
            Self {
                replies: replies.into(),
                seen: Arc::new(Mutex::new(Vec::new())),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Drop for ScriptedTransport {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EchoTransport for ScriptedTransport {
        async fn echo(&mut self, seq: u16, timeout: Duration) -> Result<Duration, AttemptError> {
            self.seen.lock().unwrap().push((seq, timeout));
            self.replies.pop_front().unwrap_or(Err(AttemptError::Timeout))
        }
    }

    fn config(packet_count: u32) -> ProbeConfig {
        ProbeConfig {
            target_host: "192.0.2.1".to_string(),
            packet_count,
            per_packet_timeout: Duration::from_secs(1),
            percentiles: vec![50.0],
        }
    }

    fn reply(ms: u64) -> Result<Duration, AttemptError> {
        Ok(Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn test_run_mixed_outcomes() {
        let transport = ScriptedTransport::new(vec![
            reply(10),
            reply(12),
            Err(AttemptError::Timeout),
            reply(14),
        ]);

        let result = Prober::new(config(4), transport).run().await;

        assert_eq!(result.sent, 4);
        assert_eq!(result.lost, 1);
        assert_eq!(result.latencies, vec![10.0, 12.0, 14.0]);
        assert_eq!(result.jitters, vec![2.0, 2.0]);
        assert!(result.is_consistent());
    }

    #[tokio::test]
    async fn test_run_zero_packets() {
        let transport = ScriptedTransport::new(vec![reply(10)]);
        let seen = Arc::clone(&transport.seen);

        let result = Prober::new(config(0), transport).run().await;

        assert_eq!(result, ProbeResult::new());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_counts_as_lost() {
        let transport = ScriptedTransport::new(vec![
            reply(10),
            Err(AttemptError::Transport("network unreachable".to_string())),
            Err(AttemptError::Transport("network unreachable".to_string())),
            reply(30),
        ]);

        let result = Prober::new(config(4), transport).run().await;

        assert_eq!(result.sent, 4);
        assert_eq!(result.lost, 2);
        assert_eq!(result.jitters, vec![20.0]);
    }

    #[tokio::test]
    async fn test_sequence_and_timeout_per_attempt() {
        let transport = ScriptedTransport::new(vec![reply(1), reply(2), reply(3)]);
        let seen = Arc::clone(&transport.seen);

        let _ = Prober::new(config(3), transport).run().await;

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (0, Duration::from_secs(1)),
                (1, Duration::from_secs(1)),
                (2, Duration::from_secs(1)),
            ]
        );
    }

    #[tokio::test]
    async fn test_transport_released_after_run() {
        let transport = ScriptedTransport::new(vec![]);
        let dropped = Arc::clone(&transport.dropped);

        let result = Prober::new(config(2), transport).run().await;

        assert_eq!(result.lost, 2);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_resolve_target_literal_addresses() {
        let v4 = resolve_target("192.0.2.7").await.unwrap();
        let v6 = resolve_target("2001:db8::7").await.unwrap();

        assert_eq!(v4.to_string(), "192.0.2.7");
        assert!(v6.is_ipv6());
        assert_eq!(v6.to_string(), "2001:db8::7");
    }

    #[tokio::test]
    async fn test_probe_unresolved_target() {
        let mut cfg = config(1);
        cfg.target_host = "host.invalid".to_string();

        let err = probe(&cfg).await.unwrap_err();

        match err {
            ProbeError::UnresolvedTarget { host, .. } => assert_eq!(host, "host.invalid"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unavailable_transport_stops_before_any_attempt() {
        let opened_for = Arc::new(Mutex::new(None));
        let opened = Arc::clone(&opened_for);

        let outcome = probe_with(&config(5), |target| async move {
            *opened.lock().unwrap() = Some(target);
            Err::<ScriptedTransport, _>(ProbeError::TransportUnavailable(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "operation not permitted",
            )))
        })
        .await;

        assert!(matches!(outcome, Err(ProbeError::TransportUnavailable(_))));
        assert_eq!(
            *opened_for.lock().unwrap(),
            Some("192.0.2.1".parse::<IpAddr>().unwrap())
        );
    }

    #[tokio::test]
    async fn test_opened_transport_is_run_and_released() {
        let transport = ScriptedTransport::new(vec![reply(5), reply(9)]);
        let dropped = Arc::clone(&transport.dropped);

        let result = probe_with(&config(2), |_| async move { Ok(transport) })
            .await
            .unwrap();

        assert_eq!(result.sent, 2);
        assert_eq!(result.latencies, vec![5.0, 9.0]);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_sequence_number_wraps() {
        let transport = ScriptedTransport::new(vec![]);
        let seen = Arc::clone(&transport.seen);

        let result = Prober::new(config(0x1_0002), transport).run().await;

        assert_eq!(result.sent, 0x1_0002);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0xFFFF].0, 0xFFFF);
        assert_eq!(seen[0x1_0000].0, 0);
        assert_eq!(seen[0x1_0001].0, 1);
    }
}
