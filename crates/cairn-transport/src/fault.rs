//! Fault-injecting transport wrapper.
//!
//! Wraps another transport and fails selected operations according to a
//! script: per location or for every call, a fixed number of times or
//! forever. Optional latency makes overlapping transfers observable.

use crate::factory::TransportType;
use crate::transport::{ChunkLocation, ChunkTransport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Failure to inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Report a timeout
    Timeout,
    /// Report a dropped connection
    ConnectionReset,
    /// Report a server error with the given status
    Server(u16),
    /// Report a client error with the given status
    Client(u16),
    /// Report an authorization failure
    Unauthorized,
    /// Stall for the given duration, then perform the real operation
    Stall(Duration),
}

impl Fault {
    fn into_error(self, location: &ChunkLocation) -> Option<TransportError> {
        match self {
            Self::Timeout => Some(TransportError::Timeout),
            Self::ConnectionReset => Some(TransportError::ConnectionReset(format!(
                "injected reset at {location}"
            ))),
            Self::Server(status) => Some(TransportError::Server {
                status,
                message: "injected".into(),
            }),
            Self::Client(status) => Some(TransportError::Client {
                status,
                message: "injected".into(),
            }),
            Self::Unauthorized => Some(TransportError::Unauthorized("injected".into())),
            Self::Stall(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    fault: Fault,
    /// `None` fails forever
    remaining: Option<u32>,
}

impl Rule {
    /// Consume one firing of the rule; returns the fault if it fires.
    fn fire(&mut self) -> Option<Fault> {
        match &mut self.remaining {
            None => Some(self.fault),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.fault)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Put,
    Get,
}

/// Transport wrapper that injects scripted faults
pub struct FaultyTransport {
    inner: Arc<dyn ChunkTransport>,
    by_location: DashMap<(Op, ChunkLocation), Rule>,
    global: Mutex<Vec<(Op, Rule)>>,
    latency: Mutex<Duration>,
    put_calls: DashMap<ChunkLocation, u64>,
    total_calls: AtomicU64,
}

impl FaultyTransport {
    /// Wrap `inner` with no faults scheduled
    pub fn new(inner: Arc<dyn ChunkTransport>) -> Self {
        Self {
            inner,
            by_location: DashMap::new(),
            global: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            put_calls: DashMap::new(),
            total_calls: AtomicU64::new(0),
        }
    }

    /// Fail PUTs to `location`; `times = None` fails forever
    pub fn fail_put(&self, location: ChunkLocation, fault: Fault, times: Option<u32>) {
        self.by_location.insert(
            (Op::Put, location),
            Rule {
                fault,
                remaining: times,
            },
        );
    }

    /// Fail GETs from `location`; `times = None` fails forever
    pub fn fail_get(&self, location: ChunkLocation, fault: Fault, times: Option<u32>) {
        self.by_location.insert(
            (Op::Get, location),
            Rule {
                fault,
                remaining: times,
            },
        );
    }

    /// Fail the next `times` PUTs regardless of location
    pub fn fail_any_put(&self, fault: Fault, times: u32) {
        if let Ok(mut global) = self.global.lock() {
            global.push((
                Op::Put,
                Rule {
                    fault,
                    remaining: Some(times),
                },
            ));
        }
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    /// Remove all scheduled faults
    pub fn clear(&self) {
        self.by_location.clear();
        if let Ok(mut global) = self.global.lock() {
            global.clear();
        }
    }

    /// Number of PUT attempts made against `location`
    #[must_use]
    pub fn put_attempts(&self, location: &ChunkLocation) -> u64 {
        self.put_calls.get(location).map(|c| *c).unwrap_or(0)
    }

    /// Number of PUT and GET calls seen
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    fn next_fault(&self, op: Op, location: &ChunkLocation) -> Option<Fault> {
        if let Some(mut rule) = self.by_location.get_mut(&(op, location.clone()))
            && let Some(fault) = rule.fire()
        {
            return Some(fault);
        }

        let mut global = self.global.lock().ok()?;
        global
            .iter_mut()
            .filter(|(rule_op, _)| *rule_op == op)
            .find_map(|(_, rule)| rule.fire())
    }

    async fn before(&self, op: Op, location: &ChunkLocation) -> TransportResult<()> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if op == Op::Put {
            *self.put_calls.entry(location.clone()).or_insert(0) += 1;
        }

        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.next_fault(op, location) {
            Some(Fault::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Some(fault) => match fault.into_error(location) {
                Some(err) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChunkTransport for FaultyTransport {
    async fn put_bytes(&self, location: &ChunkLocation, data: Bytes) -> TransportResult<String> {
        self.before(Op::Put, location).await?;
        self.inner.put_bytes(location, data).await
    }

    async fn get_bytes(&self, location: &ChunkLocation) -> TransportResult<Bytes> {
        self.before(Op::Get, location).await?;
        self.inner.get_bytes(location).await
    }

    async fn delete_bytes(&self, location: &ChunkLocation) -> TransportResult<()> {
        self.inner.delete_bytes(location).await
    }

    fn transport_type(&self) -> TransportType {
        self.inner.transport_type()
    }

    fn stats(&self) -> TransportStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;

    fn wrapped() -> FaultyTransport {
        FaultyTransport::new(Arc::new(MemoryTransport::new()))
    }

    #[tokio::test]
    async fn test_fails_n_times_then_succeeds() {
        let transport = wrapped();
        let loc = ChunkLocation::from("k");
        transport.fail_put(loc.clone(), Fault::Server(503), Some(2));

        for _ in 0..2 {
            let err = transport
                .put_bytes(&loc, Bytes::from_static(b"x"))
                .await
                .unwrap_err();
            assert!(matches!(err, TransportError::Server { status: 503, .. }));
        }
        transport
            .put_bytes(&loc, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(transport.put_attempts(&loc), 3);
    }

    #[tokio::test]
    async fn test_permanent_fault_only_hits_its_location() {
        let transport = wrapped();
        let bad = ChunkLocation::from("bad");
        let good = ChunkLocation::from("good");
        transport.fail_put(bad.clone(), Fault::Unauthorized, None);

        for _ in 0..3 {
            assert!(
                transport
                    .put_bytes(&bad, Bytes::from_static(b"x"))
                    .await
                    .is_err()
            );
        }
        transport
            .put_bytes(&good, Bytes::from_static(b"y"))
            .await
            .unwrap();
        assert_eq!(transport.total_calls(), 4);
    }

    #[tokio::test]
    async fn test_get_faults_and_clear() {
        let transport = wrapped();
        let loc = ChunkLocation::from("k");
        transport
            .put_bytes(&loc, Bytes::from_static(b"data"))
            .await
            .unwrap();
        transport.fail_get(loc.clone(), Fault::ConnectionReset, None);
        assert!(transport.get_bytes(&loc).await.is_err());

        transport.clear();
        assert_eq!(&transport.get_bytes(&loc).await.unwrap()[..], b"data");
    }

    #[tokio::test]
    async fn test_global_put_faults() {
        let transport = wrapped();
        transport.fail_any_put(Fault::Timeout, 1);
        assert!(matches!(
            transport
                .put_bytes(&ChunkLocation::from("a"), Bytes::new())
                .await,
            Err(TransportError::Timeout)
        ));
        transport
            .put_bytes(&ChunkLocation::from("b"), Bytes::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_delays_then_succeeds() {
        let transport = wrapped();
        let loc = ChunkLocation::from("slow");
        transport.fail_put(loc.clone(), Fault::Stall(Duration::from_secs(5)), Some(1));

        let start = tokio::time::Instant::now();
        transport
            .put_bytes(&loc, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
