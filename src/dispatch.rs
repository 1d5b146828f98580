//! Haptic dispatch queue
//!
//! Producers call [`HapticHandle::request_effect`], which validates the
//! effect and pushes it onto a bounded channel without waiting. A single
//! consumer task drains the channel in order and performs the device I/O on
//! the blocking thread pool, one effect at a time.
//!
//! Recovery policy: when a send reports that the device is gone, the
//! session is discarded, the locator is asked once for a replacement, and
//! the same effect is retried once on the new session. If that fails too
//! the effect is abandoned. With no session, every item gets one
//! find/open/send attempt of its own.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::hidpp::{ConnectionType, EffectId};
use crate::locator::DeviceLocator;
use crate::session::{DeviceError, HapticDevice, SendOutcome};

/// Default number of effects buffered ahead of the device
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Consecutive plain transport failures tolerated before the session is dropped
const MAX_CONSECUTIVE_TRANSPORT_FAILURES: u32 = 2;

/// What happened to a `request_effect` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued for delivery
    Accepted,
    /// Queue full or stopped; the request was discarded
    Dropped,
    /// Effect ID outside 0-15; never queued
    Rejected,
}

impl fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueOutcome::Accepted => write!(f, "accepted"),
            EnqueueOutcome::Dropped => write!(f, "dropped"),
            EnqueueOutcome::Rejected => write!(f, "rejected"),
        }
    }
}

/// Snapshot of the dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub accepted: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub abandoned: u64,
}

impl DispatchStats {
    /// Items the consumer has finished with, successfully or not
    pub fn processed(&self) -> u64 {
        self.delivered + self.abandoned
    }
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Producer handle
// ============================================================================

/// Cloneable, non-blocking entry point for effect requests
#[derive(Clone)]
pub struct HapticHandle {
    tx: mpsc::Sender<EffectId>,
    counters: Arc<Counters>,
}

impl HapticHandle {
    /// Queue an effect without waiting
    pub fn request_effect(&self, effect_id: i64) -> EnqueueOutcome {
        let effect = match EffectId::new(effect_id) {
            Ok(effect) => effect,
            Err(e) => {
                tracing::warn!(effect = effect_id, "Rejecting haptic request: {}", e);
                return EnqueueOutcome::Rejected;
            }
        };

        match self.tx.try_send(effect) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(effect = effect.get(), "Haptic effect queued");
                EnqueueOutcome::Accepted
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(effect = effect.get(), "Haptic queue full, dropping event");
                EnqueueOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(effect = effect.get(), "Haptic queue stopped, dropping event");
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Items waiting for the consumer
    pub fn queue_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Maximum number of buffered items
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}

impl fmt::Debug for HapticHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HapticHandle")
            .field("queue_len", &self.queue_len())
            .field("capacity", &self.capacity())
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Owns the queue consumer and, through it, the device session
pub struct HapticManager<L: DeviceLocator> {
    handle: HapticHandle,
    /// Receiver and worker until the consumer is started
    pending: Option<(mpsc::Receiver<EffectId>, Worker<L>)>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    consumer: Option<JoinHandle<Option<Worker<L>>>>,
}

impl<L: DeviceLocator> HapticManager<L> {
    /// Create a stopped manager; nothing is sent until [`start`](Self::start)
    pub fn new(locator: L, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            locator,
            preferred: None,
            device: None,
            transport_failures: 0,
            counters: counters.clone(),
        };

        Self {
            handle: HapticHandle { tx, counters },
            pending: Some((rx, worker)),
            shutdown,
            shutdown_rx,
            consumer: None,
        }
    }

    /// Restrict rediscovery to one connection type
    pub fn with_preferred_connection(mut self, preferred: Option<ConnectionType>) -> Self {
        if let Some((_, worker)) = self.pending.as_mut() {
            worker.preferred = preferred;
        }
        self
    }

    /// Start with an already-acquired device instead of discovering lazily
    pub fn with_device(mut self, device: L::Device) -> Self {
        if let Some((_, worker)) = self.pending.as_mut() {
            worker.device = Some(device);
        }
        self
    }

    pub fn handle(&self) -> HapticHandle {
        self.handle.clone()
    }

    pub fn request_effect(&self, effect_id: i64) -> EnqueueOutcome {
        self.handle.request_effect(effect_id)
    }

    pub fn stats(&self) -> DispatchStats {
        self.handle.stats()
    }

    pub fn is_running(&self) -> bool {
        self.consumer.is_some()
    }

    /// Spawn the consumer task; must be called inside a tokio runtime
    pub fn start(&mut self) {
        let Some((rx, worker)) = self.pending.take() else {
            return;
        };

        let shutdown = self.shutdown_rx.clone();
        self.consumer = Some(tokio::spawn(run_consumer(rx, worker, shutdown)));
        tracing::info!(capacity = self.handle.capacity(), "Haptic dispatch started");
    }

    /// Stop the consumer and close the device
    ///
    /// An in-flight send completes first; queued items are discarded.
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);

        let worker = match self.consumer.take() {
            Some(task) => match task.await {
                Ok(worker) => worker,
                Err(e) => {
                    tracing::error!("Haptic consumer task failed: {}", e);
                    None
                }
            },
            None => self.pending.take().map(|(_, worker)| worker),
        };

        if let Some(mut worker) = worker {
            worker.close_device();
        }

        let stats = self.stats();
        tracing::info!(
            accepted = stats.accepted,
            dropped = stats.dropped,
            delivered = stats.delivered,
            abandoned = stats.abandoned,
            "Haptic dispatch stopped"
        );
    }
}

impl<L: DeviceLocator> Drop for HapticManager<L> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Drain the queue until shutdown or until every producer is gone
async fn run_consumer<L: DeviceLocator>(
    mut rx: mpsc::Receiver<EffectId>,
    mut worker: Worker<L>,
    mut shutdown: watch::Receiver<bool>,
) -> Option<Worker<L>> {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let effect = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            item = rx.recv() => match item {
                Some(effect) => effect,
                None => break,
            },
        };

        let result = tokio::task::spawn_blocking(move || {
            worker.dispatch(effect);
            worker
        })
        .await;

        worker = match result {
            Ok(worker) => worker,
            Err(e) => {
                tracing::error!("Haptic worker panicked: {}", e);
                return None;
            }
        };
    }

    let discarded = rx.len();
    if discarded > 0 {
        tracing::debug!(discarded, "Discarding queued haptic effects on shutdown");
    }
    Some(worker)
}

// ============================================================================
// Worker
// ============================================================================

/// State owned by the consumer: the locator and the current device
struct Worker<L: DeviceLocator> {
    locator: L,
    preferred: Option<ConnectionType>,
    device: Option<L::Device>,
    transport_failures: u32,
    counters: Arc<Counters>,
}

impl<L: DeviceLocator> Worker<L> {
    fn dispatch(&mut self, effect: EffectId) {
        match self.deliver(effect) {
            Ok(outcome) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(effect = effect.get(), outcome = ?outcome, "Haptic effect delivered");
            }
            Err(e) => {
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(effect = effect.get(), error = %e, "Haptic effect abandoned");
            }
        }
    }

    fn deliver(&mut self, effect: EffectId) -> Result<SendOutcome, DeviceError> {
        if self.device.is_none() {
            self.reacquire()?;
            return self.send_once(effect);
        }

        match self.send_once(effect) {
            Err(e) if e.requires_rediscovery() => {
                tracing::warn!(error = %e, "Haptic send failed, rediscovering device");
                self.reacquire()?;
                self.send_once(effect)
            }
            result => result,
        }
    }

    fn send_once(&mut self, effect: EffectId) -> Result<SendOutcome, DeviceError> {
        let device = self.device.as_mut().ok_or(DeviceError::NotOpen)?;

        match device.play(effect) {
            Ok(outcome) => {
                self.transport_failures = 0;
                Ok(outcome)
            }
            Err(e) => {
                if e.requires_rediscovery() {
                    self.discard_device();
                } else if matches!(e, DeviceError::Transport(_)) {
                    self.transport_failures += 1;
                    if self.transport_failures >= MAX_CONSECUTIVE_TRANSPORT_FAILURES {
                        tracing::warn!(
                            failures = self.transport_failures,
                            "Repeated transport failures, dropping haptic device"
                        );
                        self.discard_device();
                    }
                }
                Err(e)
            }
        }
    }

    /// Drop the current device, then find and open a replacement
    fn reacquire(&mut self) -> Result<(), DeviceError> {
        self.discard_device();

        let mut device = self.locator.find(self.preferred).ok_or(DeviceError::NotFound)?;
        device.open()?;
        tracing::info!(connection = %device.connection_type(), "Haptic device reacquired");
        self.device = Some(device);
        Ok(())
    }

    fn discard_device(&mut self) {
        self.transport_failures = 0;
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.close() {
                tracing::debug!(error = %e, "Ignoring close error on discarded device");
            }
        }
    }

    fn close_device(&mut self) {
        if let Some(mut device) = self.device.take() {
            match device.close() {
                Ok(()) => tracing::debug!("Haptic device closed"),
                Err(e) => tracing::warn!(error = %e, "Failed to close haptic device"),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{mpsc as std_mpsc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    enum Fail {
        Disconnect,
        Transport,
    }

    #[derive(Default)]
    struct Log {
        played: Vec<(u32, u8)>,
        finds: usize,
        opens: usize,
        closes: Vec<u32>,
    }

    /// Holds the first `play` until the test releases it
    struct Gate {
        entered: mpsc::UnboundedSender<u8>,
        release: std_mpsc::Receiver<()>,
    }

    struct FakeDevice {
        id: u32,
        log: Arc<Mutex<Log>>,
        script: VecDeque<Fail>,
        deny_open: bool,
        gate: Option<Gate>,
    }

    impl FakeDevice {
        fn new(id: u32, log: &Arc<Mutex<Log>>, script: &[Fail]) -> Self {
            Self {
                id,
                log: log.clone(),
                script: script.iter().copied().collect(),
                deny_open: false,
                gate: None,
            }
        }

        fn denied(id: u32, log: &Arc<Mutex<Log>>) -> Self {
            Self { deny_open: true, ..Self::new(id, log, &[]) }
        }

        /// Device whose first send blocks; returns the "send started" and "release" ends
        fn gated(
            id: u32,
            log: &Arc<Mutex<Log>>,
        ) -> (Self, mpsc::UnboundedReceiver<u8>, std_mpsc::Sender<()>) {
            let (entered, entered_rx) = mpsc::unbounded_channel();
            let (release_tx, release) = std_mpsc::channel();
            let device = Self { gate: Some(Gate { entered, release }), ..Self::new(id, log, &[]) };
            (device, entered_rx, release_tx)
        }
    }

    impl HapticDevice for FakeDevice {
        fn connection_type(&self) -> ConnectionType {
            ConnectionType::Bluetooth
        }

        fn open(&mut self) -> Result<(), DeviceError> {
            self.log.lock().unwrap().opens += 1;
            if self.deny_open {
                return Err(DeviceError::PermissionDenied { path: "/dev/hidraw-denied".into() });
            }
            Ok(())
        }

        fn play(&mut self, effect: EffectId) -> Result<SendOutcome, DeviceError> {
            self.log.lock().unwrap().played.push((self.id, effect.get()));
            if let Some(gate) = self.gate.take() {
                let _ = gate.entered.send(effect.get());
                let _ = gate.release.recv();
            }
            match self.script.pop_front() {
                None => Ok(SendOutcome::Written),
                Some(Fail::Disconnect) => Err(DeviceError::Disconnected(io::Error::from_raw_os_error(libc::ENODEV))),
                Some(Fail::Transport) => Err(DeviceError::Transport(io::Error::from_raw_os_error(libc::EINVAL))),
            }
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.log.lock().unwrap().closes.push(self.id);
            Ok(())
        }
    }

    struct FakeLocator {
        log: Arc<Mutex<Log>>,
        devices: VecDeque<FakeDevice>,
    }

    impl DeviceLocator for FakeLocator {
        type Device = FakeDevice;

        fn find(&mut self, _preferred: Option<ConnectionType>) -> Option<FakeDevice> {
            self.log.lock().unwrap().finds += 1;
            self.devices.pop_front()
        }
    }

    fn manager(log: &Arc<Mutex<Log>>, devices: Vec<FakeDevice>) -> HapticManager<FakeLocator> {
        let locator = FakeLocator { log: log.clone(), devices: devices.into() };
        HapticManager::new(locator, DEFAULT_QUEUE_CAPACITY)
    }

    async fn wait_processed(handle: &HapticHandle, count: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.stats().processed() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("consumer did not finish in time");
    }

    #[tokio::test]
    async fn test_invalid_effect_rejected() {
        let log = Arc::new(Mutex::new(Log::default()));
        let manager = manager(&log, vec![]);

        assert_eq!(manager.request_effect(16), EnqueueOutcome::Rejected);
        assert_eq!(manager.request_effect(-1), EnqueueOutcome::Rejected);
        assert_eq!(manager.handle().queue_len(), 0);
        assert_eq!(manager.stats(), DispatchStats::default());
    }

    #[tokio::test]
    async fn test_overflow_drops_excess_and_keeps_order() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut manager = manager(&log, vec![]).with_device(FakeDevice::new(1, &log, &[]));
        let handle = manager.handle();

        let outcomes: Vec<_> = (0..12).map(|id| handle.request_effect(id)).collect();
        assert_eq!(outcomes.iter().filter(|o| **o == EnqueueOutcome::Accepted).count(), 10);
        assert_eq!(&outcomes[10..], &[EnqueueOutcome::Dropped, EnqueueOutcome::Dropped]);
        assert_eq!(handle.queue_len(), 10);

        manager.start();
        wait_processed(&handle, 10).await;

        let played: Vec<u8> = log.lock().unwrap().played.iter().map(|(_, e)| *e).collect();
        assert_eq!(played, (0..10).collect::<Vec<u8>>());

        let stats = handle.stats();
        assert_eq!(stats.accepted, 10);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.delivered, 10);
        manager.stop().await;
    }

    async fn wait_entered(entered: &mut mpsc::UnboundedReceiver<u8>) -> u8 {
        tokio::time::timeout(Duration::from_secs(5), entered.recv())
            .await
            .expect("send never started")
            .expect("device dropped before sending")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overflow_while_send_in_flight() {
        let log = Arc::new(Mutex::new(Log::default()));
        let (device, mut entered, release) = FakeDevice::gated(1, &log);
        let mut manager = manager(&log, vec![]).with_device(device);
        let handle = manager.handle();
        manager.start();

        assert_eq!(handle.request_effect(0), EnqueueOutcome::Accepted);
        assert_eq!(wait_entered(&mut entered).await, 0);

        // The in-flight item no longer occupies a slot
        let outcomes: Vec<_> = (1..=11).map(|id| handle.request_effect(id)).collect();
        assert_eq!(&outcomes[..10], &[EnqueueOutcome::Accepted; 10]);
        assert_eq!(outcomes[10], EnqueueOutcome::Dropped);
        assert_eq!(handle.queue_len(), 10);

        release.send(()).unwrap();
        wait_processed(&handle, 11).await;

        let played: Vec<u8> = log.lock().unwrap().played.iter().map(|(_, e)| *e).collect();
        assert_eq!(played, (0..=10).collect::<Vec<u8>>());

        let stats = handle.stats();
        assert_eq!(stats.accepted, 11);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.delivered, 11);
        manager.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_lets_in_flight_send_finish_and_discards_queue() {
        let log = Arc::new(Mutex::new(Log::default()));
        let (device, mut entered, release) = FakeDevice::gated(1, &log);
        let mut manager = manager(&log, vec![]).with_device(device);
        let handle = manager.handle();
        manager.start();

        for effect in [1, 2, 3] {
            assert_eq!(handle.request_effect(effect), EnqueueOutcome::Accepted);
        }
        assert_eq!(wait_entered(&mut entered).await, 1);

        let release_later = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            release.send(()).unwrap();
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(manager.stop(), release_later);
        })
        .await
        .expect("stop did not return");

        {
            let log = log.lock().unwrap();
            assert_eq!(log.played, vec![(1, 1)]);
            assert_eq!(log.closes, vec![1]);
        }
        let stats = handle.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.processed(), 1);
        assert_eq!(handle.request_effect(4), EnqueueOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_permission_denied_on_reacquire_abandons_without_looping() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut manager = manager(&log, vec![FakeDevice::denied(2, &log)])
            .with_device(FakeDevice::new(1, &log, &[Fail::Disconnect]));
        let handle = manager.handle();

        manager.start();
        handle.request_effect(8);
        wait_processed(&handle, 1).await;

        {
            let log = log.lock().unwrap();
            assert_eq!(log.finds, 1);
            assert_eq!(log.opens, 1);
            assert_eq!(log.played, vec![(1, 8)]);
        }
        let stats = handle.stats();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.delivered, 0);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_triggers_single_rediscovery() {
        let log = Arc::new(Mutex::new(Log::default()));
        let replacement = FakeDevice::new(2, &log, &[]);
        let mut manager = manager(&log, vec![replacement])
            .with_device(FakeDevice::new(1, &log, &[Fail::Disconnect]));
        let handle = manager.handle();

        manager.start();
        assert_eq!(handle.request_effect(3), EnqueueOutcome::Accepted);
        wait_processed(&handle, 1).await;

        {
            let log = log.lock().unwrap();
            assert_eq!(log.finds, 1);
            assert_eq!(log.opens, 1);
            assert_eq!(log.played, vec![(1, 3), (2, 3)]);
            assert_eq!(log.closes, vec![1]);
        }
        assert_eq!(handle.stats().delivered, 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_failed_retry_abandons_and_continues() {
        let log = Arc::new(Mutex::new(Log::default()));
        let devices = vec![
            FakeDevice::new(2, &log, &[Fail::Disconnect]),
            FakeDevice::new(3, &log, &[]),
        ];
        let mut manager = manager(&log, devices).with_device(FakeDevice::new(1, &log, &[Fail::Disconnect]));
        let handle = manager.handle();

        handle.request_effect(1);
        handle.request_effect(2);
        manager.start();
        wait_processed(&handle, 2).await;

        let stats = handle.stats();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.delivered, 1);

        let log = log.lock().unwrap();
        assert_eq!(log.finds, 2);
        assert_eq!(log.played, vec![(1, 1), (2, 1), (3, 2)]);
    }

    #[tokio::test]
    async fn test_no_device_each_item_tries_once() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut manager = manager(&log, vec![]);
        let handle = manager.handle();

        manager.start();
        handle.request_effect(1);
        handle.request_effect(2);
        wait_processed(&handle, 2).await;

        assert_eq!(log.lock().unwrap().finds, 2);
        assert_eq!(handle.stats().abandoned, 2);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_repeated_transport_errors_force_discard() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut manager = manager(&log, vec![FakeDevice::new(2, &log, &[])])
            .with_device(FakeDevice::new(1, &log, &[Fail::Transport, Fail::Transport]));
        let handle = manager.handle();

        for effect in [1, 2, 3] {
            handle.request_effect(effect);
        }
        manager.start();
        wait_processed(&handle, 3).await;

        let stats = handle.stats();
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.delivered, 1);

        let log = log.lock().unwrap();
        assert_eq!(log.finds, 1);
        assert_eq!(log.closes, vec![1]);
        assert_eq!(log.played.last(), Some(&(2, 3)));
    }

    #[tokio::test]
    async fn test_stop_closes_device_and_rejects_later_requests() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut manager = manager(&log, vec![]).with_device(FakeDevice::new(1, &log, &[]));
        let handle = manager.handle();

        manager.start();
        assert!(manager.is_running());
        handle.request_effect(5);
        wait_processed(&handle, 1).await;

        manager.stop().await;
        assert!(!manager.is_running());
        assert_eq!(log.lock().unwrap().closes, vec![1]);
        assert_eq!(handle.request_effect(5), EnqueueOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_stop_without_start_closes_device() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut manager = manager(&log, vec![]).with_device(FakeDevice::new(7, &log, &[]));
        manager.request_effect(1);

        manager.stop().await;
        let log = log.lock().unwrap();
        assert!(log.played.is_empty());
        assert_eq!(log.closes, vec![7]);
    }

    #[test]
    fn test_capacity_floor() {
        let log = Arc::new(Mutex::new(Log::default()));
        let locator = FakeLocator { log, devices: VecDeque::new() };
        let manager = HapticManager::new(locator, 0);
        assert_eq!(manager.handle().capacity(), 1);
    }
}
