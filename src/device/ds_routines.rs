//! Device Server Routines
//!
//! The I/O worker: a single consumer that drains the request queue, resolves
//! each request's driver, runs it and raises the device's completion
//! interrupt.
//!
//! One worker iteration ([`IoWorker::process_next`]) is:
//! 1. wait up to the poll interval for a request
//! 2. look up the driver (no driver: drop the request)
//! 3. mark the device busy (already busy: requeue at the tail)
//! 4. run the driver operation (a panicking driver fails the request)
//! 5. raise `<NAME>_COMPLETE`, which frees accounted bytes and clears busy

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::conf::{DriverTable, IoCompletion};
use crate::device::dev_hdr::DeviceId;
use crate::device::io_req::{IoQueue, IoReqId, IoRequest};
use crate::error::{DeviceError, Result};
use crate::interrupt::InterruptTable;

// ============================================================================
// Statistics
// ============================================================================

/// Worker counters
#[derive(Debug, Default)]
pub struct IoStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`IoStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    /// Requests taken off the queue
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Busy-device requeues
    pub requeued: u64,
    /// No driver, or requeue onto a full queue
    pub dropped: u64,
}

impl IoStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &StepOutcome) {
        let counter = match outcome {
            StepOutcome::Idle => return,
            StepOutcome::Completed { .. } => &self.succeeded,
            StepOutcome::Failed { .. } => &self.failed,
            StepOutcome::Requeued { .. } => &self.requeued,
            StepOutcome::Dropped { .. } => &self.dropped,
        };
        self.processed.fetch_add(1, Ordering::Relaxed);
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl core::fmt::Display for IoStatsSnapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "processed {}, succeeded {}, failed {}, requeued {}, dropped {}",
            self.processed, self.succeeded, self.failed, self.requeued, self.dropped
        )
    }
}

// ============================================================================
// Worker
// ============================================================================

/// What one worker iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing arrived within the wait window
    Idle,
    Completed {
        id: IoReqId,
        device: DeviceId,
        completion: IoCompletion,
    },
    Failed {
        id: IoReqId,
        device: DeviceId,
        error: DeviceError,
    },
    /// Device was busy, request went back to the tail
    Requeued { id: IoReqId, device: DeviceId },
    Dropped {
        id: IoReqId,
        device: DeviceId,
        error: DeviceError,
    },
}

impl StepOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, StepOutcome::Idle)
    }

    /// Request id, `None` for an idle step
    pub fn request(&self) -> Option<IoReqId> {
        match self {
            StepOutcome::Idle => None,
            StepOutcome::Completed { id, .. }
            | StepOutcome::Failed { id, .. }
            | StepOutcome::Requeued { id, .. }
            | StepOutcome::Dropped { id, .. } => Some(*id),
        }
    }
}

/// Queue consumer
pub struct IoWorker {
    queue: Arc<IoQueue>,
    drivers: Arc<DriverTable>,
    interrupts: Arc<InterruptTable>,
    stats: Arc<IoStats>,
    poll_interval: Duration,
    reporter: Option<Sender<StepOutcome>>,
}

impl IoWorker {
    pub fn new(
        queue: Arc<IoQueue>,
        drivers: Arc<DriverTable>,
        interrupts: Arc<InterruptTable>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            drivers,
            interrupts,
            stats: Arc::new(IoStats::new()),
            poll_interval,
            reporter: None,
        }
    }

    /// Share an existing counter set
    pub fn with_stats(mut self, stats: Arc<IoStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Send every non-idle outcome to `tx`
    pub fn with_reporter(mut self, tx: Sender<StepOutcome>) -> Self {
        self.reporter = Some(tx);
        self
    }

    pub fn stats(&self) -> &Arc<IoStats> {
        &self.stats
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run one iteration on the calling thread
    pub fn process_next(&self, timeout: Duration) -> StepOutcome {
        let outcome = match self.queue.dequeue_timeout(timeout) {
            Some(req) => self.dispatch(req),
            None => return StepOutcome::Idle,
        };
        self.stats.record(&outcome);
        if let Some(tx) = &self.reporter {
            // Receiver may have gone away; the outcome is still counted
            let _ = tx.send(outcome.clone());
        }
        outcome
    }

    /// Drain the queue on the calling thread, returns the outcomes in order
    ///
    /// Stops when the queue is empty, or after a full pass in which every
    /// request was requeued because its device stayed busy.
    pub fn run_until_idle(&self) -> Vec<StepOutcome> {
        let mut outcomes = Vec::new();
        let mut requeue_streak = 0;
        loop {
            let outcome = self.process_next(Duration::ZERO);
            match outcome {
                StepOutcome::Idle => return outcomes,
                StepOutcome::Requeued { .. } => requeue_streak += 1,
                _ => requeue_streak = 0,
            }
            outcomes.push(outcome);
            if requeue_streak > 0 && requeue_streak >= self.queue.len() {
                log::debug!(
                    target: "worker",
                    "{} requests waiting on busy devices",
                    self.queue.len()
                );
                return outcomes;
            }
        }
    }

    fn dispatch(&self, req: IoRequest) -> StepOutcome {
        let id = req.id();
        let device_id = req.device_id();

        let driver = match self.drivers.lookup(device_id) {
            Ok(driver) => driver,
            Err(error) => {
                log::error!(target: "worker", "{}: {}, request skipped", id, error);
                return StepOutcome::Dropped {
                    id,
                    device: device_id,
                    error,
                };
            }
        };

        if !driver.device().try_acquire() {
            log::info!(
                target: "worker",
                "{} is busy, re-enqueueing {}",
                driver.name(),
                id
            );
            return match self.queue.requeue(req) {
                Ok(()) => StepOutcome::Requeued {
                    id,
                    device: device_id,
                },
                Err(error) => StepOutcome::Dropped {
                    id,
                    device: device_id,
                    error,
                },
            };
        }

        log::debug!(target: "worker", "{} {} on {}", id, req.op(), driver.name());
        let result = panic::catch_unwind(AssertUnwindSafe(|| driver.perform(&req)))
            .unwrap_or_else(|payload| {
                Err(DeviceError::DriverPanicked {
                    device: String::from(driver.name()),
                    message: panic_message(&*payload),
                })
            });

        let event = driver.completion_event();
        if let Err(e) = self.interrupts.trigger(&event, &[]) {
            log::warn!(target: "worker", "{}, completing {} directly", e, driver.name());
            driver.device().complete();
        }

        match result {
            Ok(completion) => StepOutcome::Completed {
                id,
                device: device_id,
                completion,
            },
            Err(error) => {
                log::error!(target: "worker", "{} on {} failed: {}", id, driver.name(), error);
                StepOutcome::Failed {
                    id,
                    device: device_id,
                    error,
                }
            }
        }
    }

    /// Move the worker onto its own thread
    pub fn spawn(self) -> Result<WorkerHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let queue = Arc::clone(&self.queue);
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name(String::from("io-worker"))
            .spawn(move || {
                log::info!(target: "worker", "I/O worker started");
                while flag.load(Ordering::SeqCst) {
                    self.process_next(self.poll_interval);
                }
                log::info!(target: "worker", "I/O worker stopped");
            })
            .map_err(|e| DeviceError::WorkerSpawn(e.to_string()))?;

        Ok(WorkerHandle {
            running,
            queue,
            thread: Some(thread),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        String::from(*msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("unknown panic")
    }
}

/// Owner of a running worker thread, stops it on drop
pub struct WorkerHandle {
    running: Arc<AtomicBool>,
    queue: Arc<IoQueue>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Whether the worker thread is alive and has not been told to stop
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the worker thread, leaving pending requests queued
    ///
    /// Returns false if there was no thread to stop.
    pub fn halt(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return false;
        };
        self.running.store(false, Ordering::SeqCst);
        self.queue.wake();
        if thread.join().is_err() {
            log::error!(target: "worker", "I/O worker panicked");
        }
        true
    }

    /// Stop the worker and discard pending requests
    ///
    /// Returns how many requests were discarded. Blocks until the worker
    /// finishes its current wait window or request.
    pub fn stop(&mut self) -> usize {
        if !self.halt() {
            return 0;
        }
        let discarded = self.queue.clear();
        if discarded > 0 {
            log::warn!(target: "worker", "{} pending requests discarded", discarded);
        }
        discarded
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::conf::{DeviceDetail, DeviceKind, Driver, DriverStatus};
    use crate::device::dev_hdr::{Device, DeviceControlBlock};
    use crate::device::io_req::IoOp;
    use std::sync::mpsc;

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Echo,
        Fail,
        Panic,
    }

    /// Echoes payloads back, or fails or panics on every request
    struct EchoDriver {
        dcb: Arc<DeviceControlBlock>,
        device: Arc<Device>,
        mode: Mode,
    }

    impl EchoDriver {
        fn register(
            id: u32,
            name: &str,
            mode: Mode,
            drivers: &DriverTable,
            interrupts: &InterruptTable,
        ) -> Arc<Self> {
            let driver = Arc::new(Self {
                dcb: Arc::new(DeviceControlBlock::new(DeviceId(id), name, 0)),
                device: Arc::new(Device::new(name, 16)),
                mode,
            });
            let device = Arc::clone(&driver.device);
            interrupts.register(&driver.completion_event(), move |_| {
                device.complete();
            });
            drivers.register(DeviceId(id), driver.clone());
            driver
        }
    }

    impl Driver for EchoDriver {
        fn dcb(&self) -> &Arc<DeviceControlBlock> {
            &self.dcb
        }

        fn device(&self) -> &Arc<Device> {
            &self.device
        }

        fn kind(&self) -> DeviceKind {
            DeviceKind::Input
        }

        fn perform(&self, req: &IoRequest) -> Result<IoCompletion> {
            match self.mode {
                Mode::Echo => {}
                Mode::Fail => {
                    return Err(DeviceError::SimulatedFault {
                        device: String::from(self.name()),
                        op: req.op().as_str(),
                    })
                }
                Mode::Panic => panic!("echo device wedged"),
            }
            Ok(IoCompletion::read(None, req.payload().unwrap_or(&[]).to_vec()))
        }

        fn status(&self) -> DriverStatus {
            DriverStatus {
                id: self.id(),
                name: String::from(self.name()),
                kind: self.kind(),
                busy: self.device.is_busy(),
                connection: self.dcb.state(),
                detail: DeviceDetail::Input { pending_events: 0 },
            }
        }
    }

    struct Fixture {
        queue: Arc<IoQueue>,
        drivers: Arc<DriverTable>,
        interrupts: Arc<InterruptTable>,
    }

    impl Fixture {
        fn new(capacity: usize) -> Self {
            Self {
                queue: Arc::new(IoQueue::with_capacity(capacity)),
                drivers: Arc::new(DriverTable::new()),
                interrupts: Arc::new(InterruptTable::new()),
            }
        }

        fn worker(&self) -> IoWorker {
            IoWorker::new(
                Arc::clone(&self.queue),
                Arc::clone(&self.drivers),
                Arc::clone(&self.interrupts),
                Duration::from_millis(20),
            )
        }
    }

    #[test]
    fn test_idle_on_empty_queue() {
        let fx = Fixture::new(4);
        let worker = fx.worker();
        assert_eq!(worker.process_next(Duration::ZERO), StepOutcome::Idle);
        assert_eq!(worker.stats().snapshot(), IoStatsSnapshot::default());
    }

    #[test]
    fn test_completed_request_clears_busy() {
        let fx = Fixture::new(4);
        let echo = EchoDriver::register(0, "Echo", Mode::Echo, &fx.drivers, &fx.interrupts);
        let worker = fx.worker();

        fx.queue
            .enqueue(IoRequest::write(DeviceId(0), b"ping".to_vec()))
            .unwrap();
        match worker.process_next(Duration::ZERO) {
            StepOutcome::Completed { completion, .. } => {
                assert_eq!(completion.data, b"ping".to_vec())
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!echo.device().is_busy());
        assert_eq!(worker.stats().snapshot().succeeded, 1);
    }

    #[test]
    fn test_unregistered_device_is_dropped_and_worker_continues() {
        let fx = Fixture::new(4);
        EchoDriver::register(0, "Echo", Mode::Echo, &fx.drivers, &fx.interrupts);
        let worker = fx.worker();

        fx.queue.enqueue(IoRequest::read(DeviceId(9))).unwrap();
        fx.queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        let outcomes = worker.run_until_idle();

        assert!(matches!(
            outcomes[0],
            StepOutcome::Dropped {
                error: DeviceError::NoDriverRegistered(DeviceId(9)),
                ..
            }
        ));
        assert!(matches!(outcomes[1], StepOutcome::Completed { .. }));
    }

    #[test]
    fn test_busy_device_requeued_at_tail() {
        let fx = Fixture::new(4);
        let echo = EchoDriver::register(0, "Echo", Mode::Echo, &fx.drivers, &fx.interrupts);
        let worker = fx.worker();

        assert!(echo.device().try_acquire());
        let first = fx
            .queue
            .enqueue(IoRequest::write(DeviceId(0), b"a".to_vec()))
            .unwrap();
        fx.queue.enqueue(IoRequest::read(DeviceId(7))).unwrap();

        assert_eq!(
            worker.process_next(Duration::ZERO),
            StepOutcome::Requeued {
                id: first,
                device: DeviceId(0)
            }
        );
        let tail = fx.queue.snapshot();
        assert_eq!(tail.last().map(IoRequest::id), Some(first));
        assert_eq!(tail.last().map(IoRequest::op), Some(IoOp::Write));
    }

    #[test]
    fn test_run_until_idle_returns_when_only_busy_devices_remain() {
        let fx = Fixture::new(4);
        let echo = EchoDriver::register(0, "Echo", Mode::Echo, &fx.drivers, &fx.interrupts);
        let worker = fx.worker();
        assert!(echo.device().try_acquire());

        let id = fx.queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        let outcomes = worker.run_until_idle();
        assert_eq!(
            outcomes,
            vec![StepOutcome::Requeued {
                id,
                device: DeviceId(0)
            }]
        );
        assert_eq!(fx.queue.len(), 1);

        echo.device().complete();
        assert!(matches!(
            worker.run_until_idle().as_slice(),
            [StepOutcome::Completed { .. }]
        ));
    }

    #[test]
    fn test_run_until_idle_keeps_serving_free_devices() {
        let fx = Fixture::new(4);
        let busy = EchoDriver::register(0, "Busy", Mode::Echo, &fx.drivers, &fx.interrupts);
        EchoDriver::register(1, "Free", Mode::Echo, &fx.drivers, &fx.interrupts);
        let worker = fx.worker();
        assert!(busy.device().try_acquire());

        fx.queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        fx.queue.enqueue(IoRequest::read(DeviceId(1))).unwrap();
        fx.queue.enqueue(IoRequest::read(DeviceId(1))).unwrap();
        let outcomes = worker.run_until_idle();

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, StepOutcome::Completed { .. }))
            .count();
        assert_eq!(completed, 2);
        assert_eq!(fx.queue.len(), 1);
    }

    #[test]
    fn test_panicking_driver_fails_request_and_completes_device() {
        let fx = Fixture::new(4);
        let echo = EchoDriver::register(0, "Echo", Mode::Panic, &fx.drivers, &fx.interrupts);
        let worker = fx.worker();

        fx.queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        match worker.process_next(Duration::ZERO) {
            StepOutcome::Failed {
                error: DeviceError::DriverPanicked { device, message },
                ..
            } => {
                assert_eq!(device, "Echo");
                assert_eq!(message, "echo device wedged");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!echo.device().is_busy());
    }

    #[test]
    fn test_spawned_worker_survives_panicking_driver() {
        let fx = Fixture::new(4);
        EchoDriver::register(0, "Wedged", Mode::Panic, &fx.drivers, &fx.interrupts);
        EchoDriver::register(1, "Echo", Mode::Echo, &fx.drivers, &fx.interrupts);
        let (tx, rx) = mpsc::channel();
        let mut handle = fx.worker().with_reporter(tx).spawn().unwrap();

        fx.queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        fx.queue.enqueue(IoRequest::read(DeviceId(1))).unwrap();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, StepOutcome::Failed { .. }));
        assert!(matches!(second, StepOutcome::Completed { .. }));
        assert!(handle.is_running());
        handle.stop();
    }

    #[test]
    fn test_requeue_onto_full_queue_drops() {
        let fx = Fixture::new(1);
        let echo = EchoDriver::register(0, "Echo", Mode::Echo, &fx.drivers, &fx.interrupts);
        let worker = fx.worker();
        assert!(echo.device().try_acquire());

        fx.queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        // Refill the slot the worker is about to free
        let queue = Arc::clone(&fx.queue);
        let req = queue.try_dequeue().unwrap();
        queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        let outcome = worker.dispatch(req);
        assert!(matches!(
            outcome,
            StepOutcome::Dropped {
                error: DeviceError::QueueFull { capacity: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_failure_still_completes_device() {
        let fx = Fixture::new(4);
        let echo = EchoDriver::register(0, "Echo", Mode::Fail, &fx.drivers, &fx.interrupts);
        let worker = fx.worker();

        fx.queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        assert!(matches!(
            worker.process_next(Duration::ZERO),
            StepOutcome::Failed { .. }
        ));
        assert!(!echo.device().is_busy());
        assert_eq!(worker.stats().snapshot().failed, 1);
    }

    #[test]
    fn test_missing_completion_handler_falls_back() {
        let fx = Fixture::new(4);
        let echo = EchoDriver::register(0, "Echo", Mode::Echo, &fx.drivers, &fx.interrupts);
        fx.interrupts.unregister(&echo.completion_event());
        let worker = fx.worker();

        fx.queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        worker.process_next(Duration::ZERO);
        assert!(!echo.device().is_busy());
    }

    #[test]
    fn test_spawned_worker_reports_and_stops() {
        let fx = Fixture::new(4);
        EchoDriver::register(0, "Echo", Mode::Echo, &fx.drivers, &fx.interrupts);
        let (tx, rx) = mpsc::channel();
        let mut handle = fx.worker().with_reporter(tx).spawn().unwrap();

        let id = fx
            .queue
            .enqueue(IoRequest::write(DeviceId(0), b"bg".to_vec()))
            .unwrap();
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.request(), Some(id));

        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_stop_discards_pending() {
        let fx = Fixture::new(4);
        let mut handle = fx.worker().spawn().unwrap();
        handle.stop();

        fx.queue.enqueue(IoRequest::read(DeviceId(0))).unwrap();
        // Already stopped, second stop is a no-op
        assert_eq!(handle.stop(), 0);
        assert_eq!(fx.queue.len(), 1);
    }
}
