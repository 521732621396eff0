//! # Device Manager
//!
//! Runs every [`DeviceDriver`] on its own blocking worker
//! (`tokio::task::spawn_blocking`) and forwards readings on a channel.
//!
//! Workers are stopped cooperatively: the stop flag is checked between
//! polling cycles and during sleeps, never in the middle of a conversation.
//! A worker that does not finish within the grace period is abandoned.
//!
//! Drivers that must not talk at the same time (two meters behind one
//! gateway, say) share a [`PortLock`], held for the duration of each cycle.

use crate::constants::{DEFAULT_POLL_INTERVAL_MS, DRIVER_ERROR_BACKOFF, WORKER_STOP_GRACE};
use crate::devices::{DeviceDriver, Reading};
use crate::error::MeterLinkError;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Serialises access to a resource shared by several drivers.
#[derive(Debug, Clone, Default)]
pub struct PortLock(Arc<Mutex<()>>);

impl PortLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-worker scheduling.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub lock: Option<PortLock>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            error_backoff: DRIVER_ERROR_BACKOFF,
            lock: None,
        }
    }
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The stop flag was honoured.
    Stopped,
    /// The driver hit a fatal error.
    Fatal(String),
    /// Nobody is listening for readings any more.
    ChannelClosed,
    /// The driver panicked.
    Panicked,
    /// The worker ignored the stop request past the grace period.
    Abandoned,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<WorkerExit>,
}

pub struct DeviceManager {
    workers: HashMap<String, Worker>,
    readings: UnboundedSender<Reading>,
    grace: Duration,
}

impl DeviceManager {
    /// Create a manager and the receiving end of its readings channel.
    pub fn new() -> (DeviceManager, UnboundedReceiver<Reading>) {
        let (tx, rx) = unbounded_channel();
        (
            DeviceManager {
                workers: HashMap::new(),
                readings: tx,
                grace: WORKER_STOP_GRACE,
            },
            rx,
        )
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Start polling `driver` on a dedicated blocking worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        &mut self,
        driver: Box<dyn DeviceDriver>,
        options: WorkerOptions,
    ) -> Result<(), MeterLinkError> {
        let name = driver.name().to_string();
        if self.workers.contains_key(&name) {
            return Err(MeterLinkError::ConfigError(format!(
                "device '{name}' is already running"
            )));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let tx = self.readings.clone();
        let handle = tokio::task::spawn_blocking(move || run_worker(driver, options, flag, tx));

        info!("{name}: worker started");
        self.workers.insert(name, Worker { stop, handle });
        Ok(())
    }

    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the named worker has exited on its own; `None` if unknown.
    pub fn is_finished(&self, name: &str) -> Option<bool> {
        self.workers.get(name).map(|w| w.handle.is_finished())
    }

    /// Stop one worker and wait up to the grace period for it.
    pub async fn stop(&mut self, name: &str) -> Option<WorkerExit> {
        let worker = self.workers.remove(name)?;
        Some(stop_worker(name, worker, self.grace).await)
    }

    /// Stop every worker; all are signalled before any is awaited.
    pub async fn stop_all(&mut self) -> Vec<(String, WorkerExit)> {
        for worker in self.workers.values() {
            worker.stop.store(true, Ordering::SeqCst);
        }

        let mut exits = Vec::with_capacity(self.workers.len());
        let mut workers: Vec<(String, Worker)> = self.workers.drain().collect();
        workers.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, worker) in workers {
            let exit = stop_worker(&name, worker, self.grace).await;
            exits.push((name, exit));
        }
        exits
    }
}

async fn stop_worker(name: &str, worker: Worker, grace: Duration) -> WorkerExit {
    worker.stop.store(true, Ordering::SeqCst);
    match tokio::time::timeout(grace, worker.handle).await {
        Ok(Ok(exit)) => {
            info!("{name}: worker exited ({exit:?})");
            exit
        }
        Ok(Err(e)) => {
            error!("{name}: worker panicked: {e}");
            WorkerExit::Panicked
        }
        Err(_) => {
            // Blocking tasks cannot be aborted; it is left to finish its current read.
            warn!("{name}: worker did not stop within {grace:?}, abandoning it");
            WorkerExit::Abandoned
        }
    }
}

/// Sleep up to `duration`, waking early when `stop` is set.
fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) {
    let slice = Duration::from_millis(50);
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(slice.min(deadline - now));
    }
}

/// The polling loop of one driver.
fn run_worker(
    mut driver: Box<dyn DeviceDriver>,
    options: WorkerOptions,
    stop: Arc<AtomicBool>,
    tx: UnboundedSender<Reading>,
) -> WorkerExit {
    let name = driver.name().to_string();
    let mut opened = false;

    let exit = loop {
        if stop.load(Ordering::SeqCst) {
            break WorkerExit::Stopped;
        }

        if !opened {
            match driver.open() {
                Ok(()) => opened = true,
                Err(e) if e.is_fatal() => break WorkerExit::Fatal(e.to_string()),
                Err(e) => {
                    warn!("{name}: open failed: {e}");
                    sleep_unless_stopped(&stop, options.error_backoff);
                    continue;
                }
            }
        }

        let result = {
            let _guard = options.lock.as_ref().map(PortLock::acquire);
            driver.poll()
        };

        match result {
            Ok(readings) => {
                debug!("{name}: cycle produced {} readings", readings.len());
                if readings.into_iter().any(|r| tx.send(r).is_err()) {
                    break WorkerExit::ChannelClosed;
                }
                sleep_unless_stopped(&stop, options.poll_interval);
            }
            Err(e) if e.is_fatal() => {
                error!("{name}: {e}");
                break WorkerExit::Fatal(e.to_string());
            }
            Err(e) => {
                warn!("{name}: poll failed: {e}");
                sleep_unless_stopped(&stop, options.error_backoff);
            }
        }
    };

    driver.close();
    exit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_lock_is_shared() {
        let lock = PortLock::new();
        let other = lock.clone();
        let guard = lock.acquire();
        assert!(other.0.try_lock().is_err());
        drop(guard);
        assert!(other.0.try_lock().is_ok());
    }

    #[test]
    fn test_sleep_wakes_on_stop() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        sleep_unless_stopped(&stop, Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
