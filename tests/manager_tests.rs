use meterlink::{
    DeviceDriver, DeviceManager, MeterLinkError, PortLock, Quantity, Reading, WorkerExit,
    WorkerOptions,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Driver that produces one power reading per cycle, counting up.
struct CountingDriver {
    name: String,
    cycles: u32,
    fail_on: Option<u32>,
    fatal_on: Option<u32>,
    opened: Arc<AtomicBool>,
}

impl CountingDriver {
    fn new(name: &str) -> Self {
        CountingDriver {
            name: name.to_string(),
            cycles: 0,
            fail_on: None,
            fatal_on: None,
            opened: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl DeviceDriver for CountingDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), MeterLinkError> {
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Reading>, MeterLinkError> {
        self.cycles += 1;
        if self.fatal_on == Some(self.cycles) {
            return Err(MeterLinkError::Fatal("meter replaced".into()));
        }
        if self.fail_on == Some(self.cycles) {
            return Err(MeterLinkError::DeviceError("no reply".into()));
        }
        Ok(vec![Reading::new(
            &self.name,
            "total",
            Quantity::Power,
            self.cycles as f64,
        )])
    }

    fn close(&mut self) {
        self.opened.store(false, Ordering::SeqCst);
    }
}

fn fast() -> WorkerOptions {
    WorkerOptions {
        poll_interval: Duration::from_millis(10),
        error_backoff: Duration::from_millis(10),
        lock: None,
    }
}

#[tokio::test]
async fn test_readings_flow_until_stopped() {
    let (mut manager, mut readings) = DeviceManager::new();
    let driver = CountingDriver::new("meter-a");
    let opened = Arc::clone(&driver.opened);
    manager.spawn(Box::new(driver), fast()).unwrap();

    for expected in 1..=3 {
        let reading = readings.recv().await.unwrap();
        assert_eq!(reading.device, "meter-a");
        assert_eq!(reading.value, expected as f64);
    }
    assert!(opened.load(Ordering::SeqCst));

    let exits = manager.stop_all().await;
    assert_eq!(exits, vec![("meter-a".to_string(), WorkerExit::Stopped)]);
    assert!(!opened.load(Ordering::SeqCst));
    assert!(manager.device_names().is_empty());
}

#[tokio::test]
async fn test_transient_error_backs_off_and_continues() {
    let (mut manager, mut readings) = DeviceManager::new();
    let mut driver = CountingDriver::new("meter-b");
    driver.fail_on = Some(2);
    manager.spawn(Box::new(driver), fast()).unwrap();

    assert_eq!(readings.recv().await.unwrap().value, 1.0);
    // cycle 2 failed and produced nothing
    assert_eq!(readings.recv().await.unwrap().value, 3.0);

    assert_eq!(manager.stop("meter-b").await, Some(WorkerExit::Stopped));
    assert_eq!(manager.stop("meter-b").await, None);
}

#[tokio::test]
async fn test_fatal_error_ends_worker() {
    let (mut manager, mut readings) = DeviceManager::new();
    let mut driver = CountingDriver::new("meter-c");
    driver.fatal_on = Some(2);
    manager.spawn(Box::new(driver), fast()).unwrap();

    assert_eq!(readings.recv().await.unwrap().value, 1.0);
    while manager.is_finished("meter-c") != Some(true) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    match manager.stop("meter-c").await {
        Some(WorkerExit::Fatal(reason)) => assert!(reason.contains("meter replaced")),
        other => panic!("unexpected exit {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_device_rejected() {
    let (mut manager, _readings) = DeviceManager::new();
    manager
        .spawn(Box::new(CountingDriver::new("dup")), fast())
        .unwrap();
    assert!(matches!(
        manager.spawn(Box::new(CountingDriver::new("dup")), fast()),
        Err(MeterLinkError::ConfigError(_))
    ));
    manager.stop_all().await;
}

#[tokio::test]
async fn test_dropped_receiver_ends_worker() {
    let (mut manager, readings) = DeviceManager::new();
    drop(readings);
    manager
        .spawn(Box::new(CountingDriver::new("orphan")), fast())
        .unwrap();

    while manager.is_finished("orphan") != Some(true) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.stop("orphan").await, Some(WorkerExit::ChannelClosed));
}

/// Records how many drivers are inside `poll` at once.
struct ExclusiveDriver {
    name: String,
    inside: Arc<AtomicUsize>,
    overlap: Arc<AtomicBool>,
}

impl DeviceDriver for ExclusiveDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), MeterLinkError> {
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Reading>, MeterLinkError> {
        if self.inside.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap.store(true, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(5));
        self.inside.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![Reading::new(&self.name, "x", Quantity::Power, 0.0)])
    }

    fn close(&mut self) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_lock_serialises_polls() {
    let (mut manager, mut readings) = DeviceManager::new();
    let inside = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicBool::new(false));
    let lock = PortLock::new();

    for name in ["gw-1", "gw-2"] {
        let driver = ExclusiveDriver {
            name: name.to_string(),
            inside: Arc::clone(&inside),
            overlap: Arc::clone(&overlap),
        };
        let options = WorkerOptions {
            poll_interval: Duration::ZERO,
            lock: Some(lock.clone()),
            ..fast()
        };
        manager.spawn(Box::new(driver), options).unwrap();
    }

    for _ in 0..20 {
        readings.recv().await.unwrap();
    }
    manager.stop_all().await;
    assert!(!overlap.load(Ordering::SeqCst));
}
