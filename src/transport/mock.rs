//! Mock port for exercising the stack without hardware.
//!
//! A [`MockPort`] is driven through a cloneable [`MockHandle`]: tests queue
//! the chunks the "device" delivers, inject read/write/reset failures and
//! inspect what was written. An optional responder turns every write into
//! queued reply chunks, which is how driver tests emulate a meter.

use crate::error::MeterLinkError;
use crate::transport::Port;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

struct Delivery {
    data: Vec<u8>,
    not_before: Instant,
}

#[derive(Default)]
struct MockState {
    rx: VecDeque<Delivery>,
    tx: Vec<u8>,
    writes: Vec<Vec<u8>>,
    open: bool,
    failing_reads: u32,
    failing_writes: u32,
    failing_resets: u32,
    resets: u32,
    purges: u32,
    responder: Option<Responder>,
}

/// Test-side control of a [`MockPort`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

/// In-memory [`Port`] whose input is scripted through a [`MockHandle`].
pub struct MockPort {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    /// Create a port and the handle that controls it.
    pub fn new(name: &str) -> (MockPort, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            MockPort {
                name: name.to_string(),
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue one chunk, delivered by a single read.
    pub fn queue_rx(&self, data: &[u8]) {
        self.queue_rx_after(Duration::ZERO, data);
    }

    /// Queue one chunk that becomes readable `delay` from now.
    pub fn queue_rx_after(&self, delay: Duration, data: &[u8]) {
        self.state().rx.push_back(Delivery {
            data: data.to_vec(),
            not_before: Instant::now() + delay,
        });
    }

    /// Queue `data` split at the given offsets, one read per piece.
    pub fn queue_rx_split(&self, data: &[u8], cuts: &[usize]) {
        let mut cuts: Vec<usize> = cuts.iter().copied().filter(|&c| c < data.len()).collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut start = 0;
        for cut in cuts.into_iter().chain(std::iter::once(data.len())) {
            if cut > start {
                self.queue_rx(&data[start..cut]);
                start = cut;
            }
        }
    }

    /// Answer every write with the chunks returned by `responder`.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.state().responder = Some(Box::new(responder));
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.state().failing_reads = count;
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.state().failing_writes = count;
    }

    pub fn fail_next_resets(&self, count: u32) {
        self.state().failing_resets = count;
    }

    /// Everything written so far, concatenated.
    pub fn tx_data(&self) -> Vec<u8> {
        self.state().tx.clone()
    }

    /// Every successful write call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Bytes queued but not yet read.
    pub fn pending_rx(&self) -> usize {
        self.state().rx.iter().map(|d| d.data.len()).sum()
    }

    pub fn reset_count(&self) -> u32 {
        self.state().resets
    }

    pub fn purge_count(&self) -> u32 {
        self.state().purges
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.rx.clear();
        state.tx.clear();
        state.writes.clear();
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), MeterLinkError> {
        self.state().open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn close(&mut self) {
        self.state().open = false;
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let wait = {
            let mut state = self.state();
            if state.failing_reads > 0 {
                state.failing_reads -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock read failure"));
            }

            let now = Instant::now();
            match state.rx.front_mut() {
                Some(delivery) if delivery.not_before <= now => {
                    let n = delivery.data.len().min(buf.len());
                    buf[..n].copy_from_slice(&delivery.data[..n]);
                    delivery.data.drain(..n);
                    if delivery.data.is_empty() {
                        state.rx.pop_front();
                    }
                    return Ok(n);
                }
                Some(delivery) => (delivery.not_before - now).min(timeout),
                None => timeout,
            }
        };

        // Nothing ready: block like a real port would, then report silence.
        std::thread::sleep(wait);
        Ok(0)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }

        state.tx.extend_from_slice(data);
        state.writes.push(data.to_vec());

        if let Some(mut responder) = state.responder.take() {
            let now = Instant::now();
            for chunk in responder(data) {
                state.rx.push_back(Delivery {
                    data: chunk,
                    not_before: now,
                });
            }
            state.responder = Some(responder);
        }
        Ok(())
    }

    fn purge(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.purges += 1;
        let now = Instant::now();
        state.rx.retain(|d| d.not_before > now);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), MeterLinkError> {
        let mut state = self.state();
        state.resets += 1;
        if state.failing_resets > 0 {
            state.failing_resets -= 1;
            state.open = false;
            return Err(MeterLinkError::SerialPortError("mock reset failure".into()));
        }
        state.open = true;
        Ok(())
    }
}
