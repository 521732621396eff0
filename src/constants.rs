//! MeterLink Constants
//!
//! Timing and sizing defaults shared by the stream, transport and driver layers.

use std::time::Duration;

/// Initial size of the buffered byte source storage
pub const STREAM_INITIAL_CAPACITY: usize = 256;

/// Hard limit on the buffered byte source storage
pub const STREAM_MAX_CAPACITY: usize = 64 * 1024;

/// Largest single read requested from a port
pub const STREAM_READ_CHUNK: usize = 256;

/// Window after a reset attempt during which reads sleep instead of retrying
pub const STREAM_RESET_COOLDOWN: Duration = Duration::from_secs(30);

/// Sleep slice used while waiting out the reset cool-down
pub const STREAM_COOLDOWN_SLEEP: Duration = Duration::from_millis(100);

/// Upper bound of one blocking port read inside a longer operation timeout
pub const STREAM_POLL_SLICE: Duration = Duration::from_millis(50);

/// Window over which repeated port read errors are counted for logging
pub const STREAM_ERROR_LOG_WINDOW_MS: u64 = 60_000;

/// Read errors logged per window before the rest are suppressed
pub const STREAM_ERROR_LOG_BURST: u32 = 5;

/// Settling delay between dropping and reopening a serial port
pub const SERIAL_RESET_SETTLE: Duration = Duration::from_secs(3);

/// Default serial read timeout
pub const SERIAL_DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Default serial write timeout
pub const SERIAL_DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;

/// Baud rates accepted by the serial settings validator
pub const STANDARD_BAUD_RATES: [u32; 11] = [
    300, 600, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 76800, 115200,
];

/// Default per-step receive timeout when a script does not declare one
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1000;

/// Grace period a driver worker gets to honour a stop request
pub const WORKER_STOP_GRACE: Duration = Duration::from_secs(5);

/// Default pause between two polling cycles of a driver
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Back-off after a failed polling cycle
pub const DRIVER_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Modbus function code: read holding registers
pub const MODBUS_FN_READ_HOLDING: u8 = 0x03;

/// Modbus exception flag OR-ed into the function code
pub const MODBUS_EXCEPTION_FLAG: u8 = 0x80;
