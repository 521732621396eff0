//! Buffered byte source tests: fragmented delivery, timeouts, pattern search
//! and the read-error/reset policy.

use meterlink::stream::{BufferedSource, StreamConfig};
use meterlink::transport::{MockHandle, MockPort};
use std::time::{Duration, Instant};

fn source() -> (BufferedSource<MockPort>, MockHandle) {
    let (port, handle) = MockPort::new("mock");
    (BufferedSource::new(port), handle)
}

const SHORT: Duration = Duration::from_millis(20);

#[test]
fn test_read_exact_across_fragments() {
    let (mut src, handle) = source();
    handle.queue_rx_split(&[1, 2, 3, 4, 5, 6, 7], &[1, 3, 6]);

    let (bytes, info) = src.read_exact(5, 5, Duration::from_millis(200), true);
    assert!(info.matched);
    assert!(!info.timed_out);
    assert_eq!(bytes, vec![1, 2, 3, 4, 5]);
    assert_eq!(info.bytes_consumed, 5);

    let (bytes, _) = src.read_exact(2, 2, SHORT, true);
    assert_eq!(bytes, vec![6, 7]);
}

#[test]
fn test_buffered_bytes_served_first() {
    let (mut src, handle) = source();
    handle.queue_rx(&[1, 2, 3, 4]);

    let (_, info) = src.read_exact(2, 2, SHORT, true);
    assert_eq!(info.bytes_read, 4);
    assert_eq!(src.available(), 2);

    let (bytes, info) = src.read_exact(2, 2, SHORT, true);
    assert_eq!(bytes, vec![3, 4]);
    assert_eq!(info.bytes_read, 0);
}

#[test]
fn test_min_length_accepts_short_read() {
    let (mut src, handle) = source();
    handle.queue_rx(&[9, 8, 7]);

    let (bytes, info) = src.read_exact(10, 3, SHORT, true);
    assert!(info.matched);
    assert!(info.timed_out);
    assert_eq!(bytes, vec![9, 8, 7]);
    assert_eq!(src.available(), 0);
}

#[test]
fn test_below_min_length_fails_without_consuming() {
    let (mut src, handle) = source();
    handle.queue_rx(&[9, 8]);

    let (bytes, info) = src.read_exact(10, 3, SHORT, true);
    assert!(!info.matched);
    assert!(info.timed_out);
    assert!(bytes.is_empty());
    assert_eq!(info.bytes_consumed, 0);
    assert_eq!(src.available(), 2);
}

#[test]
fn test_silent_stream_times_out() {
    let (mut src, _handle) = source();
    let started = Instant::now();

    let (bytes, info) = src.read_exact(10, 10, Duration::from_millis(200), true);
    let elapsed = started.elapsed();

    assert!(!info.matched);
    assert!(info.timed_out);
    assert!(bytes.is_empty());
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
}

#[test]
fn test_peek_then_consume() {
    let (mut src, handle) = source();
    handle.queue_rx(&[0x68, 0x04, 0x04, 0x68]);

    let (peeked, info) = src.read_exact(4, 4, SHORT, false);
    assert_eq!(info.bytes_consumed, 0);
    assert_eq!(src.available(), 4);

    let (read, _) = src.read_exact(4, 4, SHORT, true);
    assert_eq!(peeked, read);
    assert_eq!(src.available(), 0);
}

#[test]
fn test_find_pattern_skips_noise() {
    let (mut src, handle) = source();
    handle.queue_rx_split(&[0x00, 0xFF, 0x10, 0x68, 0x16, 0x42], &[2, 4]);

    let (info, skipped) = src.find_pattern(&[0x68, 0x16], 8, SHORT, true, true);
    assert!(info.matched);
    assert_eq!(info.bytes_skipped, 3);
    assert_eq!(info.bytes_consumed, 5);
    assert_eq!(skipped, Some(vec![0x00, 0xFF, 0x10]));

    let (rest, _) = src.read_exact(1, 1, SHORT, true);
    assert_eq!(rest, vec![0x42]);
}

#[test]
fn test_find_pattern_overlapping_false_start() {
    let (mut src, handle) = source();
    handle.queue_rx(b"AAAB");

    let (info, _) = src.find_pattern(b"AAB", 4, SHORT, true, false);
    assert!(info.matched);
    assert_eq!(info.bytes_skipped, 1);
    assert_eq!(src.available(), 0);
}

#[test]
fn test_find_pattern_budget_exceeded() {
    let (mut src, handle) = source();
    handle.queue_rx(&[1, 2, 3, 4, 5, 0x68]);

    let (info, _) = src.find_pattern(&[0x68], 5, SHORT, true, false);
    assert!(!info.matched);
    assert!(!info.timed_out);
    assert_eq!(info.bytes_consumed, 5);
    assert_eq!(src.available(), 1);
}

#[test]
fn test_find_pattern_zero_budget_means_at_head() {
    let (mut src, handle) = source();
    handle.queue_rx(&[0x68, 0x00]);

    let (info, _) = src.find_pattern(&[0x68], 0, SHORT, false, false);
    assert!(info.matched);
    assert_eq!(info.bytes_skipped, 0);
    assert_eq!(src.available(), 2);
}

#[test]
fn test_find_pattern_times_out_mid_pattern() {
    let (mut src, handle) = source();
    handle.queue_rx(&[0x68]);

    let (info, _) = src.find_pattern(&[0x68, 0x16], 4, SHORT, true, false);
    assert!(!info.matched);
    assert!(info.timed_out);
}

#[test]
fn test_read_error_triggers_reset_and_recovers() {
    let (mut src, handle) = source();
    handle.fail_next_reads(1);
    handle.queue_rx(&[1, 2, 3]);

    let (bytes, info) = src.read_exact(3, 3, Duration::from_millis(200), true);
    assert!(info.matched);
    assert_eq!(bytes, vec![1, 2, 3]);
    assert!(!src.device_error());
    assert_eq!(src.reset_count(), 1);
    assert_eq!(handle.reset_count(), 1);
}

#[test]
fn test_failed_reset_waits_out_cooldown() {
    let (port, handle) = MockPort::new("mock");
    let config = StreamConfig {
        reset_cooldown: Duration::from_secs(30),
        ..StreamConfig::default()
    };
    let mut src = BufferedSource::with_config(port, config);
    handle.fail_next_reads(1);
    handle.fail_next_resets(1);
    handle.queue_rx(&[1]);

    let (_, info) = src.read_exact(1, 1, Duration::from_millis(150), true);
    assert!(!info.matched);
    assert!(src.device_error());
    // one attempt, then the cool-down suppresses further resets
    assert_eq!(handle.reset_count(), 1);
}

#[test]
fn test_reset_after_cooldown() {
    let (port, handle) = MockPort::new("mock");
    let config = StreamConfig {
        reset_cooldown: Duration::from_millis(50),
        cooldown_sleep: Duration::from_millis(10),
        ..StreamConfig::default()
    };
    let mut src = BufferedSource::with_config(port, config);
    handle.fail_next_reads(1);
    handle.fail_next_resets(1);
    handle.queue_rx(&[7]);

    let (bytes, info) = src.read_exact(1, 1, Duration::from_millis(500), true);
    assert!(info.matched);
    assert_eq!(bytes, vec![7]);
    assert_eq!(handle.reset_count(), 2);
    assert!(!src.device_error());
}

#[test]
fn test_read_up_to_max_capacity() {
    let (port, handle) = MockPort::new("mock");
    let config = StreamConfig {
        initial_capacity: 64,
        max_capacity: 300,
        ..StreamConfig::default()
    };
    let mut src = BufferedSource::with_config(port, config);
    let data: Vec<u8> = (0..300).map(|i| i as u8).collect();
    handle.queue_rx(&data[..100]);
    handle.queue_rx(&data[100..]);

    let (bytes, info) = src.read_exact(300, 300, Duration::from_millis(300), true);
    assert!(info.matched);
    assert_eq!(info.bytes_read, 300);
    assert_eq!(bytes, data);
}

#[test]
fn test_read_beyond_max_capacity_fails() {
    let (port, handle) = MockPort::new("mock");
    let config = StreamConfig {
        initial_capacity: 16,
        max_capacity: 32,
        ..StreamConfig::default()
    };
    let mut src = BufferedSource::with_config(port, config);
    handle.queue_rx(&[0xAA; 40]);

    let start = Instant::now();
    let (bytes, info) = src.read_exact(40, 40, Duration::from_secs(1), true);
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(!info.matched);
    assert!(!info.timed_out);
    assert!(bytes.is_empty());
    assert_eq!(info.bytes_read, 0);

    // data left queued at the port is still readable in fitting requests
    let (bytes, _) = src.read_exact(32, 32, SHORT, true);
    assert_eq!(bytes, vec![0xAA; 32]);
}

#[test]
fn test_purge_discards_buffered_input() {
    let (mut src, handle) = source();
    handle.queue_rx(&[1, 2, 3]);
    src.read_exact(1, 1, SHORT, false);
    assert_eq!(src.available(), 3);

    src.purge().unwrap();
    assert_eq!(src.available(), 0);
    assert_eq!(handle.purge_count(), 1);
}

mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn cuts_for(len: usize) -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(0..len.max(1), 0..6)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_read_exact_conservation(
            (data, cuts) in prop::collection::vec(any::<u8>(), 1..64)
                .prop_flat_map(|d| { let n = d.len(); (Just(d), cuts_for(n)) }),
            extra in 0usize..8,
        ) {
            let (mut src, handle) = source();
            handle.queue_rx_split(&data, &cuts);

            // satisfiable: exactly the first L bytes
            let l = data.len().saturating_sub(extra).max(1);
            let (bytes, info) = src.read_exact(l, l, SHORT, true);
            prop_assert!(info.matched);
            prop_assert_eq!(&bytes[..], &data[..l]);

            // unsatisfiable: nothing partial comes back
            let remaining = data.len() - l;
            let (bytes, info) = src.read_exact(remaining + 1, remaining + 1, SHORT, true);
            prop_assert!(!info.matched);
            prop_assert!(info.timed_out);
            prop_assert!(bytes.is_empty());
            prop_assert_eq!(src.available(), remaining);
        }

        #[test]
        fn prop_find_pattern_bound(
            noise in prop::collection::vec(0u8..0x60, 0..40),
            max_skip in 1usize..32,
        ) {
            let pattern = [0x68u8, 0x16];
            let mut data = noise.clone();
            data.extend_from_slice(&pattern);

            let (mut src, handle) = source();
            handle.queue_rx(&data);

            let (info, _) = src.find_pattern(&pattern, max_skip, SHORT, true, false);
            prop_assert!(info.bytes_consumed <= max_skip + pattern.len());
            if info.matched {
                prop_assert!(info.bytes_skipped < max_skip);
                prop_assert_eq!(info.bytes_skipped, noise.len());
            } else {
                prop_assert!(noise.len() >= max_skip);
            }
        }

        #[test]
        fn prop_peek_is_idempotent(
            data in prop::collection::vec(any::<u8>(), 1..48),
            len in 1usize..48,
        ) {
            let (mut src, handle) = source();
            handle.queue_rx(&data);

            let (first, a) = src.read_exact(len, 0, SHORT, false);
            let (second, b) = src.read_exact(len, 0, SHORT, false);
            prop_assert_eq!(first, second);
            prop_assert_eq!(a.matched, b.matched);
            prop_assert_eq!(src.available(), data.len());
        }
    }
}
