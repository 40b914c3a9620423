//! Fixed-interval polling waits.
//!
//! Both the free-space wait and the replication-parity wait are plain polls
//! with a sleep between checks, never condition variables signaled by the
//! producer side. This tolerates process crashes and missed notifications at
//! the cost of added latency.

use std::time::{Duration, Instant};

/// Poll `check` every `interval` until it returns true, or until `max` has
/// elapsed when one is given. Returns whether the condition became true.
///
/// With `max == None` this can block forever; the free-space wait uses that
/// deliberately.
pub fn wait_until<F>(mut check: F, interval: Duration, max: Option<Duration>) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if check() {
            return true;
        }
        if let Some(max) = max {
            if start.elapsed() >= max {
                return false;
            }
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_immediately_when_condition_holds() {
        let start = Instant::now();
        assert!(wait_until(|| true, Duration::from_secs(60), None));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn times_out_when_condition_never_holds() {
        let ok = wait_until(
            || false,
            Duration::from_millis(5),
            Some(Duration::from_millis(30)),
        );
        assert!(!ok);
    }

    #[test]
    fn condition_becoming_true_ends_the_wait() {
        let mut calls = 0;
        let ok = wait_until(
            || {
                calls += 1;
                calls >= 3
            },
            Duration::from_millis(1),
            Some(Duration::from_secs(5)),
        );
        assert!(ok);
        assert_eq!(calls, 3);
    }
}
