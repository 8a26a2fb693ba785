//! Exactly-once delivery guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared "result delivered" flag.
///
/// Whoever wins [`claim`](Self::claim) owns delivery of the result; every
/// other path (timeout, cancellation, late completion) must drop its value.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFlag {
    delivered: Arc<AtomicBool>,
}

impl DeliveryFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for exactly one caller.
    pub fn claim(&self) -> bool {
        !self.delivered.swap(true, Ordering::AcqRel)
    }

    pub fn is_claimed(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_claim_once() {
        let flag = DeliveryFlag::new();
        assert!(!flag.is_claimed());
        assert!(flag.claim());
        assert!(!flag.claim());
        assert!(flag.is_claimed());
    }

    #[test]
    fn test_claim_once_across_threads() {
        let flag = DeliveryFlag::new();
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let flag = flag.clone();
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if flag.claim() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
