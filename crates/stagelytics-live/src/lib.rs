//! Live presence tracking: the seconds-fresh "who is on the page right now"
//! feed. Strictly best-effort and fully ephemeral — nothing here is ever
//! persisted, and a store failure degrades to an empty result rather than
//! failing the caller.

pub mod store;
pub mod tracker;

pub use store::{MemoryPresenceStore, PresenceStore};
pub use tracker::PresenceTracker;

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use stagelytics_core::clock::Clock;

    /// Fake clock advanced manually by tests.
    #[derive(Clone)]
    pub(crate) struct FakeClock {
        offset_secs: Arc<AtomicI64>,
    }

    impl FakeClock {
        pub(crate) fn new() -> Self {
            Self {
                offset_secs: Arc::new(AtomicI64::new(0)),
            }
        }

        pub(crate) fn advance(&self, secs: i64) {
            self.offset_secs.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
                + chrono::Duration::seconds(self.offset_secs.load(Ordering::SeqCst))
        }
    }
}
