//! Version words, writer lock and the optimistic read loop.
//!
//! Writers take a spin lock and bump `next_version` before touching any data;
//! committing publishes `version = next_version`. Readers snapshot `version`,
//! run their read, then confirm that `next_version` still equals the snapshot.
//! A mismatch means a writer was active during the read and the read is
//! retried.

use std::hint;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::thread;

/// Version words and lock of a series, kept on their own cache line.
#[repr(align(64))]
#[derive(Debug, Default)]
pub(crate) struct VersionState {
    version: AtomicU64,
    next_version: AtomicU64,
    locked: AtomicBool,
}

impl VersionState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Last committed version.
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Returns true if a writer holds the lock.
    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Takes the writer lock and opens a new version.
    pub(crate) fn begin_write(&self, spin_before_yield: u32) -> WriteGuard<'_> {
        let mut backoff = Backoff::new(spin_before_yield);
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }

        let version = self.version.load(Ordering::Relaxed);
        self.next_version.store(version + 1, Ordering::Relaxed);
        // Readers must see the bumped next_version before any data change.
        fence(Ordering::Release);

        WriteGuard {
            state: self,
            version,
            committed: false,
        }
    }

    /// Runs `read` until it completes without a concurrent write.
    ///
    /// Returns the result and the number of retries it took.
    pub(crate) fn read<T>(&self, spin_before_yield: u32, mut read: impl FnMut() -> T) -> (T, u64) {
        let mut backoff = Backoff::new(spin_before_yield);
        let mut retries = 0;
        loop {
            let version = self.version.load(Ordering::Acquire);
            if self.next_version.load(Ordering::Acquire) == version {
                let result = read();
                fence(Ordering::Acquire);
                if self.next_version.load(Ordering::Relaxed) == version {
                    return (result, retries);
                }
            }
            retries += 1;
            backoff.snooze();
        }
    }
}

/// Exclusive write access to a series.
///
/// Dropping the guard without [`commit`](Self::commit) rolls `next_version`
/// back, so readers never observe a version that was not committed.
pub(crate) struct WriteGuard<'a> {
    state: &'a VersionState,
    version: u64,
    committed: bool,
}

impl WriteGuard<'_> {
    /// Publishes the new version and releases the lock.
    pub(crate) fn commit(mut self) -> u64 {
        let next = self.version + 1;
        self.state.version.store(next, Ordering::Release);
        self.committed = true;
        next
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.next_version.store(self.version, Ordering::Release);
        }
        self.state.locked.store(false, Ordering::Release);
    }
}

/// Spin first, then yield.
struct Backoff {
    spins: u32,
    spin_before_yield: u32,
}

impl Backoff {
    fn new(spin_before_yield: u32) -> Self {
        Self {
            spins: 0,
            spin_before_yield,
        }
    }

    fn snooze(&mut self) {
        if self.spins < self.spin_before_yield {
            self.spins += 1;
            hint::spin_loop();
        } else {
            thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_commit_publishes_version() {
        let state = VersionState::new();
        let guard = state.begin_write(4);
        assert!(state.is_locked());
        assert_eq!(state.version(), 0);
        assert_eq!(guard.commit(), 1);
        assert_eq!(state.version(), 1);
        assert!(!state.is_locked());
    }

    #[test]
    fn test_abandoned_write_rolls_back() {
        let state = VersionState::new();
        drop(state.begin_write(4));
        assert_eq!(state.version(), 0);
        assert!(!state.is_locked());

        let (value, retries) = state.read(4, || 7);
        assert_eq!(value, 7);
        assert_eq!(retries, 0);
    }

    #[test]
    fn test_read_retries_while_writer_active() {
        let state = VersionState::new();
        let attempts = AtomicUsize::new(0);

        thread::scope(|s| {
            let guard = state.begin_write(4);
            let reader = s.spawn(|| {
                state.read(4, || {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    state.version()
                })
            });
            thread::sleep(std::time::Duration::from_millis(20));
            guard.commit();
            // Only a read that started after the commit can complete.
            let (seen, _) = reader.join().unwrap();
            assert_eq!(seen, 1);
        });
        assert!(attempts.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let state = VersionState::new();
        let inside = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let guard = state.begin_write(8);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        guard.commit();
                    }
                });
            }
        });
        assert_eq!(state.version(), 800);
    }
}
