use parking_lot::{Condvar, Mutex};

const MAX_READERS: u32 = u32::MAX;

#[derive(Default)]
struct LatchState {
    reader_count: u32,
    writer_entered: bool,
}

/// Reader/writer latch with writer preference.
///
/// Once a writer has announced itself no new readers are admitted, so a
/// steady stream of readers cannot starve the writer. Unlike an RAII lock,
/// the raw `r_lock`/`r_unlock` pair may be split across scopes (and threads),
/// which the transaction manager relies on for its global latch. The
/// `read`/`write` guard constructors cover the common scoped case.
pub struct RwLatch {
    state: Mutex<LatchState>,
    reader_cv: Condvar,
    writer_cv: Condvar,
}

impl Default for RwLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::default()),
            reader_cv: Condvar::new(),
            writer_cv: Condvar::new(),
        }
    }

    /// Acquire the latch in shared mode. Blocks while a writer holds or
    /// waits for the latch, or while the reader count is saturated.
    pub fn r_lock(&self) {
        let mut state = self.state.lock();
        while state.writer_entered || state.reader_count == MAX_READERS {
            self.reader_cv.wait(&mut state);
        }
        state.reader_count += 1;
    }

    /// Release a shared hold.
    pub fn r_unlock(&self) {
        let mut state = self.state.lock();
        state.reader_count -= 1;
        if state.writer_entered {
            if state.reader_count == 0 {
                self.writer_cv.notify_one();
            }
        } else if state.reader_count == MAX_READERS - 1 {
            self.reader_cv.notify_one();
        }
    }

    /// Acquire the latch in exclusive mode. Announces the writer first so no
    /// new readers enter, then waits for the active readers to drain.
    pub fn w_lock(&self) {
        let mut state = self.state.lock();
        while state.writer_entered {
            self.reader_cv.wait(&mut state);
        }
        state.writer_entered = true;
        while state.reader_count > 0 {
            self.writer_cv.wait(&mut state);
        }
    }

    /// Release an exclusive hold.
    pub fn w_unlock(&self) {
        let mut state = self.state.lock();
        state.writer_entered = false;
        self.reader_cv.notify_all();
    }

    /// Scoped shared hold.
    pub fn read(&self) -> RwLatchReadGuard<'_> {
        self.r_lock();
        RwLatchReadGuard { latch: self }
    }

    /// Scoped exclusive hold.
    pub fn write(&self) -> RwLatchWriteGuard<'_> {
        self.w_lock();
        RwLatchWriteGuard { latch: self }
    }
}

pub struct RwLatchReadGuard<'a> {
    latch: &'a RwLatch,
}

impl Drop for RwLatchReadGuard<'_> {
    fn drop(&mut self) {
        self.latch.r_unlock();
    }
}

pub struct RwLatchWriteGuard<'a> {
    latch: &'a RwLatch,
}

impl Drop for RwLatchWriteGuard<'_> {
    fn drop(&mut self) {
        self.latch.w_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_concurrent_readers() {
        let latch = Arc::new(RwLatch::new());
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let latch = latch.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(thread::spawn(move || {
                let _guard = latch.read();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) > 1, "readers should overlap");
    }

    #[test]
    fn test_writer_excludes_readers() {
        let latch = Arc::new(RwLatch::new());
        let counter = Arc::new(AtomicU32::new(0));

        latch.w_lock();
        let reader = {
            let latch = latch.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                let _guard = latch.read();
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        latch.w_unlock();
        reader.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_writer_waits_for_readers() {
        let latch = Arc::new(RwLatch::new());
        let wrote = Arc::new(AtomicU32::new(0));

        latch.r_lock();
        let writer = {
            let latch = latch.clone();
            let wrote = wrote.clone();
            thread::spawn(move || {
                let _guard = latch.write();
                wrote.fetch_add(1, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(wrote.load(Ordering::SeqCst), 0);
        latch.r_unlock();
        writer.join().unwrap();
        assert_eq!(wrote.load(Ordering::SeqCst), 1);
    }
}
