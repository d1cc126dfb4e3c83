//! Named periodic background thread.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, warn};

/// Runs a closure every `interval` on its own thread until stopped.
///
/// The first run happens one interval after spawning. Dropping the ticker
/// stops it and joins the thread.
#[derive(Debug)]
pub struct Ticker {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a thread called `name` running `task` every `interval`.
    ///
    /// # Errors
    ///
    /// The OS refused to create the thread.
    pub fn spawn<F>(name: &str, interval: Duration, mut task: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticks = tick(interval);
        let thread_name = name.to_string();
        let handle = thread::Builder::new().name(thread_name.clone()).spawn(move || {
            debug!(ticker = thread_name.as_str(), "Ticker started");
            loop {
                let stopped = select! {
                    recv(stop_rx) -> _ => true,
                    recv(ticks) -> _ => false,
                };
                if stopped {
                    break;
                }
                task();
            }
            debug!(ticker = thread_name.as_str(), "Ticker stopped");
        })?;

        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the ticker and wait for a running tick to finish.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the stop channel.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(ticker = self.name.as_str(), "Ticker thread panicked");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let mut ticker = Ticker::spawn("test-ticker", Duration::from_millis(5), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        ticker.stop();
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected several ticks, got {after_stop}");

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
