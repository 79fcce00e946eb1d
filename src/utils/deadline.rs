use log::warn;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// Worker threads started by `run_with_deadline` that have not returned yet,
/// including ones abandoned after their deadline.
pub fn outstanding_workers() -> usize {
    IN_FLIGHT.load(Ordering::SeqCst)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineError {
    /// The call did not finish within the allotted time. It keeps running detached.
    Expired,
    /// The call panicked or the worker thread could not be started.
    Aborted(String),
}

/// Run `f` on a helper thread and wait at most `timeout` for its result.
///
/// An expired call cannot be interrupted; its thread lives until `f` returns.
pub fn run_with_deadline<T, F>(name: &str, timeout: Duration, f: F) -> Result<T, DeadlineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        let _guard = InFlightGuard;
        let _ = tx.send(f());
    });
    if let Err(e) = spawned {
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
        return Err(DeadlineError::Aborted(format!("failed to spawn worker: {}", e)));
    }

    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                "{} missed its {:?} deadline; {} worker threads still running",
                name,
                timeout,
                outstanding_workers()
            );
            Err(DeadlineError::Expired)
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(DeadlineError::Aborted("worker exited without a result".to_string()))
        }
    }
}

// Decrements on drop so a panicking worker is still counted out.
struct InFlightGuard;

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_value_within_deadline() {
        let result = run_with_deadline("fast", Duration::from_secs(1), || 42);
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn test_expires_on_slow_call() {
        let result = run_with_deadline("slow", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(300));
            1
        });
        assert_eq!(result, Err(DeadlineError::Expired));
    }

    #[test]
    fn test_expired_worker_is_counted_until_it_returns() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let result = run_with_deadline("stuck", Duration::from_millis(10), move || {
            let _ = release_rx.recv();
            let _ = done_tx.send(());
        });

        assert_eq!(result, Err(DeadlineError::Expired));
        assert!(outstanding_workers() >= 1);

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_panic_is_reported_as_aborted() {
        let result: Result<(), _> = run_with_deadline("panicky", Duration::from_secs(1), || {
            panic!("oracle exploded")
        });
        assert!(matches!(result, Err(DeadlineError::Aborted(_))));
    }
}
