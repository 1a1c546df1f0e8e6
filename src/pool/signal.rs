//! Process-global signal dispatcher.
//!
//! Installed when the first command pool is constructed and removed when
//! the last one is dropped. The handlers only set atomics; the pool's
//! scheduler loop observes them and terminates live children, so no
//! async-signal-unsafe work happens in handler context.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use signal_hook::consts::{SIGABRT, SIGINT, SIGTERM};

struct DispatcherState {
    refcount: usize,
    registrations: Vec<signal_hook::SigId>,
}

fn dispatcher() -> &'static Mutex<DispatcherState> {
    static STATE: OnceLock<Mutex<DispatcherState>> = OnceLock::new();
    STATE.get_or_init(|| {
        Mutex::new(DispatcherState {
            refcount: 0,
            registrations: Vec::new(),
        })
    })
}

fn abort_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

fn signal_cell() -> &'static Arc<AtomicUsize> {
    static CELL: OnceLock<Arc<AtomicUsize>> = OnceLock::new();
    CELL.get_or_init(|| Arc::new(AtomicUsize::new(0)))
}

/// Refcounted registration of the process signal handlers.
///
/// Holding any number of guards keeps SIGINT/SIGTERM/SIGABRT routed into
/// the abort flag; dropping the last one unregisters the handlers.
pub struct SignalGuard(());

impl SignalGuard {
    pub fn new() -> SignalGuard {
        let mut state = dispatcher().lock().expect("signal dispatcher poisoned");
        if state.refcount == 0 {
            for signal in [SIGINT, SIGTERM, SIGABRT] {
                if let Ok(id) = signal_hook::flag::register_usize(
                    signal,
                    Arc::clone(signal_cell()),
                    signal as usize,
                ) {
                    state.registrations.push(id);
                }
                if let Ok(id) = signal_hook::flag::register(signal, Arc::clone(abort_flag())) {
                    state.registrations.push(id);
                }
            }
        }
        state.refcount += 1;
        SignalGuard(())
    }
}

impl Default for SignalGuard {
    fn default() -> Self {
        SignalGuard::new()
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let mut state = dispatcher().lock().expect("signal dispatcher poisoned");
        state.refcount = state.refcount.saturating_sub(1);
        if state.refcount == 0 {
            for id in state.registrations.drain(..) {
                signal_hook::low_level::unregister(id);
            }
        }
    }
}

/// Whether a termination signal has arrived.
pub fn aborted() -> bool {
    abort_flag().load(Ordering::SeqCst)
}

/// The last signal received, or 0.
pub fn last_signal() -> i32 {
    signal_cell().load(Ordering::SeqCst) as i32
}

/// Clear the abort state (between pool runs, and for tests).
pub fn reset() {
    abort_flag().store(false, Ordering::SeqCst);
    signal_cell().store(0, Ordering::SeqCst);
}

/// Raise the abort state as if a signal had arrived. Used by tests and by
/// the pool when converting a failure into a drain.
pub fn raise(signal: i32) {
    signal_cell().store(signal as usize, Ordering::SeqCst);
    abort_flag().store(true, Ordering::SeqCst);
}

/// Human-readable signal name for error reports.
pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGABRT => "SIGABRT",
        _ => "signal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_and_reset() {
        reset();
        assert!(!aborted());

        raise(SIGINT);
        assert!(aborted());
        assert_eq!(last_signal(), SIGINT);
        assert_eq!(signal_name(last_signal()), "SIGINT");

        reset();
        assert!(!aborted());
        assert_eq!(last_signal(), 0);
    }

    #[test]
    fn test_guard_refcounting() {
        let first = SignalGuard::new();
        let second = SignalGuard::new();
        drop(first);
        // Second guard keeps the handlers alive; constructing another must
        // not re-register.
        let third = SignalGuard::new();
        drop(second);
        drop(third);
    }
}
