//! Cooperative shutdown: one flag per process, flipped by SIGINT/SIGTERM.
//!
//! The flag is deliberately not shared across forks. Each child carries
//! its own copy of this static, so the handler re-sends the signal to the
//! whole process group on first delivery; every descendant then takes the
//! same path and flips its own copy. Strategy loops poll the flag between
//! receives, so shutdown latency is bounded by one receive/poll timeout
//! per worker regardless of topology depth.

use std::sync::atomic::{AtomicBool, Ordering};

static QUIT: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(sig: libc::c_int) {
  // swap + kill are both async-signal-safe. The swap guard stops the
  // group re-delivery from ping-ponging forever.
  if !QUIT.swap(true, Ordering::Relaxed) {
    unsafe {
      libc::kill(0, sig);
    }
  }
}

/// Register the shutdown handler for SIGINT and SIGTERM.
///
/// Must run before the farm forks so children inherit the registration.
pub fn install() {
  unsafe {
    libc::signal(
      libc::SIGINT,
      handle_signal as *const () as libc::sighandler_t,
    );
    libc::signal(
      libc::SIGTERM,
      handle_signal as *const () as libc::sighandler_t,
    );
  }
}

/// The calling process's shutdown flag.
///
/// Workers take this as `&AtomicBool` rather than reading the static
/// directly, so tests can drive a loop from a flag they own.
pub fn flag() -> &'static AtomicBool {
  &QUIT
}

pub fn requested() -> bool {
  QUIT.load(Ordering::Relaxed)
}
