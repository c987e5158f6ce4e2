//! The interchangeable receive strategies.
//!
//! Every UDP strategy implements the same contract: loop over
//! receive→mutate→send on a bound socket until the shutdown flag is
//! observed or the receive fails for real, then return the number of
//! datagrams echoed. They differ only in how (and how long) they
//! suspend waiting for traffic. `packet` is the odd one out: it never
//! touches a UDP socket and is dispatched separately by the caller.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::ValueEnum;

pub mod common;
pub(crate) mod sys;

pub mod batched;
pub mod blocking;
pub mod event;
pub mod nonblocking;
pub mod packet;
pub mod polling;
pub mod select_wait;
pub mod uring;

/// Largest datagram any strategy will accept. Plenty for plain-UDP DNS
/// queries; anything bigger is truncated by the kernel and will fail the
/// echo comparison on the client side, which is the client's problem.
pub const MAX_DATAGRAM: usize = 512;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum EchoMode {
  /// Blocking single-datagram receive, bounded by the socket timeout.
  Blocking,
  /// Nonblocking single-datagram receive, spins on "no data".
  Nonblocking,
  /// poll(2) readiness wait before each receive.
  Polling,
  /// select(2) readiness wait before each receive.
  Select,
  /// One recvmmsg call fills up to 16 datagram slots at a time.
  Batched,
  /// Persistent read event on a mio reactor.
  Event,
  /// io_uring recvmsg/sendmsg slot ring.
  Uring,
  /// Raw AF_PACKET fast path with kernel fanout (needs -i).
  Packet,
}

impl EchoMode {
  /// Run this strategy's loop on a bound UDP socket until `quit` is set.
  ///
  /// `Packet` never runs over a UDP socket; the caller dispatches it to
  /// [`packet::run`] instead.
  pub fn run(self, sock: &common::EchoSocket, quit: &AtomicBool, timeout: Duration) -> u64 {
    match self {
      EchoMode::Blocking => blocking::run(sock, quit),
      EchoMode::Nonblocking => nonblocking::run(sock, quit),
      EchoMode::Polling => polling::run(sock, quit, timeout),
      EchoMode::Select => select_wait::run(sock, quit, timeout),
      EchoMode::Batched => batched::run(sock, quit),
      EchoMode::Event => event::run(sock, quit, timeout),
      EchoMode::Uring => uring::run(sock, quit, timeout),
      EchoMode::Packet => unreachable!("packet mode does not use a UDP socket"),
    }
  }
}

impl fmt::Display for EchoMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      EchoMode::Blocking => "blocking",
      EchoMode::Nonblocking => "nonblocking",
      EchoMode::Polling => "polling",
      EchoMode::Select => "select",
      EchoMode::Batched => "batched",
      EchoMode::Event => "event",
      EchoMode::Uring => "uring",
      EchoMode::Packet => "packet",
    };
    f.write_str(name)
  }
}
