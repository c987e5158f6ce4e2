//! Echo loop suspended in select(2) between receives.
//!
//! Functionally the twin of the polling strategy with the older
//! descriptor-set primitive; kept separate because the two suspend with
//! measurably different syscall overhead, which is the whole point of
//! this tool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::echo;
use crate::io_impl::common::EchoSocket;
use crate::io_impl::sys::{recvfrom, select_in, sendto};
use crate::io_impl::MAX_DATAGRAM;

pub fn run(sock: &EchoSocket, quit: &AtomicBool, timeout: Duration) -> u64 {
  let timeout_ms = timeout.as_millis() as u64;
  let mut buf = [0u8; MAX_DATAGRAM];
  let mut count = 0u64;
  while !quit.load(Ordering::Relaxed) {
    match unsafe { select_in(sock.fd(), timeout_ms) } {
      Ok(true) => {}
      Ok(false) => continue,
      Err(e) => {
        eprintln!("{e}");
        break;
      }
    }
    let recv = match unsafe { recvfrom(sock.fd(), &mut buf, libc::MSG_DONTWAIT) } {
      Ok(Some(recv)) => recv,
      Ok(None) => continue,
      Err(e) => {
        eprintln!("{e}");
        break;
      }
    };
    let pkt = &mut buf[..recv.recv_size];
    if !echo::plausible(pkt) {
      continue;
    }
    echo::make_echo(pkt);
    if unsafe { sendto(sock.fd(), pkt, &recv.src_addr, recv.src_addr_len) }.is_ok() {
      count += 1;
    }
  }
  count
}
