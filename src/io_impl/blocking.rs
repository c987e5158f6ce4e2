//! Blocking single-datagram echo loop.
//!
//! The receive itself is the suspension point; the socket-level receive
//! timeout (set at bind time) is what gives the loop a chance to notice
//! shutdown when no traffic arrives.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::echo;
use crate::io_impl::common::EchoSocket;
use crate::io_impl::sys::{recvfrom, sendto};
use crate::io_impl::MAX_DATAGRAM;

pub fn run(sock: &EchoSocket, quit: &AtomicBool) -> u64 {
  let mut buf = [0u8; MAX_DATAGRAM];
  let mut count = 0u64;
  while !quit.load(Ordering::Relaxed) {
    let recv = match unsafe { recvfrom(sock.fd(), &mut buf, 0) } {
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
