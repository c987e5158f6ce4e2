//! Readiness-polled echo loop: poll(2), then receive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::echo;
use crate::io_impl::common::EchoSocket;
use crate::io_impl::sys::{poll_in, recvfrom, sendto};
use crate::io_impl::MAX_DATAGRAM;

pub fn run(sock: &EchoSocket, quit: &AtomicBool, timeout: Duration) -> u64 {
  let timeout_ms = timeout.as_millis() as libc::c_int;
  let mut buf = [0u8; MAX_DATAGRAM];
  let mut count = 0u64;
  while !quit.load(Ordering::Relaxed) {
    match unsafe { poll_in(sock.fd(), timeout_ms) } {
      Ok(true) => {}
      Ok(false) => continue,
      Err(e) => {
        eprintln!("{e}");
        break;
      }
    }
    // poll said readable, but another thread on the same socket may have
    // beaten us to the datagram
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
