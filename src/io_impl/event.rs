//! Event-driven echo loop: a single-threaded mio reactor with one
//! persistent readable interest on the socket.
//!
//! mio's epoll registration is edge-triggered, so every wakeup drains
//! the socket until EAGAIN. The reactor wait itself carries the timeout
//! that re-evaluates shutdown.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::echo;
use crate::io_impl::common::EchoSocket;
use crate::io_impl::sys::{recvfrom, sendto};
use crate::io_impl::MAX_DATAGRAM;

const ECHO: Token = Token(0);

pub fn run(sock: &EchoSocket, quit: &AtomicBool, timeout: Duration) -> u64 {
  let fd = sock.fd();
  let mut poll = match Poll::new() {
    Ok(poll) => poll,
    Err(e) => {
      eprintln!("reactor setup: {e}");
      return 0;
    }
  };
  if let Err(e) = poll
    .registry()
    .register(&mut SourceFd(&fd), ECHO, Interest::READABLE)
  {
    eprintln!("reactor register: {e}");
    return 0;
  }

  let mut events = Events::with_capacity(4);
  let mut buf = [0u8; MAX_DATAGRAM];
  let mut count = 0u64;
  while !quit.load(Ordering::Relaxed) {
    if let Err(e) = poll.poll(&mut events, Some(timeout)) {
      if e.kind() == io::ErrorKind::Interrupted {
        continue;
      }
      eprintln!("reactor: {e}");
      break;
    }
    for _event in events.iter() {
      // edge-triggered: drain everything pending before sleeping again
      loop {
        let recv = match unsafe { recvfrom(fd, &mut buf, libc::MSG_DONTWAIT) } {
          Ok(Some(recv)) => recv,
          Ok(None) => break,
          Err(e) => {
            eprintln!("{e}");
            return count;
          }
        };
        let pkt = &mut buf[..recv.recv_size];
        if !echo::plausible(pkt) {
          continue;
        }
        echo::make_echo(pkt);
        if unsafe { sendto(fd, pkt, &recv.src_addr, recv.src_addr_len) }.is_ok() {
          count += 1;
        }
      }
    }
  }
  count
}
