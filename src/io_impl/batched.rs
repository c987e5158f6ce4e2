//! Batched echo loop: one recvmmsg call fills up to 16 datagram slots,
//! the batch is mutated in place and pushed back out with one sendmmsg.
//!
//! The slot structures (buffers, iovecs, sender addresses, mmsghdrs) are
//! built once and re-armed between calls; the kernel rewrites lengths and
//! address sizes on every receive.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::echo;
use crate::io_impl::common::EchoSocket;
use crate::io_impl::sys::{recvmmsg, sendmmsg};
use crate::io_impl::MAX_DATAGRAM;

pub const BATCH_SIZE: usize = 16;

pub fn run(sock: &EchoSocket, quit: &AtomicBool) -> u64 {
  let fd = sock.fd();
  let addr_len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

  let mut bufs = vec![0u8; BATCH_SIZE * MAX_DATAGRAM];
  let mut addrs: Vec<libc::sockaddr_storage> =
    (0..BATCH_SIZE).map(|_| unsafe { mem::zeroed() }).collect();
  let mut iovecs: Vec<libc::iovec> = (0..BATCH_SIZE)
    .map(|i| libc::iovec {
      iov_base: &mut bufs[i * MAX_DATAGRAM] as *mut _ as *mut _,
      iov_len: MAX_DATAGRAM,
    })
    .collect();
  let mut hdrs: Vec<libc::mmsghdr> = (0..BATCH_SIZE)
    .map(|i| libc::mmsghdr {
      msg_hdr: libc::msghdr {
        msg_name: &mut addrs[i] as *mut _ as *mut _,
        msg_namelen: addr_len,
        msg_iov: &mut iovecs[i] as *mut _,
        msg_iovlen: 1,
        msg_control: ptr::null_mut(),
        msg_controllen: 0,
        msg_flags: 0,
      },
      msg_len: 0,
    })
    .collect();

  let mut count = 0u64;
  while !quit.load(Ordering::Relaxed) {
    // re-arm the slots the previous round consumed
    for i in 0..BATCH_SIZE {
      iovecs[i].iov_len = MAX_DATAGRAM;
      hdrs[i].msg_hdr.msg_namelen = addr_len;
    }

    // MSG_WAITFORONE returns as soon as anything arrived; the socket
    // receive timeout bounds the wait for the first datagram
    let n = match unsafe { recvmmsg(fd, &mut hdrs, libc::MSG_WAITFORONE) } {
      Ok(Some(n)) => n,
      Ok(None) => continue,
      Err(e) => {
        eprintln!("{e}");
        break;
      }
    };

    // mutate the plausible datagrams and compact them into a send batch
    let mut send_hdrs: Vec<libc::mmsghdr> = Vec::with_capacity(n);
    for i in 0..n {
      let len = hdrs[i].msg_len as usize;
      let base = i * MAX_DATAGRAM;
      let pkt = &mut bufs[base..base + len];
      if !echo::plausible(pkt) {
        continue;
      }
      echo::make_echo(pkt);
      iovecs[i].iov_len = len;
      send_hdrs.push(libc::mmsghdr {
        msg_hdr: libc::msghdr {
          msg_name: &mut addrs[i] as *mut _ as *mut _,
          msg_namelen: hdrs[i].msg_hdr.msg_namelen,
          msg_iov: &mut iovecs[i] as *mut _,
          msg_iovlen: 1,
          msg_control: ptr::null_mut(),
          msg_controllen: 0,
          msg_flags: 0,
        },
        msg_len: 0,
      });
    }
    if send_hdrs.is_empty() {
      continue;
    }
    match unsafe { sendmmsg(fd, &mut send_hdrs) } {
      Ok(sent) => count += sent as u64,
      Err(e) => eprintln!("{e}"),
    }
  }
  count
}
