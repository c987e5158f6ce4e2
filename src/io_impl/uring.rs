//! Echo loop driven through an io_uring slot ring.
//!
//! Each worker owns one ring over its socket. A fixed number of slots
//! cycle between two states: a recvmsg is in flight for the slot, or the
//! received datagram is on its way back out through a sendmsg on the
//! same buffers. Completing a send re-arms the slot's recvmsg, so the
//! buffers are reused without ever being copied. The submit-and-wait
//! carries a timeout so the shutdown flag is observed even when the ring
//! is idle.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use io_uring::{opcode, types, IoUring};

use crate::echo;
use crate::errors::AppError;
use crate::io_impl::common::EchoSocket;
use crate::io_impl::MAX_DATAGRAM;

const SLOTS: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SlotState {
  RecvInProgress,
  SendInProgress,
}

struct SlotRing {
  ring: IoUring,
  fd: libc::c_int,

  // Boxed slices so the kernel-visible structures never move while
  // requests are in flight.
  hdrs: Box<[libc::msghdr]>,
  iovecs: Box<[libc::iovec]>,
  addrs: Box<[libc::sockaddr_storage]>,
  data: Box<[u8]>,
  state: Box<[SlotState]>,
}

impl SlotRing {
  fn new(fd: libc::c_int) -> Result<Self, AppError> {
    let ring = IoUring::new((SLOTS * 2) as u32).map_err(AppError::IoUring)?;
    Ok(SlotRing {
      ring,
      fd,
      hdrs: vec![unsafe { mem::zeroed() }; SLOTS].into_boxed_slice(),
      iovecs: vec![unsafe { mem::zeroed() }; SLOTS].into_boxed_slice(),
      addrs: vec![unsafe { mem::zeroed() }; SLOTS].into_boxed_slice(),
      data: vec![0u8; SLOTS * MAX_DATAGRAM].into_boxed_slice(),
      state: vec![SlotState::RecvInProgress; SLOTS].into_boxed_slice(),
    })
  }

  /// Queue a fresh recvmsg for `slot`, rebuilding its iovec and msghdr
  /// (the kernel rewrote the lengths on the previous completion).
  fn push_recv(&mut self, slot: usize) -> Result<(), AppError> {
    self.iovecs[slot] = libc::iovec {
      iov_base: &mut self.data[slot * MAX_DATAGRAM] as *mut _ as *mut _,
      iov_len: MAX_DATAGRAM,
    };
    self.hdrs[slot] = libc::msghdr {
      msg_name: &mut self.addrs[slot] as *mut _ as *mut _,
      msg_namelen: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
      msg_iov: &mut self.iovecs[slot] as *mut _,
      msg_iovlen: 1,
      msg_control: ptr::null_mut(),
      msg_controllen: 0,
      msg_flags: 0,
    };
    let entry = opcode::RecvMsg::new(types::Fd(self.fd), &mut self.hdrs[slot] as *mut _)
      .build()
      .user_data(slot as u64);
    unsafe {
      self
        .ring
        .submission()
        .push(&entry)
        .map_err(|_| AppError::IoUringFull("recvmsg", slot))?;
    }
    self.state[slot] = SlotState::RecvInProgress;
    Ok(())
  }

  /// Send the datagram sitting in `slot` straight back to its sender.
  /// The msghdr still holds the kernel-filled source address, which now
  /// becomes the destination.
  fn push_send(&mut self, slot: usize, len: usize) -> Result<(), AppError> {
    self.iovecs[slot].iov_len = len;
    let entry = opcode::SendMsg::new(types::Fd(self.fd), &self.hdrs[slot] as *const _)
      .build()
      .user_data(slot as u64);
    unsafe {
      self
        .ring
        .submission()
        .push(&entry)
        .map_err(|_| AppError::IoUringFull("sendmsg", slot))?;
    }
    self.state[slot] = SlotState::SendInProgress;
    Ok(())
  }

  /// Handle every queued completion; returns how many echoes finished.
  fn drain_cq(&mut self) -> Result<u64, AppError> {
    let mut echoed = 0u64;
    loop {
      let entry = match self.ring.completion().next() {
        Some(entry) => entry,
        None => break,
      };
      let slot = entry.user_data() as usize;
      match self.state[slot] {
        SlotState::RecvInProgress => {
          let res = entry.result();
          if res < echo::HEADER_SIZE as i32 {
            // receive error, or a datagram too short to be a query: the
            // slot goes straight back to receiving
            self.push_recv(slot)?;
          } else {
            let len = res as usize;
            let base = slot * MAX_DATAGRAM;
            echo::make_echo(&mut self.data[base..base + len]);
            self.push_send(slot, len)?;
          }
        }
        SlotState::SendInProgress => {
          if entry.result() >= 0 {
            echoed += 1;
          }
          self.push_recv(slot)?;
        }
      }
    }
    Ok(echoed)
  }
}

/// Whether this kernel will give us a ring at all. Old kernels and
/// seccomp'd environments refuse, in which case the strategy is not
/// usable and callers may want to say so up front.
pub fn available() -> bool {
  IoUring::new(2).is_ok()
}

pub fn run(sock: &EchoSocket, quit: &AtomicBool, timeout: Duration) -> u64 {
  let mut slots = match SlotRing::new(sock.fd()) {
    Ok(slots) => slots,
    Err(e) => {
      eprintln!("io_uring setup: {e}");
      return 0;
    }
  };
  for slot in 0..SLOTS {
    if let Err(e) = slots.push_recv(slot) {
      eprintln!("io_uring setup: {e}");
      return 0;
    }
  }

  let ts = types::Timespec::new()
    .sec(timeout.as_secs())
    .nsec(timeout.subsec_nanos());
  let args = types::SubmitArgs::new().timespec(&ts);

  let mut count = 0u64;
  while !quit.load(Ordering::Relaxed) {
    match slots.ring.submitter().submit_with_args(1, &args) {
      Ok(_) => {}
      Err(e)
        if matches!(
          e.raw_os_error(),
          Some(libc::ETIME) | Some(libc::EINTR) | Some(libc::EBUSY)
        ) => {}
      Err(e) => {
        eprintln!("io_uring submit: {e}");
        break;
      }
    }
    match slots.drain_cq() {
      Ok(echoed) => count += echoed,
      Err(e) => {
        eprintln!("{e}");
        break;
      }
    }
  }
  count
}
