//! Thin unsafe wrappers over the libc calls the strategies share.
//!
//! Error mapping is uniform: EAGAIN/EWOULDBLOCK/EINTR mean "nothing to do
//! right now" and surface as `Ok(None)`/`Ok(false)` so the strategy loop
//! can re-check the shutdown flag; every other errno becomes an
//! `AppError::Io` tagged with the syscall name.

use std::{io, mem, ptr};

use crate::errors::AppError;

pub const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT;

fn no_data(errno: libc::c_int) -> bool {
  errno == libc::EAGAIN || errno == libc::EWOULDBLOCK || errno == libc::EINTR
}

fn errno() -> libc::c_int {
  io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

pub struct RecvfromRes {
  pub recv_size: usize,
  pub src_addr: libc::sockaddr_storage,
  pub src_addr_len: libc::socklen_t,
}

/// Receive one datagram and its sender address. `Ok(None)` when the
/// socket timed out or has nothing pending.
pub unsafe fn recvfrom(
  sock_fd: libc::c_int,
  recv_buf: &mut [u8],
  flags: libc::c_int,
) -> Result<Option<RecvfromRes>, AppError> {
  unsafe {
    let mut addr: libc::sockaddr_storage = mem::zeroed();
    let mut addr_len = mem::size_of_val(&addr) as libc::socklen_t;
    let ret = libc::recvfrom(
      sock_fd,
      recv_buf.as_mut_ptr() as *mut _,
      recv_buf.len(),
      flags,
      &mut addr as *mut _ as *mut _,
      &mut addr_len,
    );
    if ret == -1 {
      if no_data(errno()) {
        return Ok(None);
      }
      return Err(AppError::last_os("recvfrom"));
    }
    Ok(Some(RecvfromRes {
      recv_size: ret as usize,
      src_addr: addr,
      src_addr_len: addr_len,
    }))
  }
}

pub unsafe fn sendto(
  sock_fd: libc::c_int,
  buf: &[u8],
  dst_addr: &libc::sockaddr_storage,
  dst_addr_len: libc::socklen_t,
) -> Result<(), AppError> {
  unsafe {
    let ret = libc::sendto(
      sock_fd,
      buf.as_ptr() as *const _,
      buf.len(),
      SEND_FLAGS,
      dst_addr as *const _ as *const _,
      dst_addr_len,
    );
    if ret == -1 {
      return Err(AppError::last_os("sendto"));
    }
    #[cfg(debug_assertions)]
    if ret != buf.len() as _ {
      unreachable!("Did not send the full datagram...?");
      // There is no "partial write" for UDP - if the message is larger
      // than the max length allowable it will return EMSGSIZE.
    }
    Ok(())
  }
}

/// Receive up to `hdrs.len()` datagrams in one call. `Ok(None)` when the
/// bounded wait produced nothing.
pub unsafe fn recvmmsg(
  sock_fd: libc::c_int,
  hdrs: &mut [libc::mmsghdr],
  flags: libc::c_int,
) -> Result<Option<usize>, AppError> {
  unsafe {
    let ret = libc::recvmmsg(
      sock_fd,
      hdrs.as_mut_ptr(),
      hdrs.len() as _,
      flags,
      ptr::null_mut(),
    );
    if ret == -1 {
      if no_data(errno()) {
        return Ok(None);
      }
      return Err(AppError::last_os("recvmmsg"));
    }
    Ok(Some(ret as usize))
  }
}

/// Send a whole batch; returns how many datagrams actually went out.
/// A transmit queue that fills mid-batch drops the remainder rather than
/// wedging the worker.
pub unsafe fn sendmmsg(sock_fd: libc::c_int, hdrs: &mut [libc::mmsghdr]) -> Result<usize, AppError> {
  let mut sent = 0usize;
  while sent < hdrs.len() {
    unsafe {
      let rest = &mut hdrs[sent..];
      let ret = libc::sendmmsg(sock_fd, rest.as_mut_ptr(), rest.len() as _, SEND_FLAGS);
      if ret == -1 {
        if no_data(errno()) {
          return Ok(sent);
        }
        return Err(AppError::last_os("sendmmsg"));
      }
      sent += ret as usize;
    }
  }
  Ok(sent)
}

/// Wait up to `timeout_ms` for the descriptor to become readable.
pub unsafe fn poll_in(sock_fd: libc::c_int, timeout_ms: libc::c_int) -> Result<bool, AppError> {
  unsafe {
    let mut fds = libc::pollfd {
      fd: sock_fd,
      events: libc::POLLIN,
      revents: 0,
    };
    let ret = libc::poll(&mut fds, 1, timeout_ms);
    if ret == -1 {
      if errno() == libc::EINTR {
        return Ok(false);
      }
      return Err(AppError::last_os("poll"));
    }
    Ok(ret > 0 && (fds.revents & libc::POLLIN) != 0)
  }
}

/// Same readiness wait via the descriptor-set primitive.
pub unsafe fn select_in(sock_fd: libc::c_int, timeout_ms: u64) -> Result<bool, AppError> {
  unsafe {
    let mut fds: libc::fd_set = mem::zeroed();
    libc::FD_ZERO(&mut fds);
    libc::FD_SET(sock_fd, &mut fds);
    let mut tv = libc::timeval {
      tv_sec: (timeout_ms / 1000) as _,
      tv_usec: ((timeout_ms % 1000) * 1000) as _,
    };
    let ret = libc::select(
      sock_fd + 1,
      &mut fds,
      ptr::null_mut(),
      ptr::null_mut(),
      &mut tv,
    );
    if ret == -1 {
      if errno() == libc::EINTR {
        return Ok(false);
      }
      return Err(AppError::last_os("select"));
    }
    Ok(ret > 0)
  }
}
