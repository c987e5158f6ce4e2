//! Socket setup shared between strategies.

use std::{io, mem, time::Duration};

use crate::errors::AppError;

/// A bound UDP socket. Closed on drop; the descriptor itself tolerates
/// concurrent per-datagram use from any number of worker threads.
pub struct EchoSocket {
  fd: libc::c_int,
}

impl EchoSocket {
  pub fn fd(&self) -> libc::c_int {
    self.fd
  }

  /// The port the socket actually bound (interesting when asked for 0).
  pub fn local_port(&self) -> Result<u16, AppError> {
    // sockaddr_in is enough here: we only ever bind v4, and in6 keeps the
    // port in the same place anyway.
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of_val(&addr) as libc::socklen_t;
    let res =
      unsafe { libc::getsockname(self.fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len) };
    if res == -1 {
      return Err(AppError::last_os("getsockname"));
    }
    Ok(u16::from_be(addr.sin_port))
  }
}

impl Drop for EchoSocket {
  fn drop(&mut self) {
    unsafe {
      libc::close(self.fd);
    }
  }
}

/// Bind a UDP socket on INADDR_ANY:`port`.
///
/// Every socket carries a receive timeout: a worker blocked in a receive
/// with no incoming traffic must still wake up to observe shutdown.
pub fn bind_udp(port: u16, reuse: bool, rcv_timeout: Duration) -> Result<EchoSocket, AppError> {
  unsafe {
    let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_UDP);
    if fd == -1 {
      return Err(AppError::last_os("socket"));
    }
    let sock = EchoSocket { fd };

    if reuse {
      let val: libc::c_int = 1;
      if libc::setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEPORT,
        &val as *const _ as *const libc::c_void,
        mem::size_of_val(&val) as libc::socklen_t,
      ) == -1
      {
        return Err(AppError::last_os("setsockopt(SO_REUSEPORT)"));
      }
    }
    set_rcv_timeout(fd, rcv_timeout)?;

    let addr = libc::sockaddr_in {
      sin_family: libc::AF_INET as _,
      sin_port: port.to_be(),
      sin_addr: libc::in_addr {
        s_addr: libc::INADDR_ANY.to_be(),
      },
      sin_zero: Default::default(),
    };
    if libc::bind(
      fd,
      &addr as *const _ as *const libc::sockaddr,
      mem::size_of_val(&addr) as libc::socklen_t,
    ) == -1
    {
      return Err(AppError::last_os("bind"));
    }
    Ok(sock)
  }
}

pub(crate) fn set_rcv_timeout(fd: libc::c_int, timeout: Duration) -> Result<(), AppError> {
  let tv = libc::timeval {
    tv_sec: timeout.as_secs() as _,
    tv_usec: timeout.subsec_micros() as _,
  };
  let res = unsafe {
    libc::setsockopt(
      fd,
      libc::SOL_SOCKET,
      libc::SO_RCVTIMEO,
      &tv as *const _ as *const libc::c_void,
      mem::size_of_val(&tv) as libc::socklen_t,
    )
  };
  if res == -1 {
    return Err(AppError::Io(
      "setsockopt(SO_RCVTIMEO)",
      io::Error::last_os_error(),
    ));
  }
  Ok(())
}
