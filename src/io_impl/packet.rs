//! Raw link-layer fast path.
//!
//! Bypasses the UDP socket layer entirely: an AF_PACKET socket captures
//! IPv4 frames on one interface, and a reply is made by reflecting the
//! frame in place — swap the addresses, swap the ports, rewrite the DNS
//! header bits in the payload, send the same bytes back out. Workers on
//! the same interface join a kernel fanout group keyed by the parent pid,
//! so incoming frames are load-balanced below the application with no
//! dispatch decision of ours.
//!
//! All field access goes through bounds-checked slice reads; the frame is
//! never reinterpreted as a header struct.

use std::ffi::CString;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::echo;
use crate::errors::AppError;
use crate::io_impl::sys::{poll_in, recvfrom, sendto};
use crate::io_impl::MAX_DATAGRAM;

const IPV4_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;

pub struct PacketSocket {
  fd: libc::c_int,
}

impl Drop for PacketSocket {
  fn drop(&mut self) {
    unsafe {
      libc::close(self.fd);
    }
  }
}

fn interface_index(name: &str) -> Result<libc::c_uint, AppError> {
  let c_name = CString::new(name).map_err(|_| AppError::UnknownInterface(name.to_owned()))?;
  let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
  if index == 0 {
    return Err(AppError::UnknownInterface(name.to_owned()));
  }
  Ok(index)
}

/// Cheap existence probe so a bad `-i` fails the farm before any worker
/// starts instead of producing a stack of per-worker errors.
pub fn check_interface(name: &str) -> Result<(), AppError> {
  interface_index(name).map(|_| ())
}

/// Open a capture socket on `ifname` and join the per-farm fanout group.
///
/// The group id is the parent pid: every worker process forked from the
/// same farm computes the same id and the kernel spreads frames across
/// the members (load-balance hash with rollover when a member's queue
/// fills).
pub fn open(ifname: &str) -> Result<PacketSocket, AppError> {
  let index = interface_index(ifname)?;
  unsafe {
    let fd = libc::socket(
      libc::AF_PACKET,
      libc::SOCK_DGRAM,
      (libc::ETH_P_IP as u16).to_be() as libc::c_int,
    );
    if fd == -1 {
      return Err(AppError::last_os("socket(AF_PACKET)"));
    }
    let sock = PacketSocket { fd };

    let mut addr: libc::sockaddr_ll = mem::zeroed();
    addr.sll_family = libc::AF_PACKET as _;
    addr.sll_protocol = (libc::ETH_P_IP as u16).to_be();
    addr.sll_ifindex = index as _;
    if libc::bind(
      fd,
      &addr as *const _ as *const libc::sockaddr,
      mem::size_of_val(&addr) as libc::socklen_t,
    ) == -1
    {
      return Err(AppError::last_os("bind"));
    }

    let group = (libc::getppid() as u32) & 0xffff;
    let fanout_arg: u32 =
      group | ((libc::PACKET_FANOUT_LB | libc::PACKET_FANOUT_FLAG_ROLLOVER) << 16);
    if libc::setsockopt(
      fd,
      libc::SOL_PACKET,
      libc::PACKET_FANOUT,
      &fanout_arg as *const _ as *const libc::c_void,
      mem::size_of_val(&fanout_arg) as libc::socklen_t,
    ) == -1
    {
      return Err(AppError::last_os("setsockopt(PACKET_FANOUT)"));
    }

    Ok(sock)
  }
}

fn read_u16_be(buf: &[u8], off: usize) -> Option<u16> {
  let bytes = buf.get(off..off + 2)?;
  Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Rewrite a captured IPv4/UDP frame into its own reply, in place.
///
/// Returns false (frame untouched or only partially classified) for
/// anything that should be dropped: truncated captures, non-UDP
/// protocols, a destination port other than `port`, or a payload too
/// short to hold a DNS header.
///
/// The reply transform is a pure reflection: source and destination IP
/// addresses swap, source and destination ports swap, the UDP checksum
/// is zeroed ("not computed"), and the payload's DNS header flags are
/// rewritten. Swapping the two addresses leaves the one's-complement IP
/// header checksum unchanged, so it is not recomputed — any edit beyond
/// the pure swap would have to.
fn reflect_frame(frame: &mut [u8], port: u16) -> bool {
  if frame.len() < IPV4_MIN_HEADER {
    return false;
  }
  let ihl = ((frame[0] & 0x0f) as usize) * 4;
  if ihl < IPV4_MIN_HEADER {
    return false;
  }
  let udp_off = ihl;
  let payload_off = ihl + UDP_HEADER;
  if payload_off > frame.len() {
    return false;
  }
  if frame[9] != libc::IPPROTO_UDP as u8 {
    return false;
  }
  match read_u16_be(frame, udp_off + 2) {
    Some(dest) if dest == port => {}
    _ => return false,
  }
  if frame.len() - payload_off < echo::HEADER_SIZE {
    return false;
  }

  // swap source and destination addresses and ports
  for i in 0..4 {
    frame.swap(12 + i, 16 + i);
  }
  for i in 0..2 {
    frame.swap(udp_off + i, udp_off + 2 + i);
  }

  // no checksum
  frame[udp_off + 6] = 0;
  frame[udp_off + 7] = 0;

  echo::make_echo(&mut frame[payload_off..]);
  true
}

/// The raw-mode worker loop. Opens its own capture socket (raw workers
/// never touch a UDP socket) and reflects matching frames until `quit`.
pub fn run(ifname: &str, port: u16, quit: &AtomicBool, timeout: Duration) -> u64 {
  let sock = match open(ifname) {
    Ok(sock) => sock,
    Err(e) => {
      eprintln!("packet socket: {e}");
      return 0;
    }
  };
  let timeout_ms = timeout.as_millis() as libc::c_int;
  let mut buf = [0u8; MAX_DATAGRAM];
  let mut count = 0u64;
  while !quit.load(Ordering::Relaxed) {
    match unsafe { poll_in(sock.fd, timeout_ms) } {
      Ok(true) => {}
      Ok(false) => continue,
      Err(e) => {
        eprintln!("{e}");
        break;
      }
    }
    let recv = match unsafe { recvfrom(sock.fd, &mut buf, libc::MSG_DONTWAIT) } {
      Ok(Some(recv)) => recv,
      Ok(None) => continue,
      Err(e) => {
        eprintln!("{e}");
        break;
      }
    };
    let frame = &mut buf[..recv.recv_size];
    if !reflect_frame(frame, port) {
      continue;
    }
    // same capture socket, back to the captured link-layer sender
    if unsafe { sendto(sock.fd, frame, &recv.src_addr, recv.src_addr_len) }.is_ok() {
      count += 1;
    }
  }
  count
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut i = 0;
    while i + 1 < header.len() {
      if i != 10 {
        // the checksum field itself is treated as zero
        sum += u32::from(u16::from_be_bytes([header[i], header[i + 1]]));
      }
      i += 2;
    }
    while sum >> 16 != 0 {
      sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
  }

  fn build_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut f = vec![0u8; IPV4_MIN_HEADER + UDP_HEADER + payload.len()];
    f[0] = 0x45;
    let total_len = f.len() as u16;
    f[2..4].copy_from_slice(&total_len.to_be_bytes());
    f[8] = 64;
    f[9] = libc::IPPROTO_UDP as u8;
    f[12..16].copy_from_slice(&src);
    f[16..20].copy_from_slice(&dst);
    let csum = ipv4_checksum(&f[..IPV4_MIN_HEADER]);
    f[10..12].copy_from_slice(&csum.to_be_bytes());
    f[20..22].copy_from_slice(&sport.to_be_bytes());
    f[22..24].copy_from_slice(&dport.to_be_bytes());
    f[24..26].copy_from_slice(&((UDP_HEADER + payload.len()) as u16).to_be_bytes());
    f[26..28].copy_from_slice(&0xbeefu16.to_be_bytes());
    f[28..].copy_from_slice(payload);
    f
  }

  #[test]
  fn reflects_a_valid_frame() {
    let payload = [0u8; 16];
    let mut f = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 8053, &payload);
    assert!(reflect_frame(&mut f, 8053));
    assert_eq!(&f[12..16], &[10, 0, 0, 2]);
    assert_eq!(&f[16..20], &[10, 0, 0, 1]);
    assert_eq!(read_u16_be(&f, 20), Some(8053));
    assert_eq!(read_u16_be(&f, 22), Some(40000));
    assert_eq!(read_u16_be(&f, 26), Some(0), "UDP checksum must be zeroed");
    assert_eq!(f[28] & 0x80, 0, "payload byte 0 is the ID, not flags");
    assert_eq!(f[30] & 0x80, 0x80, "QR must be set in the payload");
  }

  #[test]
  fn address_swap_preserves_ip_checksum() {
    let payload = [0u8; 12];
    let mut f = build_frame([192, 168, 7, 9], [172, 16, 254, 3], 5353, 8053, &payload);
    let before = ipv4_checksum(&f[..IPV4_MIN_HEADER]);
    assert!(reflect_frame(&mut f, 8053));
    let after = ipv4_checksum(&f[..IPV4_MIN_HEADER]);
    assert_eq!(before, after);
    // and the stored field was left alone
    assert_eq!(read_u16_be(&f, 10), Some(before));
  }

  #[test]
  fn drops_truncated_frames() {
    let payload = [0u8; 12];
    let mut f = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 8053, &payload);
    f.truncate(IPV4_MIN_HEADER + UDP_HEADER - 1);
    assert!(!reflect_frame(&mut f, 8053));

    // IHL pointing past the captured bytes
    let mut f = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 8053, &payload);
    f[0] = 0x4f;
    assert!(!reflect_frame(&mut f, 8053));
  }

  #[test]
  fn drops_non_udp_and_wrong_port() {
    let payload = [0u8; 12];
    let mut f = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 8053, &payload);
    f[9] = 6; // TCP
    assert!(!reflect_frame(&mut f, 8053));

    let mut f = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 53, &payload);
    assert!(!reflect_frame(&mut f, 8053));
  }

  #[test]
  fn drops_short_payloads() {
    let payload = [0u8; 11];
    let mut f = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 8053, &payload);
    let orig = f.clone();
    assert!(!reflect_frame(&mut f, 8053));
    assert_eq!(f, orig, "dropped frames are left untouched");
  }
}
