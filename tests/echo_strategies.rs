//! Loopback round-trips through every UDP receive strategy.
//!
//! Each test binds an ephemeral port, runs one strategy on a worker
//! thread with a test-owned shutdown flag, and plays client over
//! 127.0.0.1: every well-formed query must come back identical except
//! for bytes 2-3, short datagrams must vanish, and the worker must
//! return the exact echo count promptly once the flag flips.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use dns_echo::echo;
use dns_echo::io_impl::common::bind_udp;
use dns_echo::io_impl::{uring, EchoMode};

const TIMEOUT: Duration = Duration::from_millis(100);
const QUERIES: u64 = 20;

fn query(rng: &mut SmallRng, len: usize) -> Vec<u8> {
  let mut buf = vec![0u8; len];
  rng.fill_bytes(&mut buf);
  buf[2] &= 0x7f; // QR=0, as a client would send
  buf
}

fn expected_reply(q: &[u8]) -> Vec<u8> {
  let mut reply = q.to_vec();
  echo::make_echo(&mut reply);
  reply
}

fn exercise(mode: EchoMode) {
  let sock = bind_udp(0, false, TIMEOUT).expect("bind");
  let port = sock.local_port().expect("local port");
  let quit = AtomicBool::new(false);

  thread::scope(|scope| {
    let worker = scope.spawn(|| mode.run(&sock, &quit, TIMEOUT));

    let client = UdpSocket::bind("127.0.0.1:0").expect("client bind");
    client
      .set_read_timeout(Some(Duration::from_secs(5)))
      .expect("client timeout");
    client.connect(("127.0.0.1", port)).expect("connect");

    let mut rng = SmallRng::seed_from_u64(0x5eed);
    for i in 0..QUERIES {
      let len = echo::HEADER_SIZE + (i as usize % 40);
      let q = query(&mut rng, len);
      client.send(&q).expect("send");
      let mut reply = [0u8; 512];
      let n = client.recv(&mut reply).expect("reply");
      assert_eq!(&reply[..n], &expected_reply(&q)[..], "mode {mode}");
    }

    // short datagrams are dropped without a reply and without a count
    for len in [0usize, 1, 4, 11] {
      client.send(&vec![0u8; len]).expect("send short");
    }
    thread::sleep(TIMEOUT);

    quit.store(true, Ordering::Relaxed);
    let signalled = Instant::now();
    let count = worker.join().expect("worker");
    assert!(
      signalled.elapsed() < TIMEOUT * 5,
      "mode {mode}: worker took {:?} to observe shutdown",
      signalled.elapsed()
    );
    assert_eq!(count, QUERIES, "mode {mode}");
  });
}

#[test]
fn blocking_echoes() {
  exercise(EchoMode::Blocking);
}

#[test]
fn nonblocking_echoes() {
  exercise(EchoMode::Nonblocking);
}

#[test]
fn polling_echoes() {
  exercise(EchoMode::Polling);
}

#[test]
fn select_echoes() {
  exercise(EchoMode::Select);
}

#[test]
fn batched_echoes() {
  exercise(EchoMode::Batched);
}

#[test]
fn event_echoes() {
  exercise(EchoMode::Event);
}

#[test]
fn uring_echoes() {
  if !uring::available() {
    eprintln!("io_uring unavailable here; skipping");
    return;
  }
  exercise(EchoMode::Uring);
}

#[test]
fn idle_worker_still_shuts_down() {
  // no traffic at all: the receive timeout alone must wake the loop
  let sock = bind_udp(0, false, TIMEOUT).expect("bind");
  let quit = AtomicBool::new(false);
  thread::scope(|scope| {
    let worker = scope.spawn(|| EchoMode::Blocking.run(&sock, &quit, TIMEOUT));
    thread::sleep(TIMEOUT / 2);
    quit.store(true, Ordering::Relaxed);
    let signalled = Instant::now();
    let count = worker.join().expect("worker");
    assert!(signalled.elapsed() < TIMEOUT * 5);
    assert_eq!(count, 0);
  });
}
