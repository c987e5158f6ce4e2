//! The worker farm: processes outside, threads inside.
//!
//! `farm` owns the whole topology. With forks it creates child processes
//! that each run their own thread pool and exit; without forks the pool
//! runs right here. Every worker executes the same closure and hands
//! back an echoed-datagram count, which is reported through a callback
//! in whichever process owns that worker — a forked child reports its
//! own threads, because counts cannot cross the process boundary any
//! other way than through the shared output descriptor.

use std::io;
use std::mem;
use std::process;
use std::ptr;
use std::thread;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Affinity {
  Off,
  /// Pin each forked child to one CPU (round-robin over the available set).
  Fork,
  /// Pin each thread to CPU `tid % online`.
  Thread,
}

/// Spawn `forks` × `threads` workers and block until all of them are
/// done. `worker` receives the thread index and returns its count;
/// `report` receives `(fork_idx, thread_idx, count)` once per completed
/// worker, in thread-index order within each process.
///
/// Fork failure is logged and tolerated: the farm silently runs with
/// fewer workers, and a caller can only tell by counting report lines.
pub fn farm<W, R>(forks: usize, threads: usize, worker: W, mut report: R, affinity: Affinity)
where
  W: Fn(usize) -> u64 + Sync,
  R: FnMut(usize, usize, u64),
{
  // Lead a fresh process group, so that a termination signal re-sent to
  // the group reaches every descendant.
  unsafe {
    libc::setpgid(0, 0);
  }

  if forks < 1 {
    make_threads(0, threads, &worker, &mut report, affinity);
    return;
  }

  for fork_idx in 0..forks {
    let pid = unsafe { libc::fork() };
    if pid == 0 {
      make_threads(fork_idx, threads, &worker, &mut report, affinity);
      // a child must never fall through into the parent's fork loop or
      // reaping logic
      process::exit(0);
    } else if pid < 0 {
      eprintln!("fork: {}", io::Error::last_os_error());
    } else if affinity == Affinity::Fork {
      pin_child(pid, fork_idx);
    }
  }

  // reap everything; doubles as the completion barrier
  unsafe {
    while libc::wait(ptr::null_mut()) > 0 {}
  }
}

fn make_threads<W, R>(fork_idx: usize, threads: usize, worker: &W, report: &mut R, affinity: Affinity)
where
  W: Fn(usize) -> u64 + Sync,
  R: FnMut(usize, usize, u64),
{
  if threads <= 1 {
    let count = worker(0);
    report(fork_idx, 0, count);
    return;
  }

  let ncpus = online_cpus();
  let mut results: Vec<(usize, Option<u64>)> = Vec::with_capacity(threads);
  thread::scope(|scope| {
    let mut handles = Vec::with_capacity(threads);
    for tid in 0..threads {
      let spawned = thread::Builder::new()
        .name(format!("echo-{fork_idx}-{tid}"))
        .spawn_scoped(scope, move || {
          if affinity == Affinity::Thread {
            pin_self(tid % ncpus);
          }
          worker(tid)
        });
      match spawned {
        Ok(handle) => handles.push((tid, handle)),
        // degrade like a failed fork: fewer workers than asked for
        Err(e) => eprintln!("spawn thread {tid}: {e}"),
      }
    }
    for (tid, handle) in handles {
      // a panicked worker has no count to report
      results.push((tid, handle.join().ok()));
    }
  });
  for (tid, count) in results {
    if let Some(count) = count {
      report(fork_idx, tid, count);
    }
  }
}

/// Reduce `set` to its `n mod count`-th set bit: deterministic
/// round-robin placement over whatever CPUs are currently available to
/// the caller, not a fixed physical-core mapping.
pub fn select_cpu(set: &mut libc::cpu_set_t, n: usize) {
  unsafe {
    let count = libc::CPU_COUNT(set) as usize;
    if count == 0 {
      return;
    }
    let mut left = n % count;
    for cpu in 0..libc::CPU_SETSIZE as usize {
      if libc::CPU_ISSET(cpu, set) {
        if left == 0 {
          libc::CPU_ZERO(set);
          libc::CPU_SET(cpu, set);
          return;
        }
        left -= 1;
      }
    }
  }
}

fn pin_child(pid: libc::pid_t, n: usize) {
  unsafe {
    let mut set: libc::cpu_set_t = mem::zeroed();
    if libc::sched_getaffinity(pid, mem::size_of::<libc::cpu_set_t>(), &mut set) == -1 {
      eprintln!("sched_getaffinity: {}", io::Error::last_os_error());
      return;
    }
    select_cpu(&mut set, n);
    if libc::sched_setaffinity(pid, mem::size_of::<libc::cpu_set_t>(), &set) == -1 {
      eprintln!("sched_setaffinity: {}", io::Error::last_os_error());
    }
  }
}

/// Pin the calling thread (pid 0 targets the caller, not the process).
fn pin_self(cpu: usize) {
  unsafe {
    let mut set: libc::cpu_set_t = mem::zeroed();
    libc::CPU_ZERO(&mut set);
    libc::CPU_SET(cpu, &mut set);
    if libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) == -1 {
      eprintln!("sched_setaffinity: {}", io::Error::last_os_error());
    }
  }
}

fn online_cpus() -> usize {
  let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
  if n < 1 {
    1
  } else {
    n as usize
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn mask_of(bits: &[usize]) -> libc::cpu_set_t {
    unsafe {
      let mut set: libc::cpu_set_t = mem::zeroed();
      libc::CPU_ZERO(&mut set);
      for &bit in bits {
        libc::CPU_SET(bit, &mut set);
      }
      set
    }
  }

  #[test]
  fn cpu_selection_round_robins_over_set_bits() {
    for (n, expect) in [(0, 2), (1, 5), (2, 7), (3, 2), (4, 5), (7, 5)] {
      let mut set = mask_of(&[2, 5, 7]);
      select_cpu(&mut set, n);
      unsafe {
        assert_eq!(libc::CPU_COUNT(&set), 1, "n={n}");
        assert!(libc::CPU_ISSET(expect, &set), "n={n} should pick cpu {expect}");
      }
    }
  }

  #[test]
  fn cpu_selection_tolerates_an_empty_mask() {
    let mut set = mask_of(&[]);
    select_cpu(&mut set, 3);
    unsafe {
      assert_eq!(libc::CPU_COUNT(&set), 0);
    }
  }

  #[test]
  fn forkless_farm_stays_in_process() {
    let ran = AtomicUsize::new(0);
    let pid_before = process::id();
    let mut reported = Vec::new();
    farm(
      0,
      3,
      |tid| {
        assert_eq!(process::id(), pid_before);
        ran.fetch_add(1, Ordering::Relaxed);
        tid as u64 * 10
      },
      |fork_idx, tid, count| reported.push((fork_idx, tid, count)),
      Affinity::Off,
    );
    assert_eq!(ran.load(Ordering::Relaxed), 3);
    assert_eq!(reported, vec![(0, 0, 0), (0, 1, 10), (0, 2, 20)]);
  }

  #[test]
  fn single_thread_runs_inline() {
    let mut reported = Vec::new();
    farm(
      0,
      1,
      |tid| {
        assert_eq!(tid, 0);
        42
      },
      |fork_idx, tid, count| reported.push((fork_idx, tid, count)),
      Affinity::Off,
    );
    assert_eq!(reported, vec![(0, 0, 42)]);
  }

  #[test]
  fn panicked_worker_reports_nothing() {
    let mut reported = Vec::new();
    farm(
      0,
      2,
      |tid| {
        if tid == 0 {
          panic!("worker went down");
        }
        7
      },
      |fork_idx, tid, count| reported.push((fork_idx, tid, count)),
      Affinity::Off,
    );
    assert_eq!(reported, vec![(0, 1, 7)]);
  }
}
