//! Topology tests that have to cross a process boundary.
//!
//! Forked children can only hand their results back through the shared
//! output descriptor, so these assertions go through a real results file
//! rather than an in-memory callback.

use std::fs;
use std::process;

use dns_echo::farm::{farm, Affinity};
use dns_echo::results::ResultSink;

#[test]
fn forked_farm_reports_every_worker() {
  let path = std::env::temp_dir().join(format!("dns-echo-farm-{}.tsv", process::id()));
  let mut sink = ResultSink::create(Some(&path)).expect("sink");
  sink.start().expect("timestamp");

  farm(
    2,
    3,
    |tid| tid as u64 + 1,
    |fork_idx, tid, count| sink.record(fork_idx, tid, count),
    Affinity::Off,
  );

  let contents = fs::read_to_string(&path).expect("results file");
  fs::remove_file(&path).ok();

  let lines: Vec<&str> = contents.lines().collect();
  assert_eq!(
    lines.len(),
    1 + 6,
    "one timestamp plus one line per worker:\n{contents}"
  );

  let mut seen: Vec<(usize, usize, u64)> = lines[1..]
    .iter()
    .map(|line| {
      let mut fields = line.split('\t');
      (
        fields.next().unwrap().parse().unwrap(),
        fields.next().unwrap().parse().unwrap(),
        fields.next().unwrap().parse().unwrap(),
      )
    })
    .collect();
  seen.sort_unstable();
  assert_eq!(
    seen,
    vec![(0, 0, 1), (0, 1, 2), (0, 2, 3), (1, 0, 1), (1, 1, 2), (1, 2, 3)]
  );
}

#[test]
fn forkless_farm_writes_through_the_same_sink() {
  let path = std::env::temp_dir().join(format!("dns-echo-farm-flat-{}.tsv", process::id()));
  let mut sink = ResultSink::create(Some(&path)).expect("sink");
  sink.start().expect("timestamp");

  farm(
    0,
    2,
    |tid| tid as u64,
    |fork_idx, tid, count| sink.record(fork_idx, tid, count),
    Affinity::Off,
  );

  let contents = fs::read_to_string(&path).expect("results file");
  fs::remove_file(&path).ok();
  let lines: Vec<&str> = contents.lines().collect();
  assert_eq!(lines.len(), 1 + 2);
  assert_eq!(lines[1], "0\t0\t0");
  assert_eq!(lines[2], "0\t1\t1");
}
