//! The result sink: one timestamp line at startup, then one line per
//! completed worker.
//!
//! Forked children inherit the descriptor and write their own workers'
//! lines, so every write here is a single flushed line: children must
//! never inherit half-buffered bytes, and lines from sibling processes
//! may interleave only at line granularity.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;

use crate::errors::AppError;

pub struct ResultSink {
  out: Box<dyn Write + Send>,
}

impl ResultSink {
  /// Stdout when no path is given.
  pub fn create(path: Option<&Path>) -> Result<Self, AppError> {
    let out: Box<dyn Write + Send> = match path {
      Some(path) => Box::new(File::create(path).map_err(AppError::ResultsFile)?),
      None => Box::new(io::stdout()),
    };
    Ok(ResultSink { out })
  }

  /// The UTC startup timestamp. Must run (and flush) before the farm
  /// forks anything.
  pub fn start(&mut self) -> Result<(), AppError> {
    writeln!(self.out, "{}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"))
      .and_then(|_| self.out.flush())
      .map_err(AppError::ResultsFile)
  }

  /// One `<fork>\t<thread>\t<count>` line per worker.
  pub fn record(&mut self, fork_idx: usize, thread_idx: usize, count: u64) {
    let line = format!("{fork_idx}\t{thread_idx}\t{count}\n");
    if self
      .out
      .write_all(line.as_bytes())
      .and_then(|_| self.out.flush())
      .is_err()
    {
      eprintln!("failed to write result line for worker {fork_idx}-{thread_idx}");
    }
  }
}
