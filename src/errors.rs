use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("{0}: {1}")]
  Io(&'static str, #[source] io::Error),
  #[error("no such interface: {0}")]
  UnknownInterface(String),
  #[error("packet mode requires an interface (-i)")]
  MissingInterface,
  #[error("results file: {0}")]
  ResultsFile(#[source] io::Error),
  #[error("io_uring: {0}")]
  IoUring(#[source] io::Error),
  #[error("io_uring submission queue full pushing {0} for slot {1}")]
  IoUringFull(&'static str, usize),
}

impl AppError {
  pub(crate) fn last_os(syscall: &'static str) -> Self {
    AppError::Io(syscall, io::Error::last_os_error())
  }
}
