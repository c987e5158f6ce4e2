use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;

use dns_echo::errors::AppError;
use dns_echo::farm::{farm, Affinity};
use dns_echo::io_impl::common::bind_udp;
use dns_echo::io_impl::{packet, EchoMode};
use dns_echo::results::ResultSink;
use dns_echo::shutdown;

#[derive(Parser)]
#[command(version)]
/// A DNS echo responder for load testing.
///
/// Binds a UDP port (or captures raw frames on an interface), turns each
/// query-shaped datagram into a response by rewriting three header
/// bytes, and spreads the work over a farm of processes and threads.
/// On completion every worker reports one tab-separated result line.
struct Cli {
  /// Receive strategy.
  #[arg(short, long, value_enum, default_value_t = EchoMode::Blocking)]
  mode: EchoMode,

  /// UDP port to serve.
  #[arg(short, long, default_value_t = 8053)]
  port: u16,

  /// Number of worker processes; 0 keeps all workers in this process.
  #[arg(short, long, default_value_t = 0)]
  forks: usize,

  /// Worker threads per process.
  #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(usize))]
  threads: usize,

  /// Pin workers to CPUs (children when forking, threads otherwise).
  #[arg(short, long)]
  affinity: bool,

  /// Bind one socket per worker with SO_REUSEPORT instead of sharing one.
  #[arg(short, long)]
  reuse_port: bool,

  /// Write result lines here instead of stdout.
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Interface to capture on (packet mode only).
  #[arg(short, long)]
  interface: Option<String>,

  #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
  /// Receive/poll timeout in milliseconds. Bounds how long any worker
  /// can go without re-checking for shutdown.
  timeout_ms: u64,
}

fn run() -> Result<(), AppError> {
  let cli = Cli::parse();
  shutdown::install();

  let mut sink = ResultSink::create(cli.output.as_deref())?;
  sink.start()?;

  let timeout = Duration::from_millis(cli.timeout_ms);
  let quit = shutdown::flag();
  let mode = cli.mode;
  let port = cli.port;

  eprintln!("{mode} mode on port {port}");
  eprintln!("starting with {} forks and {} threads", cli.forks, cli.threads);

  let worker: Box<dyn Fn(usize) -> u64 + Send + Sync> = if mode == EchoMode::Packet {
    let ifname = cli.interface.clone().ok_or(AppError::MissingInterface)?;
    // fail on a bad interface name before any worker starts
    packet::check_interface(&ifname)?;
    Box::new(move |_tid| packet::run(&ifname, port, quit, timeout))
  } else if cli.reuse_port {
    // one independently bound socket per worker, lazily; the kernel
    // balances datagrams across the group
    Box::new(move |tid| match bind_udp(port, true, timeout) {
      Ok(sock) => mode.run(&sock, quit, timeout),
      Err(e) => {
        eprintln!("worker {tid} socket: {e}");
        0
      }
    })
  } else {
    // one socket for everyone, bound before the farm starts; a bind
    // failure here is fatal to the whole farm
    let sock = bind_udp(port, false, timeout)?;
    Box::new(move |_tid| mode.run(&sock, quit, timeout))
  };

  let affinity = if !cli.affinity {
    Affinity::Off
  } else if cli.forks > 0 {
    Affinity::Fork
  } else {
    Affinity::Thread
  };

  farm(
    cli.forks,
    cli.threads,
    &*worker,
    |fork_idx, tid, count| sink.record(fork_idx, tid, count),
    affinity,
  );
  Ok(())
}

fn main() {
  if let Err(e) = run() {
    eprintln!("Error: {}", e);
    process::exit(1);
  }
}
