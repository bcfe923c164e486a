//! Replays allocation trace files and reports utilization.
//!
//! ```text
//!   cargo run --example replay -- tests/traces/*.rep
//! ```
//!
//! Set `RUST_LOG=segalloc=debug` to watch heap extensions.

use std::{env, fs, process::ExitCode};

use segalloc::{
  Heap, HeapConfig,
  trace::{self, ReplayOptions, Trace},
};
use tracing_subscriber::EnvFilter;

fn run(path: &str) -> Result<(), Box<dyn std::error::Error>> {
  let trace: Trace = fs::read_to_string(path)?.parse()?;
  let mut heap = Heap::with_config(HeapConfig::from_env()?)?;

  let stats = trace::replay(
    &mut heap,
    &trace,
    ReplayOptions {
      check_every_op: true,
    },
  )?;

  println!(
    "{path}: {} ops, peak payload {} bytes, extent {} bytes, utilization {:.1}%",
    stats.ops,
    stats.peak_payload,
    stats.extent,
    stats.utilization() * 100.0
  );
  Ok(())
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let paths: Vec<String> = env::args().skip(1).collect();
  if paths.is_empty() {
    eprintln!("usage: replay <trace>...");
    return ExitCode::FAILURE;
  }

  let mut status = ExitCode::SUCCESS;
  for path in &paths {
    if let Err(err) = run(path) {
      eprintln!("{path}: {err}");
      status = ExitCode::FAILURE;
    }
  }
  status
}
