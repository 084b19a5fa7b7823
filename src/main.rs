use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::{anyhow, bail, Context};
use bag_prover::{check, Input, Report};
use clap::Parser;

/// Checks pairs of query plans for equivalence under bag semantics.
#[derive(Parser, Debug)]
#[command(version)]
struct Options {
	/// JSON inputs, each holding a schema and two query plans
	#[arg(required = true)]
	inputs: Vec<PathBuf>,

	/// Symbolic rows per base table, overriding the input's settings
	#[arg(long)]
	rows: Option<usize>,

	/// Solver timeout in milliseconds, overriding the input's settings
	#[arg(long, conflicts_with = "no_timeout")]
	timeout_ms: Option<u64>,

	/// Let the solver run without a timeout
	#[arg(long)]
	no_timeout: bool,

	/// Number of inputs checked in parallel
	#[arg(long, short = 'j', default_value_t = 1)]
	jobs: usize,

	/// Print one JSON report per line instead of text
	#[arg(long)]
	json: bool,
}

impl Options {
	fn run_one(&self, path: &Path) -> anyhow::Result<Report> {
		let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
		let mut input: Input = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
		if let Some(rows) = self.rows {
			input.settings.rows_per_table = rows;
		}
		if self.no_timeout {
			input.settings.timeout_ms = None;
		} else if let Some(ms) = self.timeout_ms {
			input.settings.timeout_ms = Some(ms);
		}
		check(input).with_context(|| format!("checking {}", path.display()))
	}

	fn print(&self, path: &Path, result: &anyhow::Result<Report>) {
		match result {
			Ok(report) if self.json => {
				let line = serde_json::json!({ "file": path, "report": report });
				println!("{}", line);
			},
			Ok(report) => {
				println!("{}: {}", path.display(), report.verdict);
				if report.stats.partially_supported {
					println!("\t(partially supported: {} constraint(s) dropped)", report.stats.dropped_constraints);
				}
			},
			Err(e) => eprintln!("{}: error: {:#}", path.display(), e),
		}
	}

	fn run(self) -> anyhow::Result<()> {
		if self.jobs == 0 {
			bail!("--jobs must be at least 1");
		}
		let next = AtomicUsize::new(0);
		let mut results: Vec<(usize, anyhow::Result<Report>)> = thread::scope(|s| {
			let workers: Vec<_> = (0..self.jobs.min(self.inputs.len()))
				.map(|_| {
					s.spawn(|| {
						let mut done = vec![];
						loop {
							let i = next.fetch_add(1, Ordering::Relaxed);
							let Some(path) = self.inputs.get(i) else { break };
							done.push((i, guarded(|| self.run_one(path))));
						}
						done
					})
				})
				.collect();
			workers.into_iter().flat_map(|w| w.join().unwrap_or_default()).collect()
		});
		results.sort_by_key(|(i, _)| *i);

		let mut failed = 0;
		for (i, result) in &results {
			if result.is_err() {
				failed += 1;
			}
			self.print(&self.inputs[*i], result);
		}
		if failed > 0 {
			bail!("{} of {} inputs failed", failed, self.inputs.len());
		}
		Ok(())
	}
}

/// Runs `check`, turning a panic inside the solver bindings into an error for
/// that input alone.
fn guarded<T>(check: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
	panic::catch_unwind(AssertUnwindSafe(check)).unwrap_or_else(|cause| {
		let message = cause
			.downcast_ref::<&str>()
			.map(|s| s.to_string())
			.or_else(|| cause.downcast_ref::<String>().cloned())
			.unwrap_or_else(|| "unknown cause".to_string());
		Err(anyhow!("panicked: {}", message))
	})
}

fn main() -> anyhow::Result<()> {
	env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));
	Options::parse().run()
}
