use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use z3::{Config, Context};

use crate::pipeline::constraint::Constraint;
use crate::pipeline::encode::PlanEncoder;
use crate::pipeline::relation::{compatible, Plan};
use crate::pipeline::shared::Catalog;
use crate::pipeline::solver::{timed_out, Counterexample, Outcome, Prover};

pub mod constraint;
pub mod encode;
pub mod equiv;
pub mod error;
pub mod group;
pub mod null;
pub mod operator;
pub mod order;
pub mod relation;
pub mod shared;
pub mod solver;
#[cfg(test)]
mod tests;
pub mod universe;

pub use error::{Error, Result};

/// Knobs of one run. Every field may be omitted from the input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	/// Symbolic rows per base table; instances up to this size are covered.
	pub rows_per_table: usize,
	/// `None` lets the solver run unbounded.
	pub timeout_ms: Option<u64>,
}

impl Default for Settings {
	fn default() -> Self {
		Settings { rows_per_table: 3, timeout_ms: Some(10_000) }
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Input {
	pub schema: Catalog,
	pub queries: (Plan, Plan),
	/// The SQL the plans came from, for logging only.
	#[serde(default)]
	pub help: (String, String),
	#[serde(default)]
	pub constraints: Vec<Constraint>,
	#[serde(default)]
	pub settings: Settings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
	Equivalent,
	NotEquivalent { counterexample: Counterexample },
	Unknown { reason: String },
}

impl Verdict {
	pub fn is_equivalent(&self) -> bool {
		matches!(self, Verdict::Equivalent)
	}
}

impl Display for Verdict {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Verdict::Equivalent => write!(f, "EQUIVALENT"),
			Verdict::NotEquivalent { counterexample } => write!(f, "NOT_EQUIVALENT\n{}", counterexample),
			Verdict::Unknown { reason } => write!(f, "UNKNOWN ({})", reason),
		}
	}
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Stats {
	pub trivial: bool,
	pub partially_supported: bool,
	pub dropped_constraints: usize,
	pub tuples: usize,
	pub premises: usize,
	pub smt_timed_out: bool,
	pub encode_duration: Duration,
	pub smt_duration: Duration,
	pub total_duration: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
	pub verdict: Verdict,
	pub stats: Stats,
}

/// Decides whether the two queries of `input` agree on every instance that
/// satisfies its constraints and fits its row bound.
pub fn check(Input { schema, queries: (left, right), help, constraints, settings }: Input) -> Result<Report> {
	let start = Instant::now();
	let mut stats = Stats::default();
	log::info!("Input:\n{}\n{}", help.0, help.1);
	log::info!("Left:\n{}", left);
	log::info!("Right:\n{}", right);

	compatible("query outputs", &left.fields(&schema)?, &right.fields(&schema)?)?;
	if left == right {
		log::info!("Trivially true!");
		stats.trivial = true;
		stats.total_duration = start.elapsed();
		return Ok(Report { verdict: Verdict::Equivalent, stats });
	}

	let ctx = Context::new(&Config::new());
	let encode_start = Instant::now();
	log::debug!("Encoding started");
	let mut encoder = PlanEncoder::new(&ctx, &schema, settings.rows_per_table);
	stats.dropped_constraints = encoder.assume(&constraints);
	stats.partially_supported = stats.dropped_constraints > 0;
	let l = encoder.encode(&left)?;
	let r = encoder.encode(&right)?;
	let conclusion = equiv::equivalent(encoder.universe(), &l, &r)?;
	stats.encode_duration = encode_start.elapsed();
	stats.tuples = encoder.universe().tuple_count();
	stats.premises = encoder.premise_count();
	log::debug!("Encoding finished - {:.4?}", stats.encode_duration);
	log::trace!("{} tuples, {} premises", stats.tuples, stats.premises);

	let prover = Prover::new(&ctx, settings.timeout_ms);
	prover.assert(&encoder.premise());
	prover.assert(&conclusion.not());
	let smt_start = Instant::now();
	log::debug!("SMT check started");
	let outcome = prover.check()?;
	stats.smt_duration = smt_start.elapsed();
	log::debug!("SMT check finished - {:.4?}", stats.smt_duration);

	let verdict = match outcome {
		Outcome::Unsat => Verdict::Equivalent,
		Outcome::Sat(model) => {
			let counterexample = Counterexample::decode(&model, encoder.universe(), encoder.tables(), &l, &r);
			Verdict::NotEquivalent { counterexample }
		},
		Outcome::Unknown(reason) => {
			stats.smt_timed_out = timed_out(&reason);
			Verdict::Unknown { reason }
		},
	};
	stats.total_duration = start.elapsed();
	log::info!("Verdict: {}", verdict);
	Ok(Report { verdict, stats })
}
