//! The z3 boundary: assertion, checking, and decoding of models.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Write};

use indenter::indented;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use z3::ast::Bool;
use z3::{Context, Model, Params, SatResult, Solver};

use crate::pipeline::error::{Error, Result};
use crate::pipeline::operator::Bag;
use crate::pipeline::shared::Value;
use crate::pipeline::universe::{Tuple, Universe, Val};

pub enum Outcome<'c> {
	Sat(Model<'c>),
	Unsat,
	/// The solver's own explanation, e.g. `timeout` or `canceled`.
	Unknown(String),
}

pub struct Prover<'c> {
	solver: Solver<'c>,
}

impl<'c> Prover<'c> {
	pub fn new(ctx: &'c Context, timeout_ms: Option<u64>) -> Self {
		let solver = Solver::new(ctx);
		if let Some(ms) = timeout_ms {
			let mut params = Params::new(ctx);
			params.set_u32("timeout", u32::try_from(ms).unwrap_or(u32::MAX));
			solver.set_params(&params);
		}
		Prover { solver }
	}

	pub fn assert(&self, fact: &Bool<'c>) {
		self.solver.assert(fact);
	}

	pub fn check(&self) -> Result<Outcome<'c>> {
		Ok(match self.solver.check() {
			SatResult::Sat => {
				let model = self.solver.get_model().ok_or_else(|| Error::Model("no model available".into()))?;
				Outcome::Sat(model)
			},
			SatResult::Unsat => Outcome::Unsat,
			SatResult::Unknown => {
				Outcome::Unknown(self.solver.get_reason_unknown().unwrap_or_else(|| "unknown".to_string()))
			},
		})
	}
}

pub fn timed_out(reason: &str) -> bool {
	reason.contains("timeout") || reason.contains("canceled")
}

fn holds<'c>(model: &Model<'c>, b: &Bool<'c>) -> bool {
	model.eval(b, true).and_then(|b| b.as_bool()).unwrap_or(false)
}

fn read<'c>(model: &Model<'c>, v: &Val<'c>) -> Cell {
	let value = match v {
		Val::Int(i) => model.eval(i, true).map(|i| (i.as_i64().map(Value::Int), i.to_string())),
		Val::Real(r) => model
			.eval(r, true)
			.map(|r| (r.as_real().map(|(n, d)| Value::Real(n as f64 / d as f64)), r.to_string())),
		Val::Bool(b) => model.eval(b, true).map(|b| (b.as_bool().map(Value::Bool), b.to_string())),
		Val::Str(s) => model.eval(s, true).map(|s| (s.as_string().map(Value::Str), s.to_string())),
	};
	match value {
		Some((Some(v), _)) => Cell::Value(v),
		Some((None, numeral)) => Cell::Unreadable { numeral },
		None => Cell::Unreadable { numeral: "?".into() },
	}
}

fn cells<'c>(model: &Model<'c>, u: &Universe<'c>, bag: &Bag<'c>, t: &Tuple<'c>) -> Vec<Option<Cell>> {
	bag.layout
		.iter()
		.map(|col| {
			if holds(model, &u.is_null(t, &col.key)) {
				None
			} else {
				Some(read(model, &u.attr(t, &col.key, col.ty())))
			}
		})
		.collect()
}

fn header(bag: &Bag) -> Vec<String> {
	bag.layout.iter().map(|c| c.field.to_string()).collect()
}

/// A non-NULL cell of a decoded row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
	Value(Value),
	/// A model value that no `Value` holds exactly, e.g. an integer beyond
	/// 64 bits, kept in the solver's notation.
	Unreadable { numeral: String },
}

impl From<Value> for Cell {
	fn from(v: Value) -> Self {
		Cell::Value(v)
	}
}

impl Display for Cell {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Cell::Value(v) => write!(f, "{}", v),
			Cell::Unreadable { numeral } => write!(f, "{}", numeral),
		}
	}
}

/// One symbolic base row; `None` cells are NULL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRow {
	pub present: bool,
	pub values: Vec<Option<Cell>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableInstance {
	pub columns: Vec<String>,
	pub rows: Vec<InstanceRow>,
}

/// Surviving rows of one query's result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRows {
	pub columns: Vec<String>,
	pub rows: Vec<Vec<Option<Cell>>>,
}

impl ResultRows {
	fn decode<'c>(model: &Model<'c>, u: &Universe<'c>, bag: &Bag<'c>) -> Self {
		let rows = bag.tuples.iter().filter(|t| holds(model, &u.survives(t))).map(|t| cells(model, u, bag, t)).collect();
		ResultRows { columns: header(bag), rows }
	}
}

/// A database instance on which the two queries disagree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Counterexample {
	pub tables: BTreeMap<String, TableInstance>,
	pub left: ResultRows,
	pub right: ResultRows,
}

impl Counterexample {
	pub fn decode<'c>(
		model: &Model<'c>,
		u: &Universe<'c>,
		tables: &BTreeMap<String, Bag<'c>>,
		left: &Bag<'c>,
		right: &Bag<'c>,
	) -> Self {
		let tables = tables
			.iter()
			.map(|(name, bag)| {
				let rows = bag
					.tuples
					.iter()
					.map(|t| InstanceRow { present: holds(model, &u.survives(t)), values: cells(model, u, bag, t) })
					.collect();
				(name.clone(), TableInstance { columns: header(bag), rows })
			})
			.collect();
		Counterexample {
			tables,
			left: ResultRows::decode(model, u, left),
			right: ResultRows::decode(model, u, right),
		}
	}
}

fn show(values: &[Option<Cell>]) -> String {
	values.iter().map(|v| v.as_ref().map_or("NULL".to_string(), Cell::to_string)).join(", ")
}

impl Display for Counterexample {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		for (name, table) in &self.tables {
			writeln!(f, "{} ({})", name, table.columns.iter().join(", "))?;
			for row in table.rows.iter().filter(|r| r.present) {
				writeln!(indented(f).with_str("\t"), "{}", show(&row.values))?;
			}
		}
		for (side, result) in [("left", &self.left), ("right", &self.right)] {
			writeln!(f, "{} result ({})", side, result.columns.iter().join(", "))?;
			if result.rows.is_empty() {
				writeln!(indented(f).with_str("\t"), "(empty)")?;
			}
			for row in &result.rows {
				writeln!(indented(f).with_str("\t"), "{}", show(row))?;
			}
		}
		Ok(())
	}
}
