//! Bottom-up translation of a plan into a bag plus premises.
//!
//! One encoder owns the universe for a whole run, so both queries read the
//! same base rows and their premises accumulate in one place.

use std::collections::BTreeMap;

use itertools::Itertools;
use z3::ast::Bool;
use z3::Context;

use crate::pipeline::constraint::Constraint;
use crate::pipeline::error::{Error, Result};
use crate::pipeline::group::{distinct, group_by};
use crate::pipeline::operator::{base_layout, filter, join, limit, null_test, project, scan, semi, union_all, Bag, Encoded};
use crate::pipeline::order::order_by;
use crate::pipeline::relation::{Expr, Plan};
use crate::pipeline::shared::{Catalog, Value};
use crate::pipeline::universe::{Universe, Val};

pub struct PlanEncoder<'c> {
	u: Universe<'c>,
	catalog: Catalog,
	tables: BTreeMap<String, Bag<'c>>,
	premises: Vec<Bool<'c>>,
}

impl<'c> PlanEncoder<'c> {
	/// Declares `rows` symbolic rows per table of `catalog`.
	pub fn new(ctx: &'c Context, catalog: &Catalog, rows: usize) -> Self {
		let mut u = Universe::new(ctx);
		let mut tables = BTreeMap::new();
		let mut premises = vec![];
		for (name, columns) in catalog.tables() {
			let layout = base_layout(name, columns);
			let tuples = (0..rows).map(|_| u.declare_tuple(name)).collect_vec();
			for (col, def) in layout.iter().zip(columns) {
				if !def.nullable {
					premises.extend(tuples.iter().map(|t| u.is_null(t, &col.key).not()));
				}
			}
			tables.insert(name.clone(), Bag { layout, tuples });
		}
		PlanEncoder { u, catalog: catalog.clone(), tables, premises }
	}

	pub fn universe(&self) -> &Universe<'c> {
		&self.u
	}

	pub fn tables(&self) -> &BTreeMap<String, Bag<'c>> {
		&self.tables
	}

	/// Adds the premises of every well-formed constraint. Malformed ones are
	/// skipped with a warning; the number skipped is returned.
	pub fn assume(&mut self, constraints: &[Constraint]) -> usize {
		let mut dropped = 0;
		for c in constraints {
			match c.validate(&self.catalog).and_then(|_| c.encode(&self.u, &self.tables)) {
				Ok(premise) => self.premises.push(premise),
				Err(e) => {
					log::warn!("Dropping constraint {}: {}", c, e);
					dropped += 1;
				},
			}
		}
		dropped
	}

	fn row(&self, table: &str, row: usize) -> Result<&Bag<'c>> {
		let bag = self.tables.get(table).ok_or_else(|| Error::UnknownTable(table.to_string()))?;
		if row >= bag.len() {
			return Err(Error::RowOutOfRange { table: table.to_string(), row });
		}
		Ok(bag)
	}

	/// Fixes base row `row` of `table` as present with the given values.
	pub fn pin(&mut self, table: &str, row: usize, values: &[Option<Value>]) -> Result<()> {
		let bag = self.row(table, row)?;
		if values.len() != bag.layout.len() {
			return Err(Error::ArityMismatch {
				context: format!("row of {}", table),
				left: bag.layout.len(),
				right: values.len(),
			});
		}
		let t = &bag.tuples[row];
		let mut facts = vec![self.u.survives(t)];
		for (col, v) in bag.layout.iter().zip(values) {
			let null = self.u.is_null(t, &col.key);
			match v {
				Some(v) => {
					facts.push(null.not());
					facts.push(self.u.attr(t, &col.key, col.ty()).equals(&Val::literal(self.u.ctx(), v)?)?);
				},
				None => facts.push(null),
			}
		}
		self.premises.extend(facts);
		Ok(())
	}

	/// Fixes base row `row` of `table` as absent.
	pub fn pin_absent(&mut self, table: &str, row: usize) -> Result<()> {
		let fact = self.u.deleted(&self.row(table, row)?.tuples[row]);
		self.premises.push(fact);
		Ok(())
	}

	/// Validates `plan` and encodes it.
	pub fn encode(&mut self, plan: &Plan) -> Result<Bag<'c>> {
		plan.fields(&self.catalog)?;
		self.node(plan)
	}

	fn node(&mut self, plan: &Plan) -> Result<Bag<'c>> {
		let Encoded { bag, constraints } = match plan {
			Plan::Scan { table, alias } => {
				let base = self.tables.get(table).ok_or_else(|| Error::UnknownTable(table.clone()))?;
				scan(&mut self.u, base, alias.as_deref().unwrap_or(table))
			},
			Plan::Filter { input, predicate } => {
				let input = self.node(input)?;
				let u = &mut self.u;
				match predicate {
					Expr::IsNull(e) => null_test(u, &input, e, false)?,
					Expr::IsNotNull(e) => null_test(u, &input, e, true)?,
					_ => filter(u, &input, predicate)?,
				}
			},
			Plan::Project { input, items } => {
				let input = self.node(input)?;
				project(&mut self.u, &input, items)?
			},
			Plan::Join { kind, left, right, on } => {
				let (left, right) = (self.node(left)?, self.node(right)?);
				join(&mut self.u, *kind, &left, &right, on.as_ref())?
			},
			Plan::Semi { input, probe, subquery } => {
				let (input, subquery) = (self.node(input)?, self.node(subquery)?);
				semi(&mut self.u, &input, probe, &subquery)?
			},
			Plan::Aggregate { input, group_by: keys, aggregates, having } => {
				let input = self.node(input)?;
				group_by(&mut self.u, &input, keys, aggregates, having.as_ref())?
			},
			Plan::Distinct { input } => {
				let input = self.node(input)?;
				distinct(&mut self.u, &input)?
			},
			Plan::Sort { input, keys } => {
				let input = self.node(input)?;
				order_by(&mut self.u, &input, keys)?
			},
			Plan::Limit { input, count } => {
				let input = self.node(input)?;
				limit(&mut self.u, &input, *count)
			},
			Plan::UnionAll { left, right } => {
				let (left, right) = (self.node(left)?, self.node(right)?);
				union_all(&mut self.u, &left, &right)?
			},
		};
		log::trace!("{} -> {} tuples, {} constraints", kind(plan), bag.len(), constraints.len());
		self.premises.extend(constraints);
		Ok(bag)
	}

	pub fn premise_count(&self) -> usize {
		self.premises.len()
	}

	/// Everything asserted so far, including distinctness of fresh tuples.
	pub fn premise(&self) -> Bool<'c> {
		let mut all = self.premises.clone();
		all.push(self.u.distinctness());
		self.u.and(&all)
	}
}

fn kind(plan: &Plan) -> &'static str {
	match plan {
		Plan::Scan { .. } => "scan",
		Plan::Filter { .. } => "filter",
		Plan::Project { .. } => "project",
		Plan::Join { .. } => "join",
		Plan::Semi { .. } => "semi",
		Plan::Aggregate { .. } => "aggregate",
		Plan::Distinct { .. } => "distinct",
		Plan::Sort { .. } => "sort",
		Plan::Limit { .. } => "limit",
		Plan::UnionAll { .. } => "union_all",
	}
}

#[cfg(test)]
mod tests {
	use z3::{Config, SatResult, Solver};

	use super::*;
	use crate::pipeline::shared::{ColumnDef, DataType};

	fn catalog() -> Catalog {
		Catalog::new().with_table("emp", vec![
			ColumnDef::new("id", DataType::Integer),
			ColumnDef::not_null("age", DataType::Integer),
		])
	}

	#[test]
	fn base_rows_follow_the_catalog() {
		let ctx = Context::new(&Config::new());
		let enc = PlanEncoder::new(&ctx, &catalog(), 2);
		let emp = &enc.tables()["emp"];
		assert_eq!(emp.len(), 2);
		assert_eq!(emp.layout.iter().map(|c| c.field.to_string()).collect_vec(), vec!["emp.id", "emp.age"]);
		// NOT NULL age on both rows
		assert_eq!(enc.premise_count(), 2);
	}

	#[test]
	fn pins_are_checked_against_the_table() {
		let ctx = Context::new(&Config::new());
		let mut enc = PlanEncoder::new(&ctx, &catalog(), 2);
		assert_eq!(enc.pin("emp", 2, &[None, None]), Err(Error::RowOutOfRange { table: "emp".into(), row: 2 }));
		assert!(matches!(enc.pin("emp", 0, &[None]), Err(Error::ArityMismatch { .. })));
		assert_eq!(enc.pin_absent("dept", 0), Err(Error::UnknownTable("dept".into())));
		enc.pin("emp", 0, &[Some(Value::Int(1)), None]).unwrap();
		// a NULL age contradicts the NOT NULL premise
		let solver = Solver::new(&ctx);
		solver.assert(&enc.premise());
		assert_eq!(solver.check(), SatResult::Unsat);
	}

	#[test]
	fn invalid_plans_build_nothing() {
		let ctx = Context::new(&Config::new());
		let mut enc = PlanEncoder::new(&ctx, &catalog(), 2);
		let before = enc.premise_count();
		let plan = Plan::scan("emp").filter(Expr::col("salary").gt(Expr::lit(1)));
		assert!(matches!(enc.encode(&plan), Err(Error::UnknownColumn(_))));
		assert_eq!(enc.premise_count(), before);
	}

	#[test]
	fn malformed_constraints_are_dropped() {
		let ctx = Context::new(&Config::new());
		let mut enc = PlanEncoder::new(&ctx, &catalog(), 2);
		let dropped = enc.assume(&[
			Constraint::NotNull { table: "emp".into(), column: "id".into() },
			Constraint::NotNull { table: "emp".into(), column: "salary".into() },
		]);
		assert_eq!(dropped, 1);
		assert_eq!(enc.premise_count(), 3);
	}
}
