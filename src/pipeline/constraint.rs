//! Integrity constraints over the base tables.
//!
//! They arrive already parsed, tagged by `kind`, and are stated over the
//! bounded base rows only, so every premise stays quantifier-free.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use z3::ast::Bool;

use crate::pipeline::error::{Error, Result};
use crate::pipeline::null::{Row, Scalar};
use crate::pipeline::operator::Bag;
use crate::pipeline::relation::CmpOp;
use crate::pipeline::shared::{Catalog, ColumnRef, DataType, Value};
use crate::pipeline::universe::{Universe, Val};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
	/// Every non-NULL `table.column` value occurs as `references.key`.
	ForeignKey { table: String, column: String, references: String, key: String },
	/// Non-NULL values lie within the inclusive bounds.
	Range {
		table: String,
		column: String,
		#[serde(default)]
		min: Option<Value>,
		#[serde(default)]
		max: Option<Value>,
	},
	OneOf { table: String, column: String, values: Vec<Value> },
	/// No two rows agree on all of `columns` unless one of them is NULL.
	Unique { table: String, columns: Vec<String> },
	NotNull { table: String, column: String },
	/// Non-NULL values increase along the row order.
	Monotonic {
		table: String,
		column: String,
		#[serde(default)]
		strict: bool,
	},
}

impl Display for Constraint {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Constraint::ForeignKey { table, column, references, key } => {
				write!(f, "{}.{} REFERENCES {}.{}", table, column, references, key)
			},
			Constraint::Range { table, column, min, max } => {
				let bound = |b: &Option<Value>| b.as_ref().map_or("-".to_string(), Value::to_string);
				write!(f, "{}.{} IN [{}, {}]", table, column, bound(min), bound(max))
			},
			Constraint::OneOf { table, column, values } => {
				write!(f, "{}.{} IN ({})", table, column, values.iter().format(", "))
			},
			Constraint::Unique { table, columns } => write!(f, "UNIQUE {}({})", table, columns.iter().format(", ")),
			Constraint::NotNull { table, column } => write!(f, "{}.{} NOT NULL", table, column),
			Constraint::Monotonic { table, column, strict } => {
				write!(f, "{}.{} {}", table, column, if *strict { "INCREASING" } else { "NONDECREASING" })
			},
		}
	}
}

fn invalid(c: &Constraint, why: &str) -> Error {
	Error::Constraint(format!("{}: {}", c, why))
}

/// A literal fits a column when it has the column's type, up to INTEGER/REAL.
fn fits(column: DataType, v: &Value) -> bool {
	column.unify(v.ty()).is_some()
}

impl Constraint {
	/// Checks names and literal types against the catalog.
	pub fn validate(&self, catalog: &Catalog) -> Result<()> {
		match self {
			Constraint::ForeignKey { table, column, references, key } => {
				let (from, to) = (catalog.column(table, column)?, catalog.column(references, key)?);
				if from.ty.unify(to.ty).is_none() {
					return Err(Error::TypeMismatch { context: self.to_string(), left: from.ty, right: to.ty });
				}
			},
			Constraint::Range { table, column, min, max } => {
				let ty = catalog.column(table, column)?.ty;
				if !ty.is_numeric() {
					return Err(invalid(self, "range over a non-numeric column"));
				}
				if min.is_none() && max.is_none() {
					return Err(invalid(self, "range without bounds"));
				}
				if min.iter().chain(max).any(|b| !fits(ty, b)) {
					return Err(invalid(self, "bound does not fit the column type"));
				}
			},
			Constraint::OneOf { table, column, values } => {
				let ty = catalog.column(table, column)?.ty;
				if values.iter().any(|v| !fits(ty, v)) {
					return Err(invalid(self, "value does not fit the column type"));
				}
			},
			Constraint::Unique { table, columns } => {
				if columns.is_empty() {
					return Err(invalid(self, "no columns"));
				}
				for column in columns {
					catalog.column(table, column)?;
				}
			},
			Constraint::NotNull { table, column } => {
				catalog.column(table, column)?;
			},
			Constraint::Monotonic { table, column, .. } => {
				if !catalog.column(table, column)?.ty.is_numeric() {
					return Err(invalid(self, "ordering over a non-numeric column"));
				}
			},
		}
		Ok(())
	}

	/// The premise over the base rows in `tables`.
	pub fn encode<'c>(&self, u: &Universe<'c>, tables: &BTreeMap<String, Bag<'c>>) -> Result<Bool<'c>> {
		let ctx = u.ctx();
		let base = |table: &str| tables.get(table).ok_or_else(|| Error::UnknownTable(table.to_string()));
		// Present rows with a non-NULL `column`, paired with that value.
		let cells = |table: &str, column: &str| -> Result<Vec<(Bool<'c>, Scalar<'c>)>> {
			let bag = base(table)?;
			let idx = bag
				.layout
				.iter()
				.position(|c| c.field.name == column)
				.ok_or_else(|| Error::UnknownColumn(ColumnRef::qualified(table, column)))?;
			Ok(bag.tuples.iter().map(|t| (u.survives(t), Row::new(t, &bag.layout).column(u, idx))).collect())
		};
		let guarded = |(present, s): &(Bool<'c>, Scalar<'c>)| u.and(&[present.clone(), s.null.not()]);

		let mut facts = vec![];
		match self {
			Constraint::ForeignKey { table, column, references, key } => {
				let parents = cells(references, key)?;
				for child in cells(table, column)? {
					let hits = parents
						.iter()
						.map(|p| -> Result<Bool<'c>> { Ok(u.and(&[guarded(p), child.1.val.equals(&p.1.val)?])) })
						.collect::<Result<Vec<_>>>()?;
					facts.push(guarded(&child).implies(&u.or(&hits)));
				}
			},
			Constraint::Range { table, column, min, max } => {
				for cell in cells(table, column)? {
					let mut within = vec![];
					if let Some(min) = min {
						within.push(cell.1.val.compare(CmpOp::Ge, &Val::literal(ctx, min)?)?);
					}
					if let Some(max) = max {
						within.push(cell.1.val.compare(CmpOp::Le, &Val::literal(ctx, max)?)?);
					}
					facts.push(guarded(&cell).implies(&u.and(&within)));
				}
			},
			Constraint::OneOf { table, column, values } => {
				for cell in cells(table, column)? {
					let options = values
						.iter()
						.map(|v| cell.1.val.equals(&Val::literal(ctx, v)?))
						.collect::<Result<Vec<_>>>()?;
					facts.push(guarded(&cell).implies(&u.or(&options)));
				}
			},
			Constraint::Unique { table, columns } => {
				let per_column = columns.iter().map(|c| cells(table, c)).collect::<Result<Vec<_>>>()?;
				let rows = base(table)?.len();
				for (i, j) in (0..rows).tuple_combinations() {
					let mut clash = vec![];
					for column in &per_column {
						let (a, b) = (&column[i], &column[j]);
						clash.extend([guarded(a), guarded(b), a.1.val.equals(&b.1.val)?]);
					}
					facts.push(u.and(&clash).not());
				}
			},
			Constraint::NotNull { table, column } => {
				facts.extend(cells(table, column)?.into_iter().map(|(_, s)| s.null.not()));
			},
			Constraint::Monotonic { table, column, strict } => {
				let op = if *strict { CmpOp::Lt } else { CmpOp::Le };
				let column = cells(table, column)?;
				for (a, b) in column.iter().tuple_combinations() {
					facts.push(u.and(&[guarded(a), guarded(b)]).implies(&a.1.val.compare(op, &b.1.val)?));
				}
			},
		}
		Ok(u.and(&facts))
	}
}
