//! One encoder per relational operator.
//!
//! Every encoder allocates its output tuples, copies attributes
//! unconditionally and pins survival with a biconditional, so an output tuple
//! is never left half-defined. Nothing here talks to the solver.

use imbl::Vector;
use itertools::Itertools;
use z3::ast::{Bool, Int};

use crate::pipeline::error::{Error, Result};
use crate::pipeline::null::{null_safe_eq, on_truth, scalar, truth, Row};
use crate::pipeline::relation::{Expr, JoinKind, ProjectItem};
use crate::pipeline::shared::{check_unique, ColumnDef, Field};
use crate::pipeline::universe::{AttrKey, Column, Tuple, Universe};

/// An encoded result bag: the candidate tuples, each possibly deleted.
#[derive(Clone, Debug)]
pub struct Bag<'c> {
	pub layout: Vector<Column>,
	pub tuples: Vec<Tuple<'c>>,
}

impl<'c> Bag<'c> {
	pub fn fields(&self) -> Vector<Field> {
		self.layout.iter().map(|c| c.field.clone()).collect()
	}

	pub fn row<'a>(&'a self, t: &'a Tuple<'c>) -> Row<'a, 'c> {
		Row::new(t, &self.layout)
	}

	pub fn len(&self) -> usize {
		self.tuples.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tuples.is_empty()
	}

	/// Number of surviving tuples.
	pub fn cardinality(&self, u: &Universe<'c>) -> Int<'c> {
		u.count(&self.tuples.iter().map(|t| u.survives(t)).collect_vec())
	}
}

/// Output of one encoder: the bag plus its definitional constraints.
pub struct Encoded<'c> {
	pub bag: Bag<'c>,
	pub constraints: Vec<Bool<'c>>,
}

/// Layout of the base rows of `table`.
pub fn base_layout(table: &str, columns: &[ColumnDef]) -> Vector<Column> {
	columns
		.iter()
		.map(|c| Column {
			field: Field::new(Some(table), &c.name, c.ty),
			key: AttrKey::Attr(format!("{}.{}", table, c.name)),
		})
		.collect()
}

pub fn scan<'c>(u: &mut Universe<'c>, base: &Bag<'c>, alias: &str) -> Encoded<'c> {
	let layout: Vector<Column> = base
		.layout
		.iter()
		.map(|c| Column {
			field: Field::new(Some(alias), &c.field.name, c.ty()),
			key: AttrKey::Attr(format!("{}.{}", alias, c.field.name)),
		})
		.collect();
	let mut constraints = vec![];
	let tuples = base
		.tuples
		.iter()
		.map(|t| {
			let out = u.declare_tuple(alias);
			constraints.push(u.survives(&out).iff(&u.survives(t)));
			for (from, to) in base.layout.iter().zip(&layout) {
				constraints.extend(u.copy(t, from, &out, to));
			}
			out
		})
		.collect();
	Encoded { bag: Bag { layout, tuples }, constraints }
}

pub fn filter<'c>(u: &mut Universe<'c>, input: &Bag<'c>, predicate: &Expr) -> Result<Encoded<'c>> {
	let mut constraints = vec![];
	let mut tuples = vec![];
	for t in &input.tuples {
		let out = u.declare_tuple("filter");
		let holds = truth(u, input.row(t), predicate)?.is_true;
		constraints.extend(u.copy_all(t, &out, &input.layout));
		constraints.push(u.survives(&out).iff(&u.and(&[u.survives(t), holds])));
		tuples.push(out);
	}
	Ok(Encoded { bag: Bag { layout: input.layout.clone(), tuples }, constraints })
}

/// `WHERE expr IS [NOT] NULL`.
pub fn null_test<'c>(u: &mut Universe<'c>, input: &Bag<'c>, expr: &Expr, negated: bool) -> Result<Encoded<'c>> {
	let predicate = if negated { expr.clone().is_not_null() } else { expr.clone().is_null() };
	filter(u, input, &predicate)
}

pub fn project<'c>(u: &mut Universe<'c>, input: &Bag<'c>, items: &[ProjectItem]) -> Result<Encoded<'c>> {
	let fields = input.fields().into_iter().collect_vec();
	let mut layout = Vector::new();
	for (i, item) in items.iter().enumerate() {
		let field = item.field(i, &fields)?;
		let key = AttrKey::Attr(u.label(&field.name));
		layout.push_back(Column { field, key });
	}
	check_unique(layout.iter().map(|c: &Column| &c.field))?;

	let mut constraints = vec![];
	let mut tuples = vec![];
	for t in &input.tuples {
		let out = u.declare_tuple("project");
		constraints.push(u.survives(&out).iff(&u.survives(t)));
		for (item, col) in items.iter().zip(&layout) {
			let s = scalar(u, input.row(t), &item.expr)?;
			constraints.push(u.attr(&out, &col.key, col.ty()).equals(&s.val)?);
			constraints.push(u.is_null(&out, &col.key).iff(&s.null));
		}
		tuples.push(out);
	}
	Ok(Encoded { bag: Bag { layout, tuples }, constraints })
}

/// Marks every column of `layout` NULL on `t`.
fn pad_nulls<'c>(u: &Universe<'c>, t: &Tuple<'c>, layout: &Vector<Column>) -> Vec<Bool<'c>> {
	layout.iter().map(|c| u.is_null(t, &c.key)).collect()
}

pub fn join<'c>(
	u: &mut Universe<'c>,
	kind: JoinKind,
	left: &Bag<'c>,
	right: &Bag<'c>,
	on: Option<&Expr>,
) -> Result<Encoded<'c>> {
	let mut layout = left.layout.clone();
	layout.append(right.layout.clone());
	check_unique(layout.iter().map(|c: &Column| &c.field))?;

	let mut constraints = vec![];
	let mut tuples = vec![];
	let mut matched: Vec<Vec<Tuple<'c>>> = vec![];
	for l in &left.tuples {
		let mut row = vec![];
		for r in &right.tuples {
			let out = u.declare_tuple("join");
			constraints.extend(u.copy_all(l, &out, &left.layout));
			constraints.extend(u.copy_all(r, &out, &right.layout));
			let holds = match on {
				Some(on) => on_truth(u, Row::new(&out, &layout), on)?.is_true,
				None => u.tt(),
			};
			constraints.push(u.survives(&out).iff(&u.and(&[u.survives(l), u.survives(r), holds])));
			tuples.push(out.clone());
			row.push(out);
		}
		matched.push(row);
	}

	if matches!(kind, JoinKind::Left | JoinKind::Full) {
		for (i, l) in left.tuples.iter().enumerate() {
			let out = u.declare_tuple("ljoin");
			constraints.extend(u.copy_all(l, &out, &left.layout));
			constraints.extend(pad_nulls(u, &out, &right.layout));
			let unmatched = matched[i].iter().map(|m| u.deleted(m)).collect_vec();
			constraints.push(u.survives(&out).iff(&u.and(&[u.survives(l), u.and(&unmatched)])));
			tuples.push(out);
		}
	}
	if matches!(kind, JoinKind::Right | JoinKind::Full) {
		for (j, r) in right.tuples.iter().enumerate() {
			let out = u.declare_tuple("rjoin");
			constraints.extend(pad_nulls(u, &out, &left.layout));
			constraints.extend(u.copy_all(r, &out, &right.layout));
			let unmatched = matched.iter().map(|row| u.deleted(&row[j])).collect_vec();
			constraints.push(u.survives(&out).iff(&u.and(&[u.survives(r), u.and(&unmatched)])));
			tuples.push(out);
		}
	}
	Ok(Encoded { bag: Bag { layout, tuples }, constraints })
}

/// `input WHERE probe IN (subquery)`, with NULL matching NULL.
///
/// Outputs are fresh tuples copying the probe: an alias of the probe would
/// share its `deleted` marker, so a surviving probe without a match could not
/// be deleted on the output side.
pub fn semi<'c>(u: &mut Universe<'c>, input: &Bag<'c>, probe: &Expr, subquery: &Bag<'c>) -> Result<Encoded<'c>> {
	if subquery.layout.len() != 1 {
		return Err(Error::ArityMismatch { context: "IN subquery".into(), left: 1, right: subquery.layout.len() });
	}
	let mut constraints = vec![];
	let mut tuples = vec![];
	for t in &input.tuples {
		let p = scalar(u, input.row(t), probe)?;
		let hits = subquery
			.tuples
			.iter()
			.map(|s| -> Result<Bool<'c>> {
				Ok(u.and(&[u.survives(s), null_safe_eq(u, &p, &subquery.row(s).column(u, 0))?]))
			})
			.collect::<Result<Vec<_>>>()?;
		let out = u.declare_tuple("semi");
		constraints.extend(u.copy_all(t, &out, &input.layout));
		constraints.push(u.survives(&out).iff(&u.and(&[u.survives(t), u.or(&hits)])));
		tuples.push(out);
	}
	Ok(Encoded { bag: Bag { layout: input.layout.clone(), tuples }, constraints })
}

pub fn union_all<'c>(u: &mut Universe<'c>, left: &Bag<'c>, right: &Bag<'c>) -> Result<Encoded<'c>> {
	if left.layout.len() != right.layout.len() {
		return Err(Error::ArityMismatch {
			context: "UNION ALL".into(),
			left: left.layout.len(),
			right: right.layout.len(),
		});
	}
	let mut constraints = vec![];
	let mut tuples = vec![];
	for side in [left, right] {
		for t in &side.tuples {
			let out = u.declare_tuple("union");
			constraints.push(u.survives(&out).iff(&u.survives(t)));
			for (from, to) in side.layout.iter().zip(&left.layout) {
				constraints.extend(u.copy(t, from, &out, to));
			}
			tuples.push(out);
		}
	}
	Ok(Encoded { bag: Bag { layout: left.layout.clone(), tuples }, constraints })
}

/// Keeps the first `count` surviving tuples in input order. A count at least
/// the number of candidates keeps everything.
pub fn limit<'c>(u: &mut Universe<'c>, input: &Bag<'c>, count: usize) -> Encoded<'c> {
	let mut constraints = vec![];
	let mut tuples = vec![];
	let bound = i64::try_from(count).ok().filter(|_| count < input.len()).map(|n| u.int(n));
	for (i, t) in input.tuples.iter().enumerate() {
		let out = u.declare_tuple("limit");
		let kept = match &bound {
			Some(bound) => {
				let before = u.count(&input.tuples[..i].iter().map(|p| u.survives(p)).collect_vec());
				before.lt(bound)
			},
			None => u.tt(),
		};
		constraints.extend(u.copy_all(t, &out, &input.layout));
		constraints.push(u.survives(&out).iff(&u.and(&[u.survives(t), kept])));
		tuples.push(out);
	}
	Encoded { bag: Bag { layout: input.layout.clone(), tuples }, constraints }
}
