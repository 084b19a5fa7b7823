//! Bag equality of two encoded results.

use itertools::Itertools;
use z3::ast::{Ast, Bool, Int};

use crate::pipeline::error::Result;
use crate::pipeline::null::null_safe_eq;
use crate::pipeline::operator::Bag;
use crate::pipeline::relation::compatible;
use crate::pipeline::universe::{Tuple, Universe};

/// Both rows survive and agree positionally on every column, NULL matching NULL.
pub fn row_equals<'c>(u: &Universe<'c>, (a, x): (&Bag<'c>, &Tuple<'c>), (b, y): (&Bag<'c>, &Tuple<'c>)) -> Result<Bool<'c>> {
	let mut parts = vec![u.survives(x), u.survives(y)];
	for i in 0..a.layout.len() {
		parts.push(null_safe_eq(u, &a.row(x).column(u, i), &b.row(y).column(u, i))?);
	}
	Ok(u.and(&parts))
}

/// Number of surviving rows of `side` equal to `t`.
pub fn multiplicity<'c>(u: &Universe<'c>, probe: (&Bag<'c>, &Tuple<'c>), side: &Bag<'c>) -> Result<Int<'c>> {
	let hits = side.tuples.iter().map(|s| row_equals(u, probe, (side, s))).collect::<Result<Vec<_>>>()?;
	Ok(u.count(&hits))
}

/// Every surviving row occurs equally often in `left` and `right`.
pub fn equivalent<'c>(u: &Universe<'c>, left: &Bag<'c>, right: &Bag<'c>) -> Result<Bool<'c>> {
	compatible("query outputs", &left.fields(), &right.fields())?;
	let probes = left.tuples.iter().map(|t| (left, t)).chain(right.tuples.iter().map(|t| (right, t))).collect_vec();
	let mut conclusion = vec![];
	for (bag, t) in probes {
		let balanced = multiplicity(u, (bag, t), left)?._eq(&multiplicity(u, (bag, t), right)?);
		conclusion.push(u.survives(t).implies(&balanced));
	}
	Ok(u.and(&conclusion))
}
