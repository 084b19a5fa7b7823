//! ORDER BY as a bubble-sort comparator network.
//!
//! Every compare/exchange step introduces two alias handles defined with
//! `If(swap, ..)` over the previous layer. The first phase sinks deleted
//! tuples below surviving ones; the second sorts the survivors. Both phases
//! only swap on a strict condition, which keeps the network stable.

use z3::ast::Bool;

use crate::pipeline::error::Result;
use crate::pipeline::null::{null_safe_eq, scalar, Row, Scalar};
use crate::pipeline::operator::{Bag, Encoded};
use crate::pipeline::relation::{CmpOp, SortKey};
use crate::pipeline::universe::{Tuple, Universe};

/// `x` sorts strictly after `y` on one key. NULL comes first in both directions.
fn after<'c>(u: &Universe<'c>, x: &Scalar<'c>, y: &Scalar<'c>, desc: bool) -> Result<Bool<'c>> {
	let op = if desc { CmpOp::Lt } else { CmpOp::Gt };
	let both = u.and(&[x.null.not(), y.null.not()]);
	Ok(u.or(&[u.and(&[x.null.not(), y.null.clone()]), u.and(&[both, x.val.compare(op, &y.val)?])]))
}

/// Lexicographic "strictly after" over all keys.
fn out_of_order<'c>(u: &Universe<'c>, bag: &Bag<'c>, keys: &[SortKey], x: &Tuple<'c>, y: &Tuple<'c>) -> Result<Bool<'c>> {
	let mut later = u.ff();
	for key in keys.iter().rev() {
		let a = scalar(u, Row::new(x, &bag.layout), &key.expr)?;
		let b = scalar(u, Row::new(y, &bag.layout), &key.expr)?;
		later = u.or(&[after(u, &a, &b, key.desc)?, u.and(&[null_safe_eq(u, &a, &b)?, later])]);
	}
	Ok(later)
}

/// Runs `passes` bubble passes over `layer`, swapping neighbours where `swap` holds.
fn network<'c, F>(
	u: &mut Universe<'c>,
	mut layer: Vec<Tuple<'c>>,
	passes: usize,
	constraints: &mut Vec<Bool<'c>>,
	mut swap: F,
) -> Result<Vec<Tuple<'c>>>
where
	F: FnMut(&Universe<'c>, &Tuple<'c>, &Tuple<'c>) -> Result<Bool<'c>>,
{
	for _ in 0..passes {
		for j in 0..layer.len().saturating_sub(1) {
			let (x, y) = (layer[j].clone(), layer[j + 1].clone());
			let cond = swap(u, &x, &y)?;
			let lo = u.alias_tuple("sort");
			let hi = u.alias_tuple("sort");
			constraints.push(lo.is(&cond.ite(y.handle(), x.handle())));
			constraints.push(hi.is(&cond.ite(x.handle(), y.handle())));
			layer[j] = lo;
			layer[j + 1] = hi;
		}
	}
	Ok(layer)
}

pub fn order_by<'c>(u: &mut Universe<'c>, input: &Bag<'c>, keys: &[SortKey]) -> Result<Encoded<'c>> {
	let n = input.len();
	let mut constraints = vec![];
	let stable = network(u, input.tuples.clone(), n, &mut constraints, |u, x, y| {
		Ok(u.and(&[u.deleted(x), u.survives(y)]))
	})?;
	let sorted = network(u, stable, n, &mut constraints, |u, x, y| {
		let both = u.and(&[u.survives(x), u.survives(y)]);
		Ok(u.and(&[both, out_of_order(u, input, keys, x, y)?]))
	})?;
	Ok(Encoded { bag: Bag { layout: input.layout.clone(), tuples: sorted }, constraints })
}
