//! GROUP BY, aggregates, HAVING and DISTINCT.
//!
//! Each grouping key partitions the input on its own: for every suffix of the
//! input list one successor tuple per member survives iff the member carries
//! the key of the suffix's first survivor (expand), and the suffix heads that
//! no earlier head claims become the key's representatives (mutex). The
//! output is the product of the per-key representatives; a combination
//! survives iff some input is claimed by all of its participants.

use imbl::Vector;
use itertools::Itertools;
use z3::ast::{Ast, Bool};

use crate::pipeline::error::{Error, Result};
use crate::pipeline::null::{null_safe_eq, scalar, Scalar};
use crate::pipeline::operator::{filter, Bag, Encoded};
use crate::pipeline::relation::{key_field, AggCall, AggFunc, ArithOp, CmpOp, Expr};
use crate::pipeline::shared::{check_unique, DataType, Field};
use crate::pipeline::universe::{AttrKey, Column, Tuple, Universe, Val};

/// Groups of one partitioning key.
struct Partition<'c> {
	/// Key components of every input tuple.
	keys: Vec<Vec<Scalar<'c>>>,
	reps: Vec<Tuple<'c>>,
	/// `claims[s][j]`: representative `s` survives and owns input `j`.
	claims: Vec<Vec<Bool<'c>>>,
}

fn same_key<'c>(u: &Universe<'c>, a: &[Scalar<'c>], b: &[Scalar<'c>]) -> Result<Bool<'c>> {
	let parts = a.iter().zip(b).map(|(a, b)| null_safe_eq(u, a, b)).collect::<Result<Vec<_>>>()?;
	Ok(u.and(&parts))
}

/// Key of the first surviving member of every suffix of `input`.
fn suffix_heads<'c>(u: &Universe<'c>, input: &Bag<'c>, keys: &[Vec<Scalar<'c>>]) -> Result<Vec<Vec<Scalar<'c>>>> {
	let mut heads: Vec<Vec<Scalar<'c>>> = vec![];
	for (t, key) in input.tuples.iter().zip(keys).rev() {
		let head = match heads.last() {
			None => key.clone(),
			Some(after) => {
				let here = u.survives(t);
				key.iter()
					.zip(after)
					.map(|(k, a)| -> Result<Scalar<'c>> {
						Ok(Scalar { val: Val::ite(&here, &k.val, &a.val)?, null: here.ite(&k.null, &a.null) })
					})
					.collect::<Result<Vec<_>>>()?
			},
		};
		heads.push(head);
	}
	heads.reverse();
	Ok(heads)
}

fn partition<'c>(
	u: &mut Universe<'c>,
	input: &Bag<'c>,
	keys: Vec<Vec<Scalar<'c>>>,
	constraints: &mut Vec<Bool<'c>>,
) -> Result<Partition<'c>> {
	let n = input.len();
	let heads = suffix_heads(u, input, &keys)?;

	let mut members: Vec<Vec<Tuple<'c>>> = vec![];
	for (s, head) in heads.iter().enumerate() {
		let mut suffix = vec![];
		for j in s..n {
			let t = &input.tuples[j];
			let m = u.declare_tuple("expand");
			constraints.extend(u.copy_all(t, &m, &input.layout));
			let same = same_key(u, &keys[j], head)?;
			constraints.push(u.survives(&m).iff(&u.and(&[u.survives(t), same])));
			suffix.push(m);
		}
		members.push(suffix);
	}

	let mut reps = vec![];
	let mut claims: Vec<Vec<Bool<'c>>> = vec![];
	for (s, t) in input.tuples.iter().enumerate() {
		let rep = u.declare_tuple("group");
		constraints.extend(u.copy_all(t, &rep, &input.layout));
		let taken = claims.iter().map(|c| c[s].clone()).collect_vec();
		constraints.push(u.survives(&rep).iff(&u.and(&[u.survives(t), u.or(&taken).not()])));
		let claim = (0..n)
			.map(|j| if j < s { u.ff() } else { u.and(&[u.survives(&rep), u.survives(&members[s][j - s])]) })
			.collect();
		claims.push(claim);
		reps.push(rep);
	}

	for (j, t) in input.tuples.iter().enumerate() {
		let owners = claims.iter().take(j + 1).map(|c| c[j].clone()).collect_vec();
		constraints.push(u.survives(t).implies(&u.count(&owners)._eq(&u.int(1))));
	}
	Ok(Partition { keys, reps, claims })
}

/// Typed sum of the contributing values, starting from zero of `ty`.
fn total<'c>(u: &Universe<'c>, parts: &[(Bool<'c>, Val<'c>)], ty: DataType) -> Result<Val<'c>> {
	let zero = Val::zero(u.ctx(), ty);
	parts.iter().try_fold(zero.clone(), |acc, (c, v)| -> Result<Val<'c>> {
		acc.arith(ArithOp::Add, &Val::ite(c, v, &zero)?)
	})
}

/// Defines aggregate column `col` of `out` over the inputs flagged by `members`.
fn fold<'c>(
	u: &Universe<'c>,
	input: &Bag<'c>,
	agg: &AggCall,
	members: &[Bool<'c>],
	out: &Tuple<'c>,
	col: &Column,
) -> Result<Vec<Bool<'c>>> {
	let value = u.attr(out, &col.key, col.ty());
	let null = u.is_null(out, &col.key);
	let arg = match (&agg.arg, agg.func) {
		(None, AggFunc::Count) => {
			return Ok(vec![value.equals(&Val::Int(u.count(members)))?, null.not()]);
		},
		(None, _) => return Err(Error::Aggregate(agg.alias.clone(), "missing argument".into())),
		(Some(arg), _) => arg,
	};

	let mut parts = vec![];
	for (t, m) in input.tuples.iter().zip(members) {
		let a = scalar(u, input.row(t), arg)?;
		parts.push((u.and(&[m.clone(), a.null.not()]), a.val));
	}
	let contributing = parts.iter().map(|(c, _)| c.clone()).collect_vec();
	let empty = u.or(&contributing).not();

	let mut constraints = vec![];
	match agg.func {
		AggFunc::Count => {
			constraints.push(value.equals(&Val::Int(u.count(&contributing)))?);
			constraints.push(null.not());
		},
		AggFunc::Sum => {
			constraints.push(value.equals(&total(u, &parts, col.ty())?)?);
			constraints.push(null.iff(&empty));
		},
		AggFunc::Avg => {
			let count = u.count(&contributing);
			let sum = total(u, &parts, DataType::Real)?;
			let mean = sum.arith(ArithOp::Div, &Val::Real(count.to_real()))?;
			constraints.push(null.iff(&count._eq(&u.int(0))));
			constraints.push(count.gt(&u.int(0)).implies(&value.equals(&mean)?));
		},
		AggFunc::Min | AggFunc::Max => {
			let beyond = if agg.func == AggFunc::Min { CmpOp::Lt } else { CmpOp::Gt };
			let bound = match &agg.bound {
				Some(b) => Val::literal(u.ctx(), b)?,
				None => Val::fresh(u.ctx(), &format!("bound!{}", agg.alias), col.ty()),
			};
			let mut best = bound.clone();
			for (c, v) in &parts {
				constraints.push(c.implies(&v.compare(beyond, &bound)?));
				best = Val::ite(&u.and(&[c.clone(), v.compare(beyond, &best)?]), v, &best)?;
			}
			constraints.push(value.equals(&best)?);
			constraints.push(null.iff(&empty));
		},
	}
	Ok(constraints)
}

/// Output tuples for every combination of per-key representatives.
fn merge<'c>(
	u: &mut Universe<'c>,
	input: &Bag<'c>,
	partitions: &[Partition<'c>],
	layout: Vector<Column>,
	aggregates: &[AggCall],
	mut constraints: Vec<Bool<'c>>,
) -> Result<Encoded<'c>> {
	let combos = if partitions.is_empty() {
		vec![vec![]]
	} else {
		partitions.iter().map(|p| 0..p.reps.len()).multi_cartesian_product().collect_vec()
	};
	let key_columns = layout.len() - aggregates.len();

	let mut tuples = vec![];
	for combo in combos {
		let out = u.declare_tuple("agg");
		let members = (0..input.len())
			.map(|j| match partitions {
				[] => u.survives(&input.tuples[j]),
				_ => u.and(&partitions.iter().zip(&combo).map(|(p, &s)| p.claims[s][j].clone()).collect_vec()),
			})
			.collect_vec();
		let alive = match partitions {
			[] => u.tt(),
			_ => {
				let mut all = partitions.iter().zip(&combo).map(|(p, &s)| u.survives(&p.reps[s])).collect_vec();
				all.push(u.or(&members));
				u.and(&all)
			},
		};
		constraints.push(u.survives(&out).iff(&alive));

		let key_values = partitions.iter().zip(&combo).flat_map(|(p, &s)| p.keys[s].iter());
		for (col, k) in layout.iter().take(key_columns).zip(key_values) {
			constraints.push(u.attr(&out, &col.key, col.ty()).equals(&k.val)?);
			constraints.push(u.is_null(&out, &col.key).iff(&k.null));
		}
		for (agg, col) in aggregates.iter().zip(layout.iter().skip(key_columns)) {
			constraints.extend(fold(u, input, agg, &members, &out, col)?);
		}
		tuples.push(out);
	}
	Ok(Encoded { bag: Bag { layout, tuples }, constraints })
}

pub fn group_by<'c>(
	u: &mut Universe<'c>,
	input: &Bag<'c>,
	keys: &[Expr],
	aggregates: &[AggCall],
	having: Option<&Expr>,
) -> Result<Encoded<'c>> {
	let fields = input.fields().into_iter().collect_vec();
	let mut layout = Vector::new();
	for (i, key) in keys.iter().enumerate() {
		let field = key_field(i, key, &fields)?;
		let label = u.label(&field.name);
		layout.push_back(Column { field, key: AttrKey::Attr(label) });
	}
	for agg in aggregates {
		let field = Field::new(None, &agg.alias, agg.ty(&fields)?);
		layout.push_back(Column { field, key: AttrKey::Agg(u.label(&agg.alias)) });
	}
	check_unique(layout.iter().map(|c: &Column| &c.field))?;

	let mut constraints = vec![];
	let mut partitions = vec![];
	for key in keys {
		let values = input
			.tuples
			.iter()
			.map(|t| scalar(u, input.row(t), key).map(|s| vec![s]))
			.collect::<Result<Vec<_>>>()?;
		partitions.push(partition(u, input, values, &mut constraints)?);
	}
	let grouped = merge(u, input, &partitions, layout, aggregates, constraints)?;

	match having {
		None => Ok(grouped),
		Some(having) => {
			let mut filtered = filter(u, &grouped.bag, having)?;
			filtered.constraints.extend(grouped.constraints);
			Ok(filtered)
		},
	}
}

/// One row per distinct (null-safe) input row.
pub fn distinct<'c>(u: &mut Universe<'c>, input: &Bag<'c>) -> Result<Encoded<'c>> {
	let layout = input
		.layout
		.iter()
		.map(|c| Column { field: c.field.clone(), key: AttrKey::Attr(u.label(&c.field.name)) })
		.collect::<Vector<_>>();
	let reader: &Universe<'c> = u;
	let rows = input
		.tuples
		.iter()
		.map(|t| (0..input.layout.len()).map(|i| input.row(t).column(reader, i)).collect_vec())
		.collect_vec();
	let mut constraints = vec![];
	let whole_row = partition(u, input, rows, &mut constraints)?;
	merge(u, input, &[whole_row], layout, &[], constraints)
}
