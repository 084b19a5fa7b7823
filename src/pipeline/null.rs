//! SQL's three-valued logic over symbolic rows.
//!
//! A scalar is a value paired with its null marker. A truth value is the pair
//! (is-true, is-false); UNKNOWN is the case where neither holds. WHERE, ON and
//! HAVING only ever keep `is_true`, which collapses UNKNOWN to false.

use imbl::Vector;

use z3::ast::{Ast, Bool};

use crate::pipeline::error::{Error, Result};
use crate::pipeline::relation::{ArithOp, CmpOp, Expr};
use crate::pipeline::shared::{resolve, DataType};
use crate::pipeline::universe::{Column, Tuple, Universe, Val};

#[derive(Clone, Debug)]
pub struct Scalar<'c> {
	pub val: Val<'c>,
	pub null: Bool<'c>,
}

#[derive(Clone, Debug)]
pub struct Truth<'c> {
	pub is_true: Bool<'c>,
	pub is_false: Bool<'c>,
}

impl<'c> Truth<'c> {
	pub fn known(b: &Bool<'c>) -> Self {
		Truth { is_true: b.clone(), is_false: b.not() }
	}

	pub fn unknown(u: &Universe<'c>) -> Self {
		Truth { is_true: u.ff(), is_false: u.ff() }
	}

	pub fn not(&self) -> Self {
		Truth { is_true: self.is_false.clone(), is_false: self.is_true.clone() }
	}

	pub fn and(u: &Universe<'c>, parts: &[Truth<'c>]) -> Self {
		let trues = parts.iter().map(|p| p.is_true.clone()).collect::<Vec<_>>();
		let falses = parts.iter().map(|p| p.is_false.clone()).collect::<Vec<_>>();
		Truth { is_true: u.and(&trues), is_false: u.or(&falses) }
	}

	pub fn or(u: &Universe<'c>, parts: &[Truth<'c>]) -> Self {
		Truth::and(u, &parts.iter().map(Truth::not).collect::<Vec<_>>()).not()
	}

	/// A BOOLEAN scalar read as a truth value; NULL is UNKNOWN.
	fn of_scalar(s: &Scalar<'c>) -> Result<Self> {
		match &s.val {
			Val::Bool(b) => Ok(Truth {
				is_true: Bool::and(b.get_ctx(), &[&s.null.not(), b]),
				is_false: Bool::and(b.get_ctx(), &[&s.null.not(), &b.not()]),
			}),
			v => Err(Error::InvalidOperand { op: "predicate".into(), ty: v.ty() }),
		}
	}

	/// The truth value as a BOOLEAN scalar; UNKNOWN becomes NULL.
	fn to_scalar(&self, u: &Universe<'c>) -> Scalar<'c> {
		Scalar {
			val: Val::Bool(self.is_true.clone()),
			null: u.and(&[self.is_true.not(), self.is_false.not()]),
		}
	}
}

/// A tuple read through its column layout.
#[derive(Clone, Copy)]
pub struct Row<'a, 'c> {
	pub tuple: &'a Tuple<'c>,
	pub layout: &'a Vector<Column>,
}

impl<'a, 'c> Row<'a, 'c> {
	pub fn new(tuple: &'a Tuple<'c>, layout: &'a Vector<Column>) -> Self {
		Row { tuple, layout }
	}

	pub fn column(&self, u: &Universe<'c>, idx: usize) -> Scalar<'c> {
		let col = &self.layout[idx];
		Scalar { val: u.attr(self.tuple, &col.key, col.ty()), null: u.is_null(self.tuple, &col.key) }
	}
}

pub fn scalar<'c>(u: &Universe<'c>, row: Row<'_, 'c>, e: &Expr) -> Result<Scalar<'c>> {
	let ctx = u.ctx();
	Ok(match e {
		Expr::Col(c) => row.column(u, resolve(row.layout.iter().map(|col| &col.field), c)?),
		Expr::Lit(v) => Scalar { val: Val::literal(ctx, v)?, null: u.ff() },
		Expr::Null(ty) => Scalar { val: Val::zero(ctx, *ty), null: u.tt() },
		Expr::Arith(op, l, r) => {
			let (l, r) = (scalar(u, row, l)?, scalar(u, row, r)?);
			let val = l.val.arith(*op, &r.val)?;
			let mut null = vec![l.null, r.null];
			if *op == ArithOp::Div {
				// x / 0 is NULL
				null.push(r.val.equals(&Val::zero(ctx, r.val.ty()))?);
			}
			Scalar { val, null: u.or(&null) }
		},
		_ => truth(u, row, e)?.to_scalar(u),
	})
}

pub fn truth<'c>(u: &Universe<'c>, row: Row<'_, 'c>, e: &Expr) -> Result<Truth<'c>> {
	Ok(match e {
		Expr::Cmp(op, l, r) => {
			let (l, r) = (scalar(u, row, l)?, scalar(u, row, r)?);
			let known = u.and(&[l.null.not(), r.null.not()]);
			let holds = l.val.compare(*op, &r.val)?;
			Truth { is_true: u.and(&[known.clone(), holds.clone()]), is_false: u.and(&[known, holds.not()]) }
		},
		Expr::And(es) => Truth::and(u, &es.iter().map(|e| truth(u, row, e)).collect::<Result<Vec<_>>>()?),
		Expr::Or(es) => Truth::or(u, &es.iter().map(|e| truth(u, row, e)).collect::<Result<Vec<_>>>()?),
		Expr::Not(e) => truth(u, row, e)?.not(),
		Expr::IsNull(e) => Truth::known(&scalar(u, row, e)?.null),
		Expr::IsNotNull(e) => Truth::known(&scalar(u, row, e)?.null).not(),
		Expr::Null(DataType::Boolean) => Truth::unknown(u),
		_ => Truth::of_scalar(&scalar(u, row, e)?)?,
	})
}

/// A join condition: like `truth`, except that `=` matches NULL with NULL.
pub fn on_truth<'c>(u: &Universe<'c>, row: Row<'_, 'c>, e: &Expr) -> Result<Truth<'c>> {
	let each = |es: &[Expr]| es.iter().map(|e| on_truth(u, row, e)).collect::<Result<Vec<_>>>();
	Ok(match e {
		Expr::Cmp(CmpOp::Eq, l, r) => Truth::known(&null_safe_eq(u, &scalar(u, row, l)?, &scalar(u, row, r)?)?),
		Expr::And(es) => Truth::and(u, &each(es.as_slice())?),
		Expr::Or(es) => Truth::or(u, &each(es.as_slice())?),
		Expr::Not(e) => on_truth(u, row, e)?.not(),
		_ => truth(u, row, e)?,
	})
}

/// Join/grouping/membership/equivalence equality: NULL matches NULL.
pub fn null_safe_eq<'c>(u: &Universe<'c>, a: &Scalar<'c>, b: &Scalar<'c>) -> Result<Bool<'c>> {
	let both_null = u.and(&[a.null.clone(), b.null.clone()]);
	let both_equal = u.and(&[a.null.not(), b.null.not(), a.val.equals(&b.val)?]);
	Ok(u.or(&[both_null, both_equal]))
}

#[cfg(test)]
mod tests {
	use z3::{Config, Context, SatResult, Solver};

	use super::*;
	use crate::pipeline::shared::Field;
	use crate::pipeline::universe::AttrKey;

	fn layout() -> Vector<Column> {
		["a", "b"]
			.into_iter()
			.map(|n| Column { field: Field::new(None, n, DataType::Integer), key: AttrKey::Attr(n.into()) })
			.collect()
	}

	/// Holds under every assignment of `facts`.
	fn valid<'c>(ctx: &'c Context, facts: &[Bool<'c>], goal: &Bool<'c>) -> bool {
		let solver = Solver::new(ctx);
		for f in facts {
			solver.assert(f);
		}
		solver.assert(&goal.not());
		solver.check() == SatResult::Unsat
	}

	#[test]
	fn null_comparisons_are_unknown() {
		let ctx = Context::new(&Config::new());
		let mut u = Universe::new(&ctx);
		let t = u.declare_tuple("t");
		let layout = layout();
		let row = Row::new(&t, &layout);
		let a_null = u.is_null(&t, &AttrKey::Attr("a".into()));
		let gt = truth(&u, row, &Expr::col("a").gt(Expr::lit(25))).unwrap();
		let eq = truth(&u, row, &Expr::col("a").eq(Expr::col("a"))).unwrap();
		assert!(valid(&ctx, &[a_null.clone()], &u.and(&[gt.is_true.not(), gt.is_false.not()])));
		assert!(valid(&ctx, &[a_null.clone()], &eq.is_true.not()));
		assert!(valid(&ctx, &[a_null.not()], &eq.is_true));
	}

	#[test]
	fn three_valued_connectives() {
		let ctx = Context::new(&Config::new());
		let mut u = Universe::new(&ctx);
		let t = u.declare_tuple("t");
		let layout = layout();
		let row = Row::new(&t, &layout);
		let a_null = u.is_null(&t, &AttrKey::Attr("a".into()));
		let unknown = Expr::col("a").gt(Expr::lit(0));
		let false_ = Expr::lit(1).gt(Expr::lit(2));
		let true_ = Expr::lit(2).gt(Expr::lit(1));

		let and = truth(&u, row, &unknown.clone().and(false_.clone())).unwrap();
		assert!(valid(&ctx, &[a_null.clone()], &and.is_false));
		let or = truth(&u, row, &unknown.clone().or(true_)).unwrap();
		assert!(valid(&ctx, &[a_null.clone()], &or.is_true));
		let or = truth(&u, row, &unknown.clone().or(false_)).unwrap();
		assert!(valid(&ctx, &[a_null.clone()], &u.and(&[or.is_true.not(), or.is_false.not()])));
		let not = truth(&u, row, &unknown.negate()).unwrap();
		assert!(valid(&ctx, &[a_null], &not.is_true.not()));
	}

	#[test]
	fn arithmetic_propagates_null() {
		let ctx = Context::new(&Config::new());
		let mut u = Universe::new(&ctx);
		let t = u.declare_tuple("t");
		let layout = layout();
		let row = Row::new(&t, &layout);
		let sum = scalar(&u, row, &Expr::col("a").arith(ArithOp::Add, Expr::col("b"))).unwrap();
		let b_null = u.is_null(&t, &AttrKey::Attr("b".into()));
		assert!(valid(&ctx, &[b_null], &sum.null));
	}

	#[test]
	fn division_by_zero_is_null() {
		let ctx = Context::new(&Config::new());
		let mut u = Universe::new(&ctx);
		let t = u.declare_tuple("t");
		let layout = layout();
		let row = Row::new(&t, &layout);
		let ratio = scalar(&u, row, &Expr::col("a").arith(ArithOp::Div, Expr::col("b"))).unwrap();
		let b = row.column(&u, 1);
		let b_zero = b.val.equals(&Val::zero(&ctx, DataType::Integer)).unwrap();
		assert!(valid(&ctx, &[b.null.not(), b_zero.clone()], &ratio.null));
		// a non-zero divisor over known operands gives a value
		let known = [row.column(&u, 0).null.not(), b.null.not(), b_zero.not()];
		assert!(valid(&ctx, &known, &ratio.null.not()));
		let filter = truth(&u, row, &Expr::col("a").arith(ArithOp::Div, Expr::lit(0)).gt(Expr::lit(1))).unwrap();
		assert!(valid(&ctx, &[], &filter.is_true.not()));
	}

	#[test]
	fn join_equality_matches_nulls() {
		let ctx = Context::new(&Config::new());
		let mut u = Universe::new(&ctx);
		let t = u.declare_tuple("t");
		let layout = layout();
		let row = Row::new(&t, &layout);
		let (a, b) = (row.column(&u, 0), row.column(&u, 1));
		let both_null = [a.null.clone(), b.null.clone()];
		let on = on_truth(&u, row, &Expr::col("a").eq(Expr::col("b"))).unwrap();
		let filter = truth(&u, row, &Expr::col("a").eq(Expr::col("b"))).unwrap();
		assert!(valid(&ctx, &both_null, &on.is_true));
		assert!(valid(&ctx, &both_null, &filter.is_true.not()));
		// orderings still treat NULL as UNKNOWN
		let lt = on_truth(&u, row, &Expr::col("a").lt(Expr::col("b")).or(Expr::col("a").eq(Expr::lit(3)))).unwrap();
		assert!(valid(&ctx, &both_null, &u.and(&[lt.is_true.not(), lt.is_false.not()])));
		let ne = on_truth(&u, row, &Expr::col("a").eq(Expr::col("b")).negate()).unwrap();
		assert!(valid(&ctx, &both_null, &ne.is_false));
		assert!(valid(&ctx, &[a.null.clone(), b.null.not()], &on.is_false));
	}

	#[test]
	fn is_null_is_never_unknown() {
		let ctx = Context::new(&Config::new());
		let mut u = Universe::new(&ctx);
		let t = u.declare_tuple("t");
		let layout = layout();
		let row = Row::new(&t, &layout);
		let test = truth(&u, row, &Expr::col("b").is_null()).unwrap();
		assert!(valid(&ctx, &[], &u.or(&[test.is_true, test.is_false])));
	}

	#[test]
	fn null_safe_equality_matches_nulls() {
		let ctx = Context::new(&Config::new());
		let mut u = Universe::new(&ctx);
		let (s, t) = (u.declare_tuple("s"), u.declare_tuple("t"));
		let layout = layout();
		let (a, b) = (Row::new(&s, &layout).column(&u, 0), Row::new(&t, &layout).column(&u, 0));
		let eq = null_safe_eq(&u, &a, &b).unwrap();
		assert!(valid(&ctx, &[a.null.clone(), b.null.clone()], &eq));
		assert!(valid(&ctx, &[a.null.clone(), b.null.not()], &eq.not()));
	}
}
