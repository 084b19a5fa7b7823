//! Symbolic tuples and the predicates/functions defined over them.
//!
//! A tuple is an opaque constant of the uninterpreted sort `Tuple`. Everything
//! known about it is stated through `deleted`, the per-attribute null markers
//! and the typed attribute (or aggregate) functions. The universe only hands
//! out names and applications; the encoders decide what gets asserted.

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use num::{BigInt, BigRational};
use z3::ast::{Ast, Bool, Dynamic, Int, Real as Re, String as Str};
use z3::{Context, FuncDecl, Sort, Symbol};

use crate::pipeline::error::{Error, Result};
use crate::pipeline::relation::{ArithOp, CmpOp};
use crate::pipeline::shared::{DataType, Field, Value};

/// Handle of one symbolic row.
#[derive(Clone, Debug)]
pub struct Tuple<'c> {
	id: usize,
	handle: Dynamic<'c>,
}

impl<'c> Tuple<'c> {
	pub fn id(&self) -> usize {
		self.id
	}

	pub fn handle(&self) -> &Dynamic<'c> {
		&self.handle
	}

	/// Handle equality, used by the comparator network.
	pub fn is(&self, other: &Dynamic<'c>) -> Bool<'c> {
		self.handle._eq(other)
	}
}

impl Display for Tuple<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.handle)
	}
}

/// Names the function family a column's values are read from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttrKey {
	Attr(String),
	Agg(String),
}

impl AttrKey {
	fn value_symbol(&self) -> String {
		match self {
			AttrKey::Attr(k) => format!("attr!{}", k),
			AttrKey::Agg(k) => format!("agg!{}", k),
		}
	}

	fn null_symbol(&self) -> String {
		match self {
			AttrKey::Attr(k) => format!("null!{}", k),
			AttrKey::Agg(k) => format!("null!agg!{}", k),
		}
	}
}

/// A field together with the attribute functions backing it.
#[derive(Clone, Debug)]
pub struct Column {
	pub field: Field,
	pub key: AttrKey,
}

impl Column {
	pub fn ty(&self) -> DataType {
		self.field.ty
	}
}

/// A z3 term of one of the column types.
#[derive(Clone, Debug)]
pub enum Val<'c> {
	Int(Int<'c>),
	Real(Re<'c>),
	Bool(Bool<'c>),
	Str(Str<'c>),
}

impl<'c> Val<'c> {
	pub fn ty(&self) -> DataType {
		match self {
			Val::Int(_) => DataType::Integer,
			Val::Real(_) => DataType::Real,
			Val::Bool(_) => DataType::Boolean,
			Val::Str(_) => DataType::String,
		}
	}

	fn from_dynamic(d: Dynamic<'c>, ty: DataType) -> Self {
		match ty {
			DataType::Integer => Val::Int(d.as_int().expect("integer-sorted application")),
			DataType::Real => Val::Real(d.as_real().expect("real-sorted application")),
			DataType::Boolean => Val::Bool(d.as_bool().expect("bool-sorted application")),
			DataType::String => Val::Str(d.as_string().expect("string-sorted application")),
		}
	}

	pub fn literal(ctx: &'c Context, v: &Value) -> Result<Self> {
		Ok(match v {
			Value::Int(i) => Val::Int(Int::from_i64(ctx, *i)),
			Value::Real(r) => {
				let q = decimal(*r)?;
				let part = |n: &BigInt| {
					Int::from_str(ctx, &n.to_string()).ok_or_else(|| Error::Literal(format!("{} is not a numeral", n)))
				};
				let (n, d) = (part(q.numer())?, part(q.denom())?);
				Val::Real(Re::from_int(&n).div(&Re::from_int(&d)))
			},
			Value::Bool(b) => Val::Bool(Bool::from_bool(ctx, *b)),
			Value::Str(s) => Val::Str(Str::from_str(ctx, s).map_err(|e| Error::Literal(e.to_string()))?),
		})
	}

	/// Neutral inhabitant of `ty`; the value a NULL literal carries.
	pub fn zero(ctx: &'c Context, ty: DataType) -> Self {
		match ty {
			DataType::Integer => Val::Int(Int::from_i64(ctx, 0)),
			DataType::Real => Val::Real(Re::from_real(ctx, 0, 1)),
			DataType::Boolean => Val::Bool(Bool::from_bool(ctx, false)),
			DataType::String => Val::Str(Str::from_str(ctx, "").expect("empty string literal")),
		}
	}

	pub fn fresh(ctx: &'c Context, prefix: &str, ty: DataType) -> Self {
		match ty {
			DataType::Integer => Val::Int(Int::fresh_const(ctx, prefix)),
			DataType::Real => Val::Real(Re::fresh_const(ctx, prefix)),
			DataType::Boolean => Val::Bool(Bool::fresh_const(ctx, prefix)),
			DataType::String => Val::Str(Str::fresh_const(ctx, prefix)),
		}
	}

	pub fn to_real(&self) -> Self {
		match self {
			Val::Int(i) => Val::Real(i.to_real()),
			v => v.clone(),
		}
	}

	pub fn as_dynamic(&self) -> Dynamic<'c> {
		match self {
			Val::Int(i) => Dynamic::from_ast(i),
			Val::Real(r) => Dynamic::from_ast(r),
			Val::Bool(b) => Dynamic::from_ast(b),
			Val::Str(s) => Dynamic::from_ast(s),
		}
	}

	/// Brings an INTEGER/REAL pair to REAL, leaving equal sorts untouched.
	fn promote(&self, other: &Self) -> (Self, Self) {
		match (self, other) {
			(Val::Int(_), Val::Real(_)) | (Val::Real(_), Val::Int(_)) => (self.to_real(), other.to_real()),
			_ => (self.clone(), other.clone()),
		}
	}

	fn mismatch(&self, context: &str, other: &Self) -> Error {
		Error::TypeMismatch { context: context.to_string(), left: self.ty(), right: other.ty() }
	}

	/// Value equality; says nothing about null markers.
	pub fn equals(&self, other: &Self) -> Result<Bool<'c>> {
		Ok(match self.promote(other) {
			(Val::Int(a), Val::Int(b)) => a._eq(&b),
			(Val::Real(a), Val::Real(b)) => a._eq(&b),
			(Val::Bool(a), Val::Bool(b)) => a._eq(&b),
			(Val::Str(a), Val::Str(b)) => a._eq(&b),
			_ => return Err(self.mismatch("=", other)),
		})
	}

	pub fn compare(&self, op: CmpOp, other: &Self) -> Result<Bool<'c>> {
		macro_rules! ordered {
			($a:expr, $b:expr) => {
				match op {
					CmpOp::Eq => $a._eq($b),
					CmpOp::Ne => $a._eq($b).not(),
					CmpOp::Lt => $a.lt($b),
					CmpOp::Le => $a.le($b),
					CmpOp::Gt => $a.gt($b),
					CmpOp::Ge => $a.ge($b),
				}
			};
		}
		match self.promote(other) {
			(Val::Int(a), Val::Int(b)) => Ok(ordered!(a, &b)),
			(Val::Real(a), Val::Real(b)) => Ok(ordered!(a, &b)),
			_ if !op.is_ordering() => {
				let eq = self.equals(other)?;
				Ok(if op == CmpOp::Eq { eq } else { eq.not() })
			},
			_ => Err(Error::InvalidOperand { op: op.symbol().into(), ty: self.ty() }),
		}
	}

	pub fn arith(&self, op: ArithOp, other: &Self) -> Result<Self> {
		let ctx = match self {
			Val::Int(i) => i.get_ctx(),
			Val::Real(r) => r.get_ctx(),
			_ => return Err(Error::InvalidOperand { op: op.symbol().into(), ty: self.ty() }),
		};
		Ok(match self.promote(other) {
			(Val::Int(a), Val::Int(b)) => Val::Int(match op {
				ArithOp::Add => Int::add(ctx, &[&a, &b]),
				ArithOp::Sub => Int::sub(ctx, &[&a, &b]),
				ArithOp::Mul => Int::mul(ctx, &[&a, &b]),
				ArithOp::Div => truncating_div(ctx, &a, &b),
			}),
			(Val::Real(a), Val::Real(b)) => Val::Real(match op {
				ArithOp::Add => Re::add(ctx, &[&a, &b]),
				ArithOp::Sub => Re::sub(ctx, &[&a, &b]),
				ArithOp::Mul => Re::mul(ctx, &[&a, &b]),
				ArithOp::Div => a.div(&b),
			}),
			_ => return Err(self.mismatch(op.symbol(), other)),
		})
	}

	/// `If(cond, then, otherwise)` over two values of one sort.
	pub fn ite(cond: &Bool<'c>, then: &Self, otherwise: &Self) -> Result<Self> {
		Ok(match then.promote(otherwise) {
			(Val::Int(a), Val::Int(b)) => Val::Int(cond.ite(&a, &b)),
			(Val::Real(a), Val::Real(b)) => Val::Real(cond.ite(&a, &b)),
			(Val::Bool(a), Val::Bool(b)) => Val::Bool(cond.ite(&a, &b)),
			(Val::Str(a), Val::Str(b)) => Val::Str(cond.ite(&a, &b)),
			_ => return Err(then.mismatch("If", otherwise)),
		})
	}
}

/// The exact value of the shortest decimal that reads back as `r`.
fn decimal(r: f64) -> Result<BigRational> {
	if !r.is_finite() {
		return Err(Error::Literal(format!("{} is not a finite number", r)));
	}
	let text = r.to_string();
	let (whole, frac) = text.split_once('.').unwrap_or((&text, ""));
	let digits: BigInt = format!("{}{}", whole, frac).parse().map_err(|e| Error::Literal(format!("{}: {}", text, e)))?;
	Ok(BigRational::new(digits, num::pow(BigInt::from(10), frac.len())))
}

/// SQL integer division, rounding toward zero. z3's `div` floors for a
/// positive divisor, so it is applied to magnitudes and the sign restored.
fn truncating_div<'c>(ctx: &'c Context, a: &Int<'c>, b: &Int<'c>) -> Int<'c> {
	let zero = Int::from_i64(ctx, 0);
	let abs = |x: &Int<'c>| x.lt(&zero).ite(&x.unary_minus(), x);
	let q = abs(a).div(&abs(b));
	a.ge(&zero)._eq(&b.ge(&zero)).ite(&q, &q.unary_minus())
}

/// Allocator and vocabulary of one equivalence run.
pub struct Universe<'c> {
	ctx: &'c Context,
	sort: Sort<'c>,
	deleted: FuncDecl<'c>,
	fresh: Vec<Dynamic<'c>>,
	next_tuple: usize,
	next_label: usize,
}

impl<'c> Universe<'c> {
	pub fn new(ctx: &'c Context) -> Self {
		let sort = Sort::uninterpreted(ctx, Symbol::String("Tuple".into()));
		let deleted = FuncDecl::new(ctx, "deleted", &[&sort], &Sort::bool(ctx));
		Universe { ctx, sort, deleted, fresh: vec![], next_tuple: 0, next_label: 0 }
	}

	pub fn ctx(&self) -> &'c Context {
		self.ctx
	}

	fn allocate(&mut self, hint: &str) -> Tuple<'c> {
		let id = self.next_tuple;
		self.next_tuple += 1;
		let handle = Dynamic::new_const(self.ctx, format!("{}!{}", hint, id), &self.sort);
		Tuple { id, handle }
	}

	/// A new tuple, distinct from every other declared tuple.
	pub fn declare_tuple(&mut self, hint: &str) -> Tuple<'c> {
		let t = self.allocate(hint);
		self.fresh.push(t.handle.clone());
		t
	}

	/// A new handle that will be defined equal to an existing tuple.
	pub fn alias_tuple(&mut self, hint: &str) -> Tuple<'c> {
		self.allocate(hint)
	}

	/// Unique label for a column or aggregate introduced by an operator.
	pub fn label(&mut self, name: &str) -> String {
		self.next_label += 1;
		format!("{}#{}", name, self.next_label)
	}

	pub fn tuple_count(&self) -> usize {
		self.next_tuple
	}

	pub fn deleted(&self, t: &Tuple<'c>) -> Bool<'c> {
		self.deleted.apply(&[&t.handle]).as_bool().expect("deleted is a predicate")
	}

	pub fn survives(&self, t: &Tuple<'c>) -> Bool<'c> {
		self.deleted(t).not()
	}

	pub fn is_null(&self, t: &Tuple<'c>, key: &AttrKey) -> Bool<'c> {
		let f = FuncDecl::new(self.ctx, key.null_symbol(), &[&self.sort], &Sort::bool(self.ctx));
		f.apply(&[&t.handle]).as_bool().expect("null marker is a predicate")
	}

	pub fn attr(&self, t: &Tuple<'c>, key: &AttrKey, ty: DataType) -> Val<'c> {
		let f = FuncDecl::new(self.ctx, key.value_symbol(), &[&self.sort], &self.value_sort(ty));
		Val::from_dynamic(f.apply(&[&t.handle]), ty)
	}

	/// `t.to = s.from`, for the value and the null marker alike.
	pub fn copy(&self, s: &Tuple<'c>, from: &Column, t: &Tuple<'c>, to: &Column) -> Vec<Bool<'c>> {
		let value = self.attr(t, &to.key, to.ty()).as_dynamic()._eq(&self.attr(s, &from.key, from.ty()).as_dynamic());
		let null = self.is_null(t, &to.key).iff(&self.is_null(s, &from.key));
		vec![value, null]
	}

	/// Copies every column of `layout` from `s` to `t` under the same keys.
	pub fn copy_all(&self, s: &Tuple<'c>, t: &Tuple<'c>, layout: &imbl::Vector<Column>) -> Vec<Bool<'c>> {
		layout.iter().flat_map(|c| self.copy(s, c, t, c)).collect()
	}

	/// Pairwise distinctness of every tuple obtained from `declare_tuple`.
	pub fn distinctness(&self) -> Bool<'c> {
		if self.fresh.len() < 2 {
			return self.tt();
		}
		Dynamic::distinct(self.ctx, &self.fresh.iter().collect_vec())
	}

	pub fn tt(&self) -> Bool<'c> {
		Bool::from_bool(self.ctx, true)
	}

	pub fn ff(&self) -> Bool<'c> {
		Bool::from_bool(self.ctx, false)
	}

	pub fn int(&self, i: i64) -> Int<'c> {
		Int::from_i64(self.ctx, i)
	}

	pub fn and(&self, parts: &[Bool<'c>]) -> Bool<'c> {
		match parts {
			[] => self.tt(),
			[one] => one.clone(),
			_ => Bool::and(self.ctx, &parts.iter().collect_vec()),
		}
	}

	pub fn or(&self, parts: &[Bool<'c>]) -> Bool<'c> {
		match parts {
			[] => self.ff(),
			[one] => one.clone(),
			_ => Bool::or(self.ctx, &parts.iter().collect_vec()),
		}
	}

	/// `Σ If(b, 1, 0)` over `parts`.
	pub fn count(&self, parts: &[Bool<'c>]) -> Int<'c> {
		let (one, zero) = (self.int(1), self.int(0));
		let terms = parts.iter().map(|b| b.ite(&one, &zero)).collect_vec();
		if terms.is_empty() {
			zero
		} else {
			Int::add(self.ctx, &terms.iter().collect_vec())
		}
	}

	fn value_sort(&self, ty: DataType) -> Sort<'c> {
		match ty {
			DataType::Integer => Sort::int(self.ctx),
			DataType::Real => Sort::real(self.ctx),
			DataType::Boolean => Sort::bool(self.ctx),
			DataType::String => Sort::string(self.ctx),
		}
	}
}
