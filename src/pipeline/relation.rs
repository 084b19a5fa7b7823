use std::fmt::{Display, Formatter, Write};

use imbl::Vector;
use indenter::indented;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::pipeline::error::{Error, Result};
use crate::pipeline::shared::{check_unique, resolve, Catalog, ColumnRef, DataType, Field, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
	#[serde(rename = "=")]
	Eq,
	#[serde(rename = "<>")]
	Ne,
	#[serde(rename = "<")]
	Lt,
	#[serde(rename = "<=")]
	Le,
	#[serde(rename = ">")]
	Gt,
	#[serde(rename = ">=")]
	Ge,
}

impl CmpOp {
	pub fn is_ordering(&self) -> bool {
		!matches!(self, CmpOp::Eq | CmpOp::Ne)
	}

	pub fn symbol(&self) -> &'static str {
		match self {
			CmpOp::Eq => "=",
			CmpOp::Ne => "<>",
			CmpOp::Lt => "<",
			CmpOp::Le => "<=",
			CmpOp::Gt => ">",
			CmpOp::Ge => ">=",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
	#[serde(rename = "+")]
	Add,
	#[serde(rename = "-")]
	Sub,
	#[serde(rename = "*")]
	Mul,
	#[serde(rename = "/")]
	Div,
}

impl ArithOp {
	pub fn symbol(&self) -> &'static str {
		match self {
			ArithOp::Add => "+",
			ArithOp::Sub => "-",
			ArithOp::Mul => "*",
			ArithOp::Div => "/",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
	Col(ColumnRef),
	Lit(Value),
	/// A typed NULL literal.
	Null(DataType),
	Arith(ArithOp, Box<Expr>, Box<Expr>),
	Cmp(CmpOp, Box<Expr>, Box<Expr>),
	And(Vec<Expr>),
	Or(Vec<Expr>),
	Not(Box<Expr>),
	IsNull(Box<Expr>),
	IsNotNull(Box<Expr>),
}

impl Expr {
	pub fn col(name: &str) -> Self {
		Expr::Col(name.into())
	}

	pub fn lit(v: impl Into<Value>) -> Self {
		Expr::Lit(v.into())
	}

	pub fn cmp(self, op: CmpOp, rhs: Expr) -> Self {
		Expr::Cmp(op, Box::new(self), Box::new(rhs))
	}

	pub fn eq(self, rhs: Expr) -> Self {
		self.cmp(CmpOp::Eq, rhs)
	}

	pub fn gt(self, rhs: Expr) -> Self {
		self.cmp(CmpOp::Gt, rhs)
	}

	pub fn ge(self, rhs: Expr) -> Self {
		self.cmp(CmpOp::Ge, rhs)
	}

	pub fn lt(self, rhs: Expr) -> Self {
		self.cmp(CmpOp::Lt, rhs)
	}

	pub fn le(self, rhs: Expr) -> Self {
		self.cmp(CmpOp::Le, rhs)
	}

	pub fn arith(self, op: ArithOp, rhs: Expr) -> Self {
		Expr::Arith(op, Box::new(self), Box::new(rhs))
	}

	pub fn and(self, rhs: Expr) -> Self {
		Expr::And(vec![self, rhs])
	}

	pub fn or(self, rhs: Expr) -> Self {
		Expr::Or(vec![self, rhs])
	}

	pub fn negate(self) -> Self {
		Expr::Not(Box::new(self))
	}

	pub fn is_null(self) -> Self {
		Expr::IsNull(Box::new(self))
	}

	pub fn is_not_null(self) -> Self {
		Expr::IsNotNull(Box::new(self))
	}

	/// Type of the expression over `fields`, rejecting unknown columns and
	/// ill-typed operands.
	pub fn ty<'a>(&self, fields: impl IntoIterator<Item = &'a Field> + Clone) -> Result<DataType> {
		use DataType::*;
		match self {
			Expr::Col(c) => {
				let idx = resolve(fields.clone(), c)?;
				fields.into_iter().nth(idx).map(|f| f.ty).ok_or_else(|| Error::UnknownColumn(c.clone()))
			},
			Expr::Lit(v) => Ok(v.ty()),
			Expr::Null(ty) => Ok(*ty),
			Expr::Arith(op, l, r) => {
				let (lt, rt) = (l.ty(fields.clone())?, r.ty(fields)?);
				for ty in [lt, rt] {
					if !ty.is_numeric() {
						return Err(Error::InvalidOperand { op: op.symbol().into(), ty });
					}
				}
				unified(op.symbol(), lt, rt)
			},
			Expr::Cmp(op, l, r) => {
				let (lt, rt) = (l.ty(fields.clone())?, r.ty(fields)?);
				let ty = unified(op.symbol(), lt, rt)?;
				if op.is_ordering() && !ty.is_numeric() {
					return Err(Error::InvalidOperand { op: op.symbol().into(), ty });
				}
				Ok(Boolean)
			},
			Expr::And(es) | Expr::Or(es) => {
				for e in es {
					expect_boolean(if matches!(self, Expr::And(_)) { "AND" } else { "OR" }, e.ty(fields.clone())?)?;
				}
				Ok(Boolean)
			},
			Expr::Not(e) => {
				expect_boolean("NOT", e.ty(fields)?)?;
				Ok(Boolean)
			},
			Expr::IsNull(e) | Expr::IsNotNull(e) => {
				e.ty(fields)?;
				Ok(Boolean)
			},
		}
	}

	/// Output name a projection of this expression gets when unaliased.
	fn default_name(&self, idx: usize) -> (Option<String>, String) {
		match self {
			Expr::Col(c) => (c.qualifier.clone(), c.name.clone()),
			_ => (None, format!("expr{}", idx)),
		}
	}
}

fn unified(context: &str, left: DataType, right: DataType) -> Result<DataType> {
	left.unify(right).ok_or_else(|| Error::TypeMismatch { context: context.to_string(), left, right })
}

fn expect_boolean(op: &str, ty: DataType) -> Result<()> {
	if ty == DataType::Boolean {
		Ok(())
	} else {
		Err(Error::InvalidOperand { op: op.to_string(), ty })
	}
}

impl Display for Expr {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Expr::Col(c) => write!(f, "{}", c),
			Expr::Lit(v) => write!(f, "{}", v),
			Expr::Null(_) => write!(f, "NULL"),
			Expr::Arith(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
			Expr::Cmp(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
			Expr::And(es) => write!(f, "({})", es.iter().format(" AND ")),
			Expr::Or(es) => write!(f, "({})", es.iter().format(" OR ")),
			Expr::Not(e) => write!(f, "NOT {}", e),
			Expr::IsNull(e) => write!(f, "{} IS NULL", e),
			Expr::IsNotNull(e) => write!(f, "{} IS NOT NULL", e),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectItem {
	pub expr: Expr,
	#[serde(default)]
	pub alias: Option<String>,
}

impl ProjectItem {
	pub fn new(expr: Expr) -> Self {
		ProjectItem { expr, alias: None }
	}

	pub fn aliased(expr: Expr, alias: &str) -> Self {
		ProjectItem { expr, alias: Some(alias.to_string()) }
	}

	pub fn field(&self, idx: usize, input: &[Field]) -> Result<Field> {
		let ty = self.expr.ty(input)?;
		let (qualifier, name) = match &self.alias {
			Some(alias) => (None, alias.clone()),
			None => self.expr.default_name(idx),
		};
		Ok(Field { qualifier, name, ty })
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
	Inner,
	Left,
	Right,
	Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggFunc {
	Count,
	Sum,
	Avg,
	Min,
	Max,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggCall {
	pub func: AggFunc,
	/// `None` only for `COUNT(*)`.
	#[serde(default)]
	pub arg: Option<Expr>,
	pub alias: String,
	/// Strict bound MIN/MAX folds start from. It is assumed to lie above (MIN)
	/// or below (MAX) every aggregated value; the assumption becomes a premise.
	#[serde(default)]
	pub bound: Option<Value>,
}

impl AggCall {
	pub fn count_star(alias: &str) -> Self {
		AggCall { func: AggFunc::Count, arg: None, alias: alias.to_string(), bound: None }
	}

	pub fn new(func: AggFunc, arg: Expr, alias: &str) -> Self {
		AggCall { func, arg: Some(arg), alias: alias.to_string(), bound: None }
	}

	pub fn ty(&self, input: &[Field]) -> Result<DataType> {
		let invalid = |why: &str| Error::Aggregate(self.alias.clone(), why.to_string());
		let arg = match &self.arg {
			Some(arg) => Some(arg.ty(input)?),
			None if self.func == AggFunc::Count => None,
			None => return Err(invalid("missing argument")),
		};
		match (self.func, arg) {
			(AggFunc::Count, _) => Ok(DataType::Integer),
			(_, Some(ty)) if !ty.is_numeric() => Err(invalid("argument must be numeric")),
			(AggFunc::Avg, _) => Ok(DataType::Real),
			(AggFunc::Min | AggFunc::Max, Some(ty)) => {
				match &self.bound {
					Some(b) if b.ty().unify(ty) != Some(ty) => Err(invalid("bound does not fit the argument type")),
					_ => Ok(ty),
				}
			},
			(_, Some(ty)) => Ok(ty),
			(_, None) => Err(invalid("missing argument")),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
	pub expr: Expr,
	#[serde(default)]
	pub desc: bool,
}

impl SortKey {
	pub fn asc(expr: Expr) -> Self {
		SortKey { expr, desc: false }
	}

	pub fn desc(expr: Expr) -> Self {
		SortKey { expr, desc: true }
	}
}

/// Logical query plan, as produced by an external SQL planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
	Scan {
		table: String,
		#[serde(default)]
		alias: Option<String>,
	},
	Filter {
		input: Box<Plan>,
		predicate: Expr,
	},
	Project {
		input: Box<Plan>,
		items: Vec<ProjectItem>,
	},
	Join {
		kind: JoinKind,
		left: Box<Plan>,
		right: Box<Plan>,
		#[serde(default)]
		on: Option<Expr>,
	},
	/// `input WHERE probe IN (subquery)`.
	Semi {
		input: Box<Plan>,
		probe: Expr,
		subquery: Box<Plan>,
	},
	Aggregate {
		input: Box<Plan>,
		#[serde(default)]
		group_by: Vec<Expr>,
		#[serde(default)]
		aggregates: Vec<AggCall>,
		#[serde(default)]
		having: Option<Expr>,
	},
	Distinct {
		input: Box<Plan>,
	},
	Sort {
		input: Box<Plan>,
		keys: Vec<SortKey>,
	},
	Limit {
		input: Box<Plan>,
		count: usize,
	},
	UnionAll {
		left: Box<Plan>,
		right: Box<Plan>,
	},
}

impl Plan {
	pub fn scan(table: &str) -> Self {
		Plan::Scan { table: table.to_string(), alias: None }
	}

	pub fn scan_as(table: &str, alias: &str) -> Self {
		Plan::Scan { table: table.to_string(), alias: Some(alias.to_string()) }
	}

	pub fn filter(self, predicate: Expr) -> Self {
		Plan::Filter { input: Box::new(self), predicate }
	}

	pub fn project(self, items: Vec<ProjectItem>) -> Self {
		Plan::Project { input: Box::new(self), items }
	}

	pub fn join(self, kind: JoinKind, right: Plan, on: Option<Expr>) -> Self {
		Plan::Join { kind, left: Box::new(self), right: Box::new(right), on }
	}

	pub fn semi(self, probe: Expr, subquery: Plan) -> Self {
		Plan::Semi { input: Box::new(self), probe, subquery: Box::new(subquery) }
	}

	pub fn aggregate(self, group_by: Vec<Expr>, aggregates: Vec<AggCall>, having: Option<Expr>) -> Self {
		Plan::Aggregate { input: Box::new(self), group_by, aggregates, having }
	}

	pub fn distinct(self) -> Self {
		Plan::Distinct { input: Box::new(self) }
	}

	pub fn sort(self, keys: Vec<SortKey>) -> Self {
		Plan::Sort { input: Box::new(self), keys }
	}

	pub fn limit(self, count: usize) -> Self {
		Plan::Limit { input: Box::new(self), count }
	}

	pub fn union_all(self, right: Plan) -> Self {
		Plan::UnionAll { left: Box::new(self), right: Box::new(right) }
	}

	/// Output columns of the plan. Any malformed node is rejected here, before
	/// a single constraint is built.
	pub fn fields(&self, catalog: &Catalog) -> Result<Vector<Field>> {
		match self {
			Plan::Scan { table, alias } => {
				let qualifier = alias.as_deref().unwrap_or(table);
				Ok(catalog.table(table)?.iter().map(|c| Field::new(Some(qualifier), &c.name, c.ty)).collect())
			},
			Plan::Filter { input, predicate } => {
				let fields = input.fields(catalog)?;
				expect_boolean("WHERE", predicate.ty(&fields)?)?;
				Ok(fields)
			},
			Plan::Project { input, items } => {
				let input = input.fields(catalog)?.into_iter().collect_vec();
				let fields = items
					.iter()
					.enumerate()
					.map(|(i, item)| item.field(i, &input))
					.collect::<Result<Vector<Field>>>()?;
				check_unique(&fields)?;
				Ok(fields)
			},
			Plan::Join { left, right, on, .. } => {
				let fields = left.fields(catalog)? + right.fields(catalog)?;
				check_unique(&fields)?;
				if let Some(on) = on {
					expect_boolean("ON", on.ty(&fields)?)?;
				}
				Ok(fields)
			},
			Plan::Semi { input, probe, subquery } => {
				let fields = input.fields(catalog)?;
				let sub = subquery.fields(catalog)?;
				if sub.len() != 1 {
					return Err(Error::ArityMismatch { context: "IN subquery".into(), left: 1, right: sub.len() });
				}
				unified("IN", probe.ty(&fields)?, sub[0].ty)?;
				Ok(fields)
			},
			Plan::Aggregate { input, group_by, aggregates, having } => {
				let input = input.fields(catalog)?.into_iter().collect_vec();
				let mut fields = Vector::new();
				for (i, key) in group_by.iter().enumerate() {
					fields.push_back(key_field(i, key, &input)?);
				}
				for agg in aggregates {
					fields.push_back(Field::new(None, &agg.alias, agg.ty(&input)?));
				}
				check_unique(&fields)?;
				if let Some(having) = having {
					expect_boolean("HAVING", having.ty(&fields)?)?;
				}
				Ok(fields)
			},
			Plan::Distinct { input } | Plan::Limit { input, .. } => input.fields(catalog),
			Plan::Sort { input, keys } => {
				let fields = input.fields(catalog)?;
				for key in keys {
					let ty = key.expr.ty(&fields)?;
					if !ty.is_numeric() {
						return Err(Error::InvalidOperand { op: "ORDER BY".into(), ty });
					}
				}
				Ok(fields)
			},
			Plan::UnionAll { left, right } => {
				let (l, r) = (left.fields(catalog)?, right.fields(catalog)?);
				compatible("UNION ALL", &l, &r)?;
				Ok(l)
			},
		}
	}
}

/// Output field of the `idx`-th grouping key.
pub fn key_field(idx: usize, key: &Expr, input: &[Field]) -> Result<Field> {
	let ty = key.ty(input)?;
	Ok(match key {
		Expr::Col(c) => {
			let f = &input[resolve(input, c)?];
			Field { ty, ..f.clone() }
		},
		_ => Field::new(None, &format!("key{}", idx), ty),
	})
}

/// Two column lists line up positionally with identical types.
pub fn compatible(context: &str, left: &Vector<Field>, right: &Vector<Field>) -> Result<()> {
	if left.len() != right.len() {
		return Err(Error::ArityMismatch { context: context.into(), left: left.len(), right: right.len() });
	}
	for (l, r) in left.iter().zip(right) {
		if l.ty != r.ty {
			return Err(Error::TypeMismatch { context: format!("{} column {}", context, l), left: l.ty, right: r.ty });
		}
	}
	Ok(())
}

impl Display for Plan {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let child = |f: &mut Formatter<'_>, p: &Plan| writeln!(indented(f).with_str("\t"), "{}", p);
		match self {
			Plan::Scan { table, alias: Some(alias) } => return write!(f, "Scan {} AS {}", table, alias),
			Plan::Scan { table, alias: None } => return write!(f, "Scan {}", table),
			Plan::Filter { input, predicate } => {
				writeln!(f, "Filter {} {{", predicate)?;
				child(f, input)?;
			},
			Plan::Project { input, items } => {
				let items = items.iter().map(|i| match &i.alias {
					Some(a) => format!("{} AS {}", i.expr, a),
					None => i.expr.to_string(),
				});
				writeln!(f, "Project [{}] {{", items.format(", "))?;
				child(f, input)?;
			},
			Plan::Join { kind, left, right, on } => {
				match on {
					Some(on) => writeln!(f, "Join {:?} ON {} {{", kind, on)?,
					None => writeln!(f, "Join {:?} {{", kind)?,
				}
				child(f, left)?;
				child(f, right)?;
			},
			Plan::Semi { input, probe, subquery } => {
				writeln!(f, "Semi {} IN {{", probe)?;
				child(f, input)?;
				child(f, subquery)?;
			},
			Plan::Aggregate { input, group_by, aggregates, having } => {
				let aggs = aggregates.iter().map(|a| match &a.arg {
					Some(arg) => format!("{:?}({}) AS {}", a.func, arg, a.alias),
					None => format!("{:?}(*) AS {}", a.func, a.alias),
				});
				write!(f, "Aggregate [{}] [{}]", group_by.iter().format(", "), aggs.format(", "))?;
				if let Some(having) = having {
					write!(f, " HAVING {}", having)?;
				}
				writeln!(f, " {{")?;
				child(f, input)?;
			},
			Plan::Distinct { input } => {
				writeln!(f, "Distinct {{")?;
				child(f, input)?;
			},
			Plan::Sort { input, keys } => {
				let keys = keys.iter().map(|k| format!("{} {}", k.expr, if k.desc { "DESC" } else { "ASC" }));
				writeln!(f, "Sort [{}] {{", keys.format(", "))?;
				child(f, input)?;
			},
			Plan::Limit { input, count } => {
				writeln!(f, "Limit {} {{", count)?;
				child(f, input)?;
			},
			Plan::UnionAll { left, right } => {
				writeln!(f, "UnionAll {{")?;
				child(f, left)?;
				child(f, right)?;
			},
		}
		write!(f, "}}")
	}
}
