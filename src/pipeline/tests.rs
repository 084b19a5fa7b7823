//! End-to-end checks through `check` and the plan encoder.

use pretty_assertions::assert_eq;
use z3::ast::{Ast, Bool};
use z3::{Config, Context};

use super::constraint::Constraint;
use super::encode::PlanEncoder;
use super::operator::Bag;
use super::relation::{AggCall, AggFunc, ArithOp, Expr, JoinKind, Plan, ProjectItem, SortKey};
use super::shared::{Catalog, ColumnDef, ColumnRef, DataType, Value};
use super::solver::{Outcome, Prover};
use super::*;

/// Includes a file relative to the crate root.
macro_rules! include_json {
	($path:literal) => {
		include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/", $path))
	};
}

fn fixture(json: &str) -> Input {
	serde_json::from_str(json).expect("fixture must parse")
}

fn emp() -> Catalog {
	Catalog::new().with_table("emp", vec![
		ColumnDef::not_null("id", DataType::Integer),
		ColumnDef::new("age", DataType::Integer),
		ColumnDef::new("dept", DataType::Integer),
	])
}

fn input(schema: Catalog, left: Plan, right: Plan) -> Input {
	Input {
		schema,
		queries: (left, right),
		help: Default::default(),
		constraints: vec![],
		settings: Settings { rows_per_table: 2, ..Settings::default() },
	}
}

fn verdict(input: Input) -> Verdict {
	check(input).expect("input must be well-formed").verdict
}

fn age() -> Expr {
	Expr::col("age")
}

#[test]
fn strict_and_negated_filters_are_equivalent() {
	let input = fixture(include_json!("fixtures/age_filter_equivalent.json"));
	assert_eq!(input.settings, Settings::default());
	assert_eq!(verdict(input), Verdict::Equivalent);
}

#[test]
fn boundary_counterexample_has_age_25() {
	let report = check(fixture(include_json!("fixtures/age_filter_boundary.json"))).unwrap();
	let Verdict::NotEquivalent { counterexample } = report.verdict else {
		panic!("expected a counterexample, got {:?}", report.verdict);
	};
	let emp = &counterexample.tables["emp"];
	assert_eq!(emp.columns, vec!["emp.id", "emp.age"]);
	assert!(
		emp.rows.iter().any(|r| r.present && r.values[1] == Some(Value::Int(25).into())),
		"no row at the boundary in {:?}",
		emp.rows
	);
	assert!(counterexample.right.rows.len() > counterexample.left.rows.len());
}

#[test]
fn filters_are_idempotent_and_commute() {
	let p = age().gt(Expr::lit(30));
	let q = Expr::col("dept").eq(Expr::lit(7));
	let once = Plan::scan("emp").filter(p.clone());
	let twice = Plan::scan("emp").filter(p.clone()).filter(p.clone());
	assert_eq!(verdict(input(emp(), once, twice)), Verdict::Equivalent);

	let pq = Plan::scan("emp").filter(p.clone()).filter(q.clone());
	let qp = Plan::scan("emp").filter(q.clone()).filter(p.clone());
	assert_eq!(verdict(input(emp(), pq.clone(), qp)), Verdict::Equivalent);

	let both = Plan::scan("emp").filter(p.and(q));
	assert_eq!(verdict(input(emp(), pq, both)), Verdict::Equivalent);
}

#[test]
fn null_rows_fail_both_a_predicate_and_its_negation() {
	let p = age().gt(Expr::lit(30));
	let split = Plan::scan_as("emp", "a")
		.filter(p.clone())
		.union_all(Plan::scan_as("emp", "b").filter(p.negate()));
	let all = Plan::scan("emp");
	assert!(!verdict(input(emp(), split.clone(), all)).is_equivalent());

	let with_nulls = split.union_all(Plan::scan_as("emp", "c").filter(age().is_null()));
	assert_eq!(verdict(input(emp(), with_nulls, Plan::scan("emp"))), Verdict::Equivalent);
}

#[test]
fn union_all_commutes() {
	let a = Plan::scan_as("emp", "a").filter(age().lt(Expr::lit(20)));
	let b = Plan::scan_as("emp", "b");
	let ab = a.clone().union_all(b.clone());
	let ba = b.union_all(a);
	assert_eq!(verdict(input(emp(), ab, ba)), Verdict::Equivalent);
}

#[test]
fn outer_join_is_not_inner_join() {
	let catalog = emp().with_table("dept", vec![ColumnDef::not_null("id", DataType::Integer)]);
	let on = Some(Expr::col("emp.dept").eq(Expr::col("dept.id")));
	let inner = Plan::scan("emp").join(JoinKind::Inner, Plan::scan("dept"), on.clone());
	let left = Plan::scan("emp").join(JoinKind::Left, Plan::scan("dept"), on.clone());
	assert!(!verdict(input(catalog.clone(), inner.clone(), left)).is_equivalent());

	// the inner join equals the left join minus its padded rows
	let padded_out = Plan::scan("emp")
		.join(JoinKind::Left, Plan::scan("dept"), on)
		.filter(Expr::col("dept.id").is_not_null());
	assert_eq!(verdict(input(catalog, inner, padded_out)), Verdict::Equivalent);
}

#[test]
fn trivially_equal_plans_skip_the_solver() {
	let plan = Plan::scan("emp").filter(age().gt(Expr::lit(1)));
	let report = check(input(emp(), plan.clone(), plan)).unwrap();
	assert_eq!(report.verdict, Verdict::Equivalent);
	assert!(report.stats.trivial);
	assert_eq!(report.stats.tuples, 0);
}

#[test]
fn malformed_queries_are_rejected_statically() {
	let bad = Plan::scan("emp").filter(Expr::col("salary").gt(Expr::lit(1)));
	assert_eq!(check(input(emp(), bad, Plan::scan("emp"))).err(), Some(Error::UnknownColumn(ColumnRef::from("salary"))));

	let narrow = Plan::scan("emp").project(vec![ProjectItem::new(age())]);
	assert!(matches!(check(input(emp(), narrow, Plan::scan("emp"))), Err(Error::ArityMismatch { .. })));

	let missing = Plan::scan("payroll");
	assert_eq!(check(input(emp(), missing, Plan::scan("emp"))).err(), Some(Error::UnknownTable("payroll".into())));
}

#[test]
fn uniqueness_makes_distinct_redundant() {
	let input = fixture(include_json!("fixtures/distinct_unique.json"));
	let mut unconstrained = input.clone();
	unconstrained.constraints.clear();
	assert_eq!(verdict(input), Verdict::Equivalent);
	assert!(!verdict(unconstrained).is_equivalent());
}

#[test]
fn membership_matches_a_join_on_a_unique_key() {
	let input = fixture(include_json!("fixtures/in_versus_join.json"));
	let mut duplicated = input.clone();
	duplicated.constraints.clear();
	assert_eq!(verdict(input), Verdict::Equivalent);
	assert!(!verdict(duplicated).is_equivalent());
}

#[test]
fn dropped_constraints_flag_partial_support() {
	let mut input = input(emp(), Plan::scan("emp"), Plan::scan("emp").filter(Expr::col("id").is_not_null()));
	input.constraints = vec![
		Constraint::NotNull { table: "emp".into(), column: "salary".into() },
		Constraint::Range { table: "emp".into(), column: "age".into(), min: Some(Value::Int(0)), max: None },
	];
	let report = check(input).unwrap();
	assert_eq!(report.verdict, Verdict::Equivalent);
	assert!(report.stats.partially_supported);
	assert_eq!(report.stats.dropped_constraints, 1);
}

#[test]
fn range_constraints_discharge_filters() {
	let mut bounded = input(emp(), Plan::scan("emp").filter(age().ge(Expr::lit(0))), Plan::scan("emp"));
	bounded.constraints = vec![
		Constraint::Range { table: "emp".into(), column: "age".into(), min: Some(Value::Int(0)), max: None },
		Constraint::NotNull { table: "emp".into(), column: "age".into() },
	];
	let unbounded = Input { constraints: vec![], ..bounded.clone() };
	assert_eq!(verdict(bounded), Verdict::Equivalent);
	assert!(!verdict(unbounded).is_equivalent());
}

#[test]
fn avg_over_an_empty_group_is_null() {
	let catalog = Catalog::new().with_table("m", vec![ColumnDef::new("x", DataType::Real)]);
	let nulls = || Plan::scan("m").filter(Expr::col("x").is_null());
	let avg = nulls().aggregate(vec![], vec![AggCall::new(AggFunc::Avg, Expr::col("x"), "a")], None);
	let sum = nulls().aggregate(vec![], vec![AggCall::new(AggFunc::Sum, Expr::col("x"), "a")], None);
	assert_eq!(verdict(input(catalog.clone(), avg, sum)), Verdict::Equivalent);

	let count = nulls().aggregate(vec![], vec![AggCall::new(AggFunc::Count, Expr::col("x"), "n")], None);
	let zero = Plan::scan("m")
		.aggregate(vec![], vec![AggCall::count_star("n")], None)
		.project(vec![ProjectItem::aliased(Expr::lit(0), "n")]);
	assert_eq!(verdict(input(catalog, count, zero)), Verdict::Equivalent);
}

#[test]
fn top_one_after_order_by_is_max() {
	let known = || Plan::scan("emp").filter(age().is_not_null());
	let top = known()
		.sort(vec![SortKey::desc(age())])
		.limit(1)
		.project(vec![ProjectItem::aliased(age(), "top")]);
	let max = known().aggregate(
		vec![],
		vec![AggCall::new(AggFunc::Max, age(), "top")],
		Some(Expr::col("top").is_not_null()),
	);
	assert_eq!(verdict(input(emp(), top, max)), Verdict::Equivalent);

	let any = known().limit(1).project(vec![ProjectItem::aliased(age(), "top")]);
	let top = known()
		.sort(vec![SortKey::desc(age())])
		.limit(1)
		.project(vec![ProjectItem::aliased(age(), "top")]);
	assert!(!verdict(input(emp(), any, top)).is_equivalent());
}

#[test]
fn grouping_on_two_keys_matches_grouping_on_one_when_determined() {
	// dept is a function of id once id is unique, so GROUP BY id, dept = GROUP BY id
	let one = Plan::scan("emp").aggregate(vec![Expr::col("id")], vec![AggCall::count_star("n")], None);
	let two = Plan::scan("emp")
		.aggregate(vec![Expr::col("id"), Expr::col("dept")], vec![AggCall::count_star("n")], None)
		.project(vec![ProjectItem::new(Expr::col("id")), ProjectItem::new(Expr::col("n"))]);
	let mut unique = input(emp(), one, two);
	unique.constraints = vec![Constraint::Unique { table: "emp".into(), columns: vec!["id".into()] }];
	let duplicated = Input { constraints: vec![], ..unique.clone() };
	assert_eq!(verdict(unique), Verdict::Equivalent);
	assert!(!verdict(duplicated).is_equivalent());
}

#[test]
fn grouping_key_order_only_permutes_columns() {
	let catalog = Catalog::new().with_table("t", vec![
		ColumnDef::new("a", DataType::Integer),
		ColumnDef::new("b", DataType::Integer),
		ColumnDef::new("c", DataType::Integer),
	]);
	let keys = |names: &[&str]| names.iter().map(|n| Expr::col(n)).collect::<Vec<_>>();
	let columns = |names: &[&str]| names.iter().map(|n| ProjectItem::new(Expr::col(n))).collect::<Vec<_>>();
	let abc = Plan::scan("t").aggregate(keys(&["a", "b", "c"]), vec![AggCall::count_star("n")], None);
	let cba = Plan::scan("t")
		.aggregate(keys(&["c", "b", "a"]), vec![AggCall::count_star("n")], None)
		.project(columns(&["a", "b", "c", "n"]));
	let mut same = input(catalog.clone(), abc.clone(), cba);
	same.settings.rows_per_table = 3;
	assert_eq!(verdict(same), Verdict::Equivalent);

	let coarser = Plan::scan("t")
		.aggregate(keys(&["a", "b"]), vec![AggCall::count_star("n")], None)
		.project(columns(&["a", "b", "n"]));
	let finer = abc.project(columns(&["a", "b", "n"]));
	assert!(!verdict(input(catalog, finer, coarser)).is_equivalent());
}

#[test]
fn join_keys_match_nulls() {
	let catalog = Catalog::new()
		.with_table("l", vec![ColumnDef::new("a", DataType::Integer)])
		.with_table("r", vec![ColumnDef::new("b", DataType::Integer)]);
	let on = Some(Expr::col("a").eq(Expr::col("b")));
	let joined = Plan::scan("l").join(JoinKind::Inner, Plan::scan("r"), on);
	let filtered = Plan::scan("l").join(JoinKind::Inner, Plan::scan("r"), None).filter(Expr::col("a").eq(Expr::col("b")));
	let report = check(input(catalog, joined, filtered)).unwrap();
	let Verdict::NotEquivalent { counterexample } = report.verdict else {
		panic!("expected a counterexample, got {:?}", report.verdict);
	};
	assert!(counterexample.left.rows.iter().any(|row| row.iter().all(Option::is_none)));
}

#[test]
fn close_real_literals_stay_apart() {
	let catalog = Catalog::new().with_table("m", vec![ColumnDef::not_null("x", DataType::Real)]);
	let at = |v: f64| Plan::scan("m").filter(Expr::col("x").eq(Expr::lit(v)));
	assert!(!verdict(input(catalog.clone(), at(0.1234567891), at(0.1234567892))).is_equivalent());
	let tenfold = Plan::scan("m").filter(Expr::col("x").arith(ArithOp::Mul, Expr::lit(10.0)).eq(Expr::lit(1.0)));
	assert_eq!(verdict(input(catalog, at(0.1), tenfold)), Verdict::Equivalent);
}

/// Holds in every model of the encoder's premises.
fn valid<'c>(ctx: &'c Context, enc: &PlanEncoder<'c>, goal: &Bool<'c>) -> bool {
	let prover = Prover::new(ctx, Some(10_000));
	prover.assert(&enc.premise());
	prover.assert(&goal.not());
	matches!(prover.check().unwrap(), Outcome::Unsat)
}

fn surviving_with<'c>(enc: &PlanEncoder<'c>, bag: &Bag<'c>, idx: usize, v: i64) -> z3::ast::Int<'c> {
	let u = enc.universe();
	let col = &bag.layout[idx];
	let hits = bag
		.tuples
		.iter()
		.map(|t| {
			let value = u.attr(t, &col.key, col.ty()).equals(&universe::Val::Int(u.int(v))).unwrap();
			u.and(&[u.survives(t), u.is_null(t, &col.key).not(), value])
		})
		.collect::<Vec<_>>();
	u.count(&hits)
}

#[test]
fn left_join_keeps_every_left_row_once() {
	let ctx = Context::new(&Config::new());
	let catalog = Catalog::new()
		.with_table("l", vec![ColumnDef::new("a", DataType::Integer)])
		.with_table("r", vec![ColumnDef::new("b", DataType::Integer)]);
	let mut enc = PlanEncoder::new(&ctx, &catalog, 2);
	enc.pin("l", 0, &[Some(Value::Int(1))]).unwrap();
	enc.pin("l", 1, &[Some(Value::Int(2))]).unwrap();
	enc.pin("r", 0, &[Some(Value::Int(1))]).unwrap();
	enc.pin("r", 1, &[Some(Value::Int(3))]).unwrap();
	let plan = Plan::scan("l").join(JoinKind::Left, Plan::scan("r"), Some(Expr::col("a").eq(Expr::col("b"))));
	let out = enc.encode(&plan).unwrap();
	let u = enc.universe();
	assert!(valid(&ctx, &enc, &out.cardinality(u)._eq(&u.int(2))));
	assert!(valid(&ctx, &enc, &surviving_with(&enc, &out, 1, 1)._eq(&u.int(1))));
}

#[test]
fn grouping_counts_each_key() {
	let ctx = Context::new(&Config::new());
	let catalog = Catalog::new().with_table("r", vec![ColumnDef::new("k", DataType::Integer)]);
	let mut enc = PlanEncoder::new(&ctx, &catalog, 3);
	enc.pin("r", 0, &[Some(Value::Int(1))]).unwrap();
	enc.pin("r", 1, &[Some(Value::Int(1))]).unwrap();
	enc.pin("r", 2, &[Some(Value::Int(2))]).unwrap();
	let plan = Plan::scan("r").aggregate(vec![Expr::col("k")], vec![AggCall::count_star("n")], None);
	let out = enc.encode(&plan).unwrap();
	let u = enc.universe();
	assert!(valid(&ctx, &enc, &out.cardinality(u)._eq(&u.int(2))));
	assert!(valid(&ctx, &enc, &surviving_with(&enc, &out, 1, 2)._eq(&u.int(1))));
	assert!(valid(&ctx, &enc, &surviving_with(&enc, &out, 1, 1)._eq(&u.int(1))));
}

#[test]
fn inputs_round_trip_through_json() {
	let mut original = input(emp(), Plan::scan("emp"), Plan::scan("emp").distinct());
	original.constraints = vec![Constraint::Monotonic { table: "emp".into(), column: "id".into(), strict: true }];
	original.settings.timeout_ms = None;
	let json = serde_json::to_string(&original).unwrap();
	let parsed: Input = serde_json::from_str(&json).unwrap();
	assert_eq!(parsed.queries, original.queries);
	assert_eq!(parsed.constraints, original.constraints);
	assert_eq!(parsed.settings, original.settings);
}
