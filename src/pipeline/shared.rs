use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::pipeline::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
	Integer,
	Real,
	Boolean,
	String,
}

impl DataType {
	pub fn is_numeric(&self) -> bool {
		matches!(self, DataType::Integer | DataType::Real)
	}

	/// Common type of two operands, promoting INTEGER to REAL when mixed.
	pub fn unify(self, other: DataType) -> Option<DataType> {
		use DataType::*;
		match (self, other) {
			(a, b) if a == b => Some(a),
			(Integer, Real) | (Real, Integer) => Some(Real),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
	Bool(bool),
	Int(i64),
	Real(f64),
	Str(String),
}

impl Value {
	pub fn ty(&self) -> DataType {
		match self {
			Value::Bool(_) => DataType::Boolean,
			Value::Int(_) => DataType::Integer,
			Value::Real(_) => DataType::Real,
			Value::Str(_) => DataType::String,
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Value::Bool(b) => write!(f, "{}", b),
			Value::Int(i) => write!(f, "{}", i),
			Value::Real(r) => write!(f, "{}", r),
			Value::Str(s) => write!(f, "'{}'", s),
		}
	}
}

impl From<i64> for Value {
	fn from(i: i64) -> Self {
		Value::Int(i)
	}
}

impl From<f64> for Value {
	fn from(r: f64) -> Self {
		Value::Real(r)
	}
}

impl From<bool> for Value {
	fn from(b: bool) -> Self {
		Value::Bool(b)
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::Str(s.to_string())
	}
}

fn nullable_by_default() -> bool {
	true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
	pub name: String,
	#[serde(rename = "type")]
	pub ty: DataType,
	#[serde(default = "nullable_by_default")]
	pub nullable: bool,
}

impl ColumnDef {
	pub fn new(name: &str, ty: DataType) -> Self {
		ColumnDef { name: name.to_string(), ty, nullable: true }
	}

	pub fn not_null(name: &str, ty: DataType) -> Self {
		ColumnDef { name: name.to_string(), ty, nullable: false }
	}
}

/// Relation name → ordered attribute list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog(BTreeMap<String, Vec<ColumnDef>>);

impl Catalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_table(mut self, name: &str, columns: Vec<ColumnDef>) -> Self {
		self.0.insert(name.to_string(), columns);
		self
	}

	pub fn table(&self, name: &str) -> Result<&[ColumnDef]> {
		self.0.get(name).map(Vec::as_slice).ok_or_else(|| Error::UnknownTable(name.to_string()))
	}

	pub fn column(&self, table: &str, column: &str) -> Result<&ColumnDef> {
		self.table(table)?.iter().find(|c| c.name == column).ok_or_else(|| {
			Error::UnknownColumn(ColumnRef::qualified(table, column))
		})
	}

	pub fn tables(&self) -> impl Iterator<Item = (&String, &Vec<ColumnDef>)> {
		self.0.iter()
	}
}

/// `name` or `qualifier.name`, (de)serialized as that string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ColumnRef {
	pub qualifier: Option<String>,
	pub name: String,
}

impl ColumnRef {
	pub fn qualified(qualifier: &str, name: &str) -> Self {
		ColumnRef { qualifier: Some(qualifier.to_string()), name: name.to_string() }
	}
}

impl From<&str> for ColumnRef {
	fn from(s: &str) -> Self {
		match s.split_once('.') {
			Some((q, n)) => ColumnRef::qualified(q, n),
			None => ColumnRef { qualifier: None, name: s.to_string() },
		}
	}
}

impl From<String> for ColumnRef {
	fn from(s: String) -> Self {
		ColumnRef::from(s.as_str())
	}
}

impl From<ColumnRef> for String {
	fn from(c: ColumnRef) -> Self {
		c.to_string()
	}
}

impl Display for ColumnRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match &self.qualifier {
			Some(q) => write!(f, "{}.{}", q, self.name),
			None => write!(f, "{}", self.name),
		}
	}
}

/// A column as seen by expressions at some point of a plan.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
	pub qualifier: Option<String>,
	pub name: String,
	pub ty: DataType,
}

impl Field {
	pub fn new(qualifier: Option<&str>, name: &str, ty: DataType) -> Self {
		Field { qualifier: qualifier.map(str::to_string), name: name.to_string(), ty }
	}

	pub fn matches(&self, c: &ColumnRef) -> bool {
		self.name == c.name
			&& match &c.qualifier {
				Some(q) => self.qualifier.as_ref() == Some(q),
				None => true,
			}
	}

	pub fn same_name(&self, other: &Field) -> bool {
		self.name == other.name && self.qualifier == other.qualifier
	}
}

impl Display for Field {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match &self.qualifier {
			Some(q) => write!(f, "{}.{}", q, self.name),
			None => write!(f, "{}", self.name),
		}
	}
}

/// Position of the single field `c` names.
pub fn resolve<'a>(fields: impl IntoIterator<Item = &'a Field>, c: &ColumnRef) -> Result<usize> {
	let mut hits = fields.into_iter().enumerate().filter(|(_, f)| f.matches(c)).map(|(i, _)| i);
	match (hits.next(), hits.next()) {
		(Some(i), None) => Ok(i),
		(Some(_), Some(_)) => Err(Error::AmbiguousColumn(c.clone())),
		(None, _) => Err(Error::UnknownColumn(c.clone())),
	}
}

/// Rejects two fields carrying the same qualified name.
pub fn check_unique<'a>(fields: impl IntoIterator<Item = &'a Field>) -> Result<()> {
	let mut seen: Vec<&Field> = vec![];
	for field in fields {
		if seen.iter().any(|f| f.same_name(field)) {
			return Err(Error::DuplicateColumn(field.to_string()));
		}
		seen.push(field);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn column_refs_split_on_the_first_dot() {
		assert_eq!(ColumnRef::from("e.age"), ColumnRef::qualified("e", "age"));
		assert_eq!(ColumnRef::from("age").qualifier, None);
		assert_eq!(String::from(ColumnRef::from("e.age")), "e.age");
	}

	#[test]
	fn resolution_reports_ambiguity() {
		let fields = vec![
			Field::new(Some("a"), "id", DataType::Integer),
			Field::new(Some("b"), "id", DataType::Integer),
		];
		assert_eq!(resolve(&fields, &"b.id".into()), Ok(1));
		assert_eq!(resolve(&fields, &"id".into()), Err(Error::AmbiguousColumn("id".into())));
		assert_eq!(resolve(&fields, &"c.id".into()), Err(Error::UnknownColumn("c.id".into())));
	}

	#[test]
	fn integers_promote_to_reals() {
		assert_eq!(DataType::Integer.unify(DataType::Real), Some(DataType::Real));
		assert_eq!(DataType::String.unify(DataType::Integer), None);
	}

	#[test]
	fn catalog_deserializes_with_default_nullability() {
		let catalog: Catalog =
			serde_json::from_str(r#"{"emp": [{"name": "age", "type": "integer"}]}"#).unwrap();
		let age = catalog.column("emp", "age").unwrap();
		assert!(age.nullable);
		assert_eq!(age.ty, DataType::Integer);
	}
}
