//! Rejection reasons.
//!
//! Apart from `Model`, every variant is raised before (or instead of) formula
//! construction; the encoders never need the solver to discover one of these.

use thiserror::Error;

use crate::pipeline::shared::{ColumnRef, DataType};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum Error {
	#[error("unknown table `{0}`")]
	UnknownTable(String),

	#[error("unknown column `{0}`")]
	UnknownColumn(ColumnRef),

	#[error("ambiguous column reference `{0}`")]
	AmbiguousColumn(ColumnRef),

	/// Two output columns would share one attribute function, e.g. a self-join
	/// without distinct aliases.
	#[error("duplicate output column `{0}`")]
	DuplicateColumn(String),

	#[error("type mismatch in {context}: {left:?} vs {right:?}")]
	TypeMismatch { context: String, left: DataType, right: DataType },

	#[error("operator `{op}` does not accept {ty:?} operands")]
	InvalidOperand { op: String, ty: DataType },

	#[error("arity mismatch in {context}: {left} vs {right} columns")]
	ArityMismatch { context: String, left: usize, right: usize },

	#[error("invalid literal: {0}")]
	Literal(String),

	#[error("invalid aggregate `{0}`: {1}")]
	Aggregate(String, String),

	#[error("invalid integrity constraint: {0}")]
	Constraint(String),

	#[error("row {row} out of range for table `{table}`")]
	RowOutOfRange { table: String, row: usize },

	#[error("solver answered SAT but produced no model: {0}")]
	Model(String),
}
