//! SQL scalar expression tree. Leaves and combinators the visitor assembles;
//! rendering to text is the peripheral renderer's job, not this module's.
//! Covers window functions, UUID generation, ratio computation, and raw-SQL
//! passthrough for derived metrics and filter predicates.

use crate::specs::{DatePart, TimeGranularity};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlComparison {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlLogicalOperator {
    And,
    Or,
}

/// Aggregation functions available to aggregate-measures and min-max.
/// `SumBoolean` renders as `SUM(CAST(expr AS INT))`; the rest map directly.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregationType {
    Sum,
    SumBoolean,
    Avg,
    Min,
    Max,
    Count,
    CountDistinct,
    Percentile { percentile: f64, use_discrete: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlWindowFunction {
    FirstValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlColumnReference {
    pub table_alias: String,
    pub column_name: String,
}

impl SqlColumnReference {
    pub fn new(table_alias: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            table_alias: table_alias.into(),
            column_name: column_name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlWindowOrderBy {
    pub expr: SqlExpr,
    pub descending: bool,
}

/// A scalar SQL expression. Immutable; shared structurally via `Box` where
/// the original would use reference-counted tree nodes. Instances and specs
/// are shared, but expression trees here are small enough per node that
/// plain boxing is simpler than arena allocation.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlExpr {
    ColumnReference(SqlColumnReference),
    /// Any scalar literal (string/number/bool/null), as a single
    /// `Literal(serde_json::Value)` variant rather than one type per literal
    /// kind.
    Literal(serde_json::Value),
    Comparison {
        left: Box<SqlExpr>,
        comparison: SqlComparison,
        right: Box<SqlExpr>,
    },
    Between {
        expr: Box<SqlExpr>,
        start: Box<SqlExpr>,
        end: Box<SqlExpr>,
    },
    Logical {
        operator: SqlLogicalOperator,
        args: Vec<SqlExpr>,
    },
    /// A named scalar function call, e.g. `COALESCE(x, y)`.
    Function { name: String, args: Vec<SqlExpr> },
    Aggregate {
        function: AggregationType,
        arg: Box<SqlExpr>,
    },
    DateTrunc {
        granularity: TimeGranularity,
        arg: Box<SqlExpr>,
    },
    Extract {
        date_part: DatePart,
        arg: Box<SqlExpr>,
    },
    GenerateUuid,
    /// `numerator / denominator`, kept as its own node (rather than a plain
    /// `Function { name: "/", .. }`) so the optimizer collaborator can
    /// recognize and null-safety-normalize ratio metrics specifically
    /// in compute-metrics' Ratio dispatch.
    RatioComputation {
        numerator: Box<SqlExpr>,
        denominator: Box<SqlExpr>,
    },
    WindowFunction {
        function: SqlWindowFunction,
        args: Vec<SqlExpr>,
        partition_by: Vec<SqlExpr>,
        order_by: Vec<SqlWindowOrderBy>,
    },
    /// An opaque raw-SQL fragment (derived metrics, WHERE filters) plus the
    /// column names it references, so downstream passes can reason about
    /// dependencies without parsing the string.
    RawSql {
        sql: String,
        referenced_columns: Vec<String>,
    },
}

impl SqlExpr {
    pub fn column(table_alias: impl Into<String>, column_name: impl Into<String>) -> Self {
        SqlExpr::ColumnReference(SqlColumnReference::new(table_alias, column_name))
    }

    pub fn string_literal(value: impl Into<String>) -> Self {
        SqlExpr::Literal(serde_json::Value::String(value.into()))
    }

    pub fn and(args: Vec<SqlExpr>) -> Self {
        SqlExpr::Logical {
            operator: SqlLogicalOperator::And,
            args,
        }
    }

    pub fn or(args: Vec<SqlExpr>) -> Self {
        SqlExpr::Logical {
            operator: SqlLogicalOperator::Or,
            args,
        }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Comparison {
            left: Box::new(left),
            comparison: SqlComparison::Equals,
            right: Box::new(right),
        }
    }
}
