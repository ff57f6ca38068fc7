//! The SQL plan tree the compiler emits. A leaf is a table reference; an
//! interior node is a SELECT with description, columns, joins, and clauses. A
//! separate variant wraps a SELECT in CREATE TABLE AS for the
//! write-to-result-table node. FROM sources are themselves plan nodes rather
//! than flat table refs, since this compiler nests SELECTs (time-spine
//! sub-selects, pre-agg subqueries, conversion dedup subqueries) far more
//! than a flat single-grain query builder would.

use crate::sql_expr::SqlExpr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlJoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlSelectColumn {
    pub expr: SqlExpr,
    pub column_alias: String,
}

impl SqlSelectColumn {
    pub fn new(expr: SqlExpr, column_alias: impl Into<String>) -> Self {
        Self {
            expr,
            column_alias: column_alias.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderByDescription {
    pub expr: SqlExpr,
    pub descending: bool,
}

/// A single JOIN clause: the right-hand source, its alias, join type, and ON
/// predicate. `on` is `None` only for `Cross` joins.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinDescription {
    pub right: Box<SqlPlanNode>,
    pub right_alias: String,
    pub join_type: SqlJoinType,
    pub on: Option<SqlExpr>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlSelectStatementNode {
    pub description: String,
    pub select_columns: Vec<SqlSelectColumn>,
    pub from_source: Box<SqlPlanNode>,
    pub from_source_alias: String,
    pub joins: Vec<JoinDescription>,
    pub where_clause: Option<SqlExpr>,
    /// GROUP BY targets, carried as select columns so the renderer can
    /// choose between printing the alias or the full expression depending
    /// on `use_column_alias_in_group_by`, the one engine-sensitive flag this
    /// compiler emits.
    pub group_by: Vec<SqlSelectColumn>,
    pub order_by: Vec<OrderByDescription>,
    pub limit: Option<u64>,
    pub distinct: bool,
}

impl SqlSelectStatementNode {
    pub fn new(
        description: impl Into<String>,
        select_columns: Vec<SqlSelectColumn>,
        from_source: SqlPlanNode,
        from_source_alias: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            select_columns,
            from_source: Box::new(from_source),
            from_source_alias: from_source_alias.into(),
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            distinct: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlCreateTableAsNode {
    pub table_name: String,
    pub select: Box<SqlSelectStatementNode>,
}

/// A node in the SQL plan tree. `TableReference` is the only leaf; both
/// interior variants carry enough to keep recursing (a `Select`'s
/// `from_source` is itself a `SqlPlanNode`).
#[derive(Clone, Debug, PartialEq)]
pub enum SqlPlanNode {
    TableReference { table_name: String },
    Select(SqlSelectStatementNode),
    CreateTableAs(SqlCreateTableAsNode),
}

impl SqlPlanNode {
    pub fn table(table_name: impl Into<String>) -> Self {
        SqlPlanNode::TableReference {
            table_name: table_name.into(),
        }
    }

    /// Panics if called on a node that isn't a SELECT; handlers use this
    /// once they've established (by construction) that their parent is a
    /// SELECT.
    pub fn as_select(&self) -> &SqlSelectStatementNode {
        match self {
            SqlPlanNode::Select(s) => s,
            other => panic!("expected a SELECT node, got {other:?}"),
        }
    }
}
