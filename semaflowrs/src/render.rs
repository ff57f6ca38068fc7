//! A peripheral SQL text renderer: turns a finished [`SqlPlanNode`] into a
//! query string. Not wired into [`crate::visitor::compile`] — callers that
//! want text call this explicitly, same as the teacher's SQL renderer sits
//! downstream of its query builder rather than inside it.

use crate::engine::EngineKind;
use crate::sql_expr::{AggregationType, SqlComparison, SqlExpr, SqlLogicalOperator, SqlWindowFunction};
use crate::sql_plan::{JoinDescription, SqlJoinType, SqlPlanNode, SqlSelectColumn, SqlSelectStatementNode};

/// Dialects render identifiers and the handful of constructs that vary by
/// engine. Expression tree walking lives in [`SqlRenderer`]; a dialect only
/// maps logical pieces (quoting, aggregate spelling, literals) to text.
pub trait Dialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn render_literal(&self, value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => "NULL".to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }

    fn render_aggregation(&self, agg: &AggregationType, expr: &str) -> String {
        match agg {
            AggregationType::Sum => format!("SUM({expr})"),
            AggregationType::SumBoolean => format!("SUM(CAST({expr} AS INT))"),
            AggregationType::Avg => format!("AVG({expr})"),
            AggregationType::Min => format!("MIN({expr})"),
            AggregationType::Max => format!("MAX({expr})"),
            AggregationType::Count => format!("COUNT({expr})"),
            AggregationType::CountDistinct => format!("COUNT(DISTINCT {expr})"),
            AggregationType::Percentile { percentile, use_discrete } => {
                let func = if *use_discrete { "PERCENTILE_DISC" } else { "PERCENTILE_CONT" };
                format!("{func}({percentile}) WITHIN GROUP (ORDER BY {expr})")
            }
        }
    }

    /// Whether a SELECT's GROUP BY may reference a column alias rather than
    /// repeating the full expression. Delegates to [`EngineKind`] by default.
    fn use_column_alias_in_group_by(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DuckDbDialect;
impl Dialect for DuckDbDialect {
    fn use_column_alias_in_group_by(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PostgresDialect;
impl Dialect for PostgresDialect {
    fn use_column_alias_in_group_by(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RedshiftDialect;
impl Dialect for RedshiftDialect {
    fn use_column_alias_in_group_by(&self) -> bool {
        false
    }

    fn render_aggregation(&self, agg: &AggregationType, expr: &str) -> String {
        match agg {
            AggregationType::Percentile { percentile, .. } => {
                format!("PERCENTILE_CONT({percentile}) WITHIN GROUP (ORDER BY {expr})")
            }
            other => DuckDbDialect.render_aggregation(other, expr),
        }
    }
}

/// Select the reference dialect for an engine. Callers with finer-grained
/// needs should implement [`Dialect`] directly instead of going through this.
pub fn dialect_for_engine(engine: EngineKind) -> Box<dyn Dialect> {
    match engine {
        EngineKind::DuckDb | EngineKind::BigQuery | EngineKind::Snowflake => Box::new(DuckDbDialect),
        EngineKind::Postgres => Box::new(PostgresDialect),
        EngineKind::Redshift => Box::new(RedshiftDialect),
    }
}

/// Walks a [`SqlPlanNode`] tree and renders it to a single SQL string.
pub struct SqlRenderer<'a> {
    dialect: &'a dyn Dialect,
}

impl<'a> SqlRenderer<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self { dialect }
    }

    pub fn render(&self, node: &SqlPlanNode) -> String {
        match node {
            SqlPlanNode::TableReference { table_name } => self.dialect.quote_ident(table_name),
            SqlPlanNode::Select(select) => self.render_select(select),
            SqlPlanNode::CreateTableAs(create) => format!(
                "CREATE TABLE {} AS\n{}",
                self.dialect.quote_ident(&create.table_name),
                self.render_select(&create.select)
            ),
        }
    }

    fn render_select(&self, select: &SqlSelectStatementNode) -> String {
        let mut out = String::from("SELECT ");
        if select.distinct {
            out.push_str("DISTINCT ");
        }
        out.push_str(&self.render_select_columns(&select.select_columns));
        out.push_str("\nFROM ");
        out.push_str(&self.render_from_source(&select.from_source, &select.from_source_alias));

        for join in &select.joins {
            out.push('\n');
            out.push_str(&self.render_join(join));
        }

        if let Some(where_clause) = &select.where_clause {
            out.push_str("\nWHERE ");
            out.push_str(&self.render_expr(where_clause));
        }

        if !select.group_by.is_empty() {
            out.push_str("\nGROUP BY ");
            out.push_str(&self.render_group_by(&select.group_by));
        }

        if !select.order_by.is_empty() {
            out.push_str("\nORDER BY ");
            let pieces: Vec<String> = select
                .order_by
                .iter()
                .map(|o| {
                    let direction = if o.descending { "DESC" } else { "ASC" };
                    format!("{} {direction}", self.render_expr(&o.expr))
                })
                .collect();
            out.push_str(&pieces.join(", "));
        }

        if let Some(limit) = select.limit {
            out.push_str(&format!("\nLIMIT {limit}"));
        }

        out
    }

    fn render_from_source(&self, source: &SqlPlanNode, alias: &str) -> String {
        match source {
            SqlPlanNode::TableReference { table_name } => {
                format!("{} AS {}", self.dialect.quote_ident(table_name), self.dialect.quote_ident(alias))
            }
            nested => format!("(\n{}\n) AS {}", self.render(nested), self.dialect.quote_ident(alias)),
        }
    }

    fn render_join(&self, join: &JoinDescription) -> String {
        let keyword = match join.join_type {
            SqlJoinType::Inner => "INNER JOIN",
            SqlJoinType::Left => "LEFT OUTER JOIN",
            SqlJoinType::Right => "RIGHT OUTER JOIN",
            SqlJoinType::Full => "FULL OUTER JOIN",
            SqlJoinType::Cross => "CROSS JOIN",
        };
        let source = self.render_from_source(&join.right, &join.right_alias);
        match &join.on {
            Some(predicate) => format!("{keyword} {source} ON {}", self.render_expr(predicate)),
            None => format!("{keyword} {source}"),
        }
    }

    fn render_select_columns(&self, columns: &[SqlSelectColumn]) -> String {
        columns
            .iter()
            .map(|c| format!("{} AS {}", self.render_expr(&c.expr), self.dialect.quote_ident(&c.column_alias)))
            .collect::<Vec<_>>()
            .join(",\n  ")
    }

    fn render_group_by(&self, columns: &[SqlSelectColumn]) -> String {
        let use_alias = self.dialect.use_column_alias_in_group_by();
        columns
            .iter()
            .map(|c| if use_alias { self.dialect.quote_ident(&c.column_alias) } else { self.render_expr(&c.expr) })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_expr(&self, expr: &SqlExpr) -> String {
        match expr {
            SqlExpr::ColumnReference(col) => {
                format!("{}.{}", self.dialect.quote_ident(&col.table_alias), self.dialect.quote_ident(&col.column_name))
            }
            SqlExpr::Literal(value) => self.dialect.render_literal(value),
            SqlExpr::Comparison { left, comparison, right } => {
                format!("{} {} {}", self.render_expr(left), comparison_operator(*comparison), self.render_expr(right))
            }
            SqlExpr::Between { expr, start, end } => {
                format!("{} BETWEEN {} AND {}", self.render_expr(expr), self.render_expr(start), self.render_expr(end))
            }
            SqlExpr::Logical { operator, args } => {
                let joiner = match operator {
                    SqlLogicalOperator::And => " AND ",
                    SqlLogicalOperator::Or => " OR ",
                };
                let rendered: Vec<String> = args.iter().map(|a| format!("({})", self.render_expr(a))).collect();
                rendered.join(joiner)
            }
            SqlExpr::Function { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| self.render_expr(a)).collect();
                format!("{}({})", name.to_uppercase(), rendered.join(", "))
            }
            SqlExpr::Aggregate { function, arg } => self.dialect.render_aggregation(function, &self.render_expr(arg)),
            SqlExpr::DateTrunc { granularity, arg } => {
                format!("DATE_TRUNC('{}', {})", granularity.sql_unit(), self.render_expr(arg))
            }
            SqlExpr::Extract { date_part, arg } => {
                format!("EXTRACT({} FROM {})", date_part.sql_field().to_uppercase(), self.render_expr(arg))
            }
            SqlExpr::GenerateUuid => "GEN_RANDOM_UUID()".to_string(),
            SqlExpr::RatioComputation { numerator, denominator } => {
                format!(
                    "CAST({} AS DOUBLE) / NULLIF({}, 0)",
                    self.render_expr(numerator),
                    self.render_expr(denominator)
                )
            }
            SqlExpr::WindowFunction { function, args, partition_by, order_by } => {
                let func_name = match function {
                    SqlWindowFunction::FirstValue => "FIRST_VALUE",
                };
                let rendered_args: Vec<String> = args.iter().map(|a| self.render_expr(a)).collect();
                let partition: Vec<String> = partition_by.iter().map(|a| self.render_expr(a)).collect();
                let order: Vec<String> = order_by
                    .iter()
                    .map(|o| {
                        let direction = if o.descending { "DESC" } else { "ASC" };
                        format!("{} {direction}", self.render_expr(&o.expr))
                    })
                    .collect();
                format!(
                    "{func_name}({}) OVER (PARTITION BY {} ORDER BY {})",
                    rendered_args.join(", "),
                    partition.join(", "),
                    order.join(", ")
                )
            }
            SqlExpr::RawSql { sql, .. } => sql.clone(),
        }
    }
}

fn comparison_operator(comparison: SqlComparison) -> &'static str {
    match comparison {
        SqlComparison::Equals => "=",
        SqlComparison::NotEquals => "<>",
        SqlComparison::GreaterThan => ">",
        SqlComparison::GreaterThanOrEqual => ">=",
        SqlComparison::LessThan => "<",
        SqlComparison::LessThanOrEqual => "<=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_plan::SqlSelectColumn;

    #[test]
    fn renders_a_bare_select_over_a_table() {
        let select = SqlSelectStatementNode::new(
            "bare select",
            vec![SqlSelectColumn::new(SqlExpr::column("a", "revenue"), "revenue")],
            SqlPlanNode::table("orders"),
            "a",
        );
        let dialect = DuckDbDialect;
        let renderer = SqlRenderer::new(&dialect);
        let sql = renderer.render(&SqlPlanNode::Select(select));
        assert!(sql.contains("SELECT"));
        assert!(sql.contains("\"orders\" AS \"a\""));
    }

    #[test]
    fn redshift_group_by_repeats_expression_not_alias() {
        let mut select = SqlSelectStatementNode::new(
            "grouped",
            vec![SqlSelectColumn::new(SqlExpr::column("a", "country"), "country")],
            SqlPlanNode::table("orders"),
            "a",
        );
        select.group_by = select.select_columns.clone();
        let dialect = RedshiftDialect;
        let renderer = SqlRenderer::new(&dialect);
        let sql = renderer.render(&SqlPlanNode::Select(select));
        assert!(sql.contains("GROUP BY \"a\".\"country\""));
    }
}
