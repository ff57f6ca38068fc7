//! The input the compiler consumes: a closed, exhaustively-matched sum type
//! over every dataflow operator variant. Each variant carries exactly the
//! fields its visitor handler needs; nothing here renders to SQL directly —
//! that's [`crate::visitor`]'s job.

use crate::instance_set::InstanceSet;
use crate::specs::{EntitySpec, GroupByMetricSpec, MeasureSpec, MetricSpec, Spec, TimeDimensionSpec};
use crate::sql_expr::AggregationType;
use crate::sql_plan::SqlJoinType;

/// An inclusive calendar-day range, e.g. `['2020-01-01', '2020-01-01']`.
/// Carried as ISO date strings since the core never interprets the value,
/// only passes it through to a comparison expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeRangeConstraint {
    pub start_iso: String,
    pub end_iso: String,
}

impl TimeRangeConstraint {
    pub fn new(start_iso: impl Into<String>, end_iso: impl Into<String>) -> Self {
        Self {
            start_iso: start_iso.into(),
            end_iso: end_iso.into(),
        }
    }
}

/// A raw-SQL WHERE predicate plus the linkable specs it references, so the
/// visitor can resolve column names without parsing the string.
#[derive(Clone, Debug, PartialEq)]
pub struct WhereFilterSpec {
    pub where_sql: String,
    pub linkable_specs: Vec<Spec>,
    pub bind_parameters: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBySpec {
    pub instance_spec: Spec,
    pub descending: bool,
}

/// One join target in a join-on-entities node: the node to join in, the
/// entity the join is keyed on (`None` for a join not re-expressed as an
/// entity link, e.g. a cross join), and the SQL join type to use.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinOnEntitiesTarget {
    pub join_node: Box<DataflowPlanNode>,
    pub join_on_entity: Option<String>,
    pub join_type: SqlJoinType,
}

/// A property that must match between base and conversion events for a
/// conversion to count, e.g. matching `device_type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantProperty {
    pub base_spec: Spec,
    pub conversion_spec: Spec,
}

/// A closed enumeration of every dataflow-plan operator this compiler
/// understands. The plan is a tree: every variant but `CombineAggregatedOutputs`
/// has exactly one parent edge.
#[derive(Clone, Debug, PartialEq)]
pub enum DataflowPlanNode {
    /// A leaf: emits the dataset it was constructed with verbatim.
    ReadSource {
        description: String,
        instance_set: InstanceSet,
        sql_table: String,
    },

    JoinOverTimeRange {
        description: String,
        parent: Box<DataflowPlanNode>,
        time_dimension_spec_for_join: TimeDimensionSpec,
        window_interval_sql: Option<String>,
        time_range_constraint: Option<TimeRangeConstraint>,
    },

    JoinOnEntities {
        description: String,
        left: Box<DataflowPlanNode>,
        join_targets: Vec<JoinOnEntitiesTarget>,
    },

    AggregateMeasures {
        description: String,
        parent: Box<DataflowPlanNode>,
        /// Per-measure aggregation function, alias, and fill-null override,
        /// keyed by the measure's own spec.
        measure_aggregations: Vec<MeasureAggregation>,
    },

    ComputeMetrics {
        description: String,
        parent: Box<DataflowPlanNode>,
        metric_specs: Vec<MetricSpec>,
        for_group_by_source_node: bool,
    },

    OrderByLimit {
        description: String,
        parent: Box<DataflowPlanNode>,
        order_by_specs: Vec<OrderBySpec>,
        limit: Option<u64>,
    },

    FilterElements {
        description: String,
        parent: Box<DataflowPlanNode>,
        include_specs: crate::instance_set::InstanceSpecSet,
        distinct: bool,
    },

    WhereConstraint {
        description: String,
        parent: Box<DataflowPlanNode>,
        filter: WhereFilterSpec,
    },

    CombineAggregatedOutputs {
        description: String,
        parents: Vec<DataflowPlanNode>,
    },

    ConstrainTimeRange {
        description: String,
        parent: Box<DataflowPlanNode>,
        time_range_constraint: TimeRangeConstraint,
    },

    MetricTimeDimensionTransform {
        description: String,
        parent: Box<DataflowPlanNode>,
        aggregation_time_dimension_element_name: String,
    },

    SemiAdditiveJoin {
        description: String,
        parent: Box<DataflowPlanNode>,
        time_dimension_spec: TimeDimensionSpec,
        agg_by_function: AggregationType,
        entity_specs: Vec<EntitySpec>,
        queried_time_dimension_spec: Option<TimeDimensionSpec>,
    },

    JoinToTimeSpine {
        description: String,
        parent: Box<DataflowPlanNode>,
        requested_agg_time_dimension_specs: Vec<TimeDimensionSpec>,
        join_type: SqlJoinType,
        time_range_constraint: Option<TimeRangeConstraint>,
        offset_to_grain: bool,
    },

    MinMax {
        description: String,
        parent: Box<DataflowPlanNode>,
    },

    AddGeneratedUuidColumn {
        description: String,
        parent: Box<DataflowPlanNode>,
    },

    JoinConversionEvents {
        description: String,
        base: Box<DataflowPlanNode>,
        conversion: Box<DataflowPlanNode>,
        entity_spec: EntitySpec,
        base_time_dimension_spec: TimeDimensionSpec,
        conversion_time_dimension_spec: TimeDimensionSpec,
        window_interval_sql: Option<String>,
        constant_properties: Vec<ConstantProperty>,
        unique_identifier_keys: Vec<Spec>,
        conversion_measure_spec: MeasureSpec,
    },

    WriteToResultDataTable {
        description: String,
        parent: Box<DataflowPlanNode>,
    },

    WriteToResultTable {
        description: String,
        parent: Box<DataflowPlanNode>,
        output_sql_table: String,
    },
}

/// One measure's aggregation directive within an aggregate-measures node:
/// which function to apply, and the alias/fill-null carried by the metric
/// input measure that requested this aggregation.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasureAggregation {
    pub measure_spec: MeasureSpec,
    pub agg: AggregationType,
    pub fill_nulls_with: Option<i64>,
}

impl DataflowPlanNode {
    pub fn description(&self) -> &str {
        match self {
            DataflowPlanNode::ReadSource { description, .. }
            | DataflowPlanNode::JoinOverTimeRange { description, .. }
            | DataflowPlanNode::JoinOnEntities { description, .. }
            | DataflowPlanNode::AggregateMeasures { description, .. }
            | DataflowPlanNode::ComputeMetrics { description, .. }
            | DataflowPlanNode::OrderByLimit { description, .. }
            | DataflowPlanNode::FilterElements { description, .. }
            | DataflowPlanNode::WhereConstraint { description, .. }
            | DataflowPlanNode::CombineAggregatedOutputs { description, .. }
            | DataflowPlanNode::ConstrainTimeRange { description, .. }
            | DataflowPlanNode::MetricTimeDimensionTransform { description, .. }
            | DataflowPlanNode::SemiAdditiveJoin { description, .. }
            | DataflowPlanNode::JoinToTimeSpine { description, .. }
            | DataflowPlanNode::MinMax { description, .. }
            | DataflowPlanNode::AddGeneratedUuidColumn { description, .. }
            | DataflowPlanNode::JoinConversionEvents { description, .. }
            | DataflowPlanNode::WriteToResultDataTable { description, .. }
            | DataflowPlanNode::WriteToResultTable { description, .. } => description,
        }
    }
}

/// Grouping metric spec used by the group-by-metric compute-metrics path:
/// the entity chain the metric is grouped by. Kept distinct from
/// [`GroupByMetricSpec`] in `specs.rs`, which is the instance-level spec.
pub type GroupByMetricGrouping = GroupByMetricSpec;
