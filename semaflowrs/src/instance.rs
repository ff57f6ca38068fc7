//! Instances: a spec bound to one or more physical columns plus provenance.

use crate::column_association::ColumnAssociation;
use crate::specs::{
    AggregationState, DimensionSpec, EntitySpec, GroupByMetricSpec, MeasureSpec, MetadataSpec, MetricSpec,
    TimeDimensionSpec,
};

/// What a measure or metric was defined from — just enough provenance to
/// explain an instance in debug output. The compiler never interprets this
/// beyond carrying it through.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct DefinedFrom {
    pub semantic_model: Option<String>,
    pub metric: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MeasureInstance {
    pub spec: MeasureSpec,
    pub associated_columns: Vec<ColumnAssociation>,
    pub defined_from: DefinedFrom,
    pub aggregation_state: AggregationState,
    pub fill_nulls_with: Option<i64>,
}

impl MeasureInstance {
    pub fn associated_column(&self) -> &ColumnAssociation {
        self.associated_columns
            .first()
            .expect("instance must carry at least one associated column")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DimensionInstance {
    pub spec: DimensionSpec,
    pub associated_columns: Vec<ColumnAssociation>,
    pub defined_from: DefinedFrom,
}

impl DimensionInstance {
    pub fn associated_column(&self) -> &ColumnAssociation {
        self.associated_columns
            .first()
            .expect("instance must carry at least one associated column")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimeDimensionInstance {
    pub spec: TimeDimensionSpec,
    pub associated_columns: Vec<ColumnAssociation>,
    pub defined_from: DefinedFrom,
}

impl TimeDimensionInstance {
    pub fn associated_column(&self) -> &ColumnAssociation {
        self.associated_columns
            .first()
            .expect("instance must carry at least one associated column")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityInstance {
    pub spec: EntitySpec,
    pub associated_columns: Vec<ColumnAssociation>,
    pub defined_from: DefinedFrom,
}

impl EntityInstance {
    pub fn associated_column(&self) -> &ColumnAssociation {
        self.associated_columns
            .first()
            .expect("instance must carry at least one associated column")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetricInstance {
    pub spec: MetricSpec,
    pub associated_columns: Vec<ColumnAssociation>,
    pub defined_from: DefinedFrom,
}

impl MetricInstance {
    pub fn associated_column(&self) -> &ColumnAssociation {
        self.associated_columns
            .first()
            .expect("instance must carry at least one associated column")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupByMetricInstance {
    pub spec: GroupByMetricSpec,
    pub associated_columns: Vec<ColumnAssociation>,
    pub defined_from: DefinedFrom,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetadataInstance {
    pub spec: MetadataSpec,
    pub associated_columns: Vec<ColumnAssociation>,
}

impl MetadataInstance {
    pub fn associated_column(&self) -> &ColumnAssociation {
        self.associated_columns
            .first()
            .expect("instance must carry at least one associated column")
    }
}
