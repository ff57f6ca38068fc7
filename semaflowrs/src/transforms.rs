//! Instance-set transforms: pure `InstanceSet -> Output` functions composed
//! via `instance_set.transform(SomeTransform { .. })`. Each struct below
//! implements `InstanceSetTransform`; they are the building blocks every
//! visitor handler assembles its output dataset from.

use crate::column_association::ColumnAssociationResolver;
use crate::instance::{
    DefinedFrom, DimensionInstance, EntityInstance, GroupByMetricInstance, MeasureInstance, MetadataInstance,
    MetricInstance, TimeDimensionInstance,
};
use crate::instance_set::{InstanceSet, InstanceSetTransform, InstanceSpecSet};
use crate::specs::{AggregationState, MeasureSpec};
use crate::sql_expr::SqlExpr;
use crate::sql_plan::SqlSelectColumn;
use std::collections::HashMap;

/// Re-resolve every instance's column association through the resolver.
/// Idempotent: applying it twice produces the same instance set as applying
/// it once, since the resolver is a pure function of the spec.
pub struct ChangeAssociatedColumns<'a> {
    pub resolver: &'a dyn ColumnAssociationResolver,
}

impl<'a> ChangeAssociatedColumns<'a> {
    pub fn new(resolver: &'a dyn ColumnAssociationResolver) -> Self {
        Self { resolver }
    }
}

impl<'a> InstanceSetTransform for ChangeAssociatedColumns<'a> {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        InstanceSet {
            measure_instances: instance_set
                .measure_instances
                .into_iter()
                .map(|i| MeasureInstance {
                    associated_columns: vec![self.resolver.resolve_measure(&i.spec)],
                    ..i
                })
                .collect(),
            dimension_instances: instance_set
                .dimension_instances
                .into_iter()
                .map(|i| DimensionInstance {
                    associated_columns: vec![self.resolver.resolve_dimension(&i.spec)],
                    ..i
                })
                .collect(),
            time_dimension_instances: instance_set
                .time_dimension_instances
                .into_iter()
                .map(|i| TimeDimensionInstance {
                    associated_columns: vec![self.resolver.resolve_time_dimension(&i.spec)],
                    ..i
                })
                .collect(),
            entity_instances: instance_set
                .entity_instances
                .into_iter()
                .map(|i| EntityInstance {
                    associated_columns: vec![self.resolver.resolve_entity(&i.spec)],
                    ..i
                })
                .collect(),
            metric_instances: instance_set
                .metric_instances
                .into_iter()
                .map(|i| MetricInstance {
                    associated_columns: vec![self.resolver.resolve_metric(&i.spec)],
                    ..i
                })
                .collect(),
            group_by_metric_instances: instance_set
                .group_by_metric_instances
                .into_iter()
                .map(|i| GroupByMetricInstance {
                    associated_columns: vec![self.resolver.resolve_group_by_metric(&i.spec)],
                    ..i
                })
                .collect(),
            metadata_instances: instance_set
                .metadata_instances
                .into_iter()
                .map(|i| MetadataInstance {
                    associated_columns: vec![self.resolver.resolve_metadata(&i.spec)],
                    ..i
                })
                .collect(),
        }
    }
}

/// Keep only instances matching `include_specs` (if set) and drop any
/// matching `exclude_specs`. At most one of the two should be populated by a
/// caller; both are honored if given.
#[derive(Default)]
pub struct FilterElements {
    pub include_specs: Option<InstanceSpecSet>,
    pub exclude_specs: Option<InstanceSpecSet>,
}

impl FilterElements {
    pub fn include(specs: InstanceSpecSet) -> Self {
        Self {
            include_specs: Some(specs),
            exclude_specs: None,
        }
    }

    pub fn exclude(specs: InstanceSpecSet) -> Self {
        Self {
            include_specs: None,
            exclude_specs: Some(specs),
        }
    }
}

impl InstanceSetTransform for FilterElements {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        macro_rules! keep {
            ($field:ident, $specs_field:ident) => {
                instance_set
                    .$field
                    .into_iter()
                    .filter(|i| {
                        let included = self
                            .include_specs
                            .as_ref()
                            .map(|s| s.$specs_field.contains(&i.spec))
                            .unwrap_or(true);
                        let excluded = self
                            .exclude_specs
                            .as_ref()
                            .map(|s| s.$specs_field.contains(&i.spec))
                            .unwrap_or(false);
                        included && !excluded
                    })
                    .collect()
            };
        }
        InstanceSet {
            measure_instances: keep!(measure_instances, measure_specs),
            dimension_instances: keep!(dimension_instances, dimension_specs),
            time_dimension_instances: keep!(time_dimension_instances, time_dimension_specs),
            entity_instances: keep!(entity_instances, entity_specs),
            metric_instances: keep!(metric_instances, metric_specs),
            group_by_metric_instances: keep!(group_by_metric_instances, group_by_metric_specs),
            metadata_instances: keep!(metadata_instances, metadata_specs),
        }
    }
}

/// Drop linkable (dimension/time-dimension/entity) instances whose first
/// entity link equals `entity_link`, used by join-on-entities to avoid
/// re-traversing the entity it just joined through.
pub struct FilterLinkablesWithLeadingLink {
    pub entity_link: String,
}

impl InstanceSetTransform for FilterLinkablesWithLeadingLink {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        InstanceSet {
            dimension_instances: instance_set
                .dimension_instances
                .into_iter()
                .filter(|i| !i.spec.entity_links.starts_with(&self.entity_link))
                .collect(),
            time_dimension_instances: instance_set
                .time_dimension_instances
                .into_iter()
                .filter(|i| !i.spec.entity_links.starts_with(&self.entity_link))
                .collect(),
            entity_instances: instance_set
                .entity_instances
                .into_iter()
                .filter(|i| !i.spec.entity_links.starts_with(&self.entity_link))
                .collect(),
            ..instance_set
        }
    }
}

/// Prepend `entity` to every linkable instance's entity-link chain.
pub struct AddLinkToLinkables {
    pub entity: String,
}

impl InstanceSetTransform for AddLinkToLinkables {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        InstanceSet {
            dimension_instances: instance_set
                .dimension_instances
                .into_iter()
                .map(|i| DimensionInstance {
                    spec: i.spec.with_leading_link(&self.entity),
                    ..i
                })
                .collect(),
            time_dimension_instances: instance_set
                .time_dimension_instances
                .into_iter()
                .map(|i| TimeDimensionInstance {
                    spec: i.spec.with_leading_link(&self.entity),
                    ..i
                })
                .collect(),
            entity_instances: instance_set
                .entity_instances
                .into_iter()
                .map(|i| EntityInstance {
                    spec: i.spec.with_leading_link(&self.entity),
                    ..i
                })
                .collect(),
            ..instance_set
        }
    }
}

/// Remap every measure's aggregation state through `state_map`. A state not
/// present in the map is a programming error (spec.md's "unknown aggregation
/// state" invariant violation, §7): every caller must supply an exhaustive
/// map for the states it can see.
pub struct ChangeMeasureAggregationState {
    pub state_map: HashMap<AggregationState, AggregationState>,
}

impl ChangeMeasureAggregationState {
    pub fn new(pairs: impl IntoIterator<Item = (AggregationState, AggregationState)>) -> Self {
        Self {
            state_map: pairs.into_iter().collect(),
        }
    }
}

impl InstanceSetTransform for ChangeMeasureAggregationState {
    /// Unlike the other transforms in this module, remapping can fail, so
    /// `Output` is a `Result` rather than a bare `InstanceSet`.
    type Output = crate::error::Result<InstanceSet>;

    fn transform(&self, instance_set: InstanceSet) -> Self::Output {
        let measure_instances = instance_set
            .measure_instances
            .into_iter()
            .map(|i| {
                let next = *self.state_map.get(&i.aggregation_state).ok_or_else(|| {
                    crate::error::CompileError::InvariantViolation(format!(
                        "no remapping supplied for aggregation state {:?} of measure {}",
                        i.aggregation_state, i.spec.element_name
                    ))
                })?;
                Ok(MeasureInstance {
                    aggregation_state: next,
                    ..i
                })
            })
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok(InstanceSet {
            measure_instances,
            ..instance_set
        })
    }
}

/// Copy `fill_nulls_with` from the matching metric-input-measure spec onto
/// each measure instance.
pub struct UpdateMeasureFillNullsWith<'a> {
    pub metric_input_measure_specs: &'a [MeasureSpec],
}

impl<'a> InstanceSetTransform for UpdateMeasureFillNullsWith<'a> {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        InstanceSet {
            measure_instances: instance_set
                .measure_instances
                .into_iter()
                .map(|i| {
                    let fill = self
                        .metric_input_measure_specs
                        .iter()
                        .find(|s| s.element_name == i.spec.element_name)
                        .and_then(|_| i.fill_nulls_with);
                    MeasureInstance {
                        fill_nulls_with: fill,
                        ..i
                    }
                })
                .collect(),
            ..instance_set
        }
    }
}

/// Rename measure instances per the alias carried on the corresponding input
/// measure spec, paired by position (`metric_input_measure_specs[i]` aliases
/// `instance_set.measure_instances[i]`): two instances of the same measure
/// with different aliases share an `element_name`, so a name-based lookup
/// cannot tell them apart.
pub struct AliasAggregatedMeasures<'a> {
    pub metric_input_measure_specs: &'a [MeasureSpec],
}

impl<'a> InstanceSetTransform for AliasAggregatedMeasures<'a> {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        InstanceSet {
            measure_instances: instance_set
                .measure_instances
                .into_iter()
                .zip(self.metric_input_measure_specs.iter())
                .map(|(i, input_spec)| {
                    if let Some(alias) = &input_spec.alias {
                        let mut spec = i.spec.clone();
                        spec.alias = Some(alias.clone());
                        MeasureInstance { spec, ..i }
                    } else {
                        i
                    }
                })
                .collect(),
            ..instance_set
        }
    }
}

pub struct RemoveMeasures;

impl InstanceSetTransform for RemoveMeasures {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        InstanceSet {
            measure_instances: Vec::new(),
            ..instance_set
        }
    }
}

pub struct RemoveMetrics;

impl InstanceSetTransform for RemoveMetrics {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        InstanceSet {
            metric_instances: Vec::new(),
            group_by_metric_instances: Vec::new(),
            ..instance_set
        }
    }
}

/// Move the given instances into the metadata category, e.g. min/max outputs.
pub struct ConvertToMetadata {
    pub metadata_instances: Vec<MetadataInstance>,
}

impl InstanceSetTransform for ConvertToMetadata {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        let mut metadata_instances = instance_set.metadata_instances;
        metadata_instances.extend(self.metadata_instances.iter().cloned());
        InstanceSet {
            metadata_instances,
            ..instance_set
        }
    }
}

pub struct AddMetadata {
    pub metadata_instances: Vec<MetadataInstance>,
}

impl InstanceSetTransform for AddMetadata {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        let mut metadata_instances = instance_set.metadata_instances;
        metadata_instances.extend(self.metadata_instances.iter().cloned());
        InstanceSet {
            metadata_instances,
            ..instance_set
        }
    }
}

pub struct AddMetrics {
    pub metric_instances: Vec<MetricInstance>,
}

impl InstanceSetTransform for AddMetrics {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        let mut metric_instances = instance_set.metric_instances;
        metric_instances.extend(self.metric_instances.iter().cloned());
        InstanceSet {
            metric_instances,
            ..instance_set
        }
    }
}

pub struct AddGroupByMetric {
    pub instance: GroupByMetricInstance,
}

impl InstanceSetTransform for AddGroupByMetric {
    type Output = InstanceSet;

    fn transform(&self, instance_set: InstanceSet) -> InstanceSet {
        let mut group_by_metric_instances = instance_set.group_by_metric_instances;
        group_by_metric_instances.push(self.instance.clone());
        InstanceSet {
            group_by_metric_instances,
            ..instance_set
        }
    }
}

/// Yield one select column per instance, addressing it as `alias.column`.
/// `output_to_input_column` optionally renames the output alias while
/// reading from a differently-named input column (used by
/// metric-time-dimension-transform's mirrored columns).
pub struct CreateSelectColumnsForInstances<'a> {
    pub table_alias: &'a str,
    pub output_to_input_column: Option<&'a HashMap<String, String>>,
}

impl<'a> CreateSelectColumnsForInstances<'a> {
    pub fn new(table_alias: &'a str) -> Self {
        Self {
            table_alias,
            output_to_input_column: None,
        }
    }

    fn column(&self, output_column: &str) -> SqlSelectColumn {
        let input_column = self
            .output_to_input_column
            .and_then(|m| m.get(output_column))
            .map(String::as_str)
            .unwrap_or(output_column);
        SqlSelectColumn::new(SqlExpr::column(self.table_alias, input_column), output_column)
    }
}

impl<'a> InstanceSetTransform for CreateSelectColumnsForInstances<'a> {
    type Output = Vec<SqlSelectColumn>;

    fn transform(&self, instance_set: InstanceSet) -> Vec<SqlSelectColumn> {
        let mut columns = Vec::new();
        for i in &instance_set.measure_instances {
            columns.push(self.column(&i.associated_column().column_name));
        }
        for i in &instance_set.dimension_instances {
            columns.push(self.column(&i.associated_column().column_name));
        }
        for i in &instance_set.time_dimension_instances {
            columns.push(self.column(&i.associated_column().column_name));
        }
        for i in &instance_set.entity_instances {
            columns.push(self.column(&i.associated_column().column_name));
        }
        for i in &instance_set.metric_instances {
            columns.push(self.column(&i.associated_column().column_name));
        }
        for i in &instance_set.group_by_metric_instances {
            columns.push(self.column(&i.associated_columns[0].column_name));
        }
        for i in &instance_set.metadata_instances {
            columns.push(self.column(&i.associated_column().column_name));
        }
        columns
    }
}

/// The provenance carried by every instance this module constructs fresh.
pub fn no_provenance() -> DefinedFrom {
    DefinedFrom::default()
}
