//! `InstanceSet`: the immutable bundle of instances flowing alongside each
//! SQL node. Supports `merge`, `transform(f)`, and projection to a
//! spec set.

use std::collections::HashSet;
use std::hash::Hash;

use crate::instance::{
    DimensionInstance, EntityInstance, GroupByMetricInstance, MeasureInstance, MetadataInstance, MetricInstance,
    TimeDimensionInstance,
};
use crate::specs::{
    DimensionSpec, EntitySpec, GroupByMetricSpec, MeasureSpec, MetadataSpec, MetricSpec, TimeDimensionSpec,
};

#[derive(Clone, Debug, Default)]
pub struct InstanceSet {
    pub measure_instances: Vec<MeasureInstance>,
    pub dimension_instances: Vec<DimensionInstance>,
    pub time_dimension_instances: Vec<TimeDimensionInstance>,
    pub entity_instances: Vec<EntityInstance>,
    pub metric_instances: Vec<MetricInstance>,
    pub group_by_metric_instances: Vec<GroupByMetricInstance>,
    pub metadata_instances: Vec<MetadataInstance>,
}

impl InstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate instance sets in order, preserving each category's
    /// internal ordering (select columns follow instance-set
    /// iteration order).
    pub fn merge(sets: impl IntoIterator<Item = InstanceSet>) -> InstanceSet {
        let mut out = InstanceSet::default();
        for set in sets {
            out.measure_instances.extend(set.measure_instances);
            out.dimension_instances.extend(set.dimension_instances);
            out.time_dimension_instances.extend(set.time_dimension_instances);
            out.entity_instances.extend(set.entity_instances);
            out.metric_instances.extend(set.metric_instances);
            out.group_by_metric_instances.extend(set.group_by_metric_instances);
            out.metadata_instances.extend(set.metadata_instances);
        }
        out
    }

    pub fn spec_set(&self) -> InstanceSpecSet {
        InstanceSpecSet {
            measure_specs: self.measure_instances.iter().map(|i| i.spec.clone()).collect(),
            dimension_specs: self.dimension_instances.iter().map(|i| i.spec.clone()).collect(),
            time_dimension_specs: self.time_dimension_instances.iter().map(|i| i.spec.clone()).collect(),
            entity_specs: self.entity_instances.iter().map(|i| i.spec.clone()).collect(),
            metric_specs: self.metric_instances.iter().map(|i| i.spec.clone()).collect(),
            group_by_metric_specs: self.group_by_metric_instances.iter().map(|i| i.spec.clone()).collect(),
            metadata_specs: self.metadata_instances.iter().map(|i| i.spec.clone()).collect(),
        }
    }

    /// The linkable specs (dimension, time-dimension, entity) as a single
    /// spec set, used to compare "identical linkable-spec sets" across
    /// combine-aggregated-outputs parents.
    pub fn linkable_spec_set(&self) -> InstanceSpecSet {
        InstanceSpecSet {
            dimension_specs: self.dimension_instances.iter().map(|i| i.spec.clone()).collect(),
            time_dimension_specs: self.time_dimension_instances.iter().map(|i| i.spec.clone()).collect(),
            entity_specs: self.entity_instances.iter().map(|i| i.spec.clone()).collect(),
            ..InstanceSpecSet::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.measure_instances.is_empty()
            && self.dimension_instances.is_empty()
            && self.time_dimension_instances.is_empty()
            && self.entity_instances.is_empty()
            && self.metric_instances.is_empty()
            && self.group_by_metric_instances.is_empty()
            && self.metadata_instances.is_empty()
    }

    /// Apply a pure transform. Transforms may return something other than an
    /// `InstanceSet` (e.g. a select-column list), hence the associated type.
    pub fn transform<T: InstanceSetTransform>(self, t: T) -> T::Output {
        t.transform(self)
    }
}

/// A pure function `InstanceSet -> Output`, composable via
/// `instance_set.transform(SomeTransform { .. })`.
pub trait InstanceSetTransform {
    type Output;
    fn transform(&self, instance_set: InstanceSet) -> Self::Output;
}

/// Projection of an instance set to bare specs, used as include/exclude
/// filters and for structural comparisons (e.g. combine's "identical
/// linkable-spec sets" precondition).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct InstanceSpecSet {
    pub measure_specs: Vec<MeasureSpec>,
    pub dimension_specs: Vec<DimensionSpec>,
    pub time_dimension_specs: Vec<TimeDimensionSpec>,
    pub entity_specs: Vec<EntitySpec>,
    pub metric_specs: Vec<MetricSpec>,
    pub group_by_metric_specs: Vec<GroupByMetricSpec>,
    pub metadata_specs: Vec<MetadataSpec>,
}

fn as_set<T: Eq + Hash + Clone>(items: &[T]) -> HashSet<T> {
    items.iter().cloned().collect()
}

impl InstanceSpecSet {
    /// Set equality rather than `Vec`'s order-sensitive derived `PartialEq`:
    /// two instance sets built in different join orders still count as
    /// carrying "the same" linkable specs (`dataflow_to_sql.py`'s
    /// `set(x) == set(linkable_specs)`).
    pub fn is_set_equal(&self, other: &Self) -> bool {
        as_set(&self.measure_specs) == as_set(&other.measure_specs)
            && as_set(&self.dimension_specs) == as_set(&other.dimension_specs)
            && as_set(&self.time_dimension_specs) == as_set(&other.time_dimension_specs)
            && as_set(&self.entity_specs) == as_set(&other.entity_specs)
            && as_set(&self.metric_specs) == as_set(&other.metric_specs)
            && as_set(&self.group_by_metric_specs) == as_set(&other.group_by_metric_specs)
            && as_set(&self.metadata_specs) == as_set(&other.metadata_specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_association::ColumnAssociation;
    use crate::instance::DefinedFrom;
    use crate::specs::AggregationState;

    fn measure_instance(name: &str) -> MeasureInstance {
        MeasureInstance {
            spec: MeasureSpec::new(name),
            associated_columns: vec![ColumnAssociation::new(name)],
            defined_from: DefinedFrom::default(),
            aggregation_state: AggregationState::NonAggregated,
            fill_nulls_with: None,
        }
    }

    #[test]
    fn merge_concatenates_in_order() {
        let a = InstanceSet {
            measure_instances: vec![measure_instance("revenue")],
            ..InstanceSet::default()
        };
        let b = InstanceSet {
            measure_instances: vec![measure_instance("cost")],
            ..InstanceSet::default()
        };
        let merged = InstanceSet::merge([a, b]);
        let names: Vec<_> = merged
            .measure_instances
            .iter()
            .map(|i| i.spec.element_name.as_str())
            .collect();
        assert_eq!(names, vec!["revenue", "cost"]);
    }

    #[test]
    fn spec_set_projects_each_category() {
        let set = InstanceSet {
            measure_instances: vec![measure_instance("revenue")],
            ..InstanceSet::default()
        };
        let specs = set.spec_set();
        assert_eq!(specs.measure_specs.len(), 1);
        assert!(specs.dimension_specs.is_empty());
    }
}
