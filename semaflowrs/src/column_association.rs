//! The column-association resolver: a deterministic `spec -> column name`
//! function. The compiler treats this as an opaque collaborator
//! and only relies on it being a pure, deterministic function of the spec.

use crate::specs::{DimensionSpec, EntitySpec, GroupByMetricSpec, MeasureSpec, MetadataSpec, MetricSpec, Spec, TimeDimensionSpec};

/// A physical column-name handle produced by a resolver for a given spec.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnAssociation {
    pub column_name: String,
}

impl ColumnAssociation {
    pub fn new(column_name: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
        }
    }
}

/// `spec -> column_association`. Implementations must be deterministic and
/// stable across calls within one compilation; the compiler core never
/// inspects *how* a name was produced, only that repeated calls with an
/// equal spec produce an equal column name.
pub trait ColumnAssociationResolver: Send + Sync {
    fn resolve_measure(&self, spec: &MeasureSpec) -> ColumnAssociation;
    fn resolve_dimension(&self, spec: &DimensionSpec) -> ColumnAssociation;
    fn resolve_time_dimension(&self, spec: &TimeDimensionSpec) -> ColumnAssociation;
    fn resolve_entity(&self, spec: &EntitySpec) -> ColumnAssociation;
    fn resolve_metric(&self, spec: &MetricSpec) -> ColumnAssociation;
    fn resolve_group_by_metric(&self, spec: &GroupByMetricSpec) -> ColumnAssociation;
    fn resolve_metadata(&self, spec: &MetadataSpec) -> ColumnAssociation;

    fn resolve_spec(&self, spec: &Spec) -> ColumnAssociation {
        match spec {
            Spec::Measure(s) => self.resolve_measure(s),
            Spec::Dimension(s) => self.resolve_dimension(s),
            Spec::TimeDimension(s) => self.resolve_time_dimension(s),
            Spec::Entity(s) => self.resolve_entity(s),
            Spec::Metric(s) => self.resolve_metric(s),
            Spec::GroupByMetric(s) => self.resolve_group_by_metric(s),
            Spec::Metadata(s) => self.resolve_metadata(s),
        }
    }
}

/// Reference resolver: qualified name (entity links joined by `__`), with a
/// granularity suffix on time dimensions, and a date-part suffix when set.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultColumnAssociationResolver;

impl ColumnAssociationResolver for DefaultColumnAssociationResolver {
    fn resolve_measure(&self, spec: &MeasureSpec) -> ColumnAssociation {
        ColumnAssociation::new(spec.output_name())
    }

    fn resolve_dimension(&self, spec: &DimensionSpec) -> ColumnAssociation {
        ColumnAssociation::new(spec.qualified_name())
    }

    fn resolve_time_dimension(&self, spec: &TimeDimensionSpec) -> ColumnAssociation {
        let mut name = spec.qualified_name();
        name.push_str("__");
        name.push_str(spec.time_granularity.sql_unit());
        if let Some(date_part) = spec.date_part {
            name.push_str("__");
            name.push_str(date_part.sql_field());
        }
        ColumnAssociation::new(name)
    }

    fn resolve_entity(&self, spec: &EntitySpec) -> ColumnAssociation {
        ColumnAssociation::new(spec.qualified_name())
    }

    fn resolve_metric(&self, spec: &MetricSpec) -> ColumnAssociation {
        ColumnAssociation::new(spec.element_name.clone())
    }

    fn resolve_group_by_metric(&self, spec: &GroupByMetricSpec) -> ColumnAssociation {
        ColumnAssociation::new(spec.element_name.clone())
    }

    fn resolve_metadata(&self, spec: &MetadataSpec) -> ColumnAssociation {
        ColumnAssociation::new(spec.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::{EntityLinks, TimeGranularity};

    #[test]
    fn resolver_is_deterministic() {
        let resolver = DefaultColumnAssociationResolver;
        let spec = DimensionSpec {
            element_name: "country".to_string(),
            entity_links: EntityLinks::new(vec!["listing".to_string()]),
        };
        assert_eq!(resolver.resolve_dimension(&spec), resolver.resolve_dimension(&spec));
    }

    #[test]
    fn time_dimension_column_includes_granularity_and_date_part() {
        let resolver = DefaultColumnAssociationResolver;
        let mut spec = TimeDimensionSpec::new("ds", TimeGranularity::Month);
        let without_part = resolver.resolve_time_dimension(&spec);
        assert_eq!(without_part.column_name, "ds__month");

        spec.date_part = Some(crate::specs::DatePart::DayOfWeek);
        let with_part = resolver.resolve_time_dimension(&spec);
        assert_eq!(with_part.column_name, "ds__month__dayofweek");
    }

    #[test]
    fn measure_resolves_to_alias_when_present() {
        let resolver = DefaultColumnAssociationResolver;
        let mut spec = MeasureSpec::new("revenue");
        spec.alias = Some("total_revenue".to_string());
        assert_eq!(resolver.resolve_measure(&spec).column_name, "total_revenue");
    }
}
