//! Semantic-element specs: the canonical identifiers the rest of the compiler
//! keys everything off of. A spec never carries a physical column name —
//! that's the resolver's job (see [`crate::column_association`]).

use std::sync::Arc;

/// The join-path prefix for a linkable element, e.g. `["listing"]` for a
/// dimension reached through a `listing` join, yielding `listing__country`.
///
/// Cheap to clone: entity-link chains are shared structurally via `Arc`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EntityLinks(Arc<Vec<String>>);

impl EntityLinks {
    pub fn empty() -> Self {
        Self(Arc::new(Vec::new()))
    }

    pub fn new(links: Vec<String>) -> Self {
        Self(Arc::new(links))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// New chain with `entity` prepended as the new leading link.
    pub fn prepend(&self, entity: &str) -> Self {
        let mut links = Vec::with_capacity(self.0.len() + 1);
        links.push(entity.to_string());
        links.extend(self.0.iter().cloned());
        Self(Arc::new(links))
    }

    /// Whether the leading link equals `entity` (used to detect a join
    /// re-traversing the entity it just joined through).
    pub fn starts_with(&self, entity: &str) -> bool {
        self.first() == Some(entity)
    }

    fn qualifier(&self) -> String {
        self.0.join("__")
    }
}

/// Granularity for time dimensions, ordered from finest to coarsest.
/// `to_int()` gives the ordering `Day < Week < Month < Quarter < Year` used
/// when choosing the smallest-granularity match among candidate instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeGranularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGranularity {
    pub fn to_int(self) -> u8 {
        match self {
            TimeGranularity::Day => 0,
            TimeGranularity::Week => 1,
            TimeGranularity::Month => 2,
            TimeGranularity::Quarter => 3,
            TimeGranularity::Year => 4,
        }
    }

    /// SQL interval unit / DATE_TRUNC argument for this granularity.
    pub fn sql_unit(self) -> &'static str {
        match self {
            TimeGranularity::Day => "day",
            TimeGranularity::Week => "week",
            TimeGranularity::Month => "month",
            TimeGranularity::Quarter => "quarter",
            TimeGranularity::Year => "year",
        }
    }
}

/// A sub-granularity part extracted from a time dimension, e.g. `day_of_week`.
/// Distinct from [`TimeGranularity`]: a date-part instance is excluded from
/// agg-time-dimension matching (per join-to-time-spine and join-over-time-range).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    DayOfWeek,
    DayOfYear,
}

impl DatePart {
    pub fn sql_field(self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Quarter => "quarter",
            DatePart::Month => "month",
            DatePart::Week => "week",
            DatePart::Day => "day",
            DatePart::DayOfWeek => "dayofweek",
            DatePart::DayOfYear => "dayofyear",
        }
    }
}

/// How "done" a measure column is. Monotone along the plan:
/// `NonAggregated -> Partial -> Complete`, never reverses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregationState {
    NonAggregated,
    Partial,
    Complete,
}

/// The reserved element name mirrored metric-time instances are labeled with.
pub const METRIC_TIME_ELEMENT_NAME: &str = "metric_time";
/// Reserved metadata name for the add-generated-uuid-column node's output.
pub const GENERATED_UUID_METADATA_NAME: &str = "mf_internal_uuid";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MeasureSpec {
    pub element_name: String,
    pub entity_links: EntityLinks,
    /// Rename applied by aggregate-measures when the input measure spec
    /// requests one; downstream nodes must then reference the alias.
    pub alias: Option<String>,
}

impl MeasureSpec {
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
            entity_links: EntityLinks::empty(),
            alias: None,
        }
    }

    /// The name downstream nodes should address this measure by: the alias
    /// if one was assigned, else the element name.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.element_name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DimensionSpec {
    pub element_name: String,
    pub entity_links: EntityLinks,
}

impl DimensionSpec {
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
            entity_links: EntityLinks::empty(),
        }
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.entity_links, &self.element_name)
    }

    pub fn with_leading_link(&self, entity: &str) -> Self {
        Self {
            element_name: self.element_name.clone(),
            entity_links: self.entity_links.prepend(entity),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimeDimensionSpec {
    pub element_name: String,
    pub entity_links: EntityLinks,
    pub time_granularity: TimeGranularity,
    pub date_part: Option<DatePart>,
}

impl TimeDimensionSpec {
    pub fn new(element_name: impl Into<String>, time_granularity: TimeGranularity) -> Self {
        Self {
            element_name: element_name.into(),
            entity_links: EntityLinks::empty(),
            time_granularity,
            date_part: None,
        }
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.entity_links, &self.element_name)
    }

    pub fn with_leading_link(&self, entity: &str) -> Self {
        Self {
            entity_links: self.entity_links.prepend(entity),
            ..self.clone()
        }
    }

    /// True if this instance matches an agg-time-dimension request: same
    /// element name + entity links, ignoring granularity and date part.
    pub fn matches_agg_time_dimension(&self, element_name: &str, entity_links: &EntityLinks) -> bool {
        self.date_part.is_none() && self.element_name == element_name && &self.entity_links == entity_links
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntitySpec {
    pub element_name: String,
    pub entity_links: EntityLinks,
}

impl EntitySpec {
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
            entity_links: EntityLinks::empty(),
        }
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.entity_links, &self.element_name)
    }

    pub fn with_leading_link(&self, entity: &str) -> Self {
        Self {
            element_name: self.element_name.clone(),
            entity_links: self.entity_links.prepend(entity),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetricSpec {
    pub element_name: String,
}

impl MetricSpec {
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupByMetricSpec {
    pub element_name: String,
    pub entity_links: EntityLinks,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetadataSpec {
    pub name: String,
}

impl MetadataSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Used by min-max to derive `col__min` / `col__max`.
    pub fn from_name_and_agg(name: &str, agg_suffix: &str) -> Self {
        Self {
            name: format!("{name}__{agg_suffix}"),
        }
    }
}

fn qualify(entity_links: &EntityLinks, element_name: &str) -> String {
    if entity_links.is_empty() {
        element_name.to_string()
    } else {
        format!("{}__{}", entity_links.qualifier(), element_name)
    }
}

/// A spec of any kind, for use in generic filter/include/exclude sets.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Spec {
    Measure(MeasureSpec),
    Dimension(DimensionSpec),
    TimeDimension(TimeDimensionSpec),
    Entity(EntitySpec),
    Metric(MetricSpec),
    GroupByMetric(GroupByMetricSpec),
    Metadata(MetadataSpec),
}
