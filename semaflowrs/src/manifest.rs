//! Semantic-manifest lookup: the collaborator that knows about metrics and
//! semantic models so the visitor doesn't have to carry that information on
//! every node. Pure reads; the compiler treats failures as
//! `CompileError::Other` since a missing manifest entry means the plan was
//! built from a manifest the compiler was never shown, not a bug in the
//! compiler itself.

use crate::error::Result;
use crate::specs::{EntityLinks, MeasureSpec};

/// Identifies the time dimension a measure's semantic model declares as its
/// aggregation-time dimension — what join-over-time-range and
/// metric-time-dimension-transform match candidate parent instances against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AggTimeDimensionRef {
    pub element_name: String,
    pub entity_links: EntityLinks,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConversionMetricKind {
    ConversionRate,
    Conversions,
}

/// A resolved metric definition, dispatched on by compute-metrics. By the
/// time the visitor asks for this, the metric reference is assumed valid
/// (the plan is well-formed by construction) — an unknown metric ref is a
/// manifest-collaborator failure, not an `UnsupportedInput`.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricDefinition {
    Simple {
        measure: MeasureSpec,
        fill_nulls_with: Option<i64>,
    },
    Ratio {
        numerator_measure: MeasureSpec,
        denominator_measure: MeasureSpec,
    },
    /// Windowing has already been realized upstream by join-over-time-range;
    /// compute-metrics treats this identically to `Simple`.
    Cumulative {
        measure: MeasureSpec,
        fill_nulls_with: Option<i64>,
    },
    Derived {
        sql: String,
        referenced_columns: Vec<String>,
    },
    Conversion {
        kind: ConversionMetricKind,
        conversion_measure: MeasureSpec,
        base_measure: Option<MeasureSpec>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SemanticModelDefinition {
    pub name: String,
    pub primary_entity: Option<String>,
}

pub trait SemanticManifest: Send + Sync {
    fn get_metric(&self, metric_ref: &str) -> Result<MetricDefinition>;
    fn get_semantic_model(&self, model_ref: &str) -> Result<SemanticModelDefinition>;
    fn agg_time_dimension_for_measure(&self, measure_ref: &str) -> Result<AggTimeDimensionRef>;
}

/// An in-memory manifest backed by plain maps, useful for tests and demos
/// that construct a handful of metrics/models literally rather than loading
/// them from a file format (manifest loading from disk is out of scope).
#[derive(Debug, Default)]
pub struct StaticManifest {
    pub metrics: std::collections::HashMap<String, MetricDefinition>,
    pub semantic_models: std::collections::HashMap<String, SemanticModelDefinition>,
    pub agg_time_dimensions: std::collections::HashMap<String, AggTimeDimensionRef>,
}

impl SemanticManifest for StaticManifest {
    fn get_metric(&self, metric_ref: &str) -> Result<MetricDefinition> {
        self.metrics
            .get(metric_ref)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown metric {metric_ref}").into())
    }

    fn get_semantic_model(&self, model_ref: &str) -> Result<SemanticModelDefinition> {
        self.semantic_models
            .get(model_ref)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown semantic model {model_ref}").into())
    }

    fn agg_time_dimension_for_measure(&self, measure_ref: &str) -> Result<AggTimeDimensionRef> {
        self.agg_time_dimensions
            .get(measure_ref)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no agg time dimension declared for measure {measure_ref}").into())
    }
}
