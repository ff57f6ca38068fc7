//! Compiles a dataflow plan (a DAG of semantic-layer operators) into a SQL
//! plan tree plus the instance set describing what each output column means.
//!
//! The core entry point is [`compile`]; everything else in this crate is a
//! collaborator trait the core depends on (resolver, manifest, time-spine
//! source, optimizer) or ambient infrastructure around it (config, errors).

pub mod alias;
pub mod column_association;
pub mod config;
pub mod dataflow_plan;
pub mod engine;
pub mod error;
pub mod instance;
pub mod instance_set;
pub mod joins;
pub mod manifest;
pub mod optimizer;
pub mod render;
pub mod specs;
pub mod sql_expr;
pub mod sql_plan;
pub mod time_spine;
pub mod transforms;
pub mod visitor;

pub use crate::alias::AliasGenerator;
pub use crate::column_association::{ColumnAssociation, ColumnAssociationResolver, DefaultColumnAssociationResolver};
pub use crate::config::CompilerConfig;
pub use crate::dataflow_plan::DataflowPlanNode;
pub use crate::engine::EngineKind;
pub use crate::error::{CompileError, Result};
pub use crate::instance_set::{InstanceSet, InstanceSetTransform, InstanceSpecSet};
pub use crate::manifest::{MetricDefinition, SemanticManifest, StaticManifest};
pub use crate::optimizer::{OptimizationLevel, OptimizerPass, OptimizerPipeline};
pub use crate::render::{Dialect, SqlRenderer};
pub use crate::sql_plan::SqlPlanNode;
pub use crate::time_spine::{SingleTableTimeSpineSource, TimeSpineSource};
pub use crate::visitor::{compile, Compiler};
