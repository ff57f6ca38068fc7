//! The plan walker: a single recursive function that compiles a
//! [`DataflowPlanNode`] tree into a `(SqlPlanNode, InstanceSet)` pair, leaves
//! first. One private `visit_*` method per dataflow variant; `compile` is
//! the only public entry point.

use std::collections::HashMap;

use crate::alias::AliasGenerator;
use crate::column_association::ColumnAssociationResolver;
use crate::dataflow_plan::{DataflowPlanNode, JoinOnEntitiesTarget};
use crate::engine::EngineKind;
use crate::error::{CompileError, Result};
use crate::instance::{
    DefinedFrom, GroupByMetricInstance, MeasureInstance, MetadataInstance, MetricInstance, TimeDimensionInstance,
};
use crate::instance_set::{InstanceSet, InstanceSetTransform, InstanceSpecSet};
use crate::joins::{self, AnnotatedDataset, CumulativeWindow, TimeSpineAlignment};
use crate::manifest::{MetricDefinition, SemanticManifest};
use crate::optimizer::{OptimizationLevel, OptimizerPipeline};
use crate::specs::{AggregationState, GroupByMetricSpec, MetadataSpec, Spec, METRIC_TIME_ELEMENT_NAME};
use crate::sql_expr::{AggregationType, SqlExpr, SqlWindowFunction, SqlWindowOrderBy};
use crate::sql_plan::{
    JoinDescription, OrderByDescription, SqlCreateTableAsNode, SqlJoinType, SqlPlanNode, SqlSelectColumn,
    SqlSelectStatementNode,
};
use crate::time_spine::TimeSpineSource;
use crate::transforms::{
    AddGroupByMetric, AddLinkToLinkables, AddMetadata, AddMetrics, AliasAggregatedMeasures, ChangeAssociatedColumns,
    ChangeMeasureAggregationState, ConvertToMetadata, CreateSelectColumnsForInstances, FilterElements,
    FilterLinkablesWithLeadingLink, RemoveMeasures, RemoveMetrics,
};

/// The currency the visitor passes between handlers: a SQL plan node paired
/// with the instance set describing what each of its columns means.
#[derive(Clone, Debug)]
pub struct SqlDataset {
    pub instance_set: InstanceSet,
    pub node: SqlPlanNode,
}

impl SqlDataset {
    fn select(&self) -> &SqlSelectStatementNode {
        self.node.as_select()
    }
}

/// Bundles the collaborators `compile` needs: the resolver, manifest lookup,
/// and time-spine source are process-long; the alias generator is scoped to
/// one compilation.
pub struct Compiler<'a> {
    resolver: &'a dyn ColumnAssociationResolver,
    manifest: &'a dyn SemanticManifest,
    time_spine_source: &'a dyn TimeSpineSource,
    aliases: AliasGenerator,
}

impl<'a> Compiler<'a> {
    pub fn new(
        resolver: &'a dyn ColumnAssociationResolver,
        manifest: &'a dyn SemanticManifest,
        time_spine_source: &'a dyn TimeSpineSource,
    ) -> Self {
        Self {
            resolver,
            manifest,
            time_spine_source,
            aliases: AliasGenerator::new(),
        }
    }

    fn next_alias(&mut self) -> String {
        self.aliases.next_unique_table_alias()
    }

    fn resolve(&self, spec: &Spec) -> String {
        self.resolver.resolve_spec(spec).column_name
    }

    fn change_columns(&self, set: InstanceSet) -> InstanceSet {
        set.transform(ChangeAssociatedColumns::new(self.resolver))
    }

    fn select_columns_for(&self, alias: &str, set: InstanceSet) -> Vec<SqlSelectColumn> {
        set.transform(CreateSelectColumnsForInstances::new(alias))
    }

    /// Top-level entry point: compiles `plan_root`, then hands the finished
    /// tree to the optimizer pipeline for `optimization_level`. `engine`
    /// only affects the `use_column_alias_in_group_by` hint the core emits
    /// (which callers can read off the returned SQL tree's GROUP BY shape);
    /// the core itself never special-cases any other engine behavior.
    #[tracing::instrument(
        skip(self, plan_root, optimizer),
        fields(
            engine = ?engine,
            optimization_level = ?optimization_level,
            root = %plan_root.description(),
        )
    )]
    pub fn compile(
        &mut self,
        engine: EngineKind,
        plan_root: &DataflowPlanNode,
        optimization_level: OptimizationLevel,
        optimizer: &OptimizerPipeline,
    ) -> Result<(InstanceSet, SqlPlanNode)> {
        tracing::debug!("starting dataflow plan compilation");
        let _ = engine.use_column_alias_in_group_by();
        let dataset = self.visit(plan_root)?;
        let optimized = optimizer.run(dataset.node, optimization_level);
        tracing::debug!("dataflow plan compilation finished");
        Ok((dataset.instance_set, optimized))
    }

    fn visit(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        match node {
            DataflowPlanNode::ReadSource {
                instance_set, sql_table, ..
            } => Ok(SqlDataset {
                instance_set: instance_set.clone(),
                node: SqlPlanNode::table(sql_table.clone()),
            }),
            DataflowPlanNode::JoinOverTimeRange { .. } => self.visit_join_over_time_range(node),
            DataflowPlanNode::JoinOnEntities { .. } => self.visit_join_on_entities(node),
            DataflowPlanNode::AggregateMeasures { .. } => self.visit_aggregate_measures(node),
            DataflowPlanNode::ComputeMetrics { .. } => self.visit_compute_metrics(node),
            DataflowPlanNode::OrderByLimit { .. } => self.visit_order_by_limit(node),
            DataflowPlanNode::FilterElements { .. } => self.visit_filter_elements(node),
            DataflowPlanNode::WhereConstraint { .. } => self.visit_where_constraint(node),
            DataflowPlanNode::CombineAggregatedOutputs { .. } => self.visit_combine_aggregated_outputs(node),
            DataflowPlanNode::ConstrainTimeRange { .. } => self.visit_constrain_time_range(node),
            DataflowPlanNode::MetricTimeDimensionTransform { .. } => self.visit_metric_time_dimension_transform(node),
            DataflowPlanNode::SemiAdditiveJoin { .. } => self.visit_semi_additive_join(node),
            DataflowPlanNode::JoinToTimeSpine { .. } => self.visit_join_to_time_spine(node),
            DataflowPlanNode::MinMax { .. } => self.visit_min_max(node),
            DataflowPlanNode::AddGeneratedUuidColumn { .. } => self.visit_add_generated_uuid_column(node),
            DataflowPlanNode::JoinConversionEvents { .. } => self.visit_join_conversion_events(node),
            DataflowPlanNode::WriteToResultDataTable { parent, .. } => self.visit(parent),
            DataflowPlanNode::WriteToResultTable { .. } => self.visit_write_to_result_table(node),
        }
    }

    #[tracing::instrument(skip(self, node), fields(description = %node.description()))]
    fn visit_join_over_time_range(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::JoinOverTimeRange {
            description,
            parent,
            time_dimension_spec_for_join,
            window_interval_sql,
            time_range_constraint,
        } = node
        else {
            unreachable!()
        };

        let input = self.visit(parent)?;
        let input_alias = self.next_alias();

        let agg_time_instance = input
            .instance_set
            .time_dimension_instances
            .iter()
            .find(|i| &i.spec == time_dimension_spec_for_join)
            .cloned()
            .ok_or_else(|| {
                CompileError::InvariantViolation(
                    "agg-time-dimension requested by join-over-time-range not found in parent instance set".into(),
                )
            })?;

        let spine_alias = self.next_alias();
        let spine = self.make_time_spine_dataset(&agg_time_instance, time_range_constraint.as_ref())?;

        let window = match window_interval_sql {
            Some(interval) => CumulativeWindow::FixedWindow {
                interval_sql: interval.clone(),
            },
            None => CumulativeWindow::GrainToDate,
        };
        let spine_time_col = spine.instance_set.time_dimension_instances[0].associated_column().column_name.clone();
        let base_time_col = agg_time_instance.associated_column().column_name.clone();

        let join_desc = joins::make_cumulative_time_range_join(
            AnnotatedDataset::new(input.node.clone(), input_alias.clone()),
            &spine_alias,
            &spine_time_col,
            &base_time_col,
            window,
        );

        let modified_input_set = input.instance_set.clone().transform(FilterElements::exclude(InstanceSpecSet {
            time_dimension_specs: vec![time_dimension_spec_for_join.clone()],
            ..InstanceSpecSet::default()
        }));

        let output_instance_set = self.change_columns(input.instance_set.clone());

        let mut select_columns = self.select_columns_for(&spine_alias, spine.instance_set.clone());
        select_columns.extend(self.select_columns_for(&input_alias, modified_input_set));

        Ok(SqlDataset {
            instance_set: output_instance_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                joins: vec![join_desc],
                ..SqlSelectStatementNode::new(description.clone(), select_columns, spine.node, spine_alias)
            }),
        })
    }

    fn make_time_spine_dataset(
        &mut self,
        agg_time_instance: &TimeDimensionInstance,
        time_range_constraint: Option<&crate::dataflow_plan::TimeRangeConstraint>,
    ) -> Result<SqlDataset> {
        let spine_desc = self.time_spine_source.spine_for_granularity(agg_time_instance.spec.time_granularity)?;
        let spine_table_alias = self.next_alias();
        let column_expr = SqlExpr::column(&spine_table_alias, spine_desc.time_column_name.clone());
        let column_alias = self.resolve(&Spec::TimeDimension(agg_time_instance.spec.clone()));

        let (select_expr, group_by) = if agg_time_instance.spec.time_granularity == spine_desc.base_granularity {
            (column_expr.clone(), false)
        } else {
            (
                SqlExpr::DateTrunc {
                    granularity: agg_time_instance.spec.time_granularity,
                    arg: Box::new(column_expr.clone()),
                },
                true,
            )
        };
        let select_column = SqlSelectColumn::new(select_expr, column_alias.clone());

        let where_clause = time_range_constraint.map(|range| SqlExpr::Between {
            expr: Box::new(SqlExpr::column(&spine_table_alias, spine_desc.time_column_name.clone())),
            start: Box::new(SqlExpr::string_literal(range.start_iso.clone())),
            end: Box::new(SqlExpr::string_literal(range.end_iso.clone())),
        });

        let mut select = SqlSelectStatementNode::new(
            "time spine",
            vec![select_column.clone()],
            SqlPlanNode::table(spine_desc.table_name.clone()),
            spine_table_alias,
        );
        select.where_clause = where_clause;
        if group_by {
            select.group_by = vec![select_column];
        }

        let spine_instance = TimeDimensionInstance {
            spec: agg_time_instance.spec.clone(),
            associated_columns: vec![self.resolver.resolve_time_dimension(&agg_time_instance.spec)],
            defined_from: DefinedFrom::default(),
        };

        Ok(SqlDataset {
            instance_set: InstanceSet {
                time_dimension_instances: vec![spine_instance],
                ..InstanceSet::default()
            },
            node: SqlPlanNode::Select(select),
        })
    }

    fn visit_join_on_entities(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::JoinOnEntities {
            description,
            left,
            join_targets,
        } = node
        else {
            unreachable!()
        };

        let from_dataset = self.visit(left)?;
        let from_alias = self.next_alias();

        let mut join_descs: Vec<JoinDescription> = Vec::new();
        let mut joined_sets: Vec<(String, InstanceSet)> = Vec::new();

        for target in join_targets {
            let JoinOnEntitiesTarget {
                join_node,
                join_on_entity,
                join_type,
            } = target;
            let right_dataset = self.visit(join_node)?;
            let right_alias = self.next_alias();

            let (left_col, right_col) = match join_on_entity {
                Some(entity) => (
                    self.entity_column(&from_dataset.instance_set, entity),
                    self.entity_column(&right_dataset.instance_set, entity),
                ),
                None => (String::new(), String::new()),
            };

            let join_desc = joins::make_base_output_join(
                AnnotatedDataset::new(right_dataset.node.clone(), right_alias.clone()),
                &from_alias,
                &right_col,
                &left_col,
                *join_type,
            );
            join_descs.push(join_desc);

            let right_set = if let Some(entity) = join_on_entity {
                right_dataset
                    .instance_set
                    .clone()
                    .transform(FilterLinkablesWithLeadingLink {
                        entity_link: entity.clone(),
                    })
                    .transform(AddLinkToLinkables { entity: entity.clone() })
            } else {
                right_dataset.instance_set.clone()
            };
            joined_sets.push((right_alias, right_set));
        }

        let from_output_set = from_dataset
            .instance_set
            .clone()
            .transform(ChangeMeasureAggregationState::new([
                (AggregationState::Complete, AggregationState::Partial),
                (AggregationState::Partial, AggregationState::Partial),
                (AggregationState::NonAggregated, AggregationState::NonAggregated),
            ]))?;

        let mut select_columns = self.select_columns_for(&from_alias, from_output_set.clone());
        for (alias, set) in &joined_sets {
            select_columns.extend(self.select_columns_for(alias, set.clone()));
        }

        let mut merged = vec![from_output_set];
        merged.extend(joined_sets.into_iter().map(|(_, s)| s));
        let output_instance_set = InstanceSet::merge(merged);

        Ok(SqlDataset {
            instance_set: output_instance_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                joins: join_descs,
                ..SqlSelectStatementNode::new(description.clone(), select_columns, from_dataset.node, from_alias)
            }),
        })
    }

    fn entity_column(&self, set: &InstanceSet, entity: &str) -> String {
        set.entity_instances
            .iter()
            .find(|i| i.spec.element_name == entity && i.spec.entity_links.is_empty())
            .map(|i| i.associated_column().column_name.clone())
            .unwrap_or_else(|| entity.to_string())
    }

    fn visit_aggregate_measures(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::AggregateMeasures {
            description,
            parent,
            measure_aggregations,
        } = node
        else {
            unreachable!()
        };

        let from_dataset = self.visit(parent)?;
        let from_alias = self.next_alias();

        let mut aggregated = from_dataset.instance_set.clone().transform(ChangeMeasureAggregationState::new([
            (AggregationState::NonAggregated, AggregationState::Complete),
            (AggregationState::Partial, AggregationState::Complete),
            (AggregationState::Complete, AggregationState::Complete),
        ]))?;

        // Paired by position, not by `element_name`: two instances of the same
        // measure (e.g. one constrained, one not) can carry independent
        // aliases, and a name lookup would collapse both onto whichever
        // entry `measure_aggregations` lists first.
        for (measure, agg) in aggregated.measure_instances.iter_mut().zip(measure_aggregations.iter()) {
            measure.fill_nulls_with = agg.fill_nulls_with;
            measure.spec.alias = agg.measure_spec.alias.clone();
        }
        aggregated = self.change_columns(aggregated);

        let has_alias = measure_aggregations.iter().any(|a| a.measure_spec.alias.is_some());
        if has_alias {
            let specs: Vec<_> = measure_aggregations.iter().map(|a| a.measure_spec.clone()).collect();
            aggregated = aggregated.transform(AliasAggregatedMeasures {
                metric_input_measure_specs: &specs,
            });
            aggregated = self.change_columns(aggregated);
        }

        let non_measure_columns = {
            let mut set = aggregated.clone();
            set.measure_instances.clear();
            self.select_columns_for(&from_alias, set)
        };

        let measure_columns: Vec<SqlSelectColumn> = aggregated
            .measure_instances
            .iter()
            .zip(measure_aggregations.iter())
            .map(|(instance, agg)| {
                let expr = SqlExpr::Aggregate {
                    function: agg.agg.clone(),
                    arg: Box::new(SqlExpr::column(&from_alias, agg.measure_spec.element_name.clone())),
                };
                let expr = if let Some(fill) = instance.fill_nulls_with {
                    SqlExpr::Function {
                        name: "coalesce".to_string(),
                        args: vec![expr, SqlExpr::Literal(serde_json::json!(fill))],
                    }
                } else {
                    expr
                };
                SqlSelectColumn::new(expr, instance.associated_column().column_name.clone())
            })
            .collect();

        let mut select_columns = non_measure_columns.clone();
        select_columns.extend(measure_columns);

        Ok(SqlDataset {
            instance_set: aggregated,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                group_by: non_measure_columns,
                ..SqlSelectStatementNode::new(description.clone(), select_columns, from_dataset.node, from_alias)
            }),
        })
    }

    fn visit_compute_metrics(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::ComputeMetrics {
            description,
            parent,
            metric_specs,
            for_group_by_source_node,
        } = node
        else {
            unreachable!()
        };

        let from_dataset = self.visit(parent)?;
        let from_alias = self.next_alias();

        let mut output_set = from_dataset.instance_set.clone().transform(RemoveMeasures);
        output_set = self.change_columns(output_set);
        output_set = output_set.transform(RemoveMetrics);

        if *for_group_by_source_node && (metric_specs.len() != 1 || output_set.entity_instances.len() != 1) {
            return Err(CompileError::MalformedPlan(
                "group-by-metric compute-metrics requires exactly 1 metric and 1 entity".into(),
            ));
        }

        let non_metric_columns = self.select_columns_for(&from_alias, output_set.clone());

        let mut metric_columns = Vec::new();
        let mut metric_instances = Vec::new();
        let mut group_by_metric_instance = None;

        for metric_spec in metric_specs {
            let definition = self.manifest.get_metric(&metric_spec.element_name)?;
            let expr = self.metric_expression(&definition, &from_alias)?;

            let column_alias = if *for_group_by_source_node {
                let entity_spec = output_set.entity_instances[0].spec.clone();
                let group_by_spec = GroupByMetricSpec {
                    element_name: metric_spec.element_name.clone(),
                    entity_links: entity_spec.entity_links.clone(),
                };
                let association = self.resolver.resolve_group_by_metric(&group_by_spec);
                group_by_metric_instance = Some(GroupByMetricInstance {
                    spec: group_by_spec,
                    associated_columns: vec![association.clone()],
                    defined_from: DefinedFrom {
                        metric: Some(metric_spec.element_name.clone()),
                        ..DefinedFrom::default()
                    },
                });
                association.column_name
            } else {
                let association = self.resolver.resolve_metric(metric_spec);
                metric_instances.push(MetricInstance {
                    spec: metric_spec.clone(),
                    associated_columns: vec![association.clone()],
                    defined_from: DefinedFrom {
                        metric: Some(metric_spec.element_name.clone()),
                        ..DefinedFrom::default()
                    },
                });
                association.column_name
            };
            metric_columns.push(SqlSelectColumn::new(expr, column_alias));
        }

        output_set = if let Some(gbm) = group_by_metric_instance {
            output_set.transform(AddGroupByMetric { instance: gbm })
        } else {
            output_set.transform(AddMetrics {
                metric_instances,
            })
        };

        let mut select_columns = non_metric_columns;
        select_columns.extend(metric_columns);

        Ok(SqlDataset {
            instance_set: output_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode::new(
                description.clone(),
                select_columns,
                from_dataset.node,
                from_alias,
            )),
        })
    }

    fn metric_expression(&self, definition: &MetricDefinition, alias: &str) -> Result<SqlExpr> {
        match definition {
            MetricDefinition::Simple { measure, fill_nulls_with } | MetricDefinition::Cumulative { measure, fill_nulls_with } => {
                let column = self.resolver.resolve_measure(measure).column_name;
                let expr = SqlExpr::column(alias, column);
                Ok(match fill_nulls_with {
                    Some(fill) => SqlExpr::Function {
                        name: "coalesce".to_string(),
                        args: vec![expr, SqlExpr::Literal(serde_json::json!(fill))],
                    },
                    None => expr,
                })
            }
            MetricDefinition::Ratio {
                numerator_measure,
                denominator_measure,
            } => Ok(SqlExpr::RatioComputation {
                numerator: Box::new(SqlExpr::column(alias, self.resolver.resolve_measure(numerator_measure).column_name)),
                denominator: Box::new(SqlExpr::column(
                    alias,
                    self.resolver.resolve_measure(denominator_measure).column_name,
                )),
            }),
            MetricDefinition::Derived { sql, referenced_columns } => Ok(SqlExpr::RawSql {
                sql: sql.clone(),
                referenced_columns: referenced_columns.clone(),
            }),
            MetricDefinition::Conversion {
                kind,
                conversion_measure,
                base_measure,
            } => {
                let conversion_col = SqlExpr::column(alias, self.resolver.resolve_measure(conversion_measure).column_name);
                match kind {
                    crate::manifest::ConversionMetricKind::Conversions => Ok(conversion_col),
                    crate::manifest::ConversionMetricKind::ConversionRate => {
                        let base = base_measure.as_ref().ok_or_else(|| {
                            CompileError::InvariantViolation("conversion rate metric missing base measure".into())
                        })?;
                        Ok(SqlExpr::RatioComputation {
                            numerator: Box::new(conversion_col),
                            denominator: Box::new(SqlExpr::column(alias, self.resolver.resolve_measure(base).column_name)),
                        })
                    }
                }
            }
        }
    }

    fn visit_order_by_limit(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::OrderByLimit {
            description,
            parent,
            order_by_specs,
            limit,
        } = node
        else {
            unreachable!()
        };
        let from_dataset = self.visit(parent)?;
        let from_alias = self.next_alias();
        let output_set = self.change_columns(from_dataset.instance_set.clone());

        let order_by = order_by_specs
            .iter()
            .map(|spec| OrderByDescription {
                expr: SqlExpr::column(&from_alias, self.resolve(&spec.instance_spec)),
                descending: spec.descending,
            })
            .collect();

        let select_columns = self.select_columns_for(&from_alias, output_set.clone());
        Ok(SqlDataset {
            instance_set: output_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                order_by,
                limit: *limit,
                ..SqlSelectStatementNode::new(description.clone(), select_columns, from_dataset.node, from_alias)
            }),
        })
    }

    fn visit_filter_elements(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::FilterElements {
            description,
            parent,
            include_specs,
            distinct,
        } = node
        else {
            unreachable!()
        };
        let from_dataset = self.visit(parent)?;
        let from_alias = self.next_alias();

        let mut output_set = from_dataset
            .instance_set
            .clone()
            .transform(FilterElements::include(include_specs.clone()));
        output_set = self.change_columns(output_set);

        let select_columns = self.select_columns_for(&from_alias, output_set.clone());
        let group_by = if *distinct { select_columns.clone() } else { Vec::new() };

        Ok(SqlDataset {
            instance_set: output_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                group_by,
                ..SqlSelectStatementNode::new(description.clone(), select_columns, from_dataset.node, from_alias)
            }),
        })
    }

    fn visit_where_constraint(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::WhereConstraint { description, parent, filter } = node else {
            unreachable!()
        };
        let from_dataset = self.visit(parent)?;
        let from_alias = self.next_alias();
        let output_set = self.change_columns(from_dataset.instance_set.clone());
        let select_columns = self.select_columns_for(&from_alias, output_set.clone());

        let referenced_columns: Vec<String> = filter.linkable_specs.iter().map(|s| self.resolve(s)).collect();

        Ok(SqlDataset {
            instance_set: output_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                where_clause: Some(SqlExpr::RawSql {
                    sql: filter.where_sql.clone(),
                    referenced_columns,
                }),
                ..SqlSelectStatementNode::new(description.clone(), select_columns, from_dataset.node, from_alias)
            }),
        })
    }

    #[tracing::instrument(skip(self, node), fields(description = %node.description()))]
    fn visit_combine_aggregated_outputs(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::CombineAggregatedOutputs { description, parents } = node else {
            unreachable!()
        };
        if parents.len() < 2 {
            return Err(CompileError::MalformedPlan(
                "combine-aggregated-outputs requires at least 2 parents".into(),
            ));
        }

        let mut datasets = Vec::new();
        for parent in parents {
            let dataset = self.visit(parent)?;
            if dataset
                .instance_set
                .measure_instances
                .iter()
                .any(|m| m.aggregation_state != AggregationState::Complete)
            {
                return Err(CompileError::MalformedPlan(
                    "combine-aggregated-outputs parent has a measure that is not fully aggregated".into(),
                ));
            }
            let alias = self.next_alias();
            datasets.push((alias, dataset));
        }

        let first_linkables = datasets[0].1.instance_set.linkable_spec_set();
        for (_, dataset) in &datasets[1..] {
            if !dataset.instance_set.linkable_spec_set().is_set_equal(&first_linkables) {
                return Err(CompileError::MalformedPlan(
                    "combine-aggregated-outputs parents must share identical linkable-spec sets".into(),
                ));
            }
        }

        let shared_columns: Vec<String> = {
            let mut cols = Vec::new();
            cols.extend(first_linkables.dimension_specs.iter().map(|s| self.resolve(&Spec::Dimension(s.clone()))));
            cols.extend(
                first_linkables
                    .time_dimension_specs
                    .iter()
                    .map(|s| self.resolve(&Spec::TimeDimension(s.clone()))),
            );
            cols.extend(first_linkables.entity_specs.iter().map(|s| self.resolve(&Spec::Entity(s.clone()))));
            cols
        };

        let join_type = if shared_columns.is_empty() { SqlJoinType::Cross } else { SqlJoinType::Full };

        let mut joins = Vec::new();
        let mut prior_aliases = vec![datasets[0].0.clone()];
        for (alias, dataset) in &datasets[1..] {
            let join = joins::make_combine_datasets_join(
                AnnotatedDataset::new(dataset.node.clone(), alias.clone()),
                &prior_aliases,
                &shared_columns,
            );
            joins.push(JoinDescription { join_type, ..join });
            prior_aliases.push(alias.clone());
        }

        let output_instance_set = self.change_columns(InstanceSet::merge(datasets.iter().map(|(_, d)| d.instance_set.clone())));

        let coalesced_columns: Vec<SqlSelectColumn> = shared_columns
            .iter()
            .map(|col| {
                let coalesce_args = prior_aliases.iter().map(|a| SqlExpr::column(a, col.clone())).collect();
                SqlSelectColumn::new(SqlExpr::Function { name: "coalesce".to_string(), args: coalesce_args }, col.clone())
            })
            .collect();

        let mut select_columns = coalesced_columns.clone();
        for (alias, dataset) in &datasets {
            let mut non_linkable = dataset.instance_set.clone();
            non_linkable.dimension_instances.clear();
            non_linkable.time_dimension_instances.clear();
            non_linkable.entity_instances.clear();
            select_columns.extend(self.select_columns_for(alias, non_linkable));
        }

        let (from_alias, from_dataset) = datasets.remove(0);
        Ok(SqlDataset {
            instance_set: output_instance_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                joins,
                group_by: coalesced_columns,
                ..SqlSelectStatementNode::new(description.clone(), select_columns, from_dataset.node, from_alias)
            }),
        })
    }

    fn visit_constrain_time_range(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::ConstrainTimeRange {
            description,
            parent,
            time_range_constraint,
        } = node
        else {
            unreachable!()
        };
        let from_dataset = self.visit(parent)?;
        let from_alias = self.next_alias();

        let mut candidates: Vec<_> = from_dataset
            .instance_set
            .time_dimension_instances
            .iter()
            .filter(|i| i.spec.element_name == METRIC_TIME_ELEMENT_NAME)
            .collect();
        candidates.sort_by_key(|i| i.spec.time_granularity.to_int());
        let finest = candidates.first().ok_or_else(|| {
            CompileError::InvariantViolation("no metric-time dimension found in parent data set".into())
        })?;
        let column = finest.associated_column().column_name.clone();

        let output_set = self.change_columns(from_dataset.instance_set.clone());
        let select_columns = self.select_columns_for(&from_alias, output_set.clone());

        let where_clause = SqlExpr::Between {
            expr: Box::new(SqlExpr::column(&from_alias, column)),
            start: Box::new(SqlExpr::string_literal(time_range_constraint.start_iso.clone())),
            end: Box::new(SqlExpr::string_literal(time_range_constraint.end_iso.clone())),
        };

        Ok(SqlDataset {
            instance_set: output_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                where_clause: Some(where_clause),
                ..SqlSelectStatementNode::new(description.clone(), select_columns, from_dataset.node, from_alias)
            }),
        })
    }

    fn visit_metric_time_dimension_transform(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::MetricTimeDimensionTransform {
            description,
            parent,
            aggregation_time_dimension_element_name,
        } = node
        else {
            unreachable!()
        };
        let input = self.visit(parent)?;
        let from_alias = self.next_alias();

        let output_measures: Vec<MeasureInstance> = input
            .instance_set
            .measure_instances
            .iter()
            .filter(|m| {
                self.manifest
                    .agg_time_dimension_for_measure(&m.spec.element_name)
                    .map(|agg| agg.element_name == *aggregation_time_dimension_element_name)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let matching_time_dims: Vec<_> = input
            .instance_set
            .time_dimension_instances
            .iter()
            .filter(|t| t.spec.entity_links.is_empty() && t.spec.element_name == *aggregation_time_dimension_element_name)
            .cloned()
            .collect();

        let mut mirrored = Vec::new();
        let mut output_to_input = HashMap::new();
        for matching in &matching_time_dims {
            let mut metric_time_spec = matching.spec.clone();
            metric_time_spec.element_name = METRIC_TIME_ELEMENT_NAME.to_string();
            let association = self.resolver.resolve_time_dimension(&metric_time_spec);
            output_to_input.insert(association.column_name.clone(), matching.associated_column().column_name.clone());
            mirrored.push(TimeDimensionInstance {
                spec: metric_time_spec,
                associated_columns: vec![association],
                defined_from: matching.defined_from.clone(),
            });
        }

        let mut output_set = InstanceSet {
            measure_instances: output_measures,
            dimension_instances: input.instance_set.dimension_instances.clone(),
            time_dimension_instances: {
                let mut dims = input.instance_set.time_dimension_instances.clone();
                dims.extend(mirrored);
                dims
            },
            entity_instances: input.instance_set.entity_instances.clone(),
            metric_instances: input.instance_set.metric_instances.clone(),
            group_by_metric_instances: input.instance_set.group_by_metric_instances.clone(),
            metadata_instances: input.instance_set.metadata_instances.clone(),
        };
        output_set = self.change_columns(output_set);

        let select_columns = output_set
            .clone()
            .transform(CreateSelectColumnsForInstances {
                table_alias: &from_alias,
                output_to_input_column: Some(&output_to_input),
            });

        Ok(SqlDataset {
            instance_set: output_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode::new(
                description.clone(),
                select_columns,
                input.node,
                from_alias,
            )),
        })
    }

    fn visit_semi_additive_join(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::SemiAdditiveJoin {
            description,
            parent,
            time_dimension_spec,
            agg_by_function,
            entity_specs,
            queried_time_dimension_spec,
        } = node
        else {
            unreachable!()
        };
        let from_dataset = self.visit(parent)?;
        let from_alias = self.next_alias();
        let output_set = self.change_columns(from_dataset.instance_set.clone());

        let inner_alias = self.next_alias();
        let time_dim_column = self.resolve(&Spec::TimeDimension(time_dimension_spec.clone()));
        let pin_column = format!("{time_dim_column}__pin");

        let mut inner_group_by = Vec::new();
        let mut column_pairs = Vec::new();
        for entity_spec in entity_specs {
            let col = self.resolve(&Spec::Entity(entity_spec.clone()));
            inner_group_by.push(SqlSelectColumn::new(SqlExpr::column(&inner_alias, col.clone()), col.clone()));
            column_pairs.push((col.clone(), col));
        }
        if let Some(queried) = queried_time_dimension_spec {
            let col = self.resolve(&Spec::TimeDimension(queried.clone()));
            inner_group_by.push(SqlSelectColumn::new(SqlExpr::column(&inner_alias, col.clone()), col.clone()));
        }
        column_pairs.push((time_dim_column.clone(), pin_column.clone()));

        let pin_expr = SqlExpr::Aggregate {
            function: agg_by_function.clone(),
            arg: Box::new(SqlExpr::column(&inner_alias, time_dim_column)),
        };
        let mut inner_select_columns = inner_group_by.clone();
        inner_select_columns.push(SqlSelectColumn::new(pin_expr, pin_column));

        let inner_select = SqlSelectStatementNode {
            group_by: inner_group_by,
            ..SqlSelectStatementNode::new(
                format!("pin row via {:?}", agg_by_function),
                inner_select_columns,
                from_dataset.node.clone(),
                inner_alias.clone(),
            )
        };

        let join_alias = self.next_alias();
        let join_desc = joins::make_column_equality_join(
            AnnotatedDataset::new(SqlPlanNode::Select(inner_select), join_alias),
            &from_alias,
            &column_pairs,
            SqlJoinType::Inner,
        );

        let select_columns = self.select_columns_for(&from_alias, output_set.clone());
        Ok(SqlDataset {
            instance_set: output_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                joins: vec![join_desc],
                ..SqlSelectStatementNode::new(description.clone(), select_columns, from_dataset.node, from_alias)
            }),
        })
    }

    #[tracing::instrument(skip(self, node), fields(description = %node.description()))]
    fn visit_join_to_time_spine(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::JoinToTimeSpine {
            description,
            parent,
            requested_agg_time_dimension_specs,
            join_type,
            time_range_constraint,
            offset_to_grain,
        } = node
        else {
            unreachable!()
        };
        let parent_dataset = self.visit(parent)?;
        let parent_alias = self.next_alias();

        let (agg_element_name, agg_entity_links) = match requested_agg_time_dimension_specs.first() {
            Some(spec) => (spec.element_name.clone(), spec.entity_links.clone()),
            None => (METRIC_TIME_ELEMENT_NAME.to_string(), crate::specs::EntityLinks::empty()),
        };

        let mut candidates: Vec<_> = parent_dataset
            .instance_set
            .time_dimension_instances
            .iter()
            .filter(|i| i.spec.date_part.is_none() && i.spec.element_name == agg_element_name && i.spec.entity_links == agg_entity_links)
            .cloned()
            .collect();
        candidates.sort_by_key(|i| i.spec.time_granularity.to_int());
        let base_instance = candidates.first().ok_or_else(|| {
            CompileError::InvariantViolation("requested agg-time-dimension not found in parent data set for join-to-time-spine".into())
        })?;

        let time_spine_alias = self.next_alias();
        let spine = self.make_time_spine_dataset(base_instance, time_range_constraint.as_ref())?;
        let spine_column = spine.instance_set.time_dimension_instances[0].associated_column().column_name.clone();
        let base_column = base_instance.associated_column().column_name.clone();

        let join_desc = joins::make_join_to_time_spine_join(
            AnnotatedDataset::new(parent_dataset.node.clone(), parent_alias.clone()),
            &time_spine_alias,
            &spine_column,
            &base_column,
            TimeSpineAlignment::Equal,
            *join_type,
        );

        let mut parent_set_without_agg = parent_dataset.instance_set.clone();
        parent_set_without_agg
            .time_dimension_instances
            .retain(|i| !(i.spec.element_name == agg_element_name && i.spec.entity_links == agg_entity_links));

        let mut parent_select_columns = self.select_columns_for(&parent_alias, parent_set_without_agg.clone());

        let mut spine_columns = Vec::new();
        let mut spine_instances = Vec::new();
        let mut where_filter: Option<SqlExpr> = None;
        let need_where_filter = *offset_to_grain
            && !requested_agg_time_dimension_specs.iter().any(|s| s == &base_instance.spec);

        let time_dims_from_spine: Vec<_> = parent_dataset
            .instance_set
            .time_dimension_instances
            .iter()
            .filter(|i| i.spec.element_name == agg_element_name && i.spec.entity_links == agg_entity_links)
            .cloned()
            .collect();

        for time_dim in &time_dims_from_spine {
            let base_expr = SqlExpr::column(&time_spine_alias, spine_column.clone());
            let truncated = if time_dim.spec.time_granularity == base_instance.spec.time_granularity {
                base_expr.clone()
            } else {
                SqlExpr::DateTrunc {
                    granularity: time_dim.spec.time_granularity,
                    arg: Box::new(base_expr.clone()),
                }
            };
            if need_where_filter && requested_agg_time_dimension_specs.contains(&time_dim.spec) {
                let condition = SqlExpr::eq(truncated.clone(), base_expr.clone());
                where_filter = Some(match where_filter {
                    Some(existing) => SqlExpr::or(vec![existing, condition]),
                    None => condition,
                });
            }
            let select_expr = match time_dim.spec.date_part {
                Some(part) => SqlExpr::Extract { date_part: part, arg: Box::new(truncated) },
                None => truncated,
            };
            let mut new_spec = time_dim.spec.clone();
            new_spec.element_name = base_instance.spec.element_name.clone();
            new_spec.entity_links = base_instance.spec.entity_links.clone();
            let association = self.resolver.resolve_time_dimension(&new_spec);
            spine_columns.push(SqlSelectColumn::new(select_expr, association.column_name.clone()));
            spine_instances.push(TimeDimensionInstance {
                spec: new_spec,
                associated_columns: vec![association],
                defined_from: time_dim.defined_from.clone(),
            });
        }

        let mut select_columns = spine_columns;
        select_columns.append(&mut parent_select_columns);

        let output_instance_set = InstanceSet::merge([
            InstanceSet {
                time_dimension_instances: spine_instances,
                ..InstanceSet::default()
            },
            parent_set_without_agg,
        ]);

        Ok(SqlDataset {
            instance_set: output_instance_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode {
                joins: vec![join_desc],
                where_clause: where_filter,
                ..SqlSelectStatementNode::new(description.clone(), select_columns, spine.node, time_spine_alias)
            }),
        })
    }

    fn visit_min_max(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::MinMax { description, parent } = node else {
            unreachable!()
        };
        let parent_dataset = self.visit(parent)?;
        let parent_alias = self.next_alias();
        if parent_dataset.select().select_columns.len() != 1 {
            return Err(CompileError::InvariantViolation(
                "min-max requires exactly one parent select column".into(),
            ));
        }
        let parent_column = parent_dataset.select().select_columns[0].column_alias.clone();

        let mut select_columns = Vec::new();
        let mut metadata_instances = Vec::new();
        for (agg, suffix) in [(AggregationType::Min, "min"), (AggregationType::Max, "max")] {
            let metadata_spec = MetadataSpec::from_name_and_agg(&parent_column, suffix);
            let association = self.resolver.resolve_metadata(&metadata_spec);
            select_columns.push(SqlSelectColumn::new(
                SqlExpr::Aggregate {
                    function: agg,
                    arg: Box::new(SqlExpr::column(&parent_alias, parent_column.clone())),
                },
                association.column_name.clone(),
            ));
            metadata_instances.push(MetadataInstance {
                spec: metadata_spec,
                associated_columns: vec![association],
            });
        }

        Ok(SqlDataset {
            instance_set: parent_dataset.instance_set.clone().transform(ConvertToMetadata { metadata_instances }),
            node: SqlPlanNode::Select(SqlSelectStatementNode::new(
                description.clone(),
                select_columns,
                parent_dataset.node,
                parent_alias,
            )),
        })
    }

    fn visit_add_generated_uuid_column(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::AddGeneratedUuidColumn { description: _, parent } = node else {
            unreachable!()
        };
        let input = self.visit(parent)?;
        let input_alias = self.next_alias();

        let metadata_spec = MetadataSpec::new(crate::specs::GENERATED_UUID_METADATA_NAME);
        let association = self.resolver.resolve_metadata(&metadata_spec);
        let output_set = input.instance_set.clone().transform(AddMetadata {
            metadata_instances: vec![MetadataInstance {
                spec: metadata_spec,
                associated_columns: vec![association.clone()],
            }],
        });

        let mut select_columns = self.select_columns_for(&input_alias, input.instance_set.clone());
        select_columns.push(SqlSelectColumn::new(SqlExpr::GenerateUuid, association.column_name));

        Ok(SqlDataset {
            instance_set: output_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode::new(
                "add column with generated UUID",
                select_columns,
                input.node,
                input_alias,
            )),
        })
    }

    #[tracing::instrument(skip(self, node), fields(description = %node.description()))]
    fn visit_join_conversion_events(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::JoinConversionEvents {
            description,
            base,
            conversion,
            entity_spec,
            base_time_dimension_spec,
            conversion_time_dimension_spec,
            window_interval_sql,
            constant_properties,
            unique_identifier_keys,
            conversion_measure_spec,
        } = node
        else {
            unreachable!()
        };

        let base_dataset = self.visit(base)?;
        let base_alias = self.next_alias();
        let conversion_dataset = self.visit(conversion)?;
        let conversion_alias = self.next_alias();

        let base_time_col = self.resolve(&Spec::TimeDimension(base_time_dimension_spec.clone()));
        let conversion_time_col = self.resolve(&Spec::TimeDimension(conversion_time_dimension_spec.clone()));
        let entity_col = self.resolve(&Spec::Entity(entity_spec.clone()));

        let constant_pairs: Vec<(String, String)> = constant_properties
            .iter()
            .map(|p| (self.resolve(&p.base_spec), self.resolve(&p.conversion_spec)))
            .collect();

        let join_desc = joins::make_join_conversion_join(
            AnnotatedDataset::new(conversion_dataset.node.clone(), conversion_alias.clone()),
            &base_alias,
            &entity_col,
            &base_time_col,
            &entity_col,
            &conversion_time_col,
            window_interval_sql.clone(),
            &constant_pairs,
        );

        let base_columns = self.select_columns_for(&base_alias, base_dataset.instance_set.clone());
        let partition_columns: Vec<SqlExpr> = {
            let mut cols = vec![
                SqlExpr::column(&conversion_alias, entity_col.clone()),
                SqlExpr::column(&conversion_alias, conversion_time_col.clone()),
            ];
            cols.extend(unique_identifier_keys.iter().map(|spec| SqlExpr::column(&conversion_alias, self.resolve(spec))));
            cols.extend(
                constant_pairs
                    .iter()
                    .map(|(_, conversion_col)| SqlExpr::column(&conversion_alias, conversion_col.clone())),
            );
            cols
        };

        let base_window_columns: Vec<SqlSelectColumn> = base_columns
            .iter()
            .map(|col| {
                SqlSelectColumn::new(
                    SqlExpr::WindowFunction {
                        function: SqlWindowFunction::FirstValue,
                        args: vec![SqlExpr::column(&base_alias, col.column_alias.clone())],
                        partition_by: partition_columns.clone(),
                        order_by: vec![SqlWindowOrderBy {
                            expr: SqlExpr::column(&base_alias, base_time_col.clone()),
                            descending: true,
                        }],
                    },
                    col.column_alias.clone(),
                )
            })
            .collect();

        let conversion_output_set = conversion_dataset.instance_set.clone().transform(FilterElements::include(InstanceSpecSet {
            measure_specs: vec![conversion_measure_spec.clone()],
            ..InstanceSpecSet::default()
        }));
        let unique_key_columns: Vec<SqlSelectColumn> = unique_identifier_keys
            .iter()
            .map(|spec| {
                let col = self.resolve(spec);
                SqlSelectColumn::new(SqlExpr::column(&conversion_alias, col.clone()), col)
            })
            .collect();
        let conversion_columns = self.select_columns_for(&conversion_alias, conversion_output_set.clone());

        let mut dedup_select_columns = base_window_columns;
        dedup_select_columns.extend(unique_key_columns);
        dedup_select_columns.extend(conversion_columns);

        let deduped_node = SqlPlanNode::Select(SqlSelectStatementNode {
            joins: vec![join_desc],
            distinct: true,
            ..SqlSelectStatementNode::new(
                format!(
                    "dedupe conversion fanout on {}",
                    unique_identifier_keys.iter().map(|s| self.resolve(s)).collect::<Vec<_>>().join(", ")
                ),
                dedup_select_columns,
                base_dataset.node,
                base_alias,
            )
        });

        let output_alias = self.next_alias();
        let output_instance_set = self.change_columns(InstanceSet::merge([
            conversion_output_set,
            base_dataset.instance_set.clone(),
        ]));
        let select_columns = self.select_columns_for(&output_alias, output_instance_set.clone());

        Ok(SqlDataset {
            instance_set: output_instance_set,
            node: SqlPlanNode::Select(SqlSelectStatementNode::new(
                description.clone(),
                select_columns,
                deduped_node,
                output_alias,
            )),
        })
    }

    fn visit_write_to_result_table(&mut self, node: &DataflowPlanNode) -> Result<SqlDataset> {
        let DataflowPlanNode::WriteToResultTable {
            parent, output_sql_table, ..
        } = node
        else {
            unreachable!()
        };
        let input = self.visit(parent)?;
        let select = match input.node {
            SqlPlanNode::Select(select) => select,
            other => {
                return Err(CompileError::InvariantViolation(format!(
                    "write-to-result-table requires a SELECT as its parent, got {other:?}"
                )))
            }
        };
        Ok(SqlDataset {
            instance_set: input.instance_set,
            node: SqlPlanNode::CreateTableAs(SqlCreateTableAsNode {
                table_name: output_sql_table.clone(),
                select: Box::new(select),
            }),
        })
    }
}

/// Convenience wrapper matching the documented external entry point.
pub fn compile(
    resolver: &dyn ColumnAssociationResolver,
    manifest: &dyn SemanticManifest,
    time_spine_source: &dyn TimeSpineSource,
    optimizer: &OptimizerPipeline,
    engine: EngineKind,
    plan_root: &DataflowPlanNode,
    optimization_level: OptimizationLevel,
) -> Result<(InstanceSet, SqlPlanNode)> {
    let mut compiler = Compiler::new(resolver, manifest, time_spine_source);
    compiler.compile(engine, plan_root, optimization_level, optimizer)
}
