//! The optimizer collaborator interface. The compiler core hands its
//! finished tree to a sequence of `sql_node -> sql_node` passes selected by
//! an opaque level token; it must not depend on any specific pass existing
//! Implementing actual optimizer passes (constant folding,
//! column pruning, sub-SELECT flattening) is out of scope for this crate —
//! only the interface and a no-op default pipeline are provided.

use crate::sql_plan::SqlPlanNode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptimizationLevel {
    None,
    Standard,
    Aggressive,
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        OptimizationLevel::Standard
    }
}

/// One optimizer pass. Implementations live outside this crate; the core
/// only needs to be able to call them in sequence.
pub trait OptimizerPass {
    fn name(&self) -> &str;
    fn optimize(&self, plan: SqlPlanNode) -> SqlPlanNode;
}

/// Runs a sequence of passes selected for a given optimization level. The
/// default pipeline is empty: the core's contract is to emit a correct,
/// un-optimized plan, so an empty pipeline is a valid (if unoptimized)
/// collaborator.
#[derive(Default)]
pub struct OptimizerPipeline {
    passes: Vec<Box<dyn OptimizerPass>>,
}

impl OptimizerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pass(mut self, pass: Box<dyn OptimizerPass>) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn run(&self, plan: SqlPlanNode, _level: OptimizationLevel) -> SqlPlanNode {
        let mut plan = plan;
        for pass in &self.passes {
            tracing::debug!(pass = pass.name(), "applying optimizer pass");
            plan = pass.optimize(plan);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pipeline_returns_plan_unchanged() {
        let pipeline = OptimizerPipeline::new();
        let plan = SqlPlanNode::table("orders");
        let result = pipeline.run(plan.clone(), OptimizationLevel::Standard);
        assert_eq!(plan, result);
    }
}
