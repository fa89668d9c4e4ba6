//! Query Planner
//!
//! Entry point bundling estimation, validation, optimization, splitting and
//! batching behind one validated [`PlannerConfig`].

use tracing::debug;

use crate::config::PlannerConfig;
use crate::error::{ResilienceError, Result};
use crate::query::batch::{self, BatchEntry, BatchOptions, BatchRequest};
use crate::query::complexity::{self, QueryComplexity};
use crate::query::optimize::{self, OptimizeOptions};
use crate::query::split::{self, QueryVariant};

#[derive(Debug, Clone)]
pub struct QueryPlanner {
    config: PlannerConfig,
}

impl QueryPlanner {
    /// # Errors
    /// Returns `Configuration` when any budget is zero.
    pub fn new(config: PlannerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Estimates point cost and node count. Never fails.
    pub fn estimate_complexity(&self, query: &str) -> QueryComplexity {
        complexity::estimate(query, self.config.default_page_size)
    }

    /// Estimates the query and rejects it when over either ceiling.
    ///
    /// # Errors
    /// `QueryTooExpensive` when points exceed `max_points` or nodes exceed
    /// `max_nodes`.
    pub fn validate_point_limit(&self, query: &str) -> Result<QueryComplexity> {
        let estimate = self.estimate_complexity(query);
        if estimate.total_points > self.config.max_points || estimate.node_count > self.config.max_nodes
        {
            debug!(
                points = estimate.total_points,
                nodes = estimate.node_count,
                "query rejected by point limit"
            );
            return Err(ResilienceError::QueryTooExpensive {
                points: estimate.total_points,
                nodes: estimate.node_count,
                max_points: self.config.max_points,
                max_nodes: self.config.max_nodes,
            });
        }
        Ok(estimate)
    }

    pub fn optimize(&self, query: &str, options: &OptimizeOptions) -> String {
        optimize::optimize(query, options)
    }

    /// Pages an over-budget connection into sequential variants.
    pub fn split(&self, query: &str) -> Result<Vec<QueryVariant>> {
        split::split(query, &self.config)
    }

    /// Combines aliased entries into as few requests as the budget allows.
    pub fn batch(&self, entries: &[BatchEntry], options: &BatchOptions) -> Result<Vec<BatchRequest>> {
        batch::batch(entries, options, &self.config)
    }
}
