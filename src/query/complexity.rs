//! Query Complexity Estimation
//!
//! Point cost model: a query costs 1, plus for every connection field the
//! product of its page size and the page sizes of all ancestor connections.
//! Node count accumulates the same products. Fragments are counted where
//! they are spread; each fragment is priced once and scaled at every spread.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::query::ast::{
    Document, Field, FragmentDefinition, OperationDefinition, Selection, SelectionSet, Value,
};
use crate::query::parser::{parse_document, MAX_NESTING_DEPTH};

/// Arguments that make a field a connection.
pub const PAGE_SIZE_ARGUMENTS: [&str; 3] = ["first", "last", "limit"];

/// Estimated cost of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryComplexity {
    pub total_points: u64,
    pub node_count: u64,
}

impl QueryComplexity {
    fn add(&mut self, other: QueryComplexity) {
        self.total_points = self.total_points.saturating_add(other.total_points);
        self.node_count = self.node_count.saturating_add(other.node_count);
    }

    fn scaled(self, multiplier: u64) -> QueryComplexity {
        QueryComplexity {
            total_points: self.total_points.saturating_mul(multiplier),
            node_count: self.node_count.saturating_mul(multiplier),
        }
    }

    const UNBOUNDED: QueryComplexity = QueryComplexity {
        total_points: u64::MAX,
        node_count: u64::MAX,
    };
}

/// Deepest selection nesting priced, counting through fragment spreads.
const MAX_WALK_DEPTH: usize = 4 * MAX_NESTING_DEPTH;

/// Per-walk bookkeeping.
#[derive(Debug, Default)]
struct WalkState {
    depth: usize,
    /// Fragments on the current spread chain
    visiting: HashSet<String>,
    /// Cost of one instance of each fragment already priced
    unit_costs: HashMap<String, QueryComplexity>,
}

/// Estimates the cost of query text. Unparseable text costs nothing.
pub fn estimate(query: &str, default_page_size: u64) -> QueryComplexity {
    match parse_document(query) {
        Ok(document) => estimate_document(&document, default_page_size),
        Err(err) => {
            debug!(error = %err, "unparseable query, assuming zero complexity");
            QueryComplexity::default()
        }
    }
}

/// Cost of the most expensive operation in a parsed document.
pub fn estimate_document(document: &Document, default_page_size: u64) -> QueryComplexity {
    let ctx = CostContext::new(document, default_page_size);
    document
        .operations()
        .map(|op| {
            let mut complexity = ctx.for_operation(op).selection_cost(&op.selection_set, 1);
            complexity.total_points = complexity.total_points.saturating_add(1);
            complexity
        })
        .max_by_key(|c| (c.total_points, c.node_count))
        .unwrap_or_default()
}

/// Fragment table and variable bindings needed to price selections.
#[derive(Debug, Clone)]
pub(crate) struct CostContext<'a> {
    fragments: HashMap<&'a str, &'a FragmentDefinition>,
    variables: HashMap<String, u64>,
    default_page_size: u64,
}

impl<'a> CostContext<'a> {
    pub(crate) fn new(document: &'a Document, default_page_size: u64) -> Self {
        Self {
            fragments: document.fragments().map(|f| (f.name.as_str(), f)).collect(),
            variables: HashMap::new(),
            default_page_size,
        }
    }

    /// Binds page-size variables to their declared defaults.
    pub(crate) fn for_operation(&self, op: &OperationDefinition) -> Self {
        let mut ctx = self.clone();
        ctx.variables = op
            .variables
            .iter()
            .filter_map(|var| match &var.default_value {
                Some(Value::Int(n)) => Some((var.name.clone(), (*n).max(0) as u64)),
                _ => None,
            })
            .collect();
        ctx
    }

    pub(crate) fn fragment(&self, name: &str) -> Option<&'a FragmentDefinition> {
        self.fragments.get(name).copied()
    }

    /// Page size requested by a connection field, None for plain fields.
    pub(crate) fn page_size(&self, field: &Field) -> Option<u64> {
        PAGE_SIZE_ARGUMENTS
            .iter()
            .filter_map(|arg| field.argument(arg))
            .filter_map(|value| match value {
                Value::Int(n) => Some((*n).max(0) as u64),
                Value::Variable(name) => Some(
                    self.variables
                        .get(name)
                        .copied()
                        .unwrap_or(self.default_page_size),
                ),
                _ => None,
            })
            .max()
    }

    /// Cost of a selection set whose nearest connection ancestor product is
    /// `multiplier`, excluding the base point.
    pub(crate) fn selection_cost(&self, set: &SelectionSet, multiplier: u64) -> QueryComplexity {
        let mut acc = QueryComplexity::default();
        self.walk(set, multiplier, &mut WalkState::default(), &mut acc);
        acc
    }

    fn walk(
        &self,
        set: &SelectionSet,
        multiplier: u64,
        state: &mut WalkState,
        acc: &mut QueryComplexity,
    ) {
        // Nesting this deep can only come from long fragment chains.
        if state.depth >= MAX_WALK_DEPTH {
            acc.add(QueryComplexity::UNBOUNDED);
            return;
        }
        state.depth += 1;
        for item in &set.items {
            match item {
                Selection::Field(field) => match self.page_size(field) {
                    Some(size) => {
                        let product = multiplier.saturating_mul(size);
                        acc.add(QueryComplexity {
                            total_points: product,
                            node_count: product,
                        });
                        self.walk(&field.selection_set, product, state, acc);
                    }
                    None => self.walk(&field.selection_set, multiplier, state, acc),
                },
                Selection::FragmentSpread(spread) => {
                    if let Some(unit) = self.fragment_cost(&spread.name, state) {
                        acc.add(unit.scaled(multiplier));
                    }
                }
                Selection::InlineFragment(inline) => {
                    self.walk(&inline.selection_set, multiplier, state, acc)
                }
            }
        }
        state.depth -= 1;
    }

    /// Cost of one instance of a named fragment, None when it is unknown or
    /// already on the current spread chain.
    fn fragment_cost(&self, name: &str, state: &mut WalkState) -> Option<QueryComplexity> {
        if let Some(unit) = state.unit_costs.get(name) {
            return Some(*unit);
        }
        let fragment = self.fragment(name)?;
        // Cyclic spreads are invalid GraphQL; count each cycle once.
        if !state.visiting.insert(name.to_string()) {
            return None;
        }

        let mut unit = QueryComplexity::default();
        self.walk(&fragment.selection_set, 1, state, &mut unit);
        state.visiting.remove(name);
        state.unit_costs.insert(name.to_string(), unit);
        Some(unit)
    }
}
