//! Query Splitting
//!
//! Rewrites a query that is over the per-request point budget into a
//! sequence of paged variants of its most expensive root-level connection.
//! Each variant asks for a slice small enough to stay under budget and keeps
//! the connection's page info so the caller can chain cursors and detect the
//! last page.

use serde::Serialize;
use tracing::debug;

use crate::config::PlannerConfig;
use crate::error::{ResilienceError, Result};
use crate::query::ast::{
    Definition, Field, OperationDefinition, Selection, SelectionSet, VariableDefinition, Value,
};
use crate::query::complexity::{estimate_document, CostContext};
use crate::query::parser::parse_document;

/// Pagination style of the split connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageDirection {
    /// `first` / `after`, completion via `hasNextPage`
    Forward,
    /// `last` / `before`, completion via `hasPreviousPage`
    Backward,
    /// `limit` / `offset`, no cursor
    Offset,
}

impl PageDirection {
    fn of(field: &Field) -> Self {
        if field.argument("first").is_some() {
            PageDirection::Forward
        } else if field.argument("last").is_some() {
            PageDirection::Backward
        } else {
            PageDirection::Offset
        }
    }

    pub fn size_argument(&self) -> &'static str {
        match self {
            PageDirection::Forward => "first",
            PageDirection::Backward => "last",
            PageDirection::Offset => "limit",
        }
    }

    pub fn cursor_argument(&self) -> &'static str {
        match self {
            PageDirection::Forward => "after",
            PageDirection::Backward => "before",
            PageDirection::Offset => "offset",
        }
    }

    /// `(has_more, cursor)` page info fields, None for offset paging.
    pub fn page_info_fields(&self) -> Option<(&'static str, &'static str)> {
        match self {
            PageDirection::Forward => Some(("hasNextPage", "endCursor")),
            PageDirection::Backward => Some(("hasPreviousPage", "startCursor")),
            PageDirection::Offset => None,
        }
    }
}

/// One request of a split query, to be issued in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryVariant {
    pub query: String,
    /// Items requested from the paged connection; None when not split
    pub page_size: Option<u64>,
    /// Variable that must carry the previous page's cursor
    pub cursor_variable: Option<String>,
    /// Response keys from the root to the paged connection
    pub connection_path: Vec<String>,
    pub direction: PageDirection,
    pub estimated_points: u64,
}

impl QueryVariant {
    fn whole(query: &str, estimated_points: u64) -> Self {
        Self {
            query: query.to_string(),
            page_size: None,
            cursor_variable: None,
            connection_path: Vec::new(),
            direction: PageDirection::Forward,
            estimated_points,
        }
    }
}

#[derive(Debug)]
struct Candidate {
    index_path: Vec<usize>,
    key_path: Vec<String>,
    page_size: u64,
    /// Points of one item's subtree
    inner_points: u64,
    direction: PageDirection,
}

impl Candidate {
    fn points(&self) -> u64 {
        self.page_size
            .saturating_mul(self.inner_points.saturating_add(1))
    }
}

const CURSOR_VARIABLE: &str = "splitCursor";

/// Splits `query` so that every variant fits `max_points_per_request`.
///
/// Queries within budget, and text that does not parse, come back as a
/// single untouched variant.
///
/// # Errors
/// `QueryTooExpensive` when no root-level connection can be paged down to
/// fit the budget, or when paging it would take more than
/// `max_split_variants` requests.
pub fn split(query: &str, config: &PlannerConfig) -> Result<Vec<QueryVariant>> {
    let budget = config.max_points_per_request;
    let document = match parse_document(query) {
        Ok(document) => document,
        Err(err) => {
            debug!(error = %err, "unparseable query, not splitting");
            return Ok(vec![QueryVariant::whole(query, 0)]);
        }
    };

    let complexity = estimate_document(&document, config.default_page_size);
    if complexity.total_points <= budget {
        return Ok(vec![QueryVariant::whole(query, complexity.total_points)]);
    }
    let too_expensive = || ResilienceError::QueryTooExpensive {
        points: complexity.total_points,
        nodes: complexity.node_count,
        max_points: budget,
        max_nodes: config.max_nodes,
    };

    let mut operations = document
        .definitions
        .iter()
        .enumerate()
        .filter_map(|(i, d)| match d {
            Definition::Operation(op) => Some((i, op)),
            Definition::Fragment(_) => None,
        });
    let (op_index, op) = match (operations.next(), operations.next()) {
        (Some(only), None) => only,
        _ => return Err(too_expensive()),
    };

    let ctx = CostContext::new(&document, config.default_page_size).for_operation(op);
    let op_points = ctx
        .selection_cost(&op.selection_set, 1)
        .total_points
        .saturating_add(1);

    let mut candidates = Vec::new();
    collect_candidates(
        &op.selection_set,
        &ctx,
        &mut Vec::new(),
        &mut Vec::new(),
        &mut candidates,
    );
    let chosen = candidates
        .into_iter()
        .reduce(|best, c| if c.points() > best.points() { c } else { best })
        .ok_or_else(too_expensive)?;

    let rest = op_points.saturating_sub(1).saturating_sub(chosen.points());
    let per_item = chosen.inner_points.saturating_add(1);
    let slice = budget
        .checked_sub(rest.saturating_add(1))
        .map(|available| available / per_item)
        .unwrap_or(0);
    if slice == 0 {
        return Err(too_expensive());
    }

    let direction = chosen.direction;
    let base_offset = match direction {
        PageDirection::Offset => match field_at(&op.selection_set, &chosen.index_path)
            .and_then(|f| f.argument("offset"))
        {
            None => 0,
            Some(Value::Int(n)) => (*n).max(0) as u64,
            Some(_) => return Err(too_expensive()),
        },
        _ => 0,
    };
    let originally_used = document.referenced_variables();
    let cursor_variable = fresh_variable_name(op, CURSOR_VARIABLE);

    let count = chosen.page_size.div_ceil(slice);
    if count > config.max_split_variants {
        debug!(
            path = ?chosen.key_path,
            page_size = chosen.page_size,
            slice,
            variants = count,
            "split would exceed variant limit"
        );
        return Err(too_expensive());
    }
    debug!(
        path = ?chosen.key_path,
        page_size = chosen.page_size,
        slice,
        variants = count,
        "splitting query over budget"
    );

    let mut variants = Vec::new();
    for i in 0..count {
        let page = if i + 1 == count {
            chosen.page_size - slice * (count - 1)
        } else {
            slice
        };

        let mut variant_doc = document.clone();
        let uses_cursor = i > 0 && direction != PageDirection::Offset;
        {
            let Some(Definition::Operation(variant_op)) = variant_doc.definitions.get_mut(op_index)
            else {
                return Err(too_expensive());
            };
            let field = field_at_mut(&mut variant_op.selection_set, &chosen.index_path)
                .ok_or_else(too_expensive)?;

            field.set_argument(direction.size_argument(), Value::Int(page as i64));
            match direction.page_info_fields() {
                Some(page_info) => ensure_page_info(field, page_info),
                None => {
                    let offset = base_offset.saturating_add(i * slice);
                    field.set_argument(
                        direction.cursor_argument(),
                        Value::Int(i64::try_from(offset).unwrap_or(i64::MAX)),
                    )
                }
            }
            if uses_cursor {
                field.set_argument(
                    direction.cursor_argument(),
                    Value::Variable(cursor_variable.clone()),
                );
                variant_op.variables.push(VariableDefinition {
                    name: cursor_variable.clone(),
                    var_type: "String".to_string(),
                    default_value: None,
                });
            }
        }

        // Drop declarations orphaned by the rewritten arguments.
        let still_used = variant_doc.referenced_variables();
        for variant_op in variant_doc.operations_mut() {
            variant_op
                .variables
                .retain(|v| still_used.contains(&v.name) || !originally_used.contains(&v.name));
        }

        variants.push(QueryVariant {
            query: variant_doc.to_string(),
            page_size: Some(page),
            cursor_variable: uses_cursor.then(|| cursor_variable.clone()),
            connection_path: chosen.key_path.clone(),
            direction,
            estimated_points: 1 + rest + page * per_item,
        });
    }

    Ok(variants)
}

/// Connections with no connection ancestor, outside named fragments.
fn collect_candidates(
    set: &SelectionSet,
    ctx: &CostContext<'_>,
    index_path: &mut Vec<usize>,
    key_path: &mut Vec<String>,
    out: &mut Vec<Candidate>,
) {
    for (i, item) in set.items.iter().enumerate() {
        index_path.push(i);
        match item {
            Selection::Field(field) => {
                key_path.push(field.response_key().to_string());
                match ctx.page_size(field) {
                    Some(page_size) => out.push(Candidate {
                        index_path: index_path.clone(),
                        key_path: key_path.clone(),
                        page_size,
                        inner_points: ctx.selection_cost(&field.selection_set, 1).total_points,
                        direction: PageDirection::of(field),
                    }),
                    None => collect_candidates(&field.selection_set, ctx, index_path, key_path, out),
                }
                key_path.pop();
            }
            Selection::InlineFragment(inline) => {
                collect_candidates(&inline.selection_set, ctx, index_path, key_path, out)
            }
            Selection::FragmentSpread(_) => {}
        }
        index_path.pop();
    }
}

fn field_at<'a>(set: &'a SelectionSet, path: &[usize]) -> Option<&'a Field> {
    let (first, rest) = path.split_first()?;
    match set.items.get(*first)? {
        Selection::Field(field) if rest.is_empty() => Some(field),
        Selection::Field(field) => field_at(&field.selection_set, rest),
        Selection::InlineFragment(inline) => field_at(&inline.selection_set, rest),
        Selection::FragmentSpread(_) => None,
    }
}

fn field_at_mut<'a>(set: &'a mut SelectionSet, path: &[usize]) -> Option<&'a mut Field> {
    let (first, rest) = path.split_first()?;
    match set.items.get_mut(*first)? {
        Selection::Field(field) => {
            if rest.is_empty() {
                Some(field)
            } else {
                field_at_mut(&mut field.selection_set, rest)
            }
        }
        Selection::InlineFragment(inline) => field_at_mut(&mut inline.selection_set, rest),
        Selection::FragmentSpread(_) => None,
    }
}

/// Adds any missing page info subfields to a connection.
fn ensure_page_info(connection: &mut Field, (has_more, cursor): (&str, &str)) {
    match connection.selection_set.field_mut("pageInfo") {
        Some(page_info) => {
            for name in [has_more, cursor] {
                if page_info.selection_set.field(name).is_none() {
                    page_info
                        .selection_set
                        .items
                        .push(Selection::Field(Field::leaf(name)));
                }
            }
        }
        None => {
            let mut page_info = Field::leaf("pageInfo");
            page_info.selection_set.items = vec![
                Selection::Field(Field::leaf(has_more)),
                Selection::Field(Field::leaf(cursor)),
            ];
            connection
                .selection_set
                .items
                .push(Selection::Field(page_info));
        }
    }
}

fn fresh_variable_name(op: &OperationDefinition, base: &str) -> String {
    let taken = |name: &str| op.variables.iter().any(|v| v.name == name);
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !taken(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}
