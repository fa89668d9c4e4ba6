//! Query Optimization
//!
//! Rewrites that shrink a query without changing the data it asks for:
//! repeated selections are merged, and a connection requested in both edge
//! and node form keeps only the node form when the edges carry nothing else.

use std::mem;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::ast::{Argument, Definition, Document, Field, Selection, SelectionSet};
use crate::query::parser::parse_document;

/// Toggles for [`optimize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeOptions {
    /// Merge repeated field selections at each level
    pub dedupe_fields: bool,
    /// Drop `edges { node }` when `nodes` is also requested
    pub prefer_nodes: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            dedupe_fields: true,
            prefer_nodes: true,
        }
    }
}

/// Optimizes query text. Text that does not parse is returned unchanged.
pub fn optimize(query: &str, options: &OptimizeOptions) -> String {
    match parse_document(query) {
        Ok(mut document) => {
            optimize_document(&mut document, options);
            document.to_string()
        }
        Err(err) => {
            debug!(error = %err, "unparseable query left unoptimized");
            query.to_string()
        }
    }
}

pub fn optimize_document(document: &mut Document, options: &OptimizeOptions) {
    for definition in &mut document.definitions {
        match definition {
            Definition::Operation(op) => optimize_set(&mut op.selection_set, options),
            Definition::Fragment(frag) => optimize_set(&mut frag.selection_set, options),
        }
    }
}

fn optimize_set(set: &mut SelectionSet, options: &OptimizeOptions) {
    if options.dedupe_fields {
        dedupe(set);
    }
    if options.prefer_nodes {
        collapse_edges(set);
    }
    for item in &mut set.items {
        match item {
            Selection::Field(field) => optimize_set(&mut field.selection_set, options),
            Selection::InlineFragment(inline) => optimize_set(&mut inline.selection_set, options),
            Selection::FragmentSpread(_) => {}
        }
    }
}

fn same_arguments(a: &[Argument], b: &[Argument]) -> bool {
    a.len() == b.len() && a.iter().all(|arg| b.contains(arg))
}

fn same_field(a: &Field, b: &Field) -> bool {
    a.response_key() == b.response_key()
        && a.name == b.name
        && same_arguments(&a.arguments, &b.arguments)
        && a.directives == b.directives
}

fn append_comments(into: &mut Vec<String>, from: Vec<String>) {
    for comment in from {
        if !into.contains(&comment) {
            into.push(comment);
        }
    }
}

fn merge_sets(into: &mut SelectionSet, from: SelectionSet) {
    into.items.extend(from.items);
    append_comments(&mut into.trailing_comments, from.trailing_comments);
}

/// Merges duplicates into their first occurrence, keeping order and comments.
fn dedupe(set: &mut SelectionSet) {
    let mut merged: Vec<Selection> = Vec::with_capacity(set.items.len());

    for item in mem::take(&mut set.items) {
        match item {
            Selection::Field(field) => {
                let existing = merged.iter_mut().find_map(|s| match s {
                    Selection::Field(f) if same_field(f, &field) => Some(f),
                    _ => None,
                });
                match existing {
                    Some(first) => {
                        append_comments(&mut first.comments, field.comments);
                        merge_sets(&mut first.selection_set, field.selection_set);
                    }
                    None => merged.push(Selection::Field(field)),
                }
            }
            Selection::FragmentSpread(spread) => {
                let existing = merged.iter_mut().find_map(|s| match s {
                    Selection::FragmentSpread(o)
                        if o.name == spread.name && o.directives == spread.directives =>
                    {
                        Some(o)
                    }
                    _ => None,
                });
                match existing {
                    Some(first) => append_comments(&mut first.comments, spread.comments),
                    None => merged.push(Selection::FragmentSpread(spread)),
                }
            }
            Selection::InlineFragment(inline) => {
                let existing = merged.iter_mut().find_map(|s| match s {
                    Selection::InlineFragment(o)
                        if o.type_condition == inline.type_condition
                            && o.directives == inline.directives =>
                    {
                        Some(o)
                    }
                    _ => None,
                });
                match existing {
                    Some(first) => {
                        append_comments(&mut first.comments, inline.comments);
                        merge_sets(&mut first.selection_set, inline.selection_set);
                    }
                    None => merged.push(Selection::InlineFragment(inline)),
                }
            }
        }
    }

    set.items = merged;
}

/// True when `edges` selects nothing but a plain `node`.
fn edges_only_wrap_node(edges: &Field) -> bool {
    edges.arguments.is_empty()
        && edges.directives.is_empty()
        && !edges.selection_set.is_empty()
        && edges.selection_set.items.iter().all(|item| {
            matches!(item, Selection::Field(f)
                if f.name == "node"
                    && f.alias.is_none()
                    && f.arguments.is_empty()
                    && f.directives.is_empty())
        })
}

/// Folds `edges { node { .. } }` into a sibling `nodes { .. }`.
fn collapse_edges(set: &mut SelectionSet) {
    if set.field("nodes").is_none() {
        return;
    }
    let Some(index) = set.items.iter().position(|item| {
        matches!(item, Selection::Field(f) if f.name == "edges" && f.alias.is_none() && edges_only_wrap_node(f))
    }) else {
        return;
    };

    let Selection::Field(edges) = set.items.remove(index) else {
        return;
    };
    let Some(nodes) = set.field_mut("nodes") else {
        return;
    };
    append_comments(&mut nodes.comments, edges.comments);
    for item in edges.selection_set.items {
        if let Selection::Field(node) = item {
            append_comments(&mut nodes.comments, node.comments);
            merge_sets(&mut nodes.selection_set, node.selection_set);
        }
    }
}
