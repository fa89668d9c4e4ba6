//! Alias Batching
//!
//! Combines independent single-root queries into as few requests as the
//! per-batch point budget allows. Each entry's variables are inlined as
//! literals and its root field is renamed to the entry's alias.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::config::PlannerConfig;
use crate::error::{ResilienceError, Result};
use crate::query::ast::{
    Definition, Directive, Document, Field, FragmentDefinition, OperationDefinition,
    OperationKind, Selection, SelectionSet, Value,
};
use crate::query::complexity::CostContext;
use crate::query::parser::parse_snippet;

/// One named query to batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub alias: String,
    /// Bare root selection or full single-operation document
    pub query: String,
    #[serde(default)]
    pub variables: Map<String, JsonValue>,
}

impl BatchEntry {
    pub fn new(alias: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            query: query.into(),
            variables: Map::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// Per-call overrides for [`batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Overrides the configured per-batch point budget
    pub max_points_per_batch: Option<u64>,
}

/// One combined request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub query: String,
    /// Aliases in this request, in input order
    pub aliases: Vec<String>,
    pub estimated_points: u64,
}

impl BatchRequest {
    /// JSON request body for a GraphQL endpoint.
    pub fn to_body(&self) -> JsonValue {
        json!({ "query": self.query })
    }
}

struct PreparedEntry {
    alias: String,
    field: Field,
    fragments: Vec<FragmentDefinition>,
    points: u64,
}

struct Bin {
    members: Vec<usize>,
    points: u64,
    oversized: bool,
}

/// Partitions `entries` into combined requests, first-fit in input order.
///
/// An entry that alone exceeds the budget is sent in a request of its own.
///
/// # Errors
/// `Configuration` for invalid or duplicate aliases, snippets that do not
/// parse or do not select exactly one root field, unbound variables, and
/// fragments defined differently by different entries.
pub fn batch(
    entries: &[BatchEntry],
    options: &BatchOptions,
    config: &PlannerConfig,
) -> Result<Vec<BatchRequest>> {
    validate_aliases(entries)?;
    let budget = options
        .max_points_per_batch
        .unwrap_or(config.max_points_per_batch);

    let prepared = entries
        .iter()
        .map(|entry| prepare(entry, config.default_page_size))
        .collect::<Result<Vec<_>>>()?;
    check_fragment_conflicts(&prepared)?;

    let mut bins: Vec<Bin> = Vec::new();
    for (index, entry) in prepared.iter().enumerate() {
        if entry.points.saturating_add(1) > budget {
            warn!(
                alias = %entry.alias,
                points = entry.points,
                budget,
                "batch entry exceeds budget on its own, sending alone"
            );
            bins.push(Bin {
                members: vec![index],
                points: entry.points,
                oversized: true,
            });
            continue;
        }

        let fits = |bin: &&mut Bin| {
            !bin.oversized && bin.points.saturating_add(entry.points).saturating_add(1) <= budget
        };
        match bins.iter_mut().find(fits) {
            Some(bin) => {
                bin.members.push(index);
                bin.points += entry.points;
            }
            None => bins.push(Bin {
                members: vec![index],
                points: entry.points,
                oversized: false,
            }),
        }
    }

    debug!(entries = entries.len(), requests = bins.len(), "batched queries");
    Ok(bins.iter().map(|bin| build_request(bin, &prepared)).collect())
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn validate_aliases(entries: &[BatchEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !is_valid_name(&entry.alias) {
            return Err(ResilienceError::Configuration(format!(
                "invalid batch alias '{}'",
                entry.alias
            )));
        }
        if !seen.insert(entry.alias.as_str()) {
            return Err(ResilienceError::Configuration(format!(
                "duplicate batch alias '{}'",
                entry.alias
            )));
        }
    }
    Ok(())
}

fn entry_error(alias: &str, message: impl std::fmt::Display) -> ResilienceError {
    ResilienceError::Configuration(format!("batch entry '{}': {}", alias, message))
}

fn prepare(entry: &BatchEntry, default_page_size: u64) -> Result<PreparedEntry> {
    let alias = entry.alias.as_str();
    let mut document = parse_snippet(&entry.query).map_err(|e| entry_error(alias, e))?;

    let declared = {
        let operations: Vec<&OperationDefinition> = document.operations().collect();
        let [op] = operations.as_slice() else {
            return Err(entry_error(alias, "expected exactly one operation"));
        };
        if op.kind != OperationKind::Query {
            return Err(entry_error(alias, "only queries can be batched"));
        }
        op.variables.clone()
    };

    let mut bindings: HashMap<String, Value> = entry
        .variables
        .iter()
        .map(|(name, value)| (name.clone(), Value::from_json(value)))
        .collect();
    for var in declared {
        if let Some(default) = var.default_value {
            bindings.entry(var.name).or_insert(default);
        }
    }

    for definition in &mut document.definitions {
        let set = match definition {
            Definition::Operation(op) => &mut op.selection_set,
            Definition::Fragment(frag) => &mut frag.selection_set,
        };
        inline_selection_set(set, &bindings).map_err(|name| {
            entry_error(alias, format!("unbound variable ${}", name))
        })?;
    }

    let roots: Vec<&Selection> = document
        .operations()
        .flat_map(|op| op.selection_set.items.iter())
        .collect();
    let mut field = match roots.as_slice() {
        [Selection::Field(field)] => field.clone(),
        _ => return Err(entry_error(alias, "must select exactly one root field")),
    };
    field.alias = Some(entry.alias.clone());

    let ctx = CostContext::new(&document, default_page_size);
    let root = SelectionSet {
        items: vec![Selection::Field(field.clone())],
        trailing_comments: Vec::new(),
    };
    let points = ctx.selection_cost(&root, 1).total_points;

    Ok(PreparedEntry {
        alias: entry.alias.clone(),
        field,
        fragments: document.fragments().cloned().collect(),
        points,
    })
}

/// Replaces variables with bound literals; Err carries the unbound name.
fn inline_value(
    value: &mut Value,
    bindings: &HashMap<String, Value>,
) -> std::result::Result<(), String> {
    match value {
        Value::Variable(name) => {
            *value = bindings.get(name).cloned().ok_or_else(|| name.clone())?;
        }
        Value::List(items) => {
            for item in items {
                inline_value(item, bindings)?;
            }
        }
        Value::Object(fields) => {
            for (_, field_value) in fields {
                inline_value(field_value, bindings)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn inline_directives(
    directives: &mut [Directive],
    bindings: &HashMap<String, Value>,
) -> std::result::Result<(), String> {
    for directive in directives {
        for arg in &mut directive.arguments {
            inline_value(&mut arg.value, bindings)?;
        }
    }
    Ok(())
}

fn inline_selection_set(
    set: &mut SelectionSet,
    bindings: &HashMap<String, Value>,
) -> std::result::Result<(), String> {
    for item in &mut set.items {
        match item {
            Selection::Field(field) => {
                for arg in &mut field.arguments {
                    inline_value(&mut arg.value, bindings)?;
                }
                inline_directives(&mut field.directives, bindings)?;
                inline_selection_set(&mut field.selection_set, bindings)?;
            }
            Selection::FragmentSpread(spread) => inline_directives(&mut spread.directives, bindings)?,
            Selection::InlineFragment(inline) => {
                inline_directives(&mut inline.directives, bindings)?;
                inline_selection_set(&mut inline.selection_set, bindings)?;
            }
        }
    }
    Ok(())
}

fn check_fragment_conflicts(prepared: &[PreparedEntry]) -> Result<()> {
    let mut seen: HashMap<&str, &FragmentDefinition> = HashMap::new();
    for entry in prepared {
        for fragment in &entry.fragments {
            match seen.get(fragment.name.as_str()) {
                Some(existing) if *existing != fragment => {
                    return Err(entry_error(
                        &entry.alias,
                        format!("fragment '{}' conflicts with another entry", fragment.name),
                    ));
                }
                Some(_) => {}
                None => {
                    seen.insert(fragment.name.as_str(), fragment);
                }
            }
        }
    }
    Ok(())
}

fn build_request(bin: &Bin, prepared: &[PreparedEntry]) -> BatchRequest {
    let mut items = Vec::with_capacity(bin.members.len());
    let mut fragments: Vec<Definition> = Vec::new();
    let mut fragment_names = HashSet::new();
    let mut aliases = Vec::with_capacity(bin.members.len());

    for &index in &bin.members {
        let entry = &prepared[index];
        aliases.push(entry.alias.clone());
        items.push(Selection::Field(entry.field.clone()));
        for fragment in &entry.fragments {
            if fragment_names.insert(fragment.name.clone()) {
                fragments.push(Definition::Fragment(fragment.clone()));
            }
        }
    }

    let mut definitions = vec![Definition::Operation(OperationDefinition {
        kind: OperationKind::Query,
        name: None,
        variables: Vec::new(),
        directives: Vec::new(),
        selection_set: SelectionSet {
            items,
            trailing_comments: Vec::new(),
        },
    })];
    definitions.extend(fragments);

    BatchRequest {
        query: Document { definitions }.to_string(),
        aliases,
        estimated_points: bin.points.saturating_add(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::query::complexity::estimate;
    use proptest::prelude::*;

    fn config(budget: u64) -> PlannerConfig {
        PlannerConfig {
            max_points_per_batch: budget,
            ..PlannerConfig::default()
        }
    }

    /// Entry whose root costs exactly `points`.
    fn costed(alias: &str, points: u64) -> BatchEntry {
        BatchEntry::new(
            alias,
            format!("repository(name: \"{}\") {{ issues(first: {}) {{ totalCount }} }}", alias, points),
        )
    }

    fn all_aliases(requests: &[BatchRequest]) -> Vec<String> {
        let mut aliases: Vec<String> = requests.iter().flat_map(|r| r.aliases.clone()).collect();
        aliases.sort();
        aliases
    }

    #[test]
    fn test_combines_under_budget() {
        let entries = vec![costed("a", 10), costed("b", 10), costed("c", 10)];
        let requests = batch(&entries, &BatchOptions::default(), &config(100)).unwrap();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].aliases, vec!["a", "b", "c"]);
        assert_eq!(requests[0].estimated_points, 31);
        assert_eq!(estimate(&requests[0].query, 100).total_points, 31);
        assert!(requests[0].query.contains("a: repository"));
        assert!(requests[0].query.contains("c: repository"));
    }

    #[test]
    fn test_inlines_variables_and_defaults() {
        let entry = BatchEntry::new(
            "rust",
            "query($owner: String!, $n: Int = 5) { repository(owner: $owner) { issues(first: $n, labels: [$label]) { totalCount } } }",
        )
        .with_variable("owner", json!("rust-lang"))
        .with_variable("label", json!("bug"));

        let requests = batch(&[entry], &BatchOptions::default(), &config(100)).unwrap();
        let query = &requests[0].query;
        assert!(query.contains("owner: \"rust-lang\""), "{}", query);
        assert!(query.contains("first: 5"));
        assert!(query.contains("labels: [\"bug\"]"));
        assert!(!query.contains('$'));
        assert_eq!(requests[0].estimated_points, 6);
    }

    #[test]
    fn test_unbound_variable_rejected() {
        let entry = BatchEntry::new("a", "repository(owner: $owner) { id }");
        let err = batch(&[entry], &BatchOptions::default(), &config(100)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("$owner"));
    }

    #[test]
    fn test_partitions_over_budget() {
        let entries: Vec<_> = (0..5).map(|i| costed(&format!("q{}", i), 30)).collect();
        let requests = batch(&entries, &BatchOptions::default(), &config(100)).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].aliases, vec!["q0", "q1", "q2"]);
        assert_eq!(requests[1].aliases, vec!["q3", "q4"]);
        for request in &requests {
            assert!(request.estimated_points <= 100);
        }
        assert_eq!(all_aliases(&requests), vec!["q0", "q1", "q2", "q3", "q4"]);
    }

    #[test]
    fn test_first_fit_preserves_input_order() {
        let entries = vec![costed("big", 60), costed("mid", 50), costed("small", 30)];
        let requests = batch(&entries, &BatchOptions::default(), &config(100)).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].aliases, vec!["big", "small"]);
        assert_eq!(requests[1].aliases, vec!["mid"]);
    }

    #[test]
    fn test_option_overrides_budget() {
        let entries = vec![costed("a", 30), costed("b", 30)];
        let options = BatchOptions {
            max_points_per_batch: Some(40),
        };
        let requests = batch(&entries, &options, &config(1_000)).unwrap();
        assert_eq!(requests.len(), 2);
    }

    #[test]
    fn test_oversized_entry_goes_alone() {
        let entries = vec![costed("a", 10), costed("huge", 500), costed("b", 10)];
        let requests = batch(&entries, &BatchOptions::default(), &config(100)).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].aliases, vec!["a", "b"]);
        assert_eq!(requests[1].aliases, vec!["huge"]);
    }

    #[test]
    fn test_alias_validation() {
        let options = BatchOptions::default();
        let dup = vec![costed("a", 1), costed("a", 1)];
        assert!(batch(&dup, &options, &config(100)).is_err());

        let invalid = vec![BatchEntry::new("1abc", "viewer { login }")];
        assert!(batch(&invalid, &options, &config(100)).is_err());

        let empty = vec![BatchEntry::new("", "viewer { login }")];
        assert!(batch(&empty, &options, &config(100)).is_err());
    }

    #[test]
    fn test_requires_single_root_field() {
        let options = BatchOptions::default();
        let two = vec![BatchEntry::new("a", "viewer { login } rateLimit { cost }")];
        assert!(batch(&two, &options, &config(100)).is_err());

        let mutation = vec![BatchEntry::new("m", "mutation { addStar(id: 1) { id } }")];
        assert!(batch(&mutation, &options, &config(100)).is_err());
    }

    #[test]
    fn test_fragments_carried_once() {
        let snippet = |name: &str| {
            format!(
                "repository(name: \"{}\") {{ ...Repo }}\nfragment Repo on Repository {{ stargazerCount }}",
                name
            )
        };
        let entries = vec![
            BatchEntry::new("a", snippet("a")),
            BatchEntry::new("b", snippet("b")),
        ];
        let requests = batch(&entries, &BatchOptions::default(), &config(100)).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query.matches("fragment Repo").count(), 1);
    }

    #[test]
    fn test_conflicting_fragments_rejected() {
        let entries = vec![
            BatchEntry::new("a", "viewer { ...F }\nfragment F on User { login }"),
            BatchEntry::new("b", "viewer { ...F }\nfragment F on User { name }"),
        ];
        assert!(batch(&entries, &BatchOptions::default(), &config(100)).is_err());
    }

    #[test]
    fn test_to_body() {
        let requests = batch(&[costed("a", 1)], &BatchOptions::default(), &config(100)).unwrap();
        let body = requests[0].to_body();
        assert_eq!(body["query"], JsonValue::String(requests[0].query.clone()));
    }

    #[test]
    fn test_empty_input() {
        assert!(batch(&[], &BatchOptions::default(), &config(100))
            .unwrap()
            .is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // Every alias lands in exactly one request; shared requests respect the budget.
        #[test]
        fn prop_batch_partitions_aliases(costs in prop::collection::vec(1u64..200, 1..20)) {
            let budget = 250;
            let entries: Vec<_> = costs
                .iter()
                .enumerate()
                .map(|(i, cost)| costed(&format!("e{}", i), *cost))
                .collect();
            let requests = batch(&entries, &BatchOptions::default(), &config(budget)).unwrap();

            let mut expected: Vec<String> = entries.iter().map(|e| e.alias.clone()).collect();
            expected.sort();
            prop_assert_eq!(all_aliases(&requests), expected);

            for request in &requests {
                if request.aliases.len() > 1 {
                    prop_assert!(request.estimated_points <= budget);
                }
                prop_assert_eq!(estimate(&request.query, 100).total_points, request.estimated_points);
            }
        }
    }
}
