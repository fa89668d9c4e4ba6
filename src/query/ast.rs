//! GraphQL Syntax Tree
//!
//! Executable-document subset of GraphQL: operations, fragments, selections
//! and input values, plus a printer that renders them back to query text.

use std::collections::BTreeSet;
use std::fmt::{self, Write};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub definitions: Vec<Definition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Operation(OperationDefinition),
    Fragment(FragmentDefinition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDefinition {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub directives: Vec<Directive>,
    pub selection_set: SelectionSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    /// Type as written, e.g. `[ID!]!`
    pub var_type: String,
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDefinition {
    pub name: String,
    pub type_condition: String,
    pub directives: Vec<Directive>,
    pub selection_set: SelectionSet,
}

/// Selections of one nesting level. Empty for leaf fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionSet {
    pub items: Vec<Selection>,
    /// Comments that follow the last selection
    pub trailing_comments: Vec<String>,
}

impl SelectionSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Unaliased child field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.items.iter().find_map(|item| match item {
            Selection::Field(f) if f.alias.is_none() && f.name == name => Some(f),
            _ => None,
        })
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.items.iter_mut().find_map(|item| match item {
            Selection::Field(f) if f.alias.is_none() && f.name == name => Some(f),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    FragmentSpread(FragmentSpread),
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Argument>,
    pub directives: Vec<Directive>,
    pub selection_set: SelectionSet,
    /// Comments written directly above the field
    pub comments: Vec<String>,
}

impl Field {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Key under which the field appears in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    /// Replaces an argument's value, appending it when absent.
    pub fn set_argument(&mut self, name: &str, value: Value) {
        match self.arguments.iter_mut().find(|a| a.name == name) {
            Some(arg) => arg.value = value,
            None => self.arguments.push(Argument {
                name: name.to_string(),
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentSpread {
    pub name: String,
    pub directives: Vec<Directive>,
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub directives: Vec<Directive>,
    pub selection_set: SelectionSet,
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Variable(String),
    Int(i64),
    Float(String),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Converts a JSON value into a GraphQL literal.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.to_string()),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Calls `f` on every variable referenced inside this value.
    pub fn visit_variables<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Value::Variable(name) => f(name.as_str()),
            Value::List(items) => {
                for item in items {
                    item.visit_variables(f);
                }
            }
            Value::Object(fields) => {
                for (_, value) in fields {
                    value.visit_variables(f);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Variable(name) => write!(f, "${}", name),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(text) | Value::Enum(text) => f.write_str(text),
            Value::String(s) => {
                let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                f.write_str(&quoted)
            }
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => f.write_str("null"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl Document {
    pub fn operations(&self) -> impl Iterator<Item = &OperationDefinition> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Operation(op) => Some(op),
            Definition::Fragment(_) => None,
        })
    }

    pub fn operations_mut(&mut self) -> impl Iterator<Item = &mut OperationDefinition> {
        self.definitions.iter_mut().filter_map(|d| match d {
            Definition::Operation(op) => Some(op),
            Definition::Fragment(_) => None,
        })
    }

    pub fn fragments(&self) -> impl Iterator<Item = &FragmentDefinition> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Fragment(frag) => Some(frag),
            Definition::Operation(_) => None,
        })
    }

    /// Names of every variable referenced anywhere in the document.
    pub fn referenced_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let mut record = |name: &str| {
            names.insert(name.to_string());
        };
        for definition in &self.definitions {
            match definition {
                Definition::Operation(op) => {
                    visit_directive_variables(&op.directives, &mut record);
                    visit_selection_variables(&op.selection_set, &mut record);
                }
                Definition::Fragment(frag) => {
                    visit_directive_variables(&frag.directives, &mut record);
                    visit_selection_variables(&frag.selection_set, &mut record);
                }
            }
        }
        names
    }
}

fn visit_directive_variables<'a>(directives: &'a [Directive], f: &mut impl FnMut(&'a str)) {
    for directive in directives {
        for arg in &directive.arguments {
            arg.value.visit_variables(f);
        }
    }
}

fn visit_selection_variables<'a>(set: &'a SelectionSet, f: &mut impl FnMut(&'a str)) {
    for item in &set.items {
        match item {
            Selection::Field(field) => {
                for arg in &field.arguments {
                    arg.value.visit_variables(f);
                }
                visit_directive_variables(&field.directives, f);
                visit_selection_variables(&field.selection_set, f);
            }
            Selection::FragmentSpread(spread) => visit_directive_variables(&spread.directives, f),
            Selection::InlineFragment(inline) => {
                visit_directive_variables(&inline.directives, f);
                visit_selection_variables(&inline.selection_set, f);
            }
        }
    }
}

// == Printer ==
const INDENT: &str = "  ";

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for (i, definition) in self.definitions.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            let printed = match definition {
                Definition::Operation(op) => print_operation(&mut out, op),
                Definition::Fragment(frag) => print_fragment(&mut out, frag),
            };
            printed?;
        }
        f.write_str(&out)
    }
}

fn print_operation(out: &mut String, op: &OperationDefinition) -> fmt::Result {
    let shorthand = op.kind == OperationKind::Query
        && op.name.is_none()
        && op.variables.is_empty()
        && op.directives.is_empty();
    if !shorthand {
        out.push_str(op.kind.as_str());
        if let Some(name) = &op.name {
            write!(out, " {}", name)?;
        }
        if !op.variables.is_empty() {
            out.push('(');
            for (i, var) in op.variables.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write!(out, "${}: {}", var.name, var.var_type)?;
                if let Some(default) = &var.default_value {
                    write!(out, " = {}", default)?;
                }
            }
            out.push(')');
        }
        print_directives(out, &op.directives)?;
        out.push(' ');
    }
    print_selection_set(out, &op.selection_set, 0)
}

fn print_fragment(out: &mut String, frag: &FragmentDefinition) -> fmt::Result {
    write!(out, "fragment {} on {}", frag.name, frag.type_condition)?;
    print_directives(out, &frag.directives)?;
    out.push(' ');
    print_selection_set(out, &frag.selection_set, 0)
}

fn print_arguments(out: &mut String, arguments: &[Argument]) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    out.push('(');
    for (i, arg) in arguments.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "{}: {}", arg.name, arg.value)?;
    }
    out.push(')');
    Ok(())
}

fn print_directives(out: &mut String, directives: &[Directive]) -> fmt::Result {
    for directive in directives {
        write!(out, " @{}", directive.name)?;
        print_arguments(out, &directive.arguments)?;
    }
    Ok(())
}

fn print_comments(out: &mut String, comments: &[String], depth: usize) {
    for comment in comments {
        push_indent(out, depth);
        out.push('#');
        out.push_str(comment);
        out.push('\n');
    }
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn print_selection_set(out: &mut String, set: &SelectionSet, depth: usize) -> fmt::Result {
    out.push_str("{\n");
    for item in &set.items {
        match item {
            Selection::Field(field) => {
                print_comments(out, &field.comments, depth + 1);
                push_indent(out, depth + 1);
                if let Some(alias) = &field.alias {
                    write!(out, "{}: ", alias)?;
                }
                out.push_str(&field.name);
                print_arguments(out, &field.arguments)?;
                print_directives(out, &field.directives)?;
                if !field.selection_set.is_empty() {
                    out.push(' ');
                    print_selection_set(out, &field.selection_set, depth + 1)?;
                }
            }
            Selection::FragmentSpread(spread) => {
                print_comments(out, &spread.comments, depth + 1);
                push_indent(out, depth + 1);
                write!(out, "...{}", spread.name)?;
                print_directives(out, &spread.directives)?;
            }
            Selection::InlineFragment(inline) => {
                print_comments(out, &inline.comments, depth + 1);
                push_indent(out, depth + 1);
                out.push_str("...");
                if let Some(type_condition) = &inline.type_condition {
                    write!(out, " on {}", type_condition)?;
                }
                print_directives(out, &inline.directives)?;
                out.push(' ');
                print_selection_set(out, &inline.selection_set, depth + 1)?;
            }
        }
        out.push('\n');
    }
    print_comments(out, &set.trailing_comments, depth + 1);
    push_indent(out, depth);
    out.push('}');
    Ok(())
}
