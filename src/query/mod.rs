//! Query Module
//!
//! GraphQL cost planning: a small lexer/parser and printer, a point cost
//! estimator, and the rewrites built on it (optimization, pagination
//! splitting and alias batching).

mod ast;
mod batch;
mod complexity;
mod lexer;
mod optimize;
mod parser;
mod planner;
mod split;

pub use ast::{
    Argument, Definition, Directive, Document, Field, FragmentDefinition, FragmentSpread,
    InlineFragment, OperationDefinition, OperationKind, Selection, SelectionSet, Value,
    VariableDefinition,
};
pub use batch::{batch, BatchEntry, BatchOptions, BatchRequest};
pub use complexity::{estimate, estimate_document, QueryComplexity, PAGE_SIZE_ARGUMENTS};
pub use lexer::{tokenize, ParseError, Token, TokenKind};
pub use optimize::{optimize, optimize_document, OptimizeOptions};
pub use parser::{parse_document, parse_snippet};
pub use planner::QueryPlanner;
pub use split::{split, PageDirection, QueryVariant};
