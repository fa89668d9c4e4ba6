//! GraphQL Parser
//!
//! Recursive-descent parser over the token stream produced by the lexer.
//! Comments are bound to the selection that follows them. Nesting of
//! selection sets, list and object values and list types is capped at
//! [`MAX_NESTING_DEPTH`], so hostile input fails with a `ParseError` instead
//! of exhausting the stack.

use std::mem;

use crate::query::ast::{
    Argument, Definition, Directive, Document, Field, FragmentDefinition, FragmentSpread,
    InlineFragment, OperationDefinition, OperationKind, Selection, SelectionSet,
    VariableDefinition, Value,
};
use crate::query::lexer::{tokenize, ParseError, Token, TokenKind};

/// Deepest nesting the parser accepts.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Parses a complete executable document.
pub fn parse_document(input: &str) -> Result<Document, ParseError> {
    let mut parser = Parser::new(input)?;
    parser.parse_document()
}

/// Parses either a complete document or a bare list of root selections
/// (optionally followed by fragment definitions), which is wrapped in an
/// anonymous query.
pub fn parse_snippet(input: &str) -> Result<Document, ParseError> {
    let mut parser = Parser::new(input)?;
    if parser.at_definition_start() {
        return parser.parse_document();
    }

    let mut items = Vec::new();
    while !matches!(parser.peek().kind, TokenKind::Eof) && !parser.at_fragment_definition() {
        items.push(parser.parse_selection()?);
    }
    if items.is_empty() {
        return Err(parser.error_here("expected at least one selection"));
    }
    let selection_set = SelectionSet {
        items,
        trailing_comments: mem::take(&mut parser.pending_comments),
    };

    let mut definitions = vec![Definition::Operation(OperationDefinition {
        kind: OperationKind::Query,
        name: None,
        variables: Vec::new(),
        directives: Vec::new(),
        selection_set,
    })];
    while parser.at_fragment_definition() {
        definitions.push(Definition::Fragment(parser.parse_fragment()?));
    }
    if !matches!(parser.peek().kind, TokenKind::Eof) {
        return Err(parser.error_here("unexpected token after selections"));
    }
    Ok(Document { definitions })
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    pending_comments: Vec<String>,
    depth: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(input)?,
            index: 0,
            pending_comments: Vec::new(),
            depth: 0,
        })
    }

    // == Token access ==

    fn skip_comments(&mut self) {
        while let Some(Token {
            kind: TokenKind::Comment(text),
            ..
        }) = self.tokens.get(self.index)
        {
            self.pending_comments.push(text.clone());
            self.index += 1;
        }
    }

    fn peek(&mut self) -> &Token {
        self.skip_comments();
        let last = self.tokens.len() - 1;
        &self.tokens[self.index.min(last)]
    }

    /// Kind of the `offset`-th significant token from the current one.
    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        self.tokens[self.index..]
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::Comment(_)))
            .nth(offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn consume(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.index += 1;
        }
        token
    }

    fn error_here(&mut self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError::at(message, token.line, token.column)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        if self.peek().kind == kind {
            self.consume();
            Ok(())
        } else {
            let found = format!("{:?}", self.peek().kind);
            Err(self.error_here(format!("expected {}, found {}", what, found)))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Name(name) => {
                self.consume();
                Ok(name)
            }
            other => Err(self.error_here(format!("expected name, found {:?}", other))),
        }
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error_here(format!(
                "nesting deeper than {} levels",
                MAX_NESTING_DEPTH
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn peek_is(&mut self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn at_keyword(&mut self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Name(name) if name == keyword)
    }

    fn at_fragment_definition(&mut self) -> bool {
        self.at_keyword("fragment")
            && matches!(self.peek_kind_at(1), TokenKind::Name(name) if name != "on")
            && matches!(self.peek_kind_at(2), TokenKind::Name(on) if on == "on")
    }

    fn at_definition_start(&mut self) -> bool {
        self.peek_is(&TokenKind::BraceOpen)
            || self.at_keyword("query")
            || self.at_keyword("mutation")
            || self.at_keyword("subscription")
            || self.at_fragment_definition()
    }

    // == Definitions ==

    fn parse_document(&mut self) -> Result<Document, ParseError> {
        let mut definitions = Vec::new();
        loop {
            if self.peek_is(&TokenKind::Eof) {
                break;
            }
            if self.at_fragment_definition() {
                definitions.push(Definition::Fragment(self.parse_fragment()?));
            } else if self.at_definition_start() {
                definitions.push(Definition::Operation(self.parse_operation()?));
            } else {
                return Err(self.error_here("expected operation or fragment definition"));
            }
        }
        if definitions.is_empty() {
            return Err(self.error_here("document has no definitions"));
        }
        Ok(Document { definitions })
    }

    fn parse_operation(&mut self) -> Result<OperationDefinition, ParseError> {
        if self.peek_is(&TokenKind::BraceOpen) {
            return Ok(OperationDefinition {
                kind: OperationKind::Query,
                name: None,
                variables: Vec::new(),
                directives: Vec::new(),
                selection_set: self.parse_selection_set()?,
            });
        }

        let kind = match self.expect_name()?.as_str() {
            "query" => OperationKind::Query,
            "mutation" => OperationKind::Mutation,
            "subscription" => OperationKind::Subscription,
            other => return Err(self.error_here(format!("unknown operation type '{}'", other))),
        };
        let name = if matches!(self.peek().kind, TokenKind::Name(_)) {
            Some(self.expect_name()?)
        } else {
            None
        };
        let variables = if self.peek_is(&TokenKind::ParenOpen) {
            self.parse_variable_definitions()?
        } else {
            Vec::new()
        };
        let directives = self.parse_directives()?;
        let selection_set = self.parse_selection_set()?;

        Ok(OperationDefinition {
            kind,
            name,
            variables,
            directives,
            selection_set,
        })
    }

    fn parse_fragment(&mut self) -> Result<FragmentDefinition, ParseError> {
        self.expect_name()?;
        let name = self.expect_name()?;
        if self.expect_name()? != "on" {
            return Err(self.error_here("expected 'on' in fragment definition"));
        }
        let type_condition = self.expect_name()?;
        let directives = self.parse_directives()?;
        let selection_set = self.parse_selection_set()?;
        Ok(FragmentDefinition {
            name,
            type_condition,
            directives,
            selection_set,
        })
    }

    fn parse_variable_definitions(&mut self) -> Result<Vec<VariableDefinition>, ParseError> {
        self.expect(TokenKind::ParenOpen, "'('")?;
        let mut variables = Vec::new();
        while !self.peek_is(&TokenKind::ParenClose) {
            let name = match self.consume().kind {
                TokenKind::Variable(name) => name,
                other => {
                    return Err(self.error_here(format!("expected variable, found {:?}", other)))
                }
            };
            self.expect(TokenKind::Colon, "':'")?;
            let var_type = self.parse_type()?;
            let default_value = if self.peek_is(&TokenKind::Equals) {
                self.consume();
                Some(self.parse_value()?)
            } else {
                None
            };
            self.parse_directives()?;
            variables.push(VariableDefinition {
                name,
                var_type,
                default_value,
            });
        }
        self.consume();
        Ok(variables)
    }

    fn parse_type(&mut self) -> Result<String, ParseError> {
        let mut ty = if self.peek_is(&TokenKind::BracketOpen) {
            self.consume();
            self.descend()?;
            let inner = self.parse_type()?;
            self.expect(TokenKind::BracketClose, "']'")?;
            self.ascend();
            format!("[{}]", inner)
        } else {
            self.expect_name()?
        };
        if self.peek_is(&TokenKind::Bang) {
            self.consume();
            ty.push('!');
        }
        Ok(ty)
    }

    // == Selections ==

    fn parse_selection_set(&mut self) -> Result<SelectionSet, ParseError> {
        self.expect(TokenKind::BraceOpen, "'{'")?;
        self.descend()?;
        let mut items = Vec::new();
        while !self.peek_is(&TokenKind::BraceClose) {
            if self.peek_is(&TokenKind::Eof) {
                return Err(self.error_here("unterminated selection set"));
            }
            items.push(self.parse_selection()?);
        }
        let trailing_comments = mem::take(&mut self.pending_comments);
        self.consume();
        self.ascend();
        if items.is_empty() {
            return Err(self.error_here("selection set must not be empty"));
        }
        Ok(SelectionSet {
            items,
            trailing_comments,
        })
    }

    fn parse_selection(&mut self) -> Result<Selection, ParseError> {
        self.peek();
        let comments = mem::take(&mut self.pending_comments);

        if !self.peek_is(&TokenKind::Spread) {
            let mut field = self.parse_field()?;
            field.comments = comments;
            return Ok(Selection::Field(field));
        }

        self.consume();
        let is_spread = matches!(&self.peek().kind, TokenKind::Name(name) if name != "on");
        if is_spread {
            let name = self.expect_name()?;
            let directives = self.parse_directives()?;
            return Ok(Selection::FragmentSpread(FragmentSpread {
                name,
                directives,
                comments,
            }));
        }

        let type_condition = if self.at_keyword("on") {
            self.consume();
            Some(self.expect_name()?)
        } else {
            None
        };
        let directives = self.parse_directives()?;
        let selection_set = self.parse_selection_set()?;
        Ok(Selection::InlineFragment(InlineFragment {
            type_condition,
            directives,
            selection_set,
            comments,
        }))
    }

    fn parse_field(&mut self) -> Result<Field, ParseError> {
        let first = self.expect_name()?;
        let (alias, name) = if self.peek_is(&TokenKind::Colon) {
            self.consume();
            (Some(first), self.expect_name()?)
        } else {
            (None, first)
        };
        let arguments = self.parse_arguments()?;
        let directives = self.parse_directives()?;
        let selection_set = if self.peek_is(&TokenKind::BraceOpen) {
            self.parse_selection_set()?
        } else {
            SelectionSet::default()
        };
        Ok(Field {
            alias,
            name,
            arguments,
            directives,
            selection_set,
            comments: Vec::new(),
        })
    }

    fn parse_arguments(&mut self) -> Result<Vec<Argument>, ParseError> {
        if !self.peek_is(&TokenKind::ParenOpen) {
            return Ok(Vec::new());
        }
        self.consume();
        let mut arguments = Vec::new();
        while !self.peek_is(&TokenKind::ParenClose) {
            let name = self.expect_name()?;
            self.expect(TokenKind::Colon, "':'")?;
            let value = self.parse_value()?;
            arguments.push(Argument { name, value });
        }
        self.consume();
        if arguments.is_empty() {
            return Err(self.error_here("argument list must not be empty"));
        }
        Ok(arguments)
    }

    fn parse_directives(&mut self) -> Result<Vec<Directive>, ParseError> {
        let mut directives = Vec::new();
        while self.peek_is(&TokenKind::At) {
            self.consume();
            let name = self.expect_name()?;
            let arguments = self.parse_arguments()?;
            directives.push(Directive { name, arguments });
        }
        Ok(directives)
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        let token = self.consume();
        let value = match token.kind {
            TokenKind::Variable(name) => Value::Variable(name),
            TokenKind::Int(text) => match text.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Float(text),
            },
            TokenKind::Float(text) => Value::Float(text),
            TokenKind::Str(s) => Value::String(s),
            TokenKind::Name(name) => match name.as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                "null" => Value::Null,
                _ => Value::Enum(name),
            },
            TokenKind::BracketOpen => {
                self.descend()?;
                let mut items = Vec::new();
                while !self.peek_is(&TokenKind::BracketClose) {
                    if self.peek_is(&TokenKind::Eof) {
                        return Err(self.error_here("unterminated list"));
                    }
                    items.push(self.parse_value()?);
                }
                self.consume();
                self.ascend();
                Value::List(items)
            }
            TokenKind::BraceOpen => {
                self.descend()?;
                let mut fields = Vec::new();
                while !self.peek_is(&TokenKind::BraceClose) {
                    let name = self.expect_name()?;
                    self.expect(TokenKind::Colon, "':'")?;
                    fields.push((name, self.parse_value()?));
                }
                self.consume();
                self.ascend();
                Value::Object(fields)
            }
            other => {
                return Err(ParseError::at(
                    format!("expected value, found {:?}", other),
                    token.line,
                    token.column,
                ))
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_operation(doc: &Document) -> &OperationDefinition {
        doc.operations().next().unwrap()
    }

    fn root_field(doc: &Document, index: usize) -> &Field {
        match &only_operation(doc).selection_set.items[index] {
            Selection::Field(field) => field,
            other => panic!("expected field, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_shorthand_query() {
        let doc = parse_document("{ viewer { login } }").unwrap();
        let viewer = root_field(&doc, 0);
        assert_eq!(viewer.name, "viewer");
        assert_eq!(viewer.selection_set.items.len(), 1);
    }

    #[test]
    fn test_parse_named_query_with_variables() {
        let doc = parse_document(
            r#"query Issues($owner: String!, $ids: [ID!]! = ["a"], $n: Int = 10) @live {
                repository(owner: $owner, name: "core") {
                    issues(first: $n, states: [OPEN, CLOSED], filter: {assignee: null}) {
                        totalCount
                    }
                }
            }"#,
        )
        .unwrap();
        let op = only_operation(&doc);
        assert_eq!(op.name.as_deref(), Some("Issues"));
        assert_eq!(op.variables.len(), 3);
        assert_eq!(op.variables[1].var_type, "[ID!]!");
        assert_eq!(op.variables[2].default_value, Some(Value::Int(10)));
        assert_eq!(op.directives[0].name, "live");

        let repo = root_field(&doc, 0);
        assert_eq!(
            repo.argument("owner"),
            Some(&Value::Variable("owner".into()))
        );
        let issues = repo.selection_set.field("issues").unwrap();
        assert_eq!(
            issues.argument("states"),
            Some(&Value::List(vec![
                Value::Enum("OPEN".into()),
                Value::Enum("CLOSED".into())
            ]))
        );
    }

    #[test]
    fn test_parse_fragments_and_inline_fragments() {
        let doc = parse_document(
            "query { node(id: 1) { ...IssueParts ... on PullRequest { merged } ... @include(if: true) { id } } }
             fragment IssueParts on Issue { title }",
        )
        .unwrap();
        assert_eq!(doc.fragments().count(), 1);
        let node = root_field(&doc, 0);
        assert!(matches!(
            &node.selection_set.items[0],
            Selection::FragmentSpread(s) if s.name == "IssueParts"
        ));
        assert!(matches!(
            &node.selection_set.items[1],
            Selection::InlineFragment(f) if f.type_condition.as_deref() == Some("PullRequest")
        ));
        assert!(matches!(
            &node.selection_set.items[2],
            Selection::InlineFragment(f) if f.type_condition.is_none() && f.directives.len() == 1
        ));
    }

    #[test]
    fn test_aliases() {
        let doc = parse_document("{ open: issues(states: OPEN) { totalCount } }").unwrap();
        let field = root_field(&doc, 0);
        assert_eq!(field.alias.as_deref(), Some("open"));
        assert_eq!(field.response_key(), "open");
    }

    #[test]
    fn test_comments_bind_to_next_field() {
        let doc = parse_document("{\n  # who\n  login\n  name\n  # dangling\n}").unwrap();
        assert_eq!(root_field(&doc, 0).comments, vec![" who".to_string()]);
        assert!(root_field(&doc, 1).comments.is_empty());
        assert_eq!(
            only_operation(&doc).selection_set.trailing_comments,
            vec![" dangling".to_string()]
        );
    }

    #[test]
    fn test_parse_snippet_wraps_bare_selections() {
        let doc = parse_snippet(
            "repository(owner: \"a\", name: \"b\") { ...Stars }\nfragment Stars on Repository { stargazerCount }",
        )
        .unwrap();
        assert_eq!(root_field(&doc, 0).name, "repository");
        assert_eq!(doc.fragments().count(), 1);

        let full = parse_snippet("query { viewer { login } }").unwrap();
        assert_eq!(root_field(&full, 0).name, "viewer");
    }

    #[test]
    fn test_print_then_parse_is_stable() {
        let text = "query Q($n: Int = 5) {\n  # note\n  a: issues(first: $n, labels: [\"bug\"]) @skip(if: false) {\n    nodes {\n      ...F\n    }\n  }\n}\n\nfragment F on Issue {\n  title\n}";
        let doc = parse_document(text).unwrap();
        assert_eq!(doc.to_string(), text);
        assert_eq!(parse_document(&doc.to_string()).unwrap(), doc);
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(parse_document("{ viewer { login }").is_err());
        assert!(parse_document("{ }").is_err());
        assert!(parse_document("").is_err());
        assert!(parse_document("query ($x: ) { a }").is_err());
        assert!(parse_document("{ a(first: ) }").is_err());
        assert!(parse_snippet("").is_err());
    }

    fn nested(open: &str, close: &str, depth: usize) -> String {
        format!("{{ a{} }}", open.repeat(depth) + &close.repeat(depth))
    }

    #[test]
    fn test_deep_selection_nesting_is_an_error() {
        let deep = "{a".repeat(10_000) + &"}".repeat(10_000);
        let err = parse_document(&deep).unwrap_err();
        assert!(err.message.contains("nesting"), "{}", err);
        assert!(parse_snippet(&deep).is_err());

        let limit = "{a".repeat(MAX_NESTING_DEPTH) + &"}".repeat(MAX_NESTING_DEPTH);
        assert!(parse_document(&limit).is_ok());
        let over = "{a".repeat(MAX_NESTING_DEPTH + 1) + &"}".repeat(MAX_NESTING_DEPTH + 1);
        assert!(parse_document(&over).is_err());
    }

    #[test]
    fn test_deep_values_and_types_are_errors() {
        let list = format!("{{ a(x: {}) }}", "[".repeat(10_000) + &"]".repeat(10_000));
        assert!(parse_document(&list).is_err());

        let object = format!("{{ a(x: {}) }}", "{b: ".repeat(10_000) + "1" + &"}".repeat(10_000));
        assert!(parse_document(&object).is_err());

        let ty = format!(
            "query($v: {}Int{}) {{ a }}",
            "[".repeat(10_000),
            "]".repeat(10_000)
        );
        assert!(parse_document(&ty).is_err());

        assert!(parse_document(&nested(" { b", " }", 10)).is_ok());
    }
}
