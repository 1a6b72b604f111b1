#![allow(
    clippy::string_slice,
    clippy::arithmetic_side_effects,
    reason = "byte positions only advance by whole chars of the input"
)]

use serde_json::{Number, Value};

use crate::{
    ast::{LiteralType, Node},
    error::{ParseError, ParseErrorKind},
};

type ParseResult<T> = Result<T, ParseError>;

/// Binary operators, longest first so `==` wins over a bare `=`-prefix.
const OPERATORS: [&str; 14] = [
    "==", "!=", "<=", ">=", "//", "**", "<", ">", "+", "-", "*", "/", "%", "~",
];

#[inline]
fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A doc block seen at the top level, waiting to find out whether a macro
/// follows it.
struct PendingDoc {
    doc: String,
    /// Text to emit instead if no macro follows.
    fallback: String,
}

#[derive(Clone)]
struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    /// Nesting depth of block bodies, 0 at the top level.
    depth: usize,
    /// Set by a `-%}` style closer, strips leading whitespace of the next text.
    trim_next: bool,
    pending_doc: Option<String>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            depth: 0,
            trim_next: false,
            pending_doc: None,
        }
    }

    #[inline]
    fn current_column(&self) -> usize {
        self.pos - self.line_start_pos + 1
    }

    #[inline]
    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            column: self.current_column(),
            fragment: self.input[self.pos..].chars().take(24).collect(),
            kind,
        }
    }

    /// Advances the parser position by char_len bytes, correctly handling
    /// multi-byte characters. Updates line and column numbers if a newline is
    /// encountered.
    #[inline]
    fn advance_by_char(&mut self, current_char: char, char_len: usize) {
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances the parser position by `len` bytes.
    /// This method assumes that the consumed string does NOT contain newlines.
    #[inline]
    fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos += len;
    }

    /// Advances to the byte offset `target`, tracking newlines on the way.
    fn advance_to(&mut self, target: usize) {
        while self.pos < target {
            let Some(current_char) = self.current_char() else {
                break;
            };
            self.advance_by_char(current_char, current_char.len_utf8());
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn char_after(&self, bytes: usize) -> Option<char> {
        self.input.get(self.pos + bytes..)?.chars().next()
    }

    /// Peek if the remaining input starts with `s`
    fn peek(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    /// Peek a whole word, so `in` does not match the start of `index`.
    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek(keyword) && !self.char_after(keyword.len()).is_some_and(is_ident_char)
    }

    /// Consume `s` if the remaining input starts with it.
    /// Assumes `s` does not contain newlines.
    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes_no_newline(s.len());
            true
        } else {
            false
        }
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.advance_bytes_no_newline(keyword.len());
            true
        } else {
            false
        }
    }

    fn consume_whitespace(&mut self) {
        while let Some(current_char) = self.current_char() {
            if !current_char.is_whitespace() {
                break;
            }
            self.advance_by_char(current_char, current_char.len_utf8());
        }
    }

    /// Expect `s` to be the start of the remaining input, consume it or return Err.
    /// Assumes `s` does not contain newlines.
    fn expect(&mut self, s: &str) -> ParseResult<()> {
        if self.consume(s) {
            return Ok(());
        }
        if self.eof() {
            return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(s.to_string()))));
        }
        Err(self.make_error(ParseErrorKind::UnexpectedToken {
            expected: format!("'{}'", s),
            found: self.input[self.pos..]
                .chars()
                .take(s.len().max(1))
                .collect(),
        }))
    }

    fn take_ident_chars(&mut self) -> &'a str {
        let start = self.pos;
        while self.current_char().is_some_and(is_ident_char) {
            self.advance_bytes_no_newline(1);
        }
        &self.input[start..self.pos]
    }

    /// Consume and return an identifier (`[A-Za-z_][A-Za-z0-9_]*`).
    fn consume_identifier(&mut self) -> ParseResult<&'a str> {
        self.consume_whitespace();
        match self.current_char() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => Ok(self.take_ident_chars()),
            Some(c) if !c.is_whitespace() && !"{}%()[]|,=".contains(c) => {
                Err(self.make_error(ParseErrorKind::InvalidIdentifier {
                    at_char: c.to_string(),
                }))
            }
            _ => Err(self.make_error(ParseErrorKind::Expected {
                description: "identifier".to_string(),
            })),
        }
    }

    /// `name` or `namespace.name`.
    fn consume_dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.consume_identifier()?.to_string();
        while self.peek(".") && self.char_after(1).is_some_and(is_ident_char) {
            self.advance_bytes_no_newline(1);
            name.push('.');
            name.push_str(self.take_ident_chars());
        }
        Ok(name)
    }

    // --- Tags ---

    /// Whether the tag at the cursor asks to trim whitespace before it.
    fn trims_left(&self) -> bool {
        self.peek("{{-") || self.peek("{%-") || self.peek("{#-")
    }

    /// Consumes a tag opener and its optional `-` marker.
    fn open_tag(&mut self, opener: &str) {
        self.advance_bytes_no_newline(opener.len());
        self.consume("-");
        self.trim_next = false;
    }

    fn close_tag(&mut self, closer: &str) -> ParseResult<()> {
        self.consume_whitespace();
        let trim = self.consume("-");
        self.expect(closer)?;
        self.trim_next = trim;
        Ok(())
    }

    /// Keyword of the statement tag at the cursor, without consuming anything.
    fn peek_statement(&self) -> Option<&'a str> {
        let mut lookahead = self.clone();
        if !lookahead.consume("{%") {
            return None;
        }
        lookahead.consume("-");
        lookahead.consume_identifier().ok()
    }

    fn at_macro(&self) -> bool {
        self.peek_statement() == Some("macro")
    }

    /// A terminated `/** ... */` block at the top level.
    fn at_doc_comment(&self) -> bool {
        self.depth == 0 && self.peek("/**") && self.input[self.pos + 3..].contains("*/")
    }

    fn at_doc_block(&self) -> bool {
        self.at_doc_comment() || self.peek("{#")
    }

    // --- Template structure ---

    /// Top-level loop: like `parse_nodes_until` but aware of doc blocks.
    fn parse_template(&mut self) -> ParseResult<Vec<Node>> {
        let mut nodes = Vec::new();
        let mut pending: Vec<PendingDoc> = Vec::new();

        while !self.eof() {
            if self.trims_left() {
                trim_trailing_text(&mut nodes);
            }

            if self.at_doc_block() {
                let start = self.pos;
                let (doc, literal) = self.parse_doc_block()?;
                let mut fallback = if literal {
                    self.input[start..self.pos].to_string()
                } else {
                    String::new()
                };
                let gap = self.pos;
                self.consume_whitespace();
                fallback.push_str(&self.input[gap..self.pos]);
                pending.push(PendingDoc { doc, fallback });

                if self.at_macro() {
                    // Only the first block of a run documents the macro.
                    self.pending_doc = pending.drain(..).next().map(|p| p.doc);
                } else if !self.at_doc_block() {
                    flush_pending(&mut nodes, &mut pending);
                }
                continue;
            }

            if let Some(node) = self.parse_node()? {
                push_node(&mut nodes, node);
            }
        }

        flush_pending(&mut nodes, &mut pending);
        Ok(nodes)
    }

    /// Parse nodes until a statement tag with one of the `ends` keywords. The
    /// opener and keyword of that tag are consumed, the rest of it is left to
    /// the caller.
    fn parse_nodes_until(
        &mut self,
        ends: &[&'static str],
    ) -> ParseResult<(Vec<Node>, &'static str)> {
        self.depth += 1;
        let mut nodes = Vec::new();
        loop {
            if self.eof() {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(format!(
                    "{{% {} %}}",
                    ends.join(" | ")
                )))));
            }

            if self.trims_left() {
                trim_trailing_text(&mut nodes);
            }

            if let Some(keyword) = self.peek_statement() {
                if let Some(end) = ends.iter().find(|end| **end == keyword) {
                    self.open_tag("{%");
                    self.consume_identifier()?;
                    self.depth -= 1;
                    return Ok((nodes, end));
                }
            }

            if let Some(node) = self.parse_node()? {
                push_node(&mut nodes, node);
            }
        }
    }

    fn parse_node(&mut self) -> ParseResult<Option<Node>> {
        if self.peek("{{") {
            self.parse_output().map(Some)
        } else if self.peek("{%") {
            self.parse_statement()
        } else if self.peek("{#") {
            self.parse_comment_body()?;
            Ok(None)
        } else {
            Ok(Some(self.parse_text()))
        }
    }

    /// Parses a block of literal text up to the next tag.
    fn parse_text(&mut self) -> Node {
        let start = self.pos;
        while let Some(current_char) = self.current_char() {
            if self.peek("{{") || self.peek("{%") || self.peek("{#") || self.at_doc_comment() {
                break;
            }
            self.advance_by_char(current_char, current_char.len_utf8());
        }

        let mut text = &self.input[start..self.pos];
        if std::mem::take(&mut self.trim_next) {
            text = text.trim_start();
        }
        Node::text(text)
    }

    /// `{# ... #}`, returning the comment body.
    fn parse_comment_body(&mut self) -> ParseResult<&'a str> {
        let opening = self.clone();
        self.open_tag("{#");
        let start = self.pos;
        let Some(length) = self.input[start..].find("#}") else {
            return Err(opening.make_error(ParseErrorKind::Unterminated {
                what: "comment".to_string(),
            }));
        };
        self.advance_to(start + length);
        let body = &self.input[start..self.pos];
        self.advance_bytes_no_newline(2);
        match body.strip_suffix('-') {
            Some(body) => {
                self.trim_next = true;
                Ok(body)
            }
            None => Ok(body),
        }
    }

    /// Either doc syntax. Returns the cleaned text and whether the block was
    /// literal `/** */` text rather than a template comment.
    fn parse_doc_block(&mut self) -> ParseResult<(String, bool)> {
        if !self.peek("/**") {
            let body = self.parse_comment_body()?;
            return Ok((clean_doc(body), false));
        }

        let opening = self.clone();
        self.advance_bytes_no_newline(3);
        let start = self.pos;
        let Some(length) = self.input[start..].find("*/") else {
            return Err(opening.make_error(ParseErrorKind::Unterminated {
                what: "doc comment".to_string(),
            }));
        };
        self.advance_to(start + length);
        let body = &self.input[start..self.pos];
        self.advance_bytes_no_newline(2);
        Ok((clean_doc(body), true))
    }

    fn parse_output(&mut self) -> ParseResult<Node> {
        self.open_tag("{{");
        let expression = self.parse_condition()?;
        self.close_tag("}}")?;
        Ok(match expression {
            Node::Yield => Node::Yield,
            other => Node::output(other),
        })
    }

    // --- Statements ---

    fn parse_statement(&mut self) -> ParseResult<Option<Node>> {
        self.open_tag("{%");
        let keyword = self.consume_identifier()?;
        match keyword {
            "macro" => self.parse_macro().map(Some),
            "call" => self.parse_call_block().map(Some),
            "set" => self.parse_set().map(Some),
            "if" => self.parse_if().map(Some),
            "for" => self.parse_for().map(Some),
            // Imported macros are resolved through the content model.
            "from" | "import" => {
                self.skip_to_tag_end()?;
                Ok(None)
            }
            _ => Err(self.make_error(ParseErrorKind::UnknownKeyword {
                keyword: keyword.to_string(),
            })),
        }
    }

    fn skip_to_tag_end(&mut self) -> ParseResult<()> {
        while !self.eof() && !self.peek("%}") && !self.peek("-%}") {
            if let Some(quote @ ('"' | '\'')) = self.current_char() {
                self.parse_string(quote)?;
                continue;
            }
            if let Some(current_char) = self.current_char() {
                self.advance_by_char(current_char, current_char.len_utf8());
            }
        }
        self.close_tag("%}")
    }

    fn parse_macro(&mut self) -> ParseResult<Node> {
        let doc = self.pending_doc.take();
        let name = self.consume_identifier()?.to_string();
        self.consume_whitespace();
        self.expect("(")?;
        let parameters = self.parse_parameter_declarations()?;
        self.close_tag("%}")?;

        let (children, _) = self.parse_nodes_until(&["endmacro"])?;
        self.close_tag("%}")?;

        Ok(Node::Macro {
            name,
            parameters: Box::new(Node::parameters(parameters)),
            children,
            doc,
        })
    }

    /// `a, b='x'` up to and including the closing parenthesis.
    fn parse_parameter_declarations(&mut self) -> ParseResult<Vec<Node>> {
        let mut parameters = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume(")") {
                break;
            }
            let name = self.consume_identifier()?;
            self.consume_whitespace();
            let default = if self.consume("=") {
                Some(self.parse_condition()?)
            } else {
                None
            };
            parameters.push(Node::parameter(Some(name), default));

            self.consume_whitespace();
            if !self.consume(",") {
                self.expect(")")?;
                break;
            }
        }
        Ok(parameters)
    }

    fn parse_call_block(&mut self) -> ParseResult<Node> {
        self.consume_whitespace();
        if self.consume("(") {
            // Arguments handed back to the caller body are not carried over.
            self.parse_parameter_declarations()?;
        }
        let name = self.consume_dotted_name()?;
        self.consume_whitespace();
        self.expect("(")?;
        let parameters = self.parse_arguments()?;
        self.close_tag("%}")?;

        let (children, _) = self.parse_nodes_until(&["endcall"])?;
        self.close_tag("%}")?;

        Ok(Node::call(name, parameters, children))
    }

    fn parse_set(&mut self) -> ParseResult<Node> {
        let target = self.consume_identifier()?;
        let variable = Node::variable([target]);
        self.consume_whitespace();

        if self.consume("=") {
            let value = self.parse_condition()?;
            self.close_tag("%}")?;
            return Ok(Node::set(variable, value));
        }
        if self.peek(",") {
            return Err(self.make_error(ParseErrorKind::Message(
                "multiple assignment targets are not supported".to_string(),
            )));
        }

        // Block assignment, `{% set x %}...{% endset %}`.
        self.close_tag("%}")?;
        let (body, _) = self.parse_nodes_until(&["endset"])?;
        self.close_tag("%}")?;
        Ok(Node::set(variable, Node::list(body)))
    }

    fn parse_if(&mut self) -> ParseResult<Node> {
        let condition = self.parse_condition()?;
        self.close_tag("%}")?;
        self.parse_if_branches(condition)
    }

    fn parse_if_branches(&mut self, condition: Node) -> ParseResult<Node> {
        let (children, end) = self.parse_nodes_until(&["elif", "elseif", "else", "endif"])?;

        let else_children = match end {
            "elif" | "elseif" => vec![self.parse_if()?],
            "else" => {
                self.consume_whitespace();
                if self.consume_keyword("if") {
                    vec![self.parse_if()?]
                } else {
                    self.close_tag("%}")?;
                    let (body, _) = self.parse_nodes_until(&["endif"])?;
                    self.close_tag("%}")?;
                    body
                }
            }
            _ => {
                self.close_tag("%}")?;
                Vec::new()
            }
        };

        Ok(Node::if_else(condition, children, else_children))
    }

    fn parse_for(&mut self) -> ParseResult<Node> {
        let first = self.consume_identifier()?;
        self.consume_whitespace();
        let (key_name, value_name) = if self.consume(",") {
            (Some(first), self.consume_identifier()?)
        } else {
            (None, first)
        };

        self.consume_whitespace();
        if !self.consume_keyword("in") {
            return Err(self.make_error(ParseErrorKind::Expected {
                description: "'in'".to_string(),
            }));
        }
        let iterable = self.parse_condition()?;
        self.close_tag("%}")?;

        let (children, end) = self.parse_nodes_until(&["else", "endfor"])?;
        self.close_tag("%}")?;
        let node = Node::for_each(key_name, value_name, iterable.clone(), children);

        if end == "else" {
            // `{% for %}...{% else %}` runs the else body when the iterable is empty.
            let (fallback, _) = self.parse_nodes_until(&["endfor"])?;
            self.close_tag("%}")?;
            return Ok(Node::if_else(iterable, vec![node], fallback));
        }
        Ok(node)
    }

    // --- Expressions ---
    // Chains are kept flat and left to right: condition -> expression -> unary
    // -> postfix (filters) -> primary.

    fn parse_condition(&mut self) -> ParseResult<Node> {
        let mut children = vec![self.parse_expression()?];
        loop {
            self.consume_whitespace();
            let operator = if self.consume_keyword("and") || self.consume("&&") {
                "and"
            } else if self.consume_keyword("or") || self.consume("||") {
                "or"
            } else {
                break;
            };
            children.push(Node::boolean_operand(operator));
            children.push(self.parse_expression()?);
        }
        Ok(collapse(children, Node::condition))
    }

    fn parse_expression(&mut self) -> ParseResult<Node> {
        let mut children = vec![self.parse_unary()?];
        while let Some(operator) = self.consume_operator() {
            children.push(Node::operand(operator));
            children.push(self.parse_unary()?);
        }
        Ok(collapse(children, Node::expression))
    }

    fn consume_operator(&mut self) -> Option<&'static str> {
        self.consume_whitespace();
        if self.peek("-}}") || self.peek("-%}") || self.peek("%}") {
            return None;
        }
        if self.consume_keyword("in") {
            return Some("in");
        }
        OPERATORS
            .into_iter()
            .find(|operator| self.consume(operator))
    }

    fn parse_unary(&mut self) -> ParseResult<Node> {
        self.consume_whitespace();
        let negated = self.consume_keyword("not") || (!self.peek("!=") && self.consume("!"));
        if negated {
            let operand = self.parse_unary()?;
            return Ok(Node::expression(vec![Node::operand("not"), operand]));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_primary()?;
        loop {
            self.consume_whitespace();
            if !self.peek("|") || self.peek("||") {
                break;
            }
            self.advance_bytes_no_newline(1);
            let name = self.consume_identifier()?;
            self.consume_whitespace();
            let parameters = if self.consume("(") {
                self.parse_arguments()?
            } else {
                Vec::new()
            };
            node = Node::filter(name, node, parameters);
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> ParseResult<Node> {
        self.consume_whitespace();
        let Some(current_char) = self.current_char() else {
            return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                "expression".to_string(),
            ))));
        };

        match current_char {
            '(' => {
                self.advance_bytes_no_newline(1);
                let inner = self.parse_condition()?;
                self.consume_whitespace();
                self.expect(")")?;
                Ok(Node::group(inner))
            }
            '[' => {
                self.advance_bytes_no_newline(1);
                Ok(Node::array(self.parse_sequence("]")?))
            }
            '{' => {
                self.advance_bytes_no_newline(1);
                self.parse_map()
            }
            '"' | '\'' => self.parse_string(current_char).map(Node::string),
            c if c.is_ascii_digit() => self.parse_number(),
            '-' if self.char_after(1).is_some_and(|c| c.is_ascii_digit()) => self.parse_number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.parse_reference(),
            _ => Err(self.make_error(ParseErrorKind::Expected {
                description: "expression".to_string(),
            })),
        }
    }

    /// Variables, keyword literals and calls.
    fn parse_reference(&mut self) -> ParseResult<Node> {
        let name = self.consume_identifier()?;
        match name {
            "true" | "True" => return Ok(Node::boolean(true)),
            "false" | "False" => return Ok(Node::boolean(false)),
            "none" | "None" | "null" => return Ok(Node::null()),
            _ => {}
        }

        let mut fields = vec![name.to_string()];
        loop {
            if self.peek(".") && self.char_after(1).is_some_and(is_ident_char) {
                self.advance_bytes_no_newline(1);
                fields.push(self.take_ident_chars().to_string());
            } else if self.peek("[") {
                self.advance_bytes_no_newline(1);
                self.consume_whitespace();
                let segment = match self.current_char() {
                    Some(quote @ ('"' | '\'')) => self.parse_string(quote)?,
                    Some(c) if c.is_ascii_digit() => self.take_ident_chars().to_string(),
                    _ => {
                        return Err(self.make_error(ParseErrorKind::Expected {
                            description: "string or integer index".to_string(),
                        }));
                    }
                };
                self.consume_whitespace();
                self.expect("]")?;
                fields.push(segment);
            } else {
                break;
            }
        }

        if self.consume("(") {
            let arguments = self.parse_arguments()?;
            let name = fields.join(".");
            if name == "caller" {
                return Ok(Node::Yield);
            }
            return Ok(Node::call(name, arguments, Vec::new()));
        }

        Ok(Node::Variable { fields })
    }

    /// Call arguments up to and including the closing parenthesis.
    fn parse_arguments(&mut self) -> ParseResult<Vec<Node>> {
        let mut arguments = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume(")") {
                break;
            }
            let argument = match self.keyword_argument() {
                Some(name) => Node::named(name, self.parse_condition()?),
                None => Node::positional(self.parse_condition()?),
            };
            arguments.push(argument);

            self.consume_whitespace();
            if !self.consume(",") {
                self.expect(")")?;
                break;
            }
        }
        Ok(arguments)
    }

    /// Consumes `name =` when the next argument is a keyword argument.
    fn keyword_argument(&mut self) -> Option<&'a str> {
        let mut lookahead = self.clone();
        let name = lookahead.consume_identifier().ok()?;
        lookahead.consume_whitespace();
        if lookahead.peek("=") && !lookahead.peek("==") {
            lookahead.advance_bytes_no_newline(1);
            *self = lookahead;
            Some(name)
        } else {
            None
        }
    }

    fn parse_sequence(&mut self, close: &str) -> ParseResult<Vec<Node>> {
        let mut items = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume(close) {
                break;
            }
            items.push(self.parse_condition()?);
            self.consume_whitespace();
            if !self.consume(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    /// `{key: value, 'other': value}`, after the opening brace.
    fn parse_map(&mut self) -> ParseResult<Node> {
        let mut entries = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume("}") {
                break;
            }
            let key = match self.current_char() {
                Some(quote @ ('"' | '\'')) => self.parse_string(quote)?,
                _ => self.consume_identifier()?.to_string(),
            };
            self.consume_whitespace();
            self.expect(":")?;
            entries.push(Node::named(&key, self.parse_condition()?));

            self.consume_whitespace();
            if !self.consume(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Node::parameters(entries))
    }

    fn parse_string(&mut self, quote: char) -> ParseResult<String> {
        let opening = self.clone();
        self.advance_bytes_no_newline(quote.len_utf8());
        let mut value = String::new();
        loop {
            let Some(current_char) = self.current_char() else {
                return Err(opening.make_error(ParseErrorKind::Unterminated {
                    what: "string literal".to_string(),
                }));
            };
            self.advance_by_char(current_char, current_char.len_utf8());
            if current_char == quote {
                break;
            }
            if current_char != '\\' {
                value.push(current_char);
                continue;
            }
            let Some(escaped) = self.current_char() else {
                continue;
            };
            self.advance_by_char(escaped, escaped.len_utf8());
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
        }
        Ok(value)
    }

    fn parse_number(&mut self) -> ParseResult<Node> {
        let start = self.pos;
        self.consume("-");
        while self.current_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance_bytes_no_newline(1);
        }
        let is_float = self.peek(".") && self.char_after(1).is_some_and(|c| c.is_ascii_digit());
        if is_float {
            self.advance_bytes_no_newline(1);
            while self.current_char().is_some_and(|c| c.is_ascii_digit()) {
                self.advance_bytes_no_newline(1);
            }
        }

        let raw = &self.input[start..self.pos];
        let number = if is_float {
            raw.parse::<f64>().ok().and_then(Number::from_f64)
        } else {
            raw.parse::<i64>().ok().map(Number::from)
        };
        match number {
            Some(number) => Ok(Node::Literal {
                value: Value::Number(number),
                value_type: LiteralType::Number,
            }),
            None => Err(self.make_error(ParseErrorKind::Message(format!(
                "'{}' is not a valid number",
                raw
            )))),
        }
    }
}

/// A single element needs no wrapper.
fn collapse(mut children: Vec<Node>, wrap: fn(Vec<Node>) -> Node) -> Node {
    if children.len() == 1 {
        if let Some(only) = children.pop() {
            return only;
        }
    }
    wrap(children)
}

/// Appends a node, merging adjacent text and dropping empty text.
fn push_node(nodes: &mut Vec<Node>, node: Node) {
    if let Node::Text { value } = &node {
        if value.is_empty() {
            return;
        }
        if let Some(Node::Text { value: previous }) = nodes.last_mut() {
            previous.push_str(value);
            return;
        }
    }
    nodes.push(node);
}

fn trim_trailing_text(nodes: &mut Vec<Node>) {
    if let Some(Node::Text { value }) = nodes.last_mut() {
        value.truncate(value.trim_end().len());
        if value.is_empty() {
            nodes.pop();
        }
    }
}

fn flush_pending(nodes: &mut Vec<Node>, pending: &mut Vec<PendingDoc>) {
    let text: String = pending.drain(..).map(|p| p.fallback).collect();
    push_node(nodes, Node::text(text));
}

/// Strips comment decoration: surrounding whitespace and leading `*` gutters.
fn clean_doc(body: &str) -> String {
    body.lines()
        .map(|line| {
            let line = line.trim();
            let line = line.strip_prefix('*').unwrap_or(line);
            line.strip_prefix(' ').unwrap_or(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Parses template source into a syntax tree.
///
/// A source made of a single macro (plus whitespace and its doc block) yields
/// that `MacroNode`; anything else yields a `NodeList`.
///
/// ```
/// use macrojsp::{parse, Node};
///
/// let root = parse("{% macro test() %}{% endmacro %}").unwrap();
/// assert_eq!(root, Node::macro_def("test", vec![], vec![]));
/// ```
pub fn parse(input: &str) -> Result<Node, ParseError> {
    let mut parser = Parser::new(input);
    let mut nodes = parser.parse_template()?;

    let macros = nodes
        .iter()
        .filter(|node| matches!(node, Node::Macro { .. }))
        .count();
    let only_macro = macros == 1
        && nodes
            .iter()
            .all(|node| matches!(node, Node::Macro { .. }) || node.is_blank_text());
    if only_macro {
        if let Some(index) = nodes
            .iter()
            .position(|node| matches!(node, Node::Macro { .. }))
        {
            return Ok(nodes.swap_remove(index));
        }
    }

    Ok(Node::list(nodes))
}


/// Tests for the parser module via `parse`.
#[cfg(test)]
mod tests {
    use super::*;

    fn body(source: &str) -> Vec<Node> {
        match parse(source).unwrap() {
            Node::NodeList { children } => children,
            other => panic!("Expected NodeList, got {:?}", other),
        }
    }

    fn output(source: &str) -> Node {
        match body(source).as_slice() {
            [Node::Output { children }] => children[0].clone(),
            other => panic!("Expected a single OutputNode, got {:?}", other),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert_eq!(parse("").unwrap(), Node::list(vec![]));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_simple_text() {
        assert_eq!(body("hello world"), vec![Node::text("hello world")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_macro() {
        assert_eq!(
            parse("{% macro test() %}{% endmacro %}").unwrap(),
            Node::macro_def("test", vec![], vec![])
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_macro_with_parameters_and_body() {
        let root = parse(
            "{% macro button(label, tone='primary', size=2) %}<button>{{ label }}</button>{% endmacro %}\n",
        )
        .unwrap();
        assert_eq!(
            root,
            Node::macro_def(
                "button",
                vec![
                    Node::parameter(Some("label"), None),
                    Node::named("tone", Node::string("primary")),
                    Node::named("size", Node::number(2)),
                ],
                vec![
                    Node::text("<button>"),
                    Node::output(Node::path("label")),
                    Node::text("</button>"),
                ],
            )
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_several_macros_give_a_node_list() {
        let nodes = body("{% macro a() %}{% endmacro %}\n{% macro b() %}{% endmacro %}");
        assert_eq!(
            nodes,
            vec![
                Node::macro_def("a", vec![], vec![]),
                Node::text("\n"),
                Node::macro_def("b", vec![], vec![]),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_output_variable_paths() {
        assert_eq!(output("{{ name }}"), Node::path("name"));
        assert_eq!(output("{{ item.name }}"), Node::path("item.name"));
        assert_eq!(
            output("{{ item['label'][0] }}"),
            Node::variable(["item", "label", "0"])
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literals() {
        assert_eq!(output("{{ 'it\\'s' }}"), Node::string("it's"));
        assert_eq!(output("{{ \"double\" }}"), Node::string("double"));
        assert_eq!(output("{{ 42 }}"), Node::number(42));
        assert_eq!(output("{{ -3 }}"), Node::number(-3));
        assert_eq!(output("{{ true }}"), Node::boolean(true));
        assert_eq!(output("{{ False }}"), Node::boolean(false));
        assert_eq!(output("{{ none }}"), Node::null());
        let Node::Literal { value, value_type } = output("{{ 1.5 }}") else {
            panic!("Expected a literal");
        };
        assert_eq!(value_type, LiteralType::Number);
        assert_eq!(value.as_f64(), Some(1.5));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_filter_chain() {
        assert_eq!(
            output("{{ name | upper | replace('a', 'b') }}"),
            Node::filter(
                "replace",
                Node::filter("upper", Node::path("name"), vec![]),
                vec![
                    Node::positional(Node::string("a")),
                    Node::positional(Node::string("b")),
                ],
            )
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_operator_chain_is_flat() {
        assert_eq!(
            output("{{ a + b * c }}"),
            Node::expression(vec![
                Node::path("a"),
                Node::operand("+"),
                Node::path("b"),
                Node::operand("*"),
                Node::path("c"),
            ])
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_set_concatenation() {
        assert_eq!(
            body("{% set x = x + 'a' ~ b %}"),
            vec![Node::set(
                Node::path("x"),
                Node::expression(vec![
                    Node::path("x"),
                    Node::operand("+"),
                    Node::string("a"),
                    Node::operand("~"),
                    Node::path("b"),
                ]),
            )]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_set_block() {
        assert_eq!(
            body("{% set label %}Hi {{ name }}{% endset %}"),
            vec![Node::set(
                Node::path("label"),
                Node::list(vec![Node::text("Hi "), Node::output(Node::path("name"))]),
            )]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_call_with_literal_arguments() {
        assert_eq!(
            output("{{ card({title: 'Hi', meta: {count: 2}}, size='lg') }}"),
            Node::call(
                "card",
                vec![
                    Node::positional(Node::parameters(vec![
                        Node::named("title", Node::string("Hi")),
                        Node::named(
                            "meta",
                            Node::parameters(vec![Node::named("count", Node::number(2))]),
                        ),
                    ])),
                    Node::named("size", Node::string("lg")),
                ],
                vec![],
            )
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_call_with_array_and_comparison_argument() {
        assert_eq!(
            output("{{ list(items=[1, 2], open=a == b) }}"),
            Node::call(
                "list",
                vec![
                    Node::named("items", Node::array(vec![Node::number(1), Node::number(2)])),
                    Node::named(
                        "open",
                        Node::expression(vec![
                            Node::path("a"),
                            Node::operand("=="),
                            Node::path("b"),
                        ]),
                    ),
                ],
                vec![],
            )
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_call_block_and_caller() {
        assert_eq!(
            body("{% call panel('x') %}<p>Body</p>{% endcall %}"),
            vec![Node::call(
                "panel",
                vec![Node::positional(Node::string("x"))],
                vec![Node::text("<p>Body</p>")],
            )]
        );
        assert_eq!(
            parse("{% macro panel() %}<div>{{ caller() }}</div>{% endmacro %}").unwrap(),
            Node::macro_def(
                "panel",
                vec![],
                vec![Node::text("<div>"), Node::Yield, Node::text("</div>")],
            )
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_if_elif_else() {
        assert_eq!(
            body("{% if a %}A{% elif b %}B{% else %}C{% endif %}"),
            vec![Node::if_else(
                Node::path("a"),
                vec![Node::text("A")],
                vec![Node::if_else(
                    Node::path("b"),
                    vec![Node::text("B")],
                    vec![Node::text("C")],
                )],
            )]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_else_if_spelling() {
        assert_eq!(
            body("{% if a %}A{% else if b %}B{% endif %}"),
            vec![Node::if_else(
                Node::path("a"),
                vec![Node::text("A")],
                vec![Node::if_else(Node::path("b"), vec![Node::text("B")], vec![])],
            )]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_condition_grouping() {
        assert_eq!(
            body("{% if (a or b) and not c %}{% endif %}"),
            vec![Node::if_else(
                Node::condition(vec![
                    Node::group(Node::condition(vec![
                        Node::path("a"),
                        Node::boolean_operand("or"),
                        Node::path("b"),
                    ])),
                    Node::boolean_operand("and"),
                    Node::expression(vec![Node::operand("not"), Node::path("c")]),
                ]),
                vec![],
                vec![],
            )]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_symbolic_boolean_operators() {
        assert_eq!(
            body("{% if a && !b || c %}{% endif %}"),
            vec![Node::if_else(
                Node::condition(vec![
                    Node::path("a"),
                    Node::boolean_operand("and"),
                    Node::expression(vec![Node::operand("not"), Node::path("b")]),
                    Node::boolean_operand("or"),
                    Node::path("c"),
                ]),
                vec![],
                vec![],
            )]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_for_loops() {
        assert_eq!(
            body("{% for item in items %}{{ item }}{% endfor %}"),
            vec![Node::for_each(
                None,
                "item",
                Node::path("items"),
                vec![Node::output(Node::path("item"))],
            )]
        );
        assert_eq!(
            body("{% for key, value in map %}{{ key }}{% endfor %}"),
            vec![Node::for_each(
                Some("key"),
                "value",
                Node::path("map"),
                vec![Node::output(Node::path("key"))],
            )]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_for_else() {
        assert_eq!(
            body("{% for i in items %}x{% else %}none{% endfor %}"),
            vec![Node::if_else(
                Node::path("items"),
                vec![Node::for_each(
                    None,
                    "i",
                    Node::path("items"),
                    vec![Node::text("x")],
                )],
                vec![Node::text("none")],
            )]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_whitespace_control() {
        assert_eq!(
            body("<ul>\n  {%- for i in xs -%}\n  <li>{{ i }}</li>\n  {%- endfor -%}\n</ul>"),
            vec![
                Node::text("<ul>"),
                Node::for_each(
                    None,
                    "i",
                    Node::path("xs"),
                    vec![
                        Node::text("<li>"),
                        Node::output(Node::path("i")),
                        Node::text("</li>"),
                    ],
                ),
                Node::text("</ul>"),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comments_are_dropped_and_text_merged() {
        assert_eq!(
            body("<p>a{# note #}b</p>\n"),
            vec![Node::text("<p>ab</p>\n")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_imports_are_skipped() {
        assert_eq!(
            body("{% from \"atoms/icon.njk\" import icon %}<i></i>"),
            vec![Node::text("<i></i>")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_doc_comment_attaches_to_macro() {
        let root = parse("/**\n * Primary button.\n */\n{% macro button() %}{% endmacro %}\n")
            .unwrap();
        let Node::Macro { doc, .. } = root else {
            panic!("Expected a MacroNode, got {:?}", root);
        };
        assert_eq!(doc.as_deref(), Some("Primary button."));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_only_first_doc_block_is_used() {
        let root = parse("{# first #}\n{# second #}\n{% macro a() %}{% endmacro %}").unwrap();
        let Node::Macro { doc, .. } = root else {
            panic!("Expected a MacroNode, got {:?}", root);
        };
        assert_eq!(doc.as_deref(), Some("first"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_doc_comment_without_macro_stays_text() {
        assert_eq!(
            body("/** note */\n<p>x</p>"),
            vec![Node::text("/** note */\n<p>x</p>")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_doc_comment_in_macro_body_is_text() {
        assert_eq!(
            parse("{% macro a() %}/** x */{% endmacro %}").unwrap(),
            Node::macro_def("a", vec![], vec![Node::text("/** x */")])
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_unclosed_output() {
        let err = parse("{{ name").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnexpectedEOF { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_empty_output() {
        let err = parse("{{ }}").unwrap_err();
        assert!(
            matches!(err.kind, ParseErrorKind::Expected { ref description } if description == "expression")
        );
        assert_eq!(err.fragment, "}}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_unknown_keyword() {
        let err = parse("text {% frobnicate %}").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UnknownKeyword {
                keyword: "frobnicate".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_unterminated_string_points_at_quote() {
        let err = parse("line\n{{ 'abc }}").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Unterminated { .. }));
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 4);
        assert!(err.fragment.starts_with("'abc"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_unclosed_block() {
        let err = parse("{% if a %}x").unwrap_err();
        assert!(
            matches!(err.kind, ParseErrorKind::UnexpectedEOF { ref expected_what } if expected_what.contains("endif"))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_for_without_in() {
        let err = parse("{% for x of xs %}{% endfor %}").unwrap_err();
        assert!(
            matches!(err.kind, ParseErrorKind::Expected { ref description } if description == "'in'")
        );
    }
}
