use std::fmt::{self, Display, Write};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One argument of a directive.
///
/// The variant decides how the value is written out. Values from the declared state go through
/// [`Token::value`] or [`Token::quoted`], so whitespace, quotes and braces in them can never
/// end a token early or open a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Written verbatim. Only for fixed keywords and placeholders.
    Bare(String),

    /// Written in double quotes with embedded quotes escaped.
    Quoted(String),

    /// Written between backticks, without any escaping.
    Backtick(String),
}

/// A directive with its arguments and optional sub-block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    name: String,
    args: Vec<Token>,
    block: Option<Vec<Line>>,
}

/// One line inside a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A directive.
    Directive(Directive),

    /// A `#` comment.
    Comment(String),

    /// An empty line.
    Blank,
}

/// A top-level block. Without addresses it is the global options block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    comments: Vec<String>,
    addresses: Vec<String>,
    lines: Vec<Line>,
}

/// A whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caddyfile {
    header: Vec<String>,
    blocks: Vec<Block>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Token {
    /// A fixed keyword or placeholder such as `{http.request.host}`.
    pub fn bare(value: impl Into<String>) -> Self {
        Token::Bare(value.into())
    }

    /// An untrusted value: bare when it is plainly safe, otherwise quoted.
    pub fn value(value: impl Into<String>) -> Self {
        let value = value.into();
        if is_plain(&value) {
            Token::Bare(value)
        } else {
            Token::Quoted(value)
        }
    }

    /// An untrusted value that is always quoted.
    pub fn quoted(value: impl Into<String>) -> Self {
        Token::Quoted(value.into())
    }

    /// A large literal such as an HTML page. Falls back to double quotes if it contains a
    /// backtick.
    pub fn literal(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.contains('`') {
            Token::Quoted(value)
        } else {
            Token::Backtick(value)
        }
    }
}

impl Directive {
    /// Creates a directive without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            block: None,
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, token: Token) -> Self {
        self.args.push(token);
        self
    }

    /// Appends several arguments.
    pub fn args(mut self, tokens: impl IntoIterator<Item = Token>) -> Self {
        self.args.extend(tokens);
        self
    }

    /// Appends a sub-directive, opening the sub-block if needed.
    pub fn child(self, directive: Directive) -> Self {
        self.line(Line::Directive(directive))
    }

    /// Appends a comment to the sub-block.
    pub fn comment(self, text: impl Into<String>) -> Self {
        self.line(Line::Comment(text.into()))
    }

    /// Opens an empty sub-block.
    pub fn with_block(mut self) -> Self {
        self.block.get_or_insert_with(Vec::new);
        self
    }

    /// Returns true if the directive has a sub-block.
    pub fn has_block(&self) -> bool {
        self.block.is_some()
    }

    /// The directive name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The arguments.
    pub fn get_args(&self) -> &[Token] {
        &self.args
    }

    /// The sub-directives, if any.
    pub fn children(&self) -> impl Iterator<Item = &Directive> {
        self.block.iter().flatten().filter_map(Line::as_directive)
    }

    fn line(mut self, line: Line) -> Self {
        self.block.get_or_insert_with(Vec::new).push(line);
        self
    }

    fn write(&self, out: &mut String, depth: usize) -> fmt::Result {
        indent(out, depth);
        out.push_str(&self.name);
        for arg in &self.args {
            write!(out, " {arg}")?;
        }

        match &self.block {
            None => out.push('\n'),
            Some(lines) => {
                out.push_str(" {\n");
                write_lines(out, lines, depth + 1)?;
                indent(out, depth);
                out.push_str("}\n");
            }
        }

        Ok(())
    }
}

impl Line {
    /// The directive on this line, if it is one.
    pub fn as_directive(&self) -> Option<&Directive> {
        match self {
            Line::Directive(directive) => Some(directive),
            _ => None,
        }
    }
}

impl Block {
    /// The global options block.
    pub fn global() -> Self {
        Self::default()
    }

    /// A site block for `addresses`.
    pub fn site(addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds a comment above the block.
    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comments.push(text.into());
        self
    }

    /// Appends a directive.
    pub fn directive(mut self, directive: Directive) -> Self {
        self.lines.push(Line::Directive(directive));
        self
    }

    /// Appends a comment inside the block.
    pub fn inner_comment(mut self, text: impl Into<String>) -> Self {
        self.lines.push(Line::Comment(text.into()));
        self
    }

    /// Appends an empty line.
    pub fn blank(mut self) -> Self {
        self.lines.push(Line::Blank);
        self
    }

    /// The addresses this block serves.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Returns true for the global options block.
    pub fn is_global(&self) -> bool {
        self.addresses.is_empty()
    }

    /// The top-level directives.
    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.lines.iter().filter_map(Line::as_directive)
    }

    fn write(&self, out: &mut String) -> fmt::Result {
        for comment in &self.comments {
            write_comment(out, comment, 0);
        }

        if !self.is_global() {
            out.push_str(&self.addresses.join(", "));
            out.push(' ');
        }

        out.push_str("{\n");
        write_lines(out, &self.lines, 1)?;
        out.push_str("}\n");
        Ok(())
    }
}

impl Caddyfile {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a comment line to the document header.
    pub fn header(mut self, text: impl Into<String>) -> Self {
        self.header.push(text.into());
        self
    }

    /// Appends a top-level block.
    pub fn block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    /// The top-level blocks in order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The site blocks, skipping the global options block.
    pub fn site_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| !b.is_global())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn is_plain(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('@')
        && value.chars().all(|c| {
            !c.is_whitespace() && !c.is_control() && !matches!(c, '"' | '`' | '{' | '}' | '#' | '\\')
        })
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn write_comment(out: &mut String, text: &str, depth: usize) {
    indent(out, depth);
    out.push_str("# ");
    for c in text.chars() {
        out.push(if c.is_control() { ' ' } else { c });
    }
    out.push('\n');
}

fn write_lines(out: &mut String, lines: &[Line], depth: usize) -> fmt::Result {
    for line in lines {
        match line {
            Line::Directive(directive) => directive.write(out, depth)?,
            Line::Comment(text) => write_comment(out, text, depth),
            Line::Blank => out.push('\n'),
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Bare(value) => f.write_str(value),
            Token::Quoted(value) if value.contains('\\') && !value.contains('`') => {
                write!(f, "`{value}`")
            }
            Token::Quoted(value) => {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\"")
            }
            Token::Backtick(value) => write!(f, "`{value}`"),
        }
    }
}

impl From<u16> for Token {
    fn from(value: u16) -> Self {
        Token::Bare(value.to_string())
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token::Bare(value.to_string())
    }
}

impl Display for Caddyfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for line in &self.header {
            write_comment(&mut out, line, 0);
        }

        for block in &self.blocks {
            if !out.is_empty() {
                out.push('\n');
            }
            block.write(&mut out)?;
        }

        f.write_str(&out)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
