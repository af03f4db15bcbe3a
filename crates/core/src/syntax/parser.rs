//! Recursive-descent parser for generated fragments.
//!
//! Parses usings, namespaces (block and file-scoped), type declarations,
//! and member signatures. Member bodies are captured verbatim from the
//! source by byte span and kept opaque.

use thiserror::Error;

use super::ast::{
    CompilationUnit, Member, MemberBody, MemberKind, Modifiers, NamespaceDecl, Parameter,
    TypeDecl, TypeKind,
};
use super::lexer::{lex, Token, TokenKind};

/// Parse failure. Carried as a non-fixable diagnostic by the fragment
/// compiler rather than bubbling as a run error.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    #[error("unterminated string literal at line {line}")]
    UnterminatedString { line: usize },
    #[error("unterminated comment at line {line}")]
    UnterminatedComment { line: usize },
    #[error("unexpected end of fragment while parsing {context}")]
    UnexpectedEnd { context: String },
    #[error("unexpected token '{found}' at line {line}, expected {expected}")]
    Unexpected {
        line: usize,
        found: String,
        expected: String,
    },
}

/// Parse a fragment into a [`CompilationUnit`].
pub fn parse_unit(source: &str) -> Result<CompilationUnit, ParseError> {
    let tokens = lex(source)?;
    Parser {
        source,
        tokens,
        pos: 0,
    }
    .compilation_unit()
}

const MODIFIER_KEYWORDS: &[&str] = &[
    "public", "private", "protected", "internal", "static", "sealed", "abstract", "partial",
    "readonly", "virtual", "override", "async", "const", "new", "required",
];

const VISIBILITY_KEYWORDS: &[&str] = &["public", "private", "protected", "internal"];

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn bump(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn current_line(&self) -> usize {
        self.peek().map_or(0, |t| t.line)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(tok) => ParseError::Unexpected {
                line: tok.line,
                found: render_kind(&tok.kind),
                expected: expected.to_string(),
            },
            None => ParseError::UnexpectedEnd {
                context: expected.to_string(),
            },
        }
    }

    fn expect_punct(&mut self, c: char, context: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(tok) if tok.is_punct(c) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.unexpected(&format!("'{c}' in {context}"))),
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(tok) => match tok.ident() {
                Some(name) => {
                    let name = name.to_string();
                    self.pos += 1;
                    Ok(name)
                }
                None => Err(self.unexpected(&format!("identifier in {context}"))),
            },
            None => Err(ParseError::UnexpectedEnd {
                context: context.to_string(),
            }),
        }
    }

    fn compilation_unit(mut self) -> Result<CompilationUnit, ParseError> {
        let mut unit = CompilationUnit::default();
        // Types after a file-scoped `namespace X;` accumulate there.
        let mut file_scope: Option<usize> = None;

        while let Some(tok) = self.peek() {
            if tok.is_ident("using") {
                self.pos += 1;
                unit.usings.push(self.using_directive()?);
            } else if tok.is_ident("namespace") {
                self.pos += 1;
                let name = self.qualified_name("namespace name")?;
                if self.peek().is_some_and(|t| t.is_punct(';')) {
                    self.pos += 1;
                    unit.namespaces.push(NamespaceDecl {
                        name,
                        types: Vec::new(),
                    });
                    file_scope = Some(unit.namespaces.len() - 1);
                } else {
                    self.expect_punct('{', "namespace body")?;
                    let mut types = Vec::new();
                    while self.peek().is_some_and(|t| !t.is_punct('}')) {
                        types.push(self.type_decl()?);
                    }
                    self.expect_punct('}', "namespace body")?;
                    unit.namespaces.push(NamespaceDecl { name, types });
                }
            } else {
                let decl = self.type_decl()?;
                match file_scope {
                    Some(idx) => unit.namespaces[idx].types.push(decl),
                    None => unit.global_types.push(decl),
                }
            }
        }

        Ok(unit)
    }

    /// `using A.B.C;`; also tolerates `using static A.B;`.
    fn using_directive(&mut self) -> Result<String, ParseError> {
        let mut parts = Vec::new();
        if self.peek().is_some_and(|t| t.is_ident("static")) {
            self.pos += 1;
            parts.push("static".to_string());
        }
        let name = self.qualified_name("using directive")?;
        parts.push(name);
        self.expect_punct(';', "using directive")?;
        Ok(parts.join(" "))
    }

    /// Dotted identifier path.
    fn qualified_name(&mut self, context: &str) -> Result<String, ParseError> {
        let mut name = self.expect_ident(context)?;
        while self.peek().is_some_and(|t| t.is_punct('.')) {
            self.pos += 1;
            name.push('.');
            name.push_str(&self.expect_ident(context)?);
        }
        Ok(name)
    }

    /// A type reference: qualified name, optional generic arguments,
    /// optional array/nullable suffixes. Rendered back to a string.
    fn type_ref(&mut self, context: &str) -> Result<String, ParseError> {
        let mut text = self.qualified_name(context)?;
        if self.peek().is_some_and(|t| t.is_punct('<')) {
            self.pos += 1;
            text.push('<');
            text.push_str(&self.type_ref(context)?);
            while self.peek().is_some_and(|t| t.is_punct(',')) {
                self.pos += 1;
                text.push_str(", ");
                text.push_str(&self.type_ref(context)?);
            }
            self.expect_punct('>', context)?;
            text.push('>');
        }
        loop {
            if self.peek().is_some_and(|t| t.is_punct('?')) {
                self.pos += 1;
                text.push('?');
            } else if self.peek().is_some_and(|t| t.is_punct('['))
                && self.peek_at(1).is_some_and(|t| t.is_punct(']'))
            {
                self.pos += 2;
                text.push_str("[]");
            } else {
                break;
            }
        }
        Ok(text)
    }

    /// Skip `[Attribute(...)]` groups.
    fn skip_attributes(&mut self) -> Result<(), ParseError> {
        while self.peek().is_some_and(|t| t.is_punct('[')) {
            let mut depth = 0usize;
            loop {
                let Some(tok) = self.bump() else {
                    return Err(ParseError::UnexpectedEnd {
                        context: "attribute list".to_string(),
                    });
                };
                if tok.is_punct('[') {
                    depth += 1;
                } else if tok.is_punct(']') {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn modifiers(&mut self) -> Modifiers {
        let mut mods = Modifiers::default();
        while let Some(tok) = self.peek() {
            let Some(word) = tok.ident() else { break };
            if !MODIFIER_KEYWORDS.contains(&word) {
                break;
            }
            let word = word.to_string();
            match word.as_str() {
                w if VISIBILITY_KEYWORDS.contains(&w) => mods.visibility = Some(word.clone()),
                "static" => mods.is_static = true,
                "sealed" => mods.is_sealed = true,
                "abstract" => mods.is_abstract = true,
                "partial" => mods.is_partial = true,
                "readonly" => mods.is_readonly = true,
                other => mods.extra.push(other.to_string()),
            }
            self.pos += 1;
        }
        mods
    }

    fn type_decl(&mut self) -> Result<TypeDecl, ParseError> {
        self.skip_attributes()?;
        let line = self.current_line();
        let modifiers = self.modifiers();

        let kind = match self.peek().and_then(Token::ident) {
            Some("class") => TypeKind::Class,
            Some("interface") => TypeKind::Interface,
            Some("enum") => TypeKind::Enum,
            Some("struct") => TypeKind::Struct,
            Some("record") => TypeKind::Record,
            _ => return Err(self.unexpected("type declaration keyword")),
        };
        self.pos += 1;

        let mut name = self.expect_ident("type name")?;
        // Generic parameter list folds into the declared name.
        if self.peek().is_some_and(|t| t.is_punct('<')) {
            let start = self.pos;
            let mut depth = 0usize;
            loop {
                let Some(tok) = self.bump() else {
                    return Err(ParseError::UnexpectedEnd {
                        context: "generic parameter list".to_string(),
                    });
                };
                if tok.is_punct('<') {
                    depth += 1;
                } else if tok.is_punct('>') {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
            }
            let rendered: String = self.tokens[start..self.pos]
                .iter()
                .map(|t| render_kind(&t.kind))
                .collect();
            name.push_str(&rendered);
        }

        let mut base_list = Vec::new();
        if self.peek().is_some_and(|t| t.is_punct(':')) {
            self.pos += 1;
            base_list.push(self.type_ref("base list")?);
            while self.peek().is_some_and(|t| t.is_punct(',')) {
                self.pos += 1;
                base_list.push(self.type_ref("base list")?);
            }
        }

        // `where T : ...` constraints are skipped up to the body.
        while self.peek().is_some_and(|t| t.is_ident("where")) {
            while self
                .peek()
                .is_some_and(|t| !t.is_punct('{') && !t.is_punct(';'))
            {
                self.pos += 1;
            }
        }

        if self.peek().is_some_and(|t| t.is_punct(';')) {
            self.pos += 1;
            return Ok(TypeDecl {
                kind,
                modifiers,
                name,
                base_list,
                members: Vec::new(),
                line,
            });
        }

        self.expect_punct('{', "type body")?;
        let members = if kind == TypeKind::Enum {
            self.enum_variants()?
        } else {
            let mut members = Vec::new();
            while self.peek().is_some_and(|t| !t.is_punct('}')) {
                members.push(self.member(&name)?);
            }
            members
        };
        self.expect_punct('}', "type body")?;
        // Optional trailing semicolon after a type body.
        if self.peek().is_some_and(|t| t.is_punct(';')) {
            self.pos += 1;
        }

        Ok(TypeDecl {
            kind,
            modifiers,
            name,
            base_list,
            members,
            line,
        })
    }

    fn enum_variants(&mut self) -> Result<Vec<Member>, ParseError> {
        let mut members = Vec::new();
        while self.peek().is_some_and(|t| !t.is_punct('}')) {
            self.skip_attributes()?;
            let line = self.current_line();
            let name = self.expect_ident("enum variant")?;
            let mut initializer = None;
            if self.peek().is_some_and(|t| t.is_punct('=')) {
                self.pos += 1;
                let mut text = String::new();
                while self
                    .peek()
                    .is_some_and(|t| !t.is_punct(',') && !t.is_punct('}'))
                {
                    let tok = self.bump().ok_or_else(|| ParseError::UnexpectedEnd {
                        context: "enum variant value".to_string(),
                    })?;
                    text.push_str(&render_kind(&tok.kind));
                }
                initializer = Some(text);
            }
            members.push(Member {
                kind: MemberKind::EnumVariant,
                modifiers: Modifiers::default(),
                return_type: String::new(),
                name,
                parameters: Vec::new(),
                body: MemberBody::None,
                initializer,
                line,
            });
            if self.peek().is_some_and(|t| t.is_punct(',')) {
                self.pos += 1;
            }
        }
        Ok(members)
    }

    fn member(&mut self, enclosing_type: &str) -> Result<Member, ParseError> {
        self.skip_attributes()?;
        let line = self.current_line();
        let modifiers = self.modifiers();

        // Constructor: the enclosing type's bare name followed by '('.
        let bare_type_name = enclosing_type.split('<').next().unwrap_or(enclosing_type);
        if self.peek().is_some_and(|t| t.is_ident(bare_type_name))
            && self.peek_at(1).is_some_and(|t| t.is_punct('('))
        {
            let name = self.expect_ident("constructor name")?;
            let parameters = self.parameter_list()?;
            // `: base(...)` / `: this(...)` initializer.
            if self.peek().is_some_and(|t| t.is_punct(':')) {
                while self.peek().is_some_and(|t| !t.is_punct('{')) {
                    self.pos += 1;
                }
            }
            let body = self.member_tail("constructor body")?;
            return Ok(Member {
                kind: MemberKind::Constructor,
                modifiers,
                return_type: String::new(),
                name,
                parameters,
                body,
                initializer: None,
                line,
            });
        }

        let return_type = self.type_ref("member type")?;
        let name = self.expect_ident("member name")?;

        match self.peek() {
            Some(tok) if tok.is_punct('(') => {
                let parameters = self.parameter_list()?;
                let body = self.member_tail("method body")?;
                Ok(Member {
                    kind: MemberKind::Method,
                    modifiers,
                    return_type,
                    name,
                    parameters,
                    body,
                    initializer: None,
                    line,
                })
            }
            Some(tok) if tok.is_punct('{') => {
                let body = self.balanced_block("property body")?;
                // Auto-property initializer: `{ get; set; } = value;`
                let mut initializer = None;
                if self.peek().is_some_and(|t| t.is_punct('=')) {
                    self.pos += 1;
                    initializer = Some(self.expression_text("property initializer")?);
                    self.expect_punct(';', "property initializer")?;
                }
                Ok(Member {
                    kind: MemberKind::Property,
                    modifiers,
                    return_type,
                    name,
                    parameters: Vec::new(),
                    body: MemberBody::Block(body),
                    initializer,
                    line,
                })
            }
            Some(tok) if tok.is_punct('=') => {
                // Field with initializer, or `=> expr;` expression property.
                if self.peek_at(1).is_some_and(|t| t.is_punct('>')) {
                    let body = self.expression_body()?;
                    return Ok(Member {
                        kind: MemberKind::Property,
                        modifiers,
                        return_type,
                        name,
                        parameters: Vec::new(),
                        body,
                        initializer: None,
                        line,
                    });
                }
                self.pos += 1;
                let initializer = Some(self.expression_text("field initializer")?);
                self.expect_punct(';', "field declaration")?;
                Ok(Member {
                    kind: MemberKind::Field,
                    modifiers,
                    return_type,
                    name,
                    parameters: Vec::new(),
                    body: MemberBody::None,
                    initializer,
                    line,
                })
            }
            Some(tok) if tok.is_punct(';') => {
                self.pos += 1;
                Ok(Member {
                    kind: MemberKind::Field,
                    modifiers,
                    return_type,
                    name,
                    parameters: Vec::new(),
                    body: MemberBody::None,
                    initializer: None,
                    line,
                })
            }
            _ => Err(self.unexpected("member body")),
        }
    }

    /// After a method's parameter list: block body, `=> expr;`, or `;`.
    fn member_tail(&mut self, context: &str) -> Result<MemberBody, ParseError> {
        match self.peek() {
            Some(tok) if tok.is_punct('{') => {
                Ok(MemberBody::Block(self.balanced_block(context)?))
            }
            Some(tok) if tok.is_punct('=') && self.peek_at(1).is_some_and(|t| t.is_punct('>')) => {
                self.expression_body()
            }
            Some(tok) if tok.is_punct(';') => {
                self.pos += 1;
                Ok(MemberBody::None)
            }
            _ => Err(self.unexpected(context)),
        }
    }

    /// `=> expr;` captured verbatim.
    fn expression_body(&mut self) -> Result<MemberBody, ParseError> {
        let start = self
            .peek()
            .map(|t| t.start)
            .ok_or_else(|| ParseError::UnexpectedEnd {
                context: "expression body".to_string(),
            })?;
        // Consume `=>`.
        self.pos += 2;
        let mut depth = 0usize;
        loop {
            let Some(tok) = self.bump() else {
                return Err(ParseError::UnexpectedEnd {
                    context: "expression body".to_string(),
                });
            };
            match &tok.kind {
                TokenKind::Punct('(') | TokenKind::Punct('{') | TokenKind::Punct('[') => depth += 1,
                TokenKind::Punct(')') | TokenKind::Punct('}') | TokenKind::Punct(']') => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::Punct(';') if depth == 0 => {
                    let end = tok.end;
                    return Ok(MemberBody::Expression(self.source[start..end].to_string()));
                }
                _ => {}
            }
        }
    }

    /// Raw expression text up to an unnested `;` or `,`, exclusive.
    fn expression_text(&mut self, context: &str) -> Result<String, ParseError> {
        let start = self
            .peek()
            .map(|t| t.start)
            .ok_or_else(|| ParseError::UnexpectedEnd {
                context: context.to_string(),
            })?;
        let mut end = start;
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match &tok.kind {
                TokenKind::Punct('(') | TokenKind::Punct('{') | TokenKind::Punct('[') => depth += 1,
                TokenKind::Punct(')') | TokenKind::Punct('}') | TokenKind::Punct(']') => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                TokenKind::Punct(';') | TokenKind::Punct(',') if depth == 0 => break,
                _ => {}
            }
            end = tok.end;
            self.pos += 1;
        }
        Ok(self.source[start..end].to_string())
    }

    /// Balanced `{ ... }` captured verbatim, including the braces.
    fn balanced_block(&mut self, context: &str) -> Result<String, ParseError> {
        let start = match self.peek() {
            Some(tok) if tok.is_punct('{') => tok.start,
            _ => return Err(self.unexpected(context)),
        };
        let mut depth = 0usize;
        loop {
            let Some(tok) = self.bump() else {
                return Err(ParseError::UnexpectedEnd {
                    context: context.to_string(),
                });
            };
            if tok.is_punct('{') {
                depth += 1;
            } else if tok.is_punct('}') {
                depth -= 1;
                if depth == 0 {
                    let end = tok.end;
                    return Ok(self.source[start..end].to_string());
                }
            }
        }
    }

    fn parameter_list(&mut self) -> Result<Vec<Parameter>, ParseError> {
        self.expect_punct('(', "parameter list")?;
        let mut parameters = Vec::new();
        while self.peek().is_some_and(|t| !t.is_punct(')')) {
            self.skip_attributes()?;
            // Parameter modifiers are dropped from the model.
            while self
                .peek()
                .and_then(Token::ident)
                .is_some_and(|w| matches!(w, "ref" | "out" | "in" | "params" | "this"))
            {
                self.pos += 1;
            }
            let type_name = self.type_ref("parameter type")?;
            let name = self.expect_ident("parameter name")?;
            // Default value.
            if self.peek().is_some_and(|t| t.is_punct('=')) {
                self.pos += 1;
                self.expression_text("parameter default")?;
            }
            parameters.push(Parameter { type_name, name });
            if self.peek().is_some_and(|t| t.is_punct(',')) {
                self.pos += 1;
            }
        }
        self.expect_punct(')', "parameter list")?;
        Ok(parameters)
    }
}

fn render_kind(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(s) | TokenKind::Number(s) => s.clone(),
        TokenKind::Punct(c) => c.to_string(),
        TokenKind::Str(s) => format!("\"{s}\""),
        TokenKind::Char(s) => format!("'{s}'"),
    }
}
