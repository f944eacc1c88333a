//! Conservative TypeScript-to-CommonJS conversion for remote route
//! modules: strips type syntax, rewrites `import`/`export` into
//! `require`/`exports`, and wraps the result in an IIFE the module
//! loader can call. Token-level and tolerant: anything it does not
//! recognize passes through, and real syntax errors surface at eval
//! with the module path in the message.

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Punct(char),
    /// String, template, or regex literal, kept verbatim.
    Lit(String),
    Newline,
}

pub fn to_common_js(source: &str) -> String {
    let tokens = lex(source);
    let mut rewriter = Rewriter::new(tokens);
    rewriter.run();
    let mut body = render(&rewriter.out);
    if !rewriter.appended.is_empty() || rewriter.saw_export {
        body.push('\n');
        body.push_str("exports.__esModule = true;\n");
        for line in &rewriter.appended {
            body.push_str(line);
            body.push('\n');
        }
    }
    format!("(function (exports, require, module) {{\n{body}\n}})")
}

fn lex(source: &str) -> Vec<Tok> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                tokens.push(Tok::Newline);
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            '\'' | '"' => {
                let (lit, next) = lex_string(&chars, i, c);
                tokens.push(Tok::Lit(lit));
                i = next;
            }
            '`' => {
                let (lit, next) = lex_template(&chars, i);
                tokens.push(Tok::Lit(lit));
                i = next;
            }
            '/' if regex_can_follow(tokens.last_significant()) => {
                let (lit, next) = lex_regex(&chars, i);
                tokens.push(Tok::Lit(lit));
                i = next;
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' || c == '#' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '#'))
                {
                    i += 1;
                }
                tokens.push(Tok::Word(chars[start..i].iter().collect()));
            }
            other => {
                tokens.push(Tok::Punct(other));
                i += 1;
            }
        }
    }
    tokens
}

trait LastSignificant {
    fn last_significant(&self) -> Option<&Tok>;
}

impl LastSignificant for Vec<Tok> {
    fn last_significant(&self) -> Option<&Tok> {
        self.iter().rev().find(|tok| **tok != Tok::Newline)
    }
}

fn regex_can_follow(prev: Option<&Tok>) -> bool {
    match prev {
        None => true,
        Some(Tok::Punct(p)) => !matches!(p, ')' | ']'),
        Some(Tok::Word(w)) => matches!(
            w.as_str(),
            "return" | "typeof" | "case" | "in" | "of" | "instanceof" | "new" | "delete" | "void"
        ),
        _ => false,
    }
}

fn lex_string(chars: &[char], start: usize, quote: char) -> (String, usize) {
    let mut out = String::new();
    out.push(quote);
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;
        if c == '\\' {
            if let Some(escaped) = chars.get(i) {
                out.push(*escaped);
                i += 1;
            }
        } else if c == quote {
            break;
        }
    }
    (out, i)
}

fn lex_template(chars: &[char], start: usize) -> (String, usize) {
    let mut out = String::new();
    out.push('`');
    let mut i = start + 1;
    let mut brace_depth = 0usize;
    let mut in_expr = false;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;
        if c == '\\' {
            if let Some(escaped) = chars.get(i) {
                out.push(*escaped);
                i += 1;
            }
        } else if in_expr {
            match c {
                '{' => brace_depth += 1,
                '}' => {
                    if brace_depth == 0 {
                        in_expr = false;
                    } else {
                        brace_depth -= 1;
                    }
                }
                _ => {}
            }
        } else if c == '$' && chars.get(i) == Some(&'{') {
            out.push('{');
            i += 1;
            in_expr = true;
            brace_depth = 0;
        } else if c == '`' {
            break;
        }
    }
    (out, i)
}

fn lex_regex(chars: &[char], start: usize) -> (String, usize) {
    let mut out = String::new();
    out.push('/');
    let mut i = start + 1;
    let mut in_class = false;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;
        match c {
            '\\' => {
                if let Some(escaped) = chars.get(i) {
                    out.push(*escaped);
                    i += 1;
                }
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => break,
            '\n' => break,
            _ => {}
        }
    }
    while i < chars.len() && chars[i].is_alphabetic() {
        out.push(chars[i]);
        i += 1;
    }
    (out, i)
}

struct Rewriter {
    tokens: Vec<Tok>,
    pos: usize,
    out: Vec<Tok>,
    appended: Vec<String>,
    saw_export: bool,
    import_counter: usize,
    /// Bracket stack for annotation context, with a ternary counter
    /// per level so `cond ? a : b` keeps its colon.
    brackets: Vec<(char, usize)>,
    decl_colon_ok: bool,
}

impl Rewriter {
    fn new(tokens: Vec<Tok>) -> Self {
        Rewriter {
            tokens,
            pos: 0,
            out: Vec::new(),
            appended: Vec::new(),
            saw_export: false,
            import_counter: 0,
            brackets: Vec::new(),
            decl_colon_ok: false,
        }
    }

    fn peek(&self, offset: usize) -> Option<&Tok> {
        let mut seen = 0;
        for tok in &self.tokens[self.pos..] {
            if *tok == Tok::Newline {
                continue;
            }
            if seen == offset {
                return Some(tok);
            }
            seen += 1;
        }
        None
    }

    fn next_significant(&mut self) -> Option<Tok> {
        while self.pos < self.tokens.len() {
            let tok = self.tokens[self.pos].clone();
            self.pos += 1;
            if tok != Tok::Newline {
                return Some(tok);
            }
        }
        None
    }

    fn depth(&self) -> usize {
        self.brackets.len()
    }

    fn last_out(&self) -> Option<&Tok> {
        self.out.iter().rev().find(|tok| **tok != Tok::Newline)
    }

    fn push_raw(&mut self, text: &str) {
        self.out.push(Tok::Word(text.to_string()));
    }

    fn run(&mut self) {
        while self.pos < self.tokens.len() {
            let tok = self.tokens[self.pos].clone();
            match &tok {
                Tok::Newline => {
                    self.out.push(tok);
                    self.pos += 1;
                }
                Tok::Lit(_) => {
                    self.out.push(tok);
                    self.pos += 1;
                }
                Tok::Punct(p) => {
                    self.handle_punct(*p);
                }
                Tok::Word(word) => {
                    self.handle_word(word.clone());
                }
            }
        }
    }

    fn handle_punct(&mut self, p: char) {
        match p {
            '(' | '[' | '{' => {
                self.brackets.push((p, 0));
                self.out.push(Tok::Punct(p));
                self.pos += 1;
            }
            ')' | ']' | '}' => {
                self.brackets.pop();
                self.out.push(Tok::Punct(p));
                self.pos += 1;
                // Return-type annotation: `): T {` or `): T =>`.
                if p == ')'
                    && self.peek(0) == Some(&Tok::Punct(':'))
                    && self.looks_like_return_type()
                {
                    self.next_significant(); // the ':'
                    self.skip_type(&[Tok::Punct('{'), Tok::Punct(';'), Tok::Punct(',')], true);
                }
            }
            '?' => {
                // Optional marker `x?: T` disappears with its type;
                // anything else is ternary/optional-chaining.
                if self.peek(1) == Some(&Tok::Punct(':'))
                    && matches!(self.last_out(), Some(Tok::Word(_)))
                    && self.in_parens()
                {
                    self.next_significant(); // '?'
                    self.next_significant(); // ':'
                    self.skip_type(&[Tok::Punct(','), Tok::Punct(')'), Tok::Punct('=')], false);
                } else {
                    if self.peek(1) != Some(&Tok::Punct('.'))
                        && self.peek(1) != Some(&Tok::Punct('?'))
                    {
                        if let Some((_, ternaries)) = self.brackets.last_mut() {
                            *ternaries += 1;
                        }
                    }
                    self.out.push(Tok::Punct('?'));
                    self.pos += 1;
                }
            }
            ':' => {
                let ternary_pending = self
                    .brackets
                    .last()
                    .map(|(_, ternaries)| *ternaries > 0)
                    .unwrap_or(false);
                if ternary_pending {
                    if let Some((_, ternaries)) = self.brackets.last_mut() {
                        *ternaries -= 1;
                    }
                    self.out.push(Tok::Punct(':'));
                    self.pos += 1;
                } else if self.in_parens() && matches!(self.last_out(), Some(Tok::Word(_))) {
                    // Parameter annotation.
                    self.next_significant();
                    self.skip_type(&[Tok::Punct(','), Tok::Punct(')'), Tok::Punct('=')], false);
                } else if self.decl_colon_ok {
                    // `const x: T = ...`
                    self.next_significant();
                    self.skip_type(&[Tok::Punct('='), Tok::Punct(';'), Tok::Punct(',')], false);
                } else {
                    self.out.push(Tok::Punct(':'));
                    self.pos += 1;
                }
            }
            '!' => {
                // Non-null assertion: `x!.y`, `f()!)`, etc.
                let asserting = matches!(
                    self.last_out(),
                    Some(Tok::Word(_)) | Some(Tok::Punct(')')) | Some(Tok::Punct(']'))
                ) && matches!(
                    self.peek(1),
                    Some(Tok::Punct('.'))
                        | Some(Tok::Punct(')'))
                        | Some(Tok::Punct(','))
                        | Some(Tok::Punct(';'))
                        | Some(Tok::Punct(']'))
                );
                if asserting {
                    self.pos += 1;
                } else {
                    self.out.push(Tok::Punct('!'));
                    self.pos += 1;
                }
            }
            ';' | '=' => {
                self.decl_colon_ok = false;
                self.out.push(Tok::Punct(p));
                self.pos += 1;
            }
            other => {
                self.out.push(Tok::Punct(other));
                self.pos += 1;
            }
        }
    }

    fn in_parens(&self) -> bool {
        matches!(self.brackets.last(), Some(('(', _)))
    }

    fn looks_like_return_type(&self) -> bool {
        // Only outside expressions: a `)` at bracket depth 0 followed
        // by `:` is a function signature's return annotation.
        self.brackets.is_empty()
    }

    fn handle_word(&mut self, word: String) {
        match word.as_str() {
            "import" if self.depth() == 0 => self.rewrite_import(),
            "export" if self.depth() == 0 => self.rewrite_export(),
            "interface" if self.depth() == 0 => self.skip_interface(),
            "type" if self.depth() == 0 && self.is_type_alias() => self.skip_type_alias(),
            "declare" if self.depth() == 0 => self.skip_statement(),
            "enum" if self.depth() == 0 => self.rewrite_enum(),
            "as" | "satisfies" if self.is_cast_position() => {
                self.next_significant();
                self.skip_type(
                    &[
                        Tok::Punct(','),
                        Tok::Punct(')'),
                        Tok::Punct(']'),
                        Tok::Punct('}'),
                        Tok::Punct(';'),
                    ],
                    false,
                );
            }
            "const" | "let" | "var" => {
                self.decl_colon_ok = true;
                self.out.push(Tok::Word(word));
                self.pos += 1;
            }
            _ => {
                self.pos += 1;
                // Call-site / declaration generics: `name<T>(`.
                if self.peek(0) == Some(&Tok::Punct('<')) && self.try_skip_generics() {
                    // skipped
                }
                self.out.push(Tok::Word(word));
            }
        }
    }

    fn is_cast_position(&self) -> bool {
        matches!(
            self.last_out(),
            Some(Tok::Word(_)) | Some(Tok::Punct(')')) | Some(Tok::Punct(']')) | Some(Tok::Lit(_))
        ) && matches!(self.peek(1), Some(Tok::Word(_)) | Some(Tok::Punct('{')))
    }

    fn is_type_alias(&self) -> bool {
        matches!(self.peek(1), Some(Tok::Word(_)))
            && (self.peek(2) == Some(&Tok::Punct('='))
                || self.peek(2) == Some(&Tok::Punct('<')))
    }

    /// Balanced `<...>` immediately followed by `(`; only skipped when
    /// the span looks type-shaped.
    fn try_skip_generics(&mut self) -> bool {
        let mut depth = 0usize;
        let mut offset = 0usize;
        let mut scanned = 0usize;
        loop {
            let Some(tok) = self.peek(offset) else {
                return false;
            };
            scanned += 1;
            if scanned > 64 {
                return false;
            }
            match tok {
                Tok::Punct('<') => depth += 1,
                Tok::Punct('>') => {
                    depth -= 1;
                    if depth == 0 {
                        if self.peek(offset + 1) == Some(&Tok::Punct('(')) {
                            break;
                        }
                        return false;
                    }
                }
                Tok::Word(_)
                | Tok::Punct(',')
                | Tok::Punct('.')
                | Tok::Punct('[')
                | Tok::Punct(']')
                | Tok::Punct('|')
                | Tok::Punct('&')
                | Tok::Lit(_) => {}
                _ => return false,
            }
            offset += 1;
        }
        // Consume through the closing '>'.
        let mut depth = 0usize;
        loop {
            let Some(tok) = self.next_significant() else {
                return true;
            };
            match tok {
                Tok::Punct('<') => depth += 1,
                Tok::Punct('>') => {
                    depth -= 1;
                    if depth == 0 {
                        return true;
                    }
                }
                _ => {}
            }
        }
    }

    /// Consumes a type expression, stopping before any of `stops` at
    /// relative depth 0. `allow_arrow_stop` also stops before `=>`.
    fn skip_type(&mut self, stops: &[Tok], allow_arrow_stop: bool) {
        let mut depth = 0isize;
        loop {
            let Some(tok) = self.peek(0).cloned() else {
                return;
            };
            if depth == 0 {
                if stops.contains(&tok) {
                    return;
                }
                if allow_arrow_stop
                    && tok == Tok::Punct('=')
                    && self.peek(1) == Some(&Tok::Punct('>'))
                {
                    return;
                }
                if tok == Tok::Punct('=') && self.peek(1) != Some(&Tok::Punct('>')) {
                    return;
                }
            }
            match tok {
                Tok::Punct('(') | Tok::Punct('[') | Tok::Punct('{') | Tok::Punct('<') => depth += 1,
                Tok::Punct(')') | Tok::Punct(']') | Tok::Punct('}') | Tok::Punct('>') => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.next_significant();
        }
    }

    fn skip_statement(&mut self) {
        let mut depth = 0isize;
        loop {
            let Some(tok) = self.next_significant() else {
                return;
            };
            match tok {
                Tok::Punct('{') | Tok::Punct('(') | Tok::Punct('[') => depth += 1,
                Tok::Punct('}') | Tok::Punct(')') | Tok::Punct(']') => {
                    depth -= 1;
                    if depth == 0 {
                        // Block statements end without a semicolon.
                        if self.peek(0) == Some(&Tok::Punct(';')) {
                            self.next_significant();
                        }
                        return;
                    }
                }
                Tok::Punct(';') if depth == 0 => return,
                _ => {}
            }
        }
    }

    fn skip_interface(&mut self) {
        self.next_significant(); // interface
        loop {
            match self.next_significant() {
                None => return,
                Some(Tok::Punct('{')) => break,
                Some(_) => {}
            }
        }
        let mut depth = 1isize;
        while depth > 0 {
            match self.next_significant() {
                None => return,
                Some(Tok::Punct('{')) => depth += 1,
                Some(Tok::Punct('}')) => depth -= 1,
                Some(_) => {}
            }
        }
    }

    fn skip_type_alias(&mut self) {
        self.next_significant(); // type
        let mut depth = 0isize;
        loop {
            match self.next_significant() {
                None => return,
                Some(Tok::Punct('{')) | Some(Tok::Punct('(')) | Some(Tok::Punct('[')) => depth += 1,
                Some(Tok::Punct('}')) | Some(Tok::Punct(')')) | Some(Tok::Punct(']')) => depth -= 1,
                Some(Tok::Punct(';')) if depth == 0 => return,
                Some(_) => {}
            }
        }
    }

    fn rewrite_enum(&mut self) {
        // `const enum` emitted its `const` already; the rewrite
        // brings its own.
        if self.last_out() == Some(&Tok::Word("const".into())) {
            while self.out.last() != Some(&Tok::Word("const".into())) {
                self.out.pop();
            }
            self.out.pop();
        }
        self.next_significant(); // enum
        let Some(Tok::Word(name)) = self.next_significant() else {
            return;
        };
        // Consume '{'
        while let Some(tok) = self.next_significant() {
            if tok == Tok::Punct('{') {
                break;
            }
        }
        let mut fields = Vec::new();
        let mut auto = 0i64;
        loop {
            match self.next_significant() {
                None | Some(Tok::Punct('}')) => break,
                Some(Tok::Word(field)) => {
                    if self.peek(0) == Some(&Tok::Punct('=')) {
                        self.next_significant();
                        match self.next_significant() {
                            Some(Tok::Lit(lit)) => fields.push(format!("{field}: {lit}")),
                            Some(Tok::Word(value)) => {
                                fields.push(format!("{field}: {value}"));
                                if let Ok(n) = value.parse::<i64>() {
                                    auto = n + 1;
                                }
                            }
                            _ => {}
                        }
                    } else {
                        fields.push(format!("{field}: {auto}"));
                        auto += 1;
                    }
                }
                Some(_) => {}
            }
        }
        self.push_raw(&format!("const {name} = {{ {} }};", fields.join(", ")));
    }

    fn rewrite_import(&mut self) {
        // Dynamic import or import.meta pass through rewritten.
        if self.peek(1) == Some(&Tok::Punct('(')) {
            self.next_significant();
            self.push_raw("__dynamicImport");
            return;
        }
        if self.peek(1) == Some(&Tok::Punct('.')) {
            // import.meta.url is the module path; the loader does not
            // track it, so an empty string stands in.
            self.next_significant(); // import
            self.next_significant(); // .
            self.next_significant(); // meta
            if self.peek(0) == Some(&Tok::Punct('.'))
                && self.peek(1) == Some(&Tok::Word("url".into()))
            {
                self.next_significant();
                self.next_significant();
            }
            self.push_raw("''");
            return;
        }

        self.next_significant(); // import

        if let Some(Tok::Lit(spec)) = self.peek(0).cloned() {
            // Side-effect import.
            self.next_significant();
            if self.peek(0) == Some(&Tok::Punct(';')) {
                self.next_significant();
            }
            self.push_raw(&format!("require({spec});"));
            return;
        }

        if self.peek(0) == Some(&Tok::Word("type".into())) {
            self.skip_import_statement();
            return;
        }

        let mut default_name: Option<String> = None;
        let mut namespace_name: Option<String> = None;
        let mut named: Vec<(String, String)> = Vec::new();

        loop {
            match self.peek(0).cloned() {
                Some(Tok::Word(word)) if word == "from" => {
                    self.next_significant();
                    break;
                }
                Some(Tok::Word(word)) => {
                    self.next_significant();
                    default_name = Some(word);
                }
                Some(Tok::Punct('*')) => {
                    self.next_significant(); // *
                    self.next_significant(); // as
                    if let Some(Tok::Word(name)) = self.next_significant() {
                        namespace_name = Some(name);
                    }
                }
                Some(Tok::Punct('{')) => {
                    self.next_significant();
                    loop {
                        match self.next_significant() {
                            None | Some(Tok::Punct('}')) => break,
                            Some(Tok::Word(source)) => {
                                if source == "type" && matches!(self.peek(0), Some(Tok::Word(_))) {
                                    // `import { type X }`: drop it.
                                    while let Some(tok) = self.peek(0) {
                                        if matches!(tok, Tok::Punct(',') | Tok::Punct('}')) {
                                            break;
                                        }
                                        self.next_significant();
                                    }
                                    continue;
                                }
                                let mut local = source.clone();
                                if self.peek(0) == Some(&Tok::Word("as".into())) {
                                    self.next_significant();
                                    if let Some(Tok::Word(renamed)) = self.next_significant() {
                                        local = renamed;
                                    }
                                }
                                named.push((source, local));
                            }
                            Some(_) => {}
                        }
                    }
                }
                Some(Tok::Punct(',')) => {
                    self.next_significant();
                }
                _ => break,
            }
        }

        let Some(Tok::Lit(spec)) = self.peek(0).cloned() else {
            return;
        };
        self.next_significant();
        if self.peek(0) == Some(&Tok::Punct(';')) {
            self.next_significant();
        }

        self.import_counter += 1;
        let module_var = format!("__import{}", self.import_counter);
        self.push_raw(&format!("const {module_var} = require({spec});"));
        if let Some(name) = default_name {
            self.push_raw(&format!("const {name} = __imp({module_var});"));
        }
        if let Some(name) = namespace_name {
            self.push_raw(&format!("const {name} = {module_var};"));
        }
        for (source, local) in named {
            self.push_raw(&format!("const {local} = {module_var}.{source};"));
        }
    }

    fn skip_import_statement(&mut self) {
        loop {
            match self.next_significant() {
                None | Some(Tok::Punct(';')) => return,
                Some(Tok::Lit(_)) => {
                    if self.peek(0) == Some(&Tok::Punct(';')) {
                        self.next_significant();
                    }
                    return;
                }
                Some(_) => {}
            }
        }
    }

    fn rewrite_export(&mut self) {
        self.next_significant(); // export
        self.saw_export = true;

        match self.peek(0).cloned() {
            Some(Tok::Word(word)) if word == "default" => {
                self.next_significant();
                self.push_raw("exports.default =");
            }
            Some(Tok::Word(word)) if word == "type" || word == "interface" => {
                if word == "interface" {
                    self.skip_interface();
                } else {
                    self.skip_type_alias();
                }
            }
            Some(Tok::Word(word)) if matches!(word.as_str(), "const" | "let" | "var") => {
                self.record_declared_names();
            }
            Some(Tok::Word(word)) if word == "async" || word == "function" || word == "class" => {
                // `export function name`, `export async function name`,
                // `export class name`.
                let mut offset = 1;
                if word == "async" {
                    offset = 2;
                }
                if let Some(Tok::Word(name)) = self.peek(offset) {
                    let name = name.clone();
                    self.appended.push(format!("exports.{name} = {name};"));
                }
            }
            Some(Tok::Punct('{')) => {
                self.rewrite_export_braces();
            }
            Some(Tok::Punct('*')) => {
                // `export * from 'm'`
                self.next_significant();
                if self.peek(0) == Some(&Tok::Word("from".into())) {
                    self.next_significant();
                    if let Some(Tok::Lit(spec)) = self.next_significant() {
                        self.push_raw(&format!(
                            "Object.assign(exports, require({spec}));"
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    /// `export const a = ..., b = ...` or a destructuring pattern:
    /// leave the declaration alone and append exports assignments.
    fn record_declared_names(&mut self) {
        let mut names = Vec::new();
        match self.peek(1).cloned() {
            Some(Tok::Word(name)) => names.push(name),
            Some(Tok::Punct('{')) | Some(Tok::Punct('[')) => {
                let mut offset = 2;
                let mut binding: Option<String> = None;
                while let Some(tok) = self.peek(offset).cloned() {
                    match tok {
                        Tok::Punct('}') | Tok::Punct(']') => {
                            if let Some(name) = binding.take() {
                                names.push(name);
                            }
                            break;
                        }
                        Tok::Punct(',') => {
                            if let Some(name) = binding.take() {
                                names.push(name);
                            }
                        }
                        Tok::Word(word) => binding = Some(word),
                        _ => {}
                    }
                    offset += 1;
                }
            }
            _ => {}
        }
        // Further declarators on the same statement.
        let mut offset = 2;
        let mut depth = 0isize;
        while let Some(tok) = self.peek(offset).cloned() {
            match tok {
                Tok::Punct('(') | Tok::Punct('[') | Tok::Punct('{') => depth += 1,
                Tok::Punct(')') | Tok::Punct(']') | Tok::Punct('}') => depth -= 1,
                Tok::Punct(';') if depth <= 0 => break,
                Tok::Punct(',') if depth == 0 => {
                    if let Some(Tok::Word(name)) = self.peek(offset + 1) {
                        names.push(name.clone());
                    }
                }
                _ => {}
            }
            offset += 1;
        }
        for name in names {
            self.appended.push(format!("exports.{name} = {name};"));
        }
    }

    fn rewrite_export_braces(&mut self) {
        self.next_significant(); // '{'
        let mut pairs: Vec<(String, String)> = Vec::new();
        loop {
            match self.next_significant() {
                None | Some(Tok::Punct('}')) => break,
                Some(Tok::Word(source)) => {
                    let mut exported = source.clone();
                    if self.peek(0) == Some(&Tok::Word("as".into())) {
                        self.next_significant();
                        if let Some(Tok::Word(renamed)) = self.next_significant() {
                            exported = renamed;
                        }
                    }
                    pairs.push((source, exported));
                }
                Some(_) => {}
            }
        }
        if self.peek(0) == Some(&Tok::Word("from".into())) {
            self.next_significant();
            if let Some(Tok::Lit(spec)) = self.next_significant() {
                self.import_counter += 1;
                let module_var = format!("__import{}", self.import_counter);
                self.push_raw(&format!("const {module_var} = require({spec});"));
                for (source, exported) in pairs {
                    self.push_raw(&format!("exports.{exported} = {module_var}.{source};"));
                }
            }
        } else {
            for (source, exported) in pairs {
                self.appended.push(format!("exports.{exported} = {source};"));
            }
        }
        if self.peek(0) == Some(&Tok::Punct(';')) {
            self.next_significant();
        }
    }
}

fn render(tokens: &[Tok]) -> String {
    let mut out = String::new();
    let mut prev_wordish = false;
    for tok in tokens {
        match tok {
            Tok::Newline => {
                out.push('\n');
                prev_wordish = false;
            }
            Tok::Punct(p) => {
                out.push(*p);
                prev_wordish = false;
            }
            Tok::Word(w) | Tok::Lit(w) => {
                if prev_wordish {
                    out.push(' ');
                }
                out.push_str(w);
                prev_wordish = true;
            }
        }
    }
    out
}
