//! Structural type-name parsing.
//!
//! Renaming maps, stack traces and runtime metadata all spell composite type names slightly
//! differently: with or without generic arity markers (`` List`1 ``), with IL primitive aliases
//! (`int32`, `unsigned int8`) or fully qualified names, with `/` or `+` as the nested-type
//! separator, and with arbitrary spacing. [`TypeName`] parses such a string into a tree of
//! name, generic arguments and array suffix, and renders it back in one canonical form so that
//! names from different sources can be compared as strings.
//!
//! # Grammar
//!
//! ```text
//! type    := name [ '<' type { ',' type } '>' ] { array }
//! name    := [ "unsigned" ws ] ident-char { ident-char }
//! array   := '[' { ',' } ']'
//! ```
//!
//! where `ident-char` is any alphanumeric character or one of `_ . + / \``.
//!
//! # Examples
//!
//! ```rust
//! use heapscope::obfuscation::TypeName;
//!
//! let parsed = TypeName::parse("Dictionary< Int32 , String >[]");
//! assert_eq!(parsed.name(), "Dictionary");
//! assert_eq!(parsed.generic_args().len(), 2);
//! assert_eq!(parsed.array(), Some("[]"));
//! assert_eq!(parsed.to_string(), "Dictionary<Int32,String>[]");
//!
//! let signature = TypeName::parse("System.Collections.Generic.List`1<int32>").sanitized();
//! assert_eq!(signature.to_string(), "System.Collections.Generic.List<System.Int32>");
//! ```

use std::{fmt, sync::LazyLock};

use regex::Regex;

static ARITY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`\d+").expect("arity marker pattern"));

static CALL_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w[\w.+<>`]*\((?P<args>.*)\)").expect("call frame pattern")
});

/// IL and short aliases rewritten to fully qualified runtime names, applied in order.
static ALIASES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bobject\b", "System.Object"),
        (r"\bstring\b", "System.String"),
        (r"\bunsigned int(\d{2})\b", "System.UInt${1}"),
        (r"\bint(\d{2})\b", "System.Int${1}"),
        (r"^Int(\d{2})\b", "System.Int${1}"),
        (r"\bfloat64\b", "System.Double"),
        (r"\bfloat32\b", "System.Single"),
        (r"\bbool\b", "System.Boolean"),
        (r"^Boolean\b", "System.Boolean"),
        (r"\bunsigned int8\b", "System.Byte"),
        (r"\bint8\b", "System.SByte"),
        (r"/", "+"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("alias pattern"), replacement))
    .collect()
});

/// A parsed structural type name: name, generic arguments and array suffix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct TypeName {
    name: String,
    generic_args: Vec<TypeName>,
    array: Option<String>,
}

impl TypeName {
    /// Create a plain, non-generic, non-array name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        TypeName {
            name: name.into(),
            generic_args: Vec::new(),
            array: None,
        }
    }

    /// Attach generic arguments
    #[must_use]
    pub fn with_generic_args(mut self, args: Vec<TypeName>) -> Self {
        self.generic_args = args;
        self
    }

    /// Attach an array suffix such as `[]` or `[,][]`
    #[must_use]
    pub fn with_array(mut self, array: impl Into<String>) -> Self {
        self.array = Some(array.into());
        self
    }

    /// Parse a single type name.
    ///
    /// Parsing never fails: input that does not start with a type name is kept verbatim (trimmed)
    /// as the name. Trailing text after a complete type name, such as a parameter name in a stack
    /// frame, is ignored.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut cursor = Cursor::new(input);
        match cursor.parse_type() {
            Some(parsed) => parsed,
            None => TypeName::new(input.trim()),
        }
    }

    /// Parse a comma separated list of type names, splitting only at top-level commas.
    #[must_use]
    pub fn parse_list(input: &str) -> Vec<Self> {
        split_top_level(input)
            .into_iter()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(TypeName::parse)
            .collect()
    }

    /// The name without generic arguments or array suffix
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generic arguments in declaration order
    #[must_use]
    pub fn generic_args(&self) -> &[TypeName] {
        &self.generic_args
    }

    /// The array suffix, if any
    #[must_use]
    pub fn array(&self) -> Option<&str> {
        self.array.as_deref()
    }

    /// Returns true if the name carries an array suffix
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.array.is_some()
    }

    /// Returns true if the name has generic arguments
    #[must_use]
    pub fn is_generic(&self) -> bool {
        !self.generic_args.is_empty()
    }

    /// Apply `map` to this name and, recursively, to every generic argument name.
    ///
    /// The array suffix is preserved on every level.
    #[must_use]
    pub fn map_names<F>(&self, map: &mut F) -> TypeName
    where
        F: FnMut(&str) -> String,
    {
        TypeName {
            name: map(&self.name),
            generic_args: self
                .generic_args
                .iter()
                .map(|arg| arg.map_names(map))
                .collect(),
            array: self.array.clone(),
        }
    }

    /// Normalize every name in the tree with [`sanitize`].
    #[must_use]
    pub fn sanitized(&self) -> TypeName {
        self.map_names(&mut |name| sanitize(name))
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;

        if !self.generic_args.is_empty() {
            f.write_str("<")?;
            for (index, arg) in self.generic_args.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(">")?;
        }

        if let Some(array) = &self.array {
            f.write_str(array)?;
        }

        Ok(())
    }
}

impl From<&str> for TypeName {
    fn from(value: &str) -> Self {
        TypeName::parse(value)
    }
}

/// A method frame extracted from a stack-trace line or a renaming-map signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    /// Text in front of the method token, e.g. the `   at ` of a stack frame
    pub lead: String,
    /// Sanitized text between the lead and the opening parenthesis: the qualified method name of
    /// a stack frame, or the return type of a map signature
    pub prefix: String,
    /// Sanitized argument types
    pub args: Vec<TypeName>,
}

/// Extract the method token and its argument types from a line.
///
/// Returns `None` if the line does not contain `name(...)`.
///
/// # Examples
///
/// ```rust
/// use heapscope::obfuscation::parse_method_info;
///
/// let info = parse_method_info("   at System.Obfuscation.a.b(string s, int32 n)").unwrap();
/// assert_eq!(info.lead, "   at ");
/// assert_eq!(info.prefix, "System.Obfuscation.a.b");
/// assert_eq!(info.args[1].to_string(), "System.Int32");
/// ```
#[must_use]
pub fn parse_method_info(line: &str) -> Option<MethodInfo> {
    let captures = CALL_FRAME.captures(line)?;
    let whole = captures.get(0)?;
    let args = captures.name("args")?;

    Some(MethodInfo {
        lead: line[..whole.start()].to_string(),
        prefix: sanitize(&line[whole.start()..args.start() - 1]),
        args: TypeName::parse_list(args.as_str())
            .iter()
            .map(TypeName::sanitized)
            .collect(),
    })
}

/// Returns true for names that look like an obfuscated nested type (one to three uppercase
/// ASCII letters).
#[must_use]
pub fn could_be_nested_type(name: &str) -> bool {
    (1..=3).contains(&name.len()) && name.bytes().all(|byte| byte.is_ascii_uppercase())
}

/// Remove generic arity markers and rewrite primitive aliases to fully qualified names.
///
/// `/` nested-type separators become `+`.
#[must_use]
pub fn sanitize(name: &str) -> String {
    let mut result = ARITY_MARKER.replace_all(name, "").into_owned();
    for (pattern, replacement) in ALIASES.iter() {
        if pattern.is_match(&result) {
            result = pattern.replace_all(&result, *replacement).into_owned();
        }
    }
    result
}

fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;

    for (index, c) in input.char_indices() {
        match c {
            '<' | '[' => depth += 1,
            '>' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '+' | '/' | '`')
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(input: &str) -> Self {
        Cursor {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn read_name(&mut self) -> Option<String> {
        self.skip_whitespace();
        if !self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }

        let name = self.read_ident();
        if name != "unsigned" {
            return Some(name);
        }

        let checkpoint = self.pos;
        self.skip_whitespace();
        let rest = self.read_ident();
        if rest.is_empty() {
            self.pos = checkpoint;
            return Some(name);
        }
        Some(format!("{name} {rest}"))
    }

    fn parse_type(&mut self) -> Option<TypeName> {
        let name = self.read_name()?;
        let mut parsed = TypeName::new(name);

        let checkpoint = self.pos;
        self.skip_whitespace();
        if self.peek() == Some('<') {
            self.pos += 1;
            match self.parse_generic_args() {
                Some(args) => parsed.generic_args = args,
                None => {
                    self.pos = checkpoint;
                    return Some(parsed);
                }
            }
        } else {
            self.pos = checkpoint;
        }

        let mut array = String::new();
        while let Some(suffix) = self.parse_array_suffix() {
            array.push_str(&suffix);
        }
        if !array.is_empty() {
            parsed.array = Some(array);
        }

        Some(parsed)
    }

    fn parse_generic_args(&mut self) -> Option<Vec<TypeName>> {
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            self.skip_whitespace();
            match self.peek()? {
                ',' => self.pos += 1,
                '>' => {
                    self.pos += 1;
                    return Some(args);
                }
                _ => return None,
            }
        }
    }

    fn parse_array_suffix(&mut self) -> Option<String> {
        let checkpoint = self.pos;
        self.skip_whitespace();
        if self.peek() != Some('[') {
            self.pos = checkpoint;
            return None;
        }
        self.pos += 1;

        let mut suffix = String::from("[");
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    suffix.push(',');
                    self.pos += 1;
                }
                Some(']') => {
                    suffix.push(']');
                    self.pos += 1;
                    return Some(suffix);
                }
                _ => {
                    self.pos = checkpoint;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_array_roundtrip() {
        let parsed = TypeName::parse("Dictionary<Int32,String>[]");
        assert_eq!(parsed.name(), "Dictionary");
        assert_eq!(parsed.generic_args().len(), 2);
        assert_eq!(parsed.generic_args()[0].name(), "Int32");
        assert_eq!(parsed.generic_args()[1].name(), "String");
        assert!(parsed.is_array());
        assert_eq!(parsed.to_string(), "Dictionary<Int32,String>[]");
    }

    #[test]
    fn nested_generics_and_ranks() {
        let parsed = TypeName::parse("A.B<C.D<E>[,], F+G>[][,,]");
        assert_eq!(parsed.to_string(), "A.B<C.D<E>[,],F+G>[][,,]");
        assert_eq!(parsed.generic_args()[0].array(), Some("[,]"));
        assert_eq!(parsed.array(), Some("[][,,]"));
    }

    #[test]
    fn unbalanced_generic_keeps_name() {
        let parsed = TypeName::parse("Foo<Bar");
        assert_eq!(parsed.name(), "Foo");
        assert!(!parsed.is_generic());
    }

    #[test]
    fn unparseable_input_is_kept() {
        assert_eq!(TypeName::parse("  <>  ").name(), "<>");
    }

    #[test]
    fn list_ignores_parameter_names() {
        let list = TypeName::parse_list("String s, Dictionary<Int32, String> map, ");
        let rendered: Vec<_> = list.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["String", "Dictionary<Int32,String>"]);
        assert!(TypeName::parse_list("").is_empty());
    }

    #[test]
    fn sanitize_aliases() {
        assert_eq!(sanitize("List`1"), "List");
        assert_eq!(sanitize("int32"), "System.Int32");
        assert_eq!(sanitize("unsigned int16"), "System.UInt16");
        assert_eq!(sanitize("unsigned int8"), "System.Byte");
        assert_eq!(sanitize("int8"), "System.SByte");
        assert_eq!(sanitize("Int64"), "System.Int64");
        assert_eq!(sanitize("Boolean"), "System.Boolean");
        assert_eq!(sanitize("float64"), "System.Double");
        assert_eq!(sanitize("Outer/Inner"), "Outer+Inner");
        assert_eq!(sanitize("System.Object"), "System.Object");
        assert_eq!(sanitize("Demo.Stringify"), "Demo.Stringify");
    }

    #[test]
    fn sanitized_tree() {
        let parsed = TypeName::parse("Dictionary`2<string, unsigned int8>[]").sanitized();
        assert_eq!(
            parsed.to_string(),
            "Dictionary<System.String,System.Byte>[]"
        );
    }

    #[test]
    fn method_info() {
        let info = parse_method_info("void(string, int32)").unwrap();
        assert_eq!(info.lead, "");
        assert_eq!(info.prefix, "void");
        assert_eq!(info.args.len(), 2);

        let info = parse_method_info("List`1<string>()").unwrap();
        assert_eq!(info.prefix, "List<System.String>");
        assert!(info.args.is_empty());

        assert!(parse_method_info("no frame here").is_none());
    }

    #[test]
    fn nested_type_heuristic() {
        assert!(could_be_nested_type("A"));
        assert!(could_be_nested_type("ABC"));
        assert!(!could_be_nested_type("ABCD"));
        assert!(!could_be_nested_type("a"));
        assert!(!could_be_nested_type(""));
    }
}
