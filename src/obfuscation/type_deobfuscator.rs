//! Per-type renaming lookups.
//!
//! A [`TypeDeobfuscator`] answers every question about a single type: its obfuscated and original
//! name, and the renaming of its fields and methods. [`MappedType`] is built from one type record
//! of a renaming map, [`IdentityDeobfuscator`] stands in for every type the map does not mention so
//! that callers never have to special-case "no obfuscation".
//!
//! # Sort keys
//!
//! Both member tables are sorted once and binary searched with ordinal (byte-wise) comparison:
//!
//! - fields by `(obfuscated name, canonical field type)`
//! - methods by `(obfuscated name, canonical argument list)` where the argument list is the
//!   canonical [`TypeName`] strings joined by `,`
//!
//! Keys are compared as tuples, never as concatenated strings, so a name ending in a type-like
//! suffix cannot collide with a different name/type pair.

use std::cmp::Ordering;

use crate::obfuscation::TypeName;

/// Renaming record of a single field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObfuscatedField {
    /// Name in the obfuscated binary
    pub obfuscated_name: String,
    /// Name in the original source
    pub original_name: String,
    /// Declared type of the field, as given by the map signature
    pub field_type: TypeName,
    /// Original name of the type that declares the field
    pub declaring_type: String,
}

impl ObfuscatedField {
    fn key(&self) -> (&str, String) {
        (self.obfuscated_name.as_str(), self.field_type.to_string())
    }
}

/// Renaming record of a single method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObfuscatedMethod {
    /// Name in the obfuscated binary
    pub obfuscated_name: String,
    /// Name in the original source
    pub original_name: String,
    /// Return type, `None` when the signature carries none
    pub return_type: Option<TypeName>,
    /// Canonical argument types
    pub argument_types: Vec<TypeName>,
}

impl ObfuscatedMethod {
    /// Canonical argument list: argument types joined by `,`
    #[must_use]
    pub fn argument_list(&self) -> String {
        join_types(&self.argument_types)
    }

    /// Return type as text, `void` when absent
    #[must_use]
    pub fn return_type_name(&self) -> String {
        self.return_type
            .as_ref()
            .map_or_else(|| "void".to_string(), ToString::to_string)
    }
}

/// Result of a method lookup; obfuscation frequently maps several overloads onto one key.
#[derive(Debug, PartialEq, Eq)]
pub enum MethodLookup<'a> {
    /// No method matches
    NotFound,
    /// Exactly one method matches
    Unique(&'a ObfuscatedMethod),
    /// Several methods match, all of them must be presented
    Ambiguous(Vec<&'a ObfuscatedMethod>),
}

impl<'a> MethodLookup<'a> {
    /// All candidates, in table order
    #[must_use]
    pub fn candidates(&self) -> Vec<&'a ObfuscatedMethod> {
        match self {
            MethodLookup::NotFound => Vec::new(),
            MethodLookup::Unique(method) => vec![*method],
            MethodLookup::Ambiguous(methods) => methods.clone(),
        }
    }

    /// Returns true if at least one method matched
    #[must_use]
    pub fn is_found(&self) -> bool {
        !matches!(self, MethodLookup::NotFound)
    }
}

/// Renaming lookups for one type.
pub trait TypeDeobfuscator: Send + Sync {
    /// Name of the type in the obfuscated binary
    fn obfuscated_name(&self) -> &str;

    /// Name of the type in the original source
    fn original_name(&self) -> &str;

    /// Original name of the field called `obfuscated` in the binary
    fn deobfuscate_field(&self, obfuscated: &str) -> Option<&str>;

    /// Original name of the field called `obfuscated` with the given declared type
    fn deobfuscate_typed_field(&self, obfuscated: &str, field_type: &str) -> Option<&str>;

    /// Renaming record of the field whose original name is `original`
    fn obfuscate_field(&self, original: &str) -> Option<&ObfuscatedField>;

    /// All methods called `obfuscated` taking exactly `parameters` (canonical type names)
    fn deobfuscate_method(&self, obfuscated: &str, parameters: &[String]) -> MethodLookup<'_>;

    /// The single method called `obfuscated` taking `parameters` and returning `return_type`.
    ///
    /// An empty `return_type` means `void`.
    fn deobfuscate_method_with_return(
        &self,
        obfuscated: &str,
        return_type: &str,
        parameters: &[String],
    ) -> Option<&str> {
        let return_type = if return_type.is_empty() {
            "void"
        } else {
            return_type
        };

        self.deobfuscate_method(obfuscated, parameters)
            .candidates()
            .into_iter()
            .find(|method| method.return_type_name() == return_type)
            .map(|method| method.original_name.as_str())
    }

    /// Returns true if this deobfuscator renames anything
    fn is_mapped(&self) -> bool {
        true
    }
}

/// Pass-through deobfuscator for types absent from the renaming map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityDeobfuscator {
    name: String,
}

impl IdentityDeobfuscator {
    /// Create an identity deobfuscator for `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        IdentityDeobfuscator { name: name.into() }
    }
}

impl TypeDeobfuscator for IdentityDeobfuscator {
    fn obfuscated_name(&self) -> &str {
        &self.name
    }

    fn original_name(&self) -> &str {
        &self.name
    }

    fn deobfuscate_field(&self, _obfuscated: &str) -> Option<&str> {
        None
    }

    fn deobfuscate_typed_field(&self, _obfuscated: &str, _field_type: &str) -> Option<&str> {
        None
    }

    fn obfuscate_field(&self, _original: &str) -> Option<&ObfuscatedField> {
        None
    }

    fn deobfuscate_method(&self, _obfuscated: &str, _parameters: &[String]) -> MethodLookup<'_> {
        MethodLookup::NotFound
    }

    fn is_mapped(&self) -> bool {
        false
    }
}

/// Deobfuscator for a type record of a renaming map.
#[derive(Clone, Debug)]
pub struct MappedType {
    module: String,
    obfuscated_name: String,
    original_name: String,
    fields: Vec<ObfuscatedField>,
    field_keys: Vec<String>,
    methods: Vec<ObfuscatedMethod>,
    method_keys: Vec<String>,
}

impl MappedType {
    /// Build the sorted lookup tables for a type.
    ///
    /// ## Arguments
    /// * 'module'          - File name of the module declaring the type
    /// * 'obfuscated_name' - Name in the binary, `+`-separated for nested types
    /// * 'original_name'   - Name in the original source, `+`-separated for nested types
    /// * 'fields'          - Field renaming records
    /// * 'methods'         - Method renaming records
    #[must_use]
    pub fn new(
        module: impl Into<String>,
        obfuscated_name: impl Into<String>,
        original_name: impl Into<String>,
        mut fields: Vec<ObfuscatedField>,
        methods: Vec<ObfuscatedMethod>,
    ) -> Self {
        fields.sort_by(|left, right| left.key().cmp(&right.key()));
        let field_keys = fields
            .iter()
            .map(|field| field.field_type.to_string())
            .collect();

        let mut keyed: Vec<(String, ObfuscatedMethod)> = methods
            .into_iter()
            .map(|method| (method.argument_list(), method))
            .collect();
        keyed.sort_by(|(left_args, left), (right_args, right)| {
            (left.obfuscated_name.as_str(), left_args.as_str())
                .cmp(&(right.obfuscated_name.as_str(), right_args.as_str()))
        });
        let (method_keys, methods) = keyed.into_iter().unzip();

        MappedType {
            module: module.into(),
            obfuscated_name: obfuscated_name.into(),
            original_name: original_name.into(),
            fields,
            field_keys,
            methods,
            method_keys,
        }
    }

    /// File name of the module declaring the type
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Field records, sorted by obfuscated name and type
    #[must_use]
    pub fn fields(&self) -> &[ObfuscatedField] {
        &self.fields
    }

    /// Method records, sorted by obfuscated name and argument list
    #[must_use]
    pub fn methods(&self) -> &[ObfuscatedMethod] {
        &self.methods
    }

    fn method_order(&self, index: usize, name: &str, args: &str) -> Ordering {
        (self.methods[index].obfuscated_name.as_str(), self.method_keys[index].as_str())
            .cmp(&(name, args))
    }

    fn field_order(&self, index: usize, name: &str, field_type: &str) -> Ordering {
        (self.fields[index].obfuscated_name.as_str(), self.field_keys[index].as_str())
            .cmp(&(name, field_type))
    }
}

impl TypeDeobfuscator for MappedType {
    fn obfuscated_name(&self) -> &str {
        &self.obfuscated_name
    }

    fn original_name(&self) -> &str {
        &self.original_name
    }

    fn deobfuscate_field(&self, obfuscated: &str) -> Option<&str> {
        let start = self
            .fields
            .partition_point(|field| field.obfuscated_name.as_str() < obfuscated);
        self.fields
            .get(start)
            .filter(|field| field.obfuscated_name == obfuscated)
            .map(|field| field.original_name.as_str())
    }

    fn deobfuscate_typed_field(&self, obfuscated: &str, field_type: &str) -> Option<&str> {
        let (mut lo, mut hi) = (0, self.fields.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.field_order(mid, obfuscated, field_type) {
                Ordering::Equal => return Some(self.fields[mid].original_name.as_str()),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        None
    }

    fn obfuscate_field(&self, original: &str) -> Option<&ObfuscatedField> {
        self.fields
            .iter()
            .find(|field| field.original_name == original)
    }

    fn deobfuscate_method(&self, obfuscated: &str, parameters: &[String]) -> MethodLookup<'_> {
        let args = parameters.join(",");

        // lower bound of the key, overloads sharing it are adjacent
        let (mut lo, mut hi) = (0, self.methods.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.method_order(mid, obfuscated, &args) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let matches: Vec<&ObfuscatedMethod> = (lo..self.methods.len())
            .take_while(|&index| self.method_order(index, obfuscated, &args) == Ordering::Equal)
            .map(|index| &self.methods[index])
            .collect();

        match matches.len() {
            0 => MethodLookup::NotFound,
            1 => MethodLookup::Unique(matches[0]),
            _ => MethodLookup::Ambiguous(matches),
        }
    }
}

fn join_types(types: &[TypeName]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
