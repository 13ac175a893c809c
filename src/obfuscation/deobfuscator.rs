//! The renaming-map index: type lookups by runtime type or by name, structural type-name
//! translation and stack-trace rewriting.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use dashmap::DashMap;

use crate::{
    obfuscation::{
        could_be_nested_type, parse_method_info, IdentityDeobfuscator, MappedType,
        ObfuscatedField, ObfuscatedMethod, RenamingMap, TypeDeobfuscator, TypeName,
    },
    runtime::RuntimeType,
    Error, Result,
};

/// Stack frames are only rewritten when they mention this namespace.
pub const OBFUSCATED_FRAME_MARKER: &str = "System.Obfuscation";

/// Header line of a stack frame with more than one candidate method.
pub const AMBIGUOUS_MARKER: &str = "--AMBIGUOUS--";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TypeKey {
    module: String,
    type_name: String,
}

/// Index over a loaded renaming map.
///
/// Every lookup degrades to an [`IdentityDeobfuscator`] (or the unchanged name) when the map does
/// not know the requested type, so callers never special-case "not obfuscated".
///
/// # Examples
///
/// ```rust
/// use heapscope::obfuscation::{Deobfuscator, TypeDeobfuscator};
///
/// let xml = r#"<dotfuscatorMap><mapping><module><name>Shop.dll</name>
///   <type><name>Shop.Order</name><newname>a</newname></type>
/// </module></mapping></dotfuscatorMap>"#;
/// let map: Deobfuscator = xml.parse()?;
///
/// assert_eq!(map.deobfuscate_type("System.Collections.Generic.List<a>[]"),
///            "System.Collections.Generic.List<Shop.Order>[]");
/// assert_eq!(map.obfuscate_type("shop.order"), "a");
/// assert_eq!(map.type_deobfuscator("Missing").original_name(), "Missing");
/// # Ok::<(), heapscope::Error>(())
/// ```
pub struct Deobfuscator {
    path: Option<PathBuf>,
    types: Vec<Arc<MappedType>>,
    by_key: HashMap<TypeKey, usize>,
    cache: DashMap<u64, Arc<dyn TypeDeobfuscator>>,
    cache_enabled: bool,
}

impl Deobfuscator {
    /// Load a renaming map from disk.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] or [`Error::Xml`] if the map cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut deobfuscator = Deobfuscator::from_map(RenamingMap::from_file(path)?);
        deobfuscator.path = Some(path.to_path_buf());
        Ok(deobfuscator)
    }

    /// Build the lookup index from a parsed renaming map.
    ///
    /// Type records without an obfuscated name are skipped.
    #[must_use]
    pub fn from_map(map: RenamingMap) -> Self {
        let mut types = Vec::new();
        let mut by_key = HashMap::new();
        let mut skipped = 0_usize;

        for module in map.modules {
            for record in module.types {
                let Some(new_name) = record.new_name else {
                    skipped += 1;
                    continue;
                };

                let obfuscated_name = new_name.replace('/', "+");
                let original_name = record.name.replace('/', "+");

                let fields = record
                    .fields
                    .into_iter()
                    .map(|field| ObfuscatedField {
                        obfuscated_name: field.new_name.unwrap_or_else(|| field.name.clone()),
                        original_name: field.name,
                        field_type: TypeName::parse(&field.signature).sanitized(),
                        declaring_type: original_name.clone(),
                    })
                    .collect();

                let methods = record
                    .methods
                    .into_iter()
                    .map(|method| {
                        let (return_type, argument_types) = match parse_method_info(&method.signature)
                        {
                            Some(info) if !info.prefix.trim().is_empty() => {
                                (Some(TypeName::parse(&info.prefix)), info.args)
                            }
                            Some(info) => (None, info.args),
                            None => (None, Vec::new()),
                        };

                        ObfuscatedMethod {
                            obfuscated_name: method.new_name.unwrap_or_else(|| method.name.clone()),
                            original_name: method.name,
                            return_type,
                            argument_types,
                        }
                    })
                    .collect();

                let key = TypeKey {
                    module: module.name.clone(),
                    type_name: obfuscated_name.clone(),
                };
                by_key.insert(key, types.len());
                types.push(Arc::new(MappedType::new(
                    module.name.clone(),
                    obfuscated_name,
                    original_name,
                    fields,
                    methods,
                )));
            }
        }

        if skipped > 0 {
            log::warn!("Skipped {skipped} renaming-map types without an obfuscated name");
        }
        log::debug!("Loaded renaming map with {} renamed types", types.len());

        Deobfuscator {
            path: None,
            types,
            by_key,
            cache: DashMap::new(),
            cache_enabled: true,
        }
    }

    /// Enable or disable the per-runtime-type deobfuscator cache
    #[must_use]
    pub fn with_type_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// The file the map was loaded from, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All renamed types, in map order
    #[must_use]
    pub fn types(&self) -> &[Arc<MappedType>] {
        &self.types
    }

    /// Deobfuscator for the type whose obfuscated name is `name`, in any module.
    #[must_use]
    pub fn type_deobfuscator(&self, name: &str) -> Arc<dyn TypeDeobfuscator> {
        match self.types.iter().find(|ty| ty.obfuscated_name() == name) {
            Some(mapped) => mapped.clone() as Arc<dyn TypeDeobfuscator>,
            None => Arc::new(IdentityDeobfuscator::new(name)),
        }
    }

    /// Deobfuscator for a runtime type, keyed by its module file name and runtime name.
    ///
    /// Results, including misses, are cached per type id.
    #[must_use]
    pub fn type_deobfuscator_for(&self, ty: &RuntimeType) -> Arc<dyn TypeDeobfuscator> {
        if self.cache_enabled {
            if let Some(cached) = self.cache.get(&ty.id) {
                return cached.clone();
            }
        }

        let index = ty.module.as_deref().and_then(|module| {
            self.by_key.get(&TypeKey {
                module: module_file_name(module).to_string(),
                type_name: ty.name.clone(),
            })
        });

        let resolved: Arc<dyn TypeDeobfuscator> = match index {
            Some(&index) => self.types[index].clone(),
            None => {
                log::debug!("No renaming-map entry for {}", ty.name);
                Arc::new(IdentityDeobfuscator::new(ty.name.clone()))
            }
        };

        if self.cache_enabled {
            self.cache.insert(ty.id, resolved.clone());
        }
        resolved
    }

    /// Obfuscated name of a simple (non-generic) type, matched case-insensitively.
    ///
    /// Unknown names are returned unchanged.
    #[must_use]
    pub fn obfuscate_simple_type(&self, original: &str) -> String {
        self.types
            .iter()
            .find(|ty| ty.original_name().eq_ignore_ascii_case(original))
            .map_or_else(|| original.to_string(), |ty| ty.obfuscated_name().to_string())
    }

    /// Original name of a simple (non-generic) type, matched case-insensitively.
    ///
    /// Unknown names are returned unchanged.
    #[must_use]
    pub fn deobfuscate_simple_type(&self, obfuscated: &str) -> String {
        self.types
            .iter()
            .find(|ty| ty.obfuscated_name().eq_ignore_ascii_case(obfuscated))
            .map_or_else(|| obfuscated.to_string(), |ty| ty.original_name().to_string())
    }

    /// Obfuscate every name of a parsed type name, keeping generic structure and array suffixes
    #[must_use]
    pub fn obfuscate_type_name(&self, original: &TypeName) -> TypeName {
        original.map_names(&mut |name| self.obfuscate_simple_type(name))
    }

    /// Deobfuscate every name of a parsed type name, keeping generic structure and array suffixes
    #[must_use]
    pub fn deobfuscate_type_name(&self, obfuscated: &TypeName) -> TypeName {
        obfuscated.map_names(&mut |name| self.deobfuscate_simple_type(name))
    }

    /// Obfuscate a composite type name such as `List<Shop.Order>[]`
    #[must_use]
    pub fn obfuscate_type(&self, original: &str) -> String {
        self.obfuscate_type_name(&TypeName::parse(original).sanitized())
            .to_string()
    }

    /// Deobfuscate a composite type name such as `List<a>[]`
    #[must_use]
    pub fn deobfuscate_type(&self, obfuscated: &str) -> String {
        self.deobfuscate_type_name(&TypeName::parse(obfuscated).sanitized())
            .to_string()
    }

    /// Rewrite the obfuscated frames of a stack trace.
    ///
    /// Only lines mentioning [`OBFUSCATED_FRAME_MARKER`] are touched. Argument types are
    /// deobfuscated first; a short unresolved argument name is retried as a nested type of the
    /// frame's declaring type. A frame matching several methods is replaced by an
    /// [`AMBIGUOUS_MARKER`] line followed by one tab-indented line per candidate. Empty lines are
    /// dropped and the result is joined with `\n`.
    #[must_use]
    pub fn deobfuscate_callstack(&self, callstack: &str) -> String {
        callstack
            .split(['\r', '\n'])
            .filter(|line| !line.is_empty())
            .map(|line| self.deobfuscate_frame(line).unwrap_or_else(|| line.to_string()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn deobfuscate_frame(&self, line: &str) -> Option<String> {
        if !line.contains(OBFUSCATED_FRAME_MARKER) {
            return None;
        }

        let info = parse_method_info(line)?;
        let dot = info.prefix.rfind('.')?;
        let declaring_type = &info.prefix[..dot];
        let method_name = &info.prefix[dot + 1..];
        let original_type = self.deobfuscate_simple_type(declaring_type);

        let parameters: Vec<String> = info
            .args
            .iter()
            .map(|arg| {
                let mapped = self.deobfuscate_type_name(arg);
                if mapped.name() != arg.name() || !could_be_nested_type(arg.name()) {
                    return mapped.to_string();
                }

                let nested = format!("{declaring_type}+{}", arg.name());
                let resolved = self.deobfuscate_simple_type(&nested);
                if resolved == nested {
                    return mapped.to_string();
                }

                let mut retried = TypeName::new(resolved);
                if let Some(array) = arg.array() {
                    retried = retried.with_array(array);
                }
                retried.to_string()
            })
            .collect();

        let deobfuscator = self.type_deobfuscator(declaring_type);
        let candidates = deobfuscator
            .deobfuscate_method(method_name, &parameters)
            .candidates();
        let arguments = parameters.join(",");

        match candidates.as_slice() {
            [] => None,
            [single] => Some(format!(
                "{}{original_type}.{}({arguments})",
                info.lead, single.original_name
            )),
            several => {
                let mut rendered = String::from(AMBIGUOUS_MARKER);
                for candidate in several {
                    rendered.push_str(&format!(
                        "\n\t{original_type}.{}({arguments})",
                        candidate.original_name
                    ));
                }
                Some(rendered)
            }
        }
    }
}

/// File name part of a module path, accepting both `/` and `\\` separators
fn module_file_name(module: &str) -> &str {
    module.rsplit(['/', '\\']).next().unwrap_or(module)
}

impl FromStr for Deobfuscator {
    type Err = Error;

    fn from_str(xml: &str) -> Result<Self> {
        Ok(Deobfuscator::from_map(xml.parse()?))
    }
}

impl std::fmt::Debug for Deobfuscator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deobfuscator")
            .field("path", &self.path)
            .field("types", &self.types.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}
