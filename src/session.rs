//! The inspection context.
//!
//! A [`HeapSession`] owns the [`TypeCatalog`] of one target together with everything derived
//! from it: the optional renaming map, the materialized list of heap objects, the reverse
//! reference index and the visualizer registry. [`DynamicObject`]s borrow the session that
//! produced them, so no component reaches for global state and several sessions can be open at
//! once.
//!
//! # Examples
//!
//! ```rust,no_run
//! use heapscope::prelude::*;
//!
//! # fn open_dump() -> MemorySnapshot { MemorySnapshot::new(8) }
//! let mut session = HeapSession::new(open_dump());
//! session.load_renaming_map("Map.xml")?;
//! session.build_reference_index()?;
//!
//! for order in session.objects_of_type("Shop.*Order")? {
//!     println!("{order} <- {} parents", order.referenced_by()?.len());
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{atomic::AtomicBool, Arc, OnceLock},
};

use regex::RegexBuilder;

use crate::{
    obfuscation::{Deobfuscator, IdentityDeobfuscator, TypeDeobfuscator},
    objects::DynamicObject,
    references::ReferenceIndex,
    runtime::{RuntimeType, RuntimeTypeRc, TypeCatalog},
    visualizers::TypeVisualizerRegistry,
    Result,
};

/// Settings of a [`HeapSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Number of objects per chunk of the materialized object list
    pub segment_size: usize,

    /// Match `*` type-name patterns without regard to case
    pub wildcard_case_insensitive: bool,

    /// Cache the renaming-map entry resolved for each runtime type
    pub cache_type_deobfuscators: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            segment_size: 4096,
            wildcard_case_insensitive: true,
            cache_type_deobfuscators: true,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration whose type-name patterns are case sensitive.
    #[must_use]
    pub fn case_sensitive() -> Self {
        Self {
            wildcard_case_insensitive: false,
            ..Self::default()
        }
    }

    /// Sets the chunk size of the materialized object list.
    #[must_use]
    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size.max(1);
        self
    }
}

/// Every heap object with its runtime type, stored in fixed-size chunks.
#[derive(Debug, Default)]
pub struct HeapObjects {
    segments: Vec<Vec<(u64, RuntimeTypeRc)>>,
    len: usize,
}

impl HeapObjects {
    fn collect(catalog: &dyn TypeCatalog, segment_size: usize) -> Self {
        let segment_size = segment_size.max(1);
        let mut segments: Vec<Vec<(u64, RuntimeTypeRc)>> = Vec::new();
        let mut len = 0;

        for address in catalog.objects() {
            match segments.last_mut() {
                Some(segment) if segment.len() < segment_size => {
                    segment.push((address, catalog.type_at(address)));
                }
                _ => {
                    let mut segment = Vec::with_capacity(segment_size);
                    segment.push((address, catalog.type_at(address)));
                    segments.push(segment);
                }
            }
            len += 1;
        }

        log::debug!("Materialized {} heap objects in {} segments", len, segments.len());
        HeapObjects { segments, len }
    }

    /// Number of objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the heap has no objects
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Addresses and types in heap order
    pub fn iter(&self) -> impl Iterator<Item = &(u64, RuntimeTypeRc)> + '_ {
        self.segments.iter().flatten()
    }
}

/// An open target and the state derived from it.
pub struct HeapSession {
    catalog: Box<dyn TypeCatalog>,
    config: SessionConfig,
    deobfuscator: Option<Deobfuscator>,
    objects: OnceLock<HeapObjects>,
    references: Option<ReferenceIndex>,
    visualizers: TypeVisualizerRegistry,
}

impl HeapSession {
    /// Open a session with the default configuration.
    ///
    /// ## Arguments
    /// * 'catalog' - Type catalog and memory of the target
    pub fn new(catalog: impl TypeCatalog + 'static) -> Self {
        Self::with_config(catalog, SessionConfig::default())
    }

    /// Open a session.
    ///
    /// ## Arguments
    /// * 'catalog' - Type catalog and memory of the target
    /// * 'config'  - Session settings
    pub fn with_config(catalog: impl TypeCatalog + 'static, config: SessionConfig) -> Self {
        HeapSession {
            catalog: Box::new(catalog),
            config,
            deobfuscator: None,
            objects: OnceLock::new(),
            references: None,
            visualizers: TypeVisualizerRegistry::default(),
        }
    }

    /// The target's type catalog
    #[must_use]
    pub fn catalog(&self) -> &dyn TypeCatalog {
        self.catalog.as_ref()
    }

    /// Session settings
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Pointer width of the target in bytes
    #[must_use]
    pub fn pointer_size(&self) -> usize {
        self.catalog.pointer_size()
    }

    /// The object at `address`, typed by the runtime.
    ///
    /// Addresses the catalog cannot classify produce an undefined object.
    #[must_use]
    pub fn object(&self, address: u64) -> DynamicObject<'_> {
        DynamicObject::new(self, address, self.catalog.type_at(address), false)
    }

    /// Every heap object with its type, materialized on first use
    pub fn heap_objects(&self) -> &HeapObjects {
        self.objects
            .get_or_init(|| HeapObjects::collect(self.catalog.as_ref(), self.config.segment_size))
    }

    /// Every heap object, in heap order
    pub fn objects(&self) -> ObjectIter<'_> {
        ObjectIter {
            session: self,
            inner: Box::new(self.heap_objects().iter()),
        }
    }

    /// Objects whose original type name matches `pattern`.
    ///
    /// Without `*` the name must match exactly. With `*`, each star matches any run of
    /// characters and the whole name must match; case is ignored unless
    /// [`SessionConfig::wildcard_case_insensitive`] is off.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidPattern`] if the wildcard cannot be compiled.
    pub fn objects_of_type(&self, pattern: &str) -> Result<Vec<DynamicObject<'_>>> {
        let matcher: Box<dyn Fn(&str) -> bool + '_> = if pattern.contains('*') {
            let expression = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
            let regex = RegexBuilder::new(&expression)
                .case_insensitive(self.config.wildcard_case_insensitive)
                .build()?;
            Box::new(move |name| regex.is_match(name))
        } else {
            Box::new(|name| name == pattern)
        };

        let mut verdicts: HashMap<u64, bool> = HashMap::new();
        Ok(self
            .objects()
            .filter(|object| {
                let ty = object.runtime_type();
                *verdicts
                    .entry(ty.id)
                    .or_insert_with(|| matcher(&self.type_name(ty)))
            })
            .collect())
    }

    /// Objects of any of `types`, or every object when `types` is empty
    #[must_use]
    pub fn objects_of_types(&self, types: &[RuntimeTypeRc]) -> Vec<DynamicObject<'_>> {
        match types {
            [] => self.objects().collect(),
            [single] => self
                .objects()
                .filter(|object| object.runtime_type().id == single.id)
                .collect(),
            _ => {
                let ids: HashSet<u64> = types.iter().map(|ty| ty.id).collect();
                self.objects()
                    .filter(|object| ids.contains(&object.runtime_type().id))
                    .collect()
            }
        }
    }

    /// Load the renaming map at `path`.
    ///
    /// Loading the map already in use is a no-op; paths compare without regard to case.
    /// Replacing the map drops the materialized object list.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] or [`crate::Error::Xml`] if the map cannot be read.
    pub fn load_renaming_map(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let loaded = self
            .deobfuscator
            .as_ref()
            .and_then(Deobfuscator::path)
            .is_some_and(|current| {
                current
                    .to_string_lossy()
                    .eq_ignore_ascii_case(&path.to_string_lossy())
            });
        if loaded {
            log::debug!("Renaming map {} is already loaded", path.display());
            return Ok(());
        }

        let deobfuscator =
            Deobfuscator::from_file(path)?.with_type_cache(self.config.cache_type_deobfuscators);
        self.set_deobfuscator(deobfuscator);
        Ok(())
    }

    /// Use `deobfuscator` for every name lookup from now on
    pub fn set_deobfuscator(&mut self, deobfuscator: Deobfuscator) {
        self.deobfuscator = Some(deobfuscator);
        self.objects = OnceLock::new();
    }

    /// Forget the renaming map
    pub fn clear_deobfuscator(&mut self) {
        self.deobfuscator = None;
        self.objects = OnceLock::new();
    }

    /// The renaming map in use, if any
    #[must_use]
    pub fn deobfuscator(&self) -> Option<&Deobfuscator> {
        self.deobfuscator.as_ref()
    }

    /// Renaming entry for a runtime type; an identity entry when no map covers it
    #[must_use]
    pub fn type_deobfuscator(&self, ty: &RuntimeType) -> Arc<dyn TypeDeobfuscator> {
        match &self.deobfuscator {
            Some(deobfuscator) => deobfuscator.type_deobfuscator_for(ty),
            None => Arc::new(IdentityDeobfuscator::new(ty.name.clone())),
        }
    }

    /// Original name of a runtime type.
    ///
    /// Falls back to a structural translation for types the map does not list, so arrays and
    /// generic instantiations of renamed types still read naturally.
    #[must_use]
    pub fn type_name(&self, ty: &RuntimeType) -> String {
        let deobfuscator = self.type_deobfuscator(ty);
        if deobfuscator.is_mapped() {
            return deobfuscator.original_name().to_string();
        }
        self.deobfuscate_type(&ty.name)
    }

    /// Original spelling of a (possibly composite) obfuscated type name
    #[must_use]
    pub fn deobfuscate_type(&self, name: &str) -> String {
        match &self.deobfuscator {
            Some(deobfuscator) => deobfuscator.deobfuscate_type(name),
            None => name.to_string(),
        }
    }

    /// Obfuscated spelling of a (possibly composite) original type name
    #[must_use]
    pub fn obfuscate_type(&self, name: &str) -> String {
        match &self.deobfuscator {
            Some(deobfuscator) => deobfuscator.obfuscate_type(name),
            None => name.to_string(),
        }
    }

    /// Rewrite every `at Type.Method(...)` frame of a stack trace with original names
    #[must_use]
    pub fn deobfuscate_stack(&self, trace: &str) -> String {
        match &self.deobfuscator {
            Some(deobfuscator) => deobfuscator.deobfuscate_callstack(trace),
            None => trace.to_string(),
        }
    }

    /// Build the reverse reference index unless one exists.
    ///
    /// # Errors
    /// Returns the first read error raised while scanning the heap.
    pub fn build_reference_index(&mut self) -> Result<()> {
        self.build_references(None)
    }

    /// Build the reverse reference index unless one exists, stopping when `cancel` is set.
    ///
    /// # Errors
    /// Returns [`crate::Error::Cancelled`] if cancelled, or a read error.
    pub fn build_reference_index_with_cancel(&mut self, cancel: &AtomicBool) -> Result<()> {
        self.build_references(Some(cancel))
    }

    fn build_references(&mut self, cancel: Option<&AtomicBool>) -> Result<()> {
        if self.references.is_none() {
            let index = ReferenceIndex::build(self, cancel)?;
            self.references = Some(index);
        }
        Ok(())
    }

    /// Drop the reverse reference index
    pub fn clear_reference_index(&mut self) {
        self.references = None;
    }

    /// Returns true if the reverse reference index has been built
    #[must_use]
    pub fn has_reference_index(&self) -> bool {
        self.references.is_some()
    }

    /// The reverse reference index, if built
    #[must_use]
    pub fn reference_index(&self) -> Option<&ReferenceIndex> {
        self.references.as_ref()
    }

    /// Visualizers consulted by [`DynamicObject::visualize`]
    #[must_use]
    pub fn visualizers(&self) -> &TypeVisualizerRegistry {
        &self.visualizers
    }

    /// Mutable access to the visualizer registry
    pub fn visualizers_mut(&mut self) -> &mut TypeVisualizerRegistry {
        &mut self.visualizers
    }
}

impl std::fmt::Debug for HeapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapSession")
            .field("config", &self.config)
            .field("deobfuscator", &self.deobfuscator)
            .field("objects", &self.objects.get().map(HeapObjects::len))
            .field("references", &self.references.as_ref().map(ReferenceIndex::len))
            .field("visualizers", &self.visualizers)
            .finish_non_exhaustive()
    }
}

/// Iterator over every heap object of a session.
///
/// Created by [`HeapSession::objects`].
pub struct ObjectIter<'s> {
    session: &'s HeapSession,
    inner: Box<dyn Iterator<Item = &'s (u64, RuntimeTypeRc)> + 's>,
}

impl<'s> Iterator for ObjectIter<'s> {
    type Item = DynamicObject<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        let (address, ty) = self.inner.next()?;
        Some(DynamicObject::new(self.session, *address, ty.clone(), false))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::atomic::Ordering};

    use super::*;
    use crate::{
        test::{builders::HeapBuilder, fixtures::Fixture},
        Error,
    };

    const MAP: &str = r#"<dotfuscatorMap><mapping><module><name>Shop.dll</name>
  <type><name>Shop.Invoice</name><newname>a.b</newname>
    <fieldlist>
      <field><name>total</name><newname>c</newname><signature>int32</signature></field>
    </fieldlist>
  </type>
</module></mapping></dotfuscatorMap>"#;

    fn invoices() -> (HeapBuilder, u64) {
        let mut b = HeapBuilder::new();
        let int32 = b.int32.clone();
        let invoice = b.class("a.b", None, &[("c", &int32)]);
        let address = b.new_object(&invoice);
        b.set_i32(address, &invoice, "c", 120);
        b.new_object(&invoice);
        (b, address)
    }

    #[test]
    fn objects_are_materialized_in_segments() {
        let fixture = Fixture::new();
        let session = HeapSession::with_config(
            fixture.builder.heap.clone(),
            SessionConfig::new().with_segment_size(2),
        );

        let all: Vec<u64> = session.objects().map(|object| object.address()).collect();
        assert_eq!(all.len(), session.heap_objects().len());
        assert_eq!(session.heap_objects().segment_count(), all.len().div_ceil(2));
        assert!(all.contains(&fixture.order));
    }

    #[test]
    fn exact_and_wildcard_type_patterns() {
        let fixture = Fixture::new();
        let session = fixture.session();

        let orders = session.objects_of_type("Shop.Order").unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].address(), fixture.order);

        assert!(session.objects_of_type("shop.order").unwrap().is_empty());
        assert_eq!(session.objects_of_type("shop.*customer").unwrap().len(), 1);
        assert_eq!(session.objects_of_type("System.Str*").unwrap().len(), 2);

        let strict =
            HeapSession::with_config(fixture.builder.heap.clone(), SessionConfig::case_sensitive());
        assert!(strict.objects_of_type("shop.*").unwrap().is_empty());
    }

    #[test]
    fn objects_by_runtime_type() {
        let fixture = Fixture::new();
        let session = fixture.session();
        let order = session.object(fixture.order);
        let string = session.object(fixture.note);

        let total = session.objects().count();
        assert_eq!(session.objects_of_types(&[]).len(), total);
        assert_eq!(
            session
                .objects_of_types(&[order.runtime_type().clone()])
                .len(),
            1
        );
        assert_eq!(
            session
                .objects_of_types(&[order.runtime_type().clone(), string.runtime_type().clone()])
                .len(),
            3
        );
    }

    #[test]
    fn names_are_identity_without_a_map() {
        let (b, address) = invoices();
        let session = b.session();
        let object = session.object(address);

        assert_eq!(object.type_name(), "a.b");
        assert!(!session.type_deobfuscator(object.runtime_type()).is_mapped());
        assert_eq!(session.obfuscate_type("Shop.Invoice"), "Shop.Invoice");
        assert_eq!(session.deobfuscate_stack("   at a.b.c()"), "   at a.b.c()");
    }

    #[test]
    fn renaming_map_from_disk() {
        let (b, address) = invoices();
        let mut session = b.session();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MAP.as_bytes()).unwrap();
        session.load_renaming_map(file.path()).unwrap();

        let object = session.object(address);
        assert_eq!(object.type_name(), "Shop.Invoice");
        assert_eq!(object.field("total").unwrap().to::<i32>().unwrap(), 120);
        assert_eq!(session.obfuscate_type("Shop.Invoice[]"), "a.b[]");
        assert_eq!(session.deobfuscate_type("a.b[]"), "Shop.Invoice[]");
        assert_eq!(session.objects_of_type("Shop.Invoice").unwrap().len(), 2);
        assert_eq!(session.objects_of_type("*invoice").unwrap().len(), 2);
    }

    #[test]
    fn reloading_the_same_map_keeps_the_object_cache() {
        let (b, _) = invoices();
        let mut session = b.session();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MAP.as_bytes()).unwrap();

        session.load_renaming_map(file.path()).unwrap();
        session.heap_objects();
        assert!(session.objects.get().is_some());

        session.load_renaming_map(file.path()).unwrap();
        assert!(session.objects.get().is_some());

        session.set_deobfuscator(MAP.parse().unwrap());
        assert!(session.objects.get().is_none());
    }

    #[test]
    fn missing_map_file() {
        let (b, _) = invoices();
        let mut session = b.session();
        let error = session
            .load_renaming_map("/nonexistent/renaming-map.xml")
            .unwrap_err();
        assert!(matches!(error, Error::FileError(_)));
        assert!(session.deobfuscator().is_none());
    }

    #[test]
    fn reference_index_lifecycle() {
        let fixture = Fixture::new();
        let mut session = fixture.session();
        assert!(!session.has_reference_index());

        let cancel = AtomicBool::new(true);
        assert!(session.build_reference_index_with_cancel(&cancel).is_err());
        assert!(!session.has_reference_index());

        cancel.store(false, Ordering::Relaxed);
        session.build_reference_index_with_cancel(&cancel).unwrap();
        assert!(session.has_reference_index());

        let parents: Vec<u64> = session
            .object(fixture.customer)
            .referenced_by()
            .unwrap()
            .iter()
            .map(DynamicObject::address)
            .collect();
        assert_eq!(parents, vec![fixture.order]);

        session.clear_reference_index();
        assert!(session.reference_index().is_none());
    }
}
