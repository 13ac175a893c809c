//! Friendlier views of well-known framework types.
//!
//! Collections keep their content in private fields whose layout differs between runtime
//! versions: a `List<T>` is a backing array plus a size, a `Queue<T>` a ring buffer, a
//! `DataTable` a paged red-black tree. A [`TypeVisualizer`] knows one such layout and turns
//! the object into a [`Visualization`] of its logical content, reading the same memory without
//! copying it into the target's own types.
//!
//! Every visualizer declares a shape contract, the fields it needs. The registry only hands an
//! object to a visualizer whose contract the object's type satisfies; otherwise, or if the
//! visualizer fails while reading, the object simply has no visualization.
//!
//! # Examples
//!
//! ```rust
//! use heapscope::visualizers::{lookup_name, TypeVisualizerRegistry};
//!
//! let registry = TypeVisualizerRegistry::default();
//! let list = "System.Collections.Generic.List<System.String>";
//! assert_eq!(lookup_name(list), "System.Collections.Generic.List");
//! assert_eq!(registry.find(list).map(|v| v.name()), Some("List"));
//! assert!(registry.find("Shop.Order").is_none());
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use regex::Regex;

use crate::{objects::DynamicObject, Result};

mod data;
pub(crate) mod dictionary;
mod list;
mod queue;

pub use data::{
    DataColumnValue, DataRowView, DataRowVisualizer, DataSetView, DataSetVisualizer,
    DataTableView, DataTableVisualizer, RowState,
};
pub use dictionary::{DictionaryView, DictionaryVisualizer};
pub use list::ListVisualizer;
pub use queue::QueueVisualizer;

/// Count and items of a sequential collection.
#[derive(Clone, Debug)]
pub struct SequenceView<'s> {
    /// Number of items the collection reports
    pub count: usize,
    /// The items, in logical order
    pub items: Vec<DynamicObject<'s>>,
}

/// Logical content of a visualized object.
#[derive(Clone, Debug)]
pub enum Visualization<'s> {
    /// A list or queue
    Sequence(SequenceView<'s>),
    /// A hash map
    Dictionary(DictionaryView<'s>),
    /// One row of a data table
    Row(DataRowView<'s>),
    /// A data table
    Table(DataTableView<'s>),
    /// A set of data tables
    DataSet(DataSetView<'s>),
}

impl Visualization<'_> {
    /// Number of top-level items: elements, entries, columns, rows or tables
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Visualization::Sequence(view) => view.items.len(),
            Visualization::Dictionary(view) => view.entries.len(),
            Visualization::Row(view) => view.columns.len(),
            Visualization::Table(view) => view.rows.len(),
            Visualization::DataSet(view) => view.tables.len(),
        }
    }

    /// Returns true if there are no top-level items
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reinterprets objects of one well-known type.
pub trait TypeVisualizer: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Fields the object must have for [`TypeVisualizer::visualize`] to read it
    fn required_fields(&self) -> &'static [&'static str];

    /// Returns true if `object` satisfies the shape contract
    fn matches_shape(&self, object: &DynamicObject<'_>) -> bool {
        self.required_fields()
            .iter()
            .all(|field| object.has_field(field))
    }

    /// Build the view of `object`.
    ///
    /// # Errors
    /// Returns the first read or conversion error.
    fn visualize<'s>(&self, object: &DynamicObject<'s>) -> Result<Visualization<'s>>;
}

/// Name a type is looked up by: everything before the generic argument list or arity marker
#[must_use]
pub fn lookup_name(type_name: &str) -> &str {
    match type_name.find(['<', '`']) {
        Some(end) => &type_name[..end],
        None => type_name,
    }
}

/// Visualizers by exact type name and by pattern.
#[derive(Clone)]
pub struct TypeVisualizerRegistry {
    exact: HashMap<String, Arc<dyn TypeVisualizer>>,
    patterns: Vec<(Regex, Arc<dyn TypeVisualizer>)>,
}

impl TypeVisualizerRegistry {
    /// A registry without any visualizer
    #[must_use]
    pub fn empty() -> Self {
        TypeVisualizerRegistry {
            exact: HashMap::new(),
            patterns: Vec::new(),
        }
    }

    /// Register `visualizer` for the type `name` (without generic arguments).
    ///
    /// Replaces a previous registration of the same name.
    pub fn register(&mut self, name: impl Into<String>, visualizer: impl TypeVisualizer + 'static) {
        self.exact.insert(name.into(), Arc::new(visualizer));
    }

    /// Register `visualizer` for every type name matching `pattern`.
    ///
    /// Patterns are tried in registration order, after the exact names.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidPattern`] if `pattern` is not a valid regular expression.
    pub fn register_pattern(
        &mut self,
        pattern: &str,
        visualizer: impl TypeVisualizer + 'static,
    ) -> Result<()> {
        let regex = Regex::new(pattern)?;
        self.patterns.push((regex, Arc::new(visualizer)));
        Ok(())
    }

    /// The visualizer registered for a type name, if any
    #[must_use]
    pub fn find(&self, type_name: &str) -> Option<&Arc<dyn TypeVisualizer>> {
        let name = lookup_name(type_name);
        self.exact.get(name).or_else(|| {
            self.patterns
                .iter()
                .find(|(pattern, _)| pattern.is_match(name))
                .map(|(_, visualizer)| visualizer)
        })
    }

    /// Visualize `object` with the visualizer registered for its type.
    ///
    /// Returns `None` for null objects, unregistered types, objects that break the
    /// visualizer's shape contract and objects the visualizer fails to read.
    #[must_use]
    pub fn visualize<'s>(&self, object: &DynamicObject<'s>) -> Option<Visualization<'s>> {
        if object.is_null() {
            return None;
        }

        let type_name = object.type_name();
        let visualizer = self.find(&type_name)?;

        if !visualizer.matches_shape(object) {
            log::warn!(
                "{} visualizer skipped: {} does not have the expected fields {:?}",
                visualizer.name(),
                type_name,
                visualizer.required_fields()
            );
            return None;
        }

        match visualizer.visualize(object) {
            Ok(visualization) => Some(visualization),
            Err(error) => {
                log::warn!(
                    "{} visualizer failed on {}: {}",
                    visualizer.name(),
                    object,
                    error
                );
                None
            }
        }
    }
}

impl Default for TypeVisualizerRegistry {
    /// Registry with the built-in collection and data visualizers
    fn default() -> Self {
        let mut registry = TypeVisualizerRegistry::empty();
        registry.register("System.Collections.Generic.Dictionary", DictionaryVisualizer);
        registry.register("System.Collections.Generic.List", ListVisualizer);
        registry.register("System.Collections.Generic.Queue", QueueVisualizer);
        registry.register("System.Data.DataRow", DataRowVisualizer);
        registry.register("System.Data.DataTable", DataTableVisualizer);
        registry.register("System.Data.DataSet", DataSetVisualizer);
        registry
    }
}

impl fmt::Debug for TypeVisualizerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.exact.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TypeVisualizerRegistry")
            .field("exact", &names)
            .field(
                "patterns",
                &self
                    .patterns
                    .iter()
                    .map(|(pattern, _)| pattern.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::Fixture;

    struct Everything;

    impl TypeVisualizer for Everything {
        fn name(&self) -> &'static str {
            "Everything"
        }

        fn required_fields(&self) -> &'static [&'static str] {
            &["quantity"]
        }

        fn visualize<'s>(&self, object: &DynamicObject<'s>) -> Result<Visualization<'s>> {
            Ok(Visualization::Sequence(SequenceView {
                count: 1,
                items: vec![object.field("quantity")?],
            }))
        }
    }

    #[test]
    fn lookup_strips_generic_arguments() {
        assert_eq!(lookup_name("Dictionary<int,string>"), "Dictionary");
        assert_eq!(lookup_name("System.Collections.Generic.List`1"), "System.Collections.Generic.List");
        assert_eq!(lookup_name("Shop.Order"), "Shop.Order");
    }

    #[test]
    fn exact_names_win_over_patterns() {
        let mut registry = TypeVisualizerRegistry::default();
        registry.register_pattern(r"^System\.Collections\.", Everything).unwrap();

        assert_eq!(
            registry
                .find("System.Collections.Generic.List<int>")
                .map(|v| v.name()),
            Some("List")
        );
        assert_eq!(
            registry
                .find("System.Collections.Generic.Stack<int>")
                .map(|v| v.name()),
            Some("Everything")
        );
        assert!(registry.register_pattern("(", Everything).is_err());
    }

    #[test]
    fn shape_contract_is_enforced() {
        let fixture = Fixture::new();
        let session = fixture.session();

        let mut registry = TypeVisualizerRegistry::empty();
        registry.register_pattern(r"^Shop\.", Everything).unwrap();

        let order = session.object(fixture.order);
        let view = registry.visualize(&order).unwrap();
        assert_eq!(view.len(), 1);

        let customer = session.object(fixture.customer);
        assert!(registry.visualize(&customer).is_none());
    }
}
