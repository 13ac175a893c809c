//! `System.Collections.Generic.List<T>`: the first `_size` slots of `_items`.

use crate::{
    objects::DynamicObject,
    visualizers::{SequenceView, TypeVisualizer, Visualization},
    Result,
};

/// Number of items a collection reports in `field`
pub(super) fn read_size(object: &DynamicObject<'_>, field: &str) -> Result<usize> {
    let size: i32 = object.field(field)?.to()?;
    usize::try_from(size).map_err(|_| malformed_error!("Negative collection {}: {}", field, size))
}

/// Visualizer for `System.Collections.Generic.List`.
pub struct ListVisualizer;

impl TypeVisualizer for ListVisualizer {
    fn name(&self) -> &'static str {
        "List"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["_items", "_size"]
    }

    fn visualize<'s>(&self, object: &DynamicObject<'s>) -> Result<Visualization<'s>> {
        let count = read_size(object, "_size")?;
        let storage = object.field("_items")?;

        let mut items = Vec::with_capacity(count);
        if !storage.is_null() {
            for index in 0..count.min(storage.array_length()?) {
                items.push(storage.index(index as i64)?);
            }
        }

        Ok(Visualization::Sequence(SequenceView { count, items }))
    }
}
