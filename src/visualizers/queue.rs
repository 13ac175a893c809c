//! `System.Collections.Generic.Queue<T>`: a ring buffer of `_size` items starting at `_head`.

use crate::{
    objects::DynamicObject,
    visualizers::{list::read_size, SequenceView, TypeVisualizer, Visualization},
    Result,
};

/// Visualizer for `System.Collections.Generic.Queue`.
pub struct QueueVisualizer;

impl TypeVisualizer for QueueVisualizer {
    fn name(&self) -> &'static str {
        "Queue"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["_array", "_head", "_size"]
    }

    fn visualize<'s>(&self, object: &DynamicObject<'s>) -> Result<Visualization<'s>> {
        let count = read_size(object, "_size")?;
        let head = read_size(object, "_head")?;
        let storage = object.field("_array")?;

        if storage.is_null() {
            return Ok(Visualization::Sequence(SequenceView {
                count,
                items: Vec::new(),
            }));
        }

        let capacity = storage.array_length()?;
        if count > capacity || (capacity > 0 && head >= capacity) {
            return Err(malformed_error!(
                "Queue of {} items at head {} does not fit its {} slots",
                count,
                head,
                capacity
            ));
        }

        // Wraps when head + size runs past the end, including a full queue where tail == head
        let mut items = Vec::with_capacity(count);
        for offset in 0..count {
            items.push(storage.index(((head + offset) % capacity) as i64)?);
        }

        Ok(Visualization::Sequence(SequenceView { count, items }))
    }
}
