//! `System.Collections.Generic.Dictionary<TKey, TValue>`.
//!
//! Entries live in an array of structs, used front to back; removed entries stay in place and
//! are chained into a free list. Only entries before the high-water mark that are not on the
//! free list hold data. Two layouts are recognised:
//!
//! | Runtime     | count    | free         | entries    | live entry      |
//! |-------------|----------|--------------|------------|-----------------|
//! | Framework   | `count`  | `freeCount`  | `entries`  | `hashCode >= 0` |
//! | Core / .NET | `_count` | `_freeCount` | `_entries` | `next >= -1`    |

use crate::{
    objects::DynamicObject,
    visualizers::{TypeVisualizer, Visualization},
    Error, Result,
};

struct Layout {
    count: &'static str,
    free_count: &'static str,
    entries: &'static str,
    is_live: fn(&DynamicObject<'_>) -> Result<bool>,
}

static FRAMEWORK: Layout = Layout {
    count: "count",
    free_count: "freeCount",
    entries: "entries",
    is_live: hash_is_set,
};

static CORE: Layout = Layout {
    count: "_count",
    free_count: "_freeCount",
    entries: "_entries",
    is_live: not_on_free_list,
};

fn hash_is_set(entry: &DynamicObject<'_>) -> Result<bool> {
    Ok(entry.field("hashCode")?.to::<i32>()? >= 0)
}

// Free entries encode their free-list link as `-3 - next`.
fn not_on_free_list(entry: &DynamicObject<'_>) -> Result<bool> {
    Ok(entry.field("next")?.to::<i32>()? >= -1)
}

fn layout_of(object: &DynamicObject<'_>) -> Option<&'static Layout> {
    [&FRAMEWORK, &CORE].into_iter().find(|layout| {
        object.has_field(layout.count)
            && object.has_field(layout.free_count)
            && object.has_field(layout.entries)
    })
}

fn read_count(object: &DynamicObject<'_>, field: &str) -> Result<usize> {
    let count: i32 = object.field(field)?.to()?;
    usize::try_from(count).map_err(|_| malformed_error!("Negative dictionary {}: {}", field, count))
}

/// Key and value of every live entry, in storage order.
///
/// # Errors
/// Returns [`Error::UnsupportedType`] if the object has neither dictionary layout, or a read
/// error.
pub(crate) fn entries<'s>(
    object: &DynamicObject<'s>,
) -> Result<Vec<(DynamicObject<'s>, DynamicObject<'s>)>> {
    let Some(layout) = layout_of(object) else {
        return Err(Error::UnsupportedType(object.type_name()));
    };

    let storage = object.field(layout.entries)?;
    if storage.is_null() {
        return Ok(Vec::new());
    }

    let used = read_count(object, layout.count)?.min(storage.array_length()?);
    let mut entries = Vec::with_capacity(used);
    for index in 0..used {
        let entry = storage.index(index as i64)?;
        if (layout.is_live)(&entry)? {
            entries.push((entry.field("key")?, entry.field("value")?));
        }
    }

    Ok(entries)
}

/// Count and live entries of a dictionary.
#[derive(Clone, Debug)]
pub struct DictionaryView<'s> {
    /// Number of live entries the dictionary reports
    pub count: usize,
    /// Key and value pairs, in storage order
    pub entries: Vec<(DynamicObject<'s>, DynamicObject<'s>)>,
}

impl<'s> DictionaryView<'s> {
    /// Value stored for the first key whose simple value displays as `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&DynamicObject<'s>> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.eq_str(key))
            .map(|(_, value)| value)
    }
}

/// Visualizer for `System.Collections.Generic.Dictionary`.
pub struct DictionaryVisualizer;

impl TypeVisualizer for DictionaryVisualizer {
    fn name(&self) -> &'static str {
        "Dictionary"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["count", "freeCount", "entries"]
    }

    /// Accepts the Framework field names or their underscored Core counterparts
    fn matches_shape(&self, object: &DynamicObject<'_>) -> bool {
        layout_of(object).is_some()
    }

    fn visualize<'s>(&self, object: &DynamicObject<'s>) -> Result<Visualization<'s>> {
        let layout = layout_of(object).ok_or_else(|| Error::UnsupportedType(object.type_name()))?;

        let count = read_count(object, layout.count)?;
        let free = read_count(object, layout.free_count)?;

        Ok(Visualization::Dictionary(DictionaryView {
            count: count.saturating_sub(free),
            entries: entries(object)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{runtime::RuntimeTypeRc, test::builders::HeapBuilder};

    struct Map {
        builder: HeapBuilder,
        address: u64,
    }

    /// Four slots, the third one removed, plus one unused slot past the high-water mark
    fn framework_map() -> Map {
        let mut b = HeapBuilder::new();
        let int32 = b.int32.clone();
        let string = b.string.clone();
        let int_array = b.array_type(&int32);

        let entry = b.value_type(
            "System.Collections.Generic.Dictionary`2+Entry<System.String,System.Int32>",
            &[
                ("hashCode", &int32),
                ("next", &int32),
                ("key", &string),
                ("value", &int32),
            ],
        );
        let entry_array = b.array_type(&entry);
        let dictionary = b.class(
            "System.Collections.Generic.Dictionary<System.String,System.Int32>",
            None,
            &[
                ("buckets", &int_array),
                ("entries", &entry_array),
                ("count", &int32),
                ("freeCount", &int32),
            ],
        );

        let storage = b.new_array(&entry_array, 5);
        let slots = [(11, "one", 1), (22, "two", 2), (-1, "gone", 0), (44, "four", 4)];
        for (index, (hash, key, value)) in slots.into_iter().enumerate() {
            let element = b.element_address(storage, &entry_array, index);
            let key = b.new_string(key);
            write_entry(&mut b, &entry, element, hash, key, value);
        }

        let address = b.new_object(&dictionary);
        b.set_ref(address, &dictionary, "entries", storage);
        b.set_i32(address, &dictionary, "count", 4);
        b.set_i32(address, &dictionary, "freeCount", 1);

        Map { builder: b, address }
    }

    fn write_entry(
        b: &mut HeapBuilder,
        entry: &RuntimeTypeRc,
        element: u64,
        hash: i32,
        key: u64,
        value: i32,
    ) {
        let hash_slot = b.field_address(element, entry, "hashCode", true);
        b.write(hash_slot, &hash.to_le_bytes());
        let key_slot = b.field_address(element, entry, "key", true);
        b.write(key_slot, &key.to_le_bytes());
        let value_slot = b.field_address(element, entry, "value", true);
        b.write(value_slot, &value.to_le_bytes());
    }

    #[test]
    fn framework_layout() {
        let map = framework_map();
        let session = map.builder.session();
        let object = session.object(map.address);

        let Some(Visualization::Dictionary(view)) = object.visualize() else {
            panic!("expected a dictionary view");
        };
        assert_eq!(view.count, 3);

        let keys: Vec<String> = view
            .entries
            .iter()
            .map(|(key, _)| key.to::<String>().unwrap())
            .collect();
        assert_eq!(keys, ["one", "two", "four"]);
        assert_eq!(view.get("four").unwrap().to::<i32>().unwrap(), 4);
        assert!(view.get("gone").is_none());

        let values: Vec<i32> = object
            .dictionary_values()
            .unwrap()
            .iter()
            .map(|value| value.to().unwrap())
            .collect();
        assert_eq!(values, [1, 2, 4]);
    }

    #[test]
    fn core_layout_uses_the_free_list_marker() {
        let mut b = HeapBuilder::new();
        let int32 = b.int32.clone();
        let int_array = b.array_type(&int32);
        let entry = b.value_type(
            "System.Collections.Generic.Dictionary`2+Entry<System.Int32,System.Int32>",
            &[("hashCode", &int32), ("next", &int32), ("key", &int32), ("value", &int32)],
        );
        let entry_array = b.array_type(&entry);
        let dictionary = b.class(
            "System.Collections.Generic.Dictionary<System.Int32,System.Int32>",
            None,
            &[
                ("_buckets", &int_array),
                ("_entries", &entry_array),
                ("_count", &int32),
                ("_freeCount", &int32),
            ],
        );

        let storage = b.new_array(&entry_array, 3);
        for (index, next) in [-1_i32, -3, 0].into_iter().enumerate() {
            let element = b.element_address(storage, &entry_array, index);
            let next_slot = b.field_address(element, &entry, "next", true);
            b.write(next_slot, &next.to_le_bytes());
            let key_slot = b.field_address(element, &entry, "key", true);
            b.write(key_slot, &(index as i32 * 10).to_le_bytes());
        }

        let address = b.new_object(&dictionary);
        b.set_ref(address, &dictionary, "_entries", storage);
        b.set_i32(address, &dictionary, "_count", 3);
        b.set_i32(address, &dictionary, "_freeCount", 1);

        let session = b.session();
        let Some(Visualization::Dictionary(view)) = session.object(address).visualize() else {
            panic!("expected a dictionary view");
        };
        assert_eq!(view.count, 2);
        let keys: Vec<i32> = view.entries.iter().map(|(k, _)| k.to().unwrap()).collect();
        assert_eq!(keys, [0, 20]);
    }

    #[test]
    fn other_types_are_rejected() {
        let map = framework_map();
        let session = map.builder.session();
        let string = session
            .objects()
            .find(|object| object.runtime_type().is_string())
            .unwrap();

        assert!(matches!(
            string.dictionary_values(),
            Err(Error::UnsupportedType(_))
        ));
    }

    #[test]
    fn unknown_layout_has_no_view() {
        let mut b = HeapBuilder::new();
        let int32 = b.int32.clone();
        let dictionary = b.class(
            "System.Collections.Generic.Dictionary<System.Int32,System.Int32>",
            None,
            &[("size", &int32)],
        );
        let address = b.new_object(&dictionary);

        let session = b.session();
        let object = session.object(address);
        assert!(object.visualize().is_none());
        assert!(matches!(
            object.dictionary_values(),
            Err(Error::UnsupportedType(_))
        ));
    }
}
