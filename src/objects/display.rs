//! Short and detailed text rendering of heap objects.

use std::fmt;

use crate::{
    objects::{DynamicObject, NULL_ADDRESS},
    Result,
};

/// Marker rendered for objects whose type could not be resolved
pub const UNDEFINED_MARKER: &str = "#undefined";

/// Marker rendered for the null reference
pub const NULL_MARKER: &str = "{null}";

/// Controls [`DynamicObject::to_detailed_string`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetailOptions {
    /// Expand value-type fields and array elements instead of rendering their short form
    pub include_interior_fields: bool,
    /// Stop expanding below this nesting depth, `None` for unbounded
    pub max_depth: Option<usize>,
    /// One level of indentation
    pub indent: &'static str,
}

impl Default for DetailOptions {
    fn default() -> Self {
        DetailOptions {
            include_interior_fields: true,
            max_depth: None,
            indent: "  ",
        }
    }
}

impl DetailOptions {
    /// Only the object's own fields, each in short form
    #[must_use]
    pub fn shallow() -> Self {
        DetailOptions {
            include_interior_fields: false,
            ..Self::default()
        }
    }

    /// Expand at most `depth` levels
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

impl DynamicObject<'_> {
    /// Render the object and, recursively, its fields or elements, one per line.
    ///
    /// Reference-typed fields are always rendered in short form; value-type fields and array
    /// elements are expanded when [`DetailOptions::include_interior_fields`] is set. Reference
    /// cycles reachable through arrays are only bounded by [`DetailOptions::max_depth`].
    ///
    /// # Errors
    /// Returns the first read error raised while walking the object.
    pub fn to_detailed_string(&self, options: &DetailOptions) -> Result<String> {
        let mut out = String::new();
        self.write_detailed(&mut out, options.indent, 0, options)?;
        Ok(out)
    }

    fn write_detailed(
        &self,
        out: &mut String,
        indent: &str,
        depth: usize,
        options: &DetailOptions,
    ) -> Result<()> {
        out.push_str(&self.to_string());

        if self.has_simple_value() || options.max_depth.is_some_and(|max| depth >= max) {
            return Ok(());
        }

        if self.runtime_type().is_array() {
            let nested = format!("{indent}{0}{0}", options.indent);
            for index in 0..self.array_length()? {
                out.push('\n');
                out.push_str(indent);
                out.push_str(&format!("[{index}]: "));

                let element = self.index(index as i64)?;
                if options.include_interior_fields {
                    element.write_detailed(out, &nested, depth + 1, options)?;
                } else {
                    out.push_str(&element.to_string());
                }
            }
            return Ok(());
        }

        let nested = format!("{indent}{}", options.indent);
        for field in self.fields() {
            let value = self.field_by_declaration(&field)?;

            out.push('\n');
            out.push_str(indent);
            out.push_str(&self.field_display_name(&field));
            out.push_str(": ");

            if value.has_simple_value()
                || field.resolved_type().is_reference()
                || !options.include_interior_fields
            {
                out.push_str(&value.to_string());
            } else {
                value.write_detailed(out, &nested, depth + 1, options)?;
            }
        }

        Ok(())
    }

    fn write_short(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}", self.type_name())?;
        if !self.is_interior() {
            if self.address() == NULL_ADDRESS {
                write!(f, " ({NULL_MARKER})")?;
            } else {
                write!(f, " (0x{:X})", self.address())?;
            }
        }
        f.write_str("}")
    }
}

impl fmt::Display for DynamicObject<'_> {
    /// `#undefined`, the text of a simple value, or `{TypeName (0xADDRESS)}`.
    ///
    /// Interior values omit the address. A simple value that fails to decode falls back to the
    /// complex form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            return f.write_str(UNDEFINED_MARKER);
        }

        if self.has_simple_value() {
            if let Ok(value) = self.value() {
                return write!(f, "{value}");
            }
        }

        self.write_short(f)
    }
}
