// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # heapscope
//!
//! Dynamic, schema-free inspection of .NET managed heaps.
//!
//! `heapscope` navigates the objects of a live process or crash dump without knowing their
//! types at compile time: fields are looked up by name, arrays are indexed, terminal values
//! such as strings, timestamps, GUIDs, IP addresses and certificates are decoded into native
//! Rust values. Build-time obfuscation is undone on the fly through the obfuscator's renaming
//! map, so code reads `order.field("customer")` even when the field is called `a` in the
//! target.
//!
//! ## Features
//!
//! - **Dynamic objects** - [`objects::DynamicObject`] navigates fields, elements and
//!   references, re-resolving polymorphic references to their actual type
//! - **Value decoding** - [`decoder`] turns primitives and well-known framework types into
//!   [`objects::SimpleValue`]s
//! - **Deobfuscation** - [`obfuscation`] loads renaming maps, translates composite type names
//!   and rewrites obfuscated stack traces
//! - **Reverse references** - [`references::ReferenceIndex`] answers "who points at this
//!   object" in constant time after one heap scan
//! - **Visualizers** - [`visualizers`] present collections and `System.Data` tables by their
//!   logical content
//!
//! ## Quick Start
//!
//! Everything starts from a [`session::HeapSession`] over a [`runtime::TypeCatalog`], the
//! interface through which the target's memory and runtime types are seen.
//! [`runtime::MemorySnapshot`] implements it over captured memory regions.
//!
//! ```rust
//! use std::sync::Arc;
//! use heapscope::prelude::*;
//!
//! let int32 = Arc::new(RuntimeType::primitive(1, ElementKind::I4));
//! let counter = Arc::new(
//!     RuntimeType::new(2, "Demo.Counter")
//!         .with_flags(TypeFlags::OBJECT_REFERENCE)
//!         .with_base_size(16),
//! );
//! counter.add_field("hits", &int32, 0);
//!
//! let mut heap = MemorySnapshot::new(8);
//! heap.register_type(&int32);
//! heap.register_type(&counter);
//! let address = heap.alloc_object(&counter, 16)?;
//! heap.write(address + 8, &7_i32.to_le_bytes())?;
//!
//! let session = HeapSession::new(heap);
//! for object in session.objects_of_type("Demo.*")? {
//!     assert_eq!(object.field("hits")?.to::<i32>()?, 7);
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`runtime`] - the collaborator interface: memory reads, runtime types, heap enumeration
//! - [`session`] - the explicit inspection context every object borrows from
//! - [`objects`] - dynamic objects, simple values and text rendering
//! - [`decoder`] - decoders for terminal values
//! - [`obfuscation`] - renaming maps, type-name parsing, stack-trace rewriting
//! - [`references`] - the reverse reference index
//! - [`visualizers`] - views of well-known framework types
//! - [`prelude`] - re-exports of the commonly used types
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result<T>`](Result). Data-integrity problems (short reads,
//! missing required fields, malformed structures) always surface as errors; lookups with a
//! natural "absent" meaning, such as a type the renaming map does not mention or an object
//! without a visualizer, degrade to identity results instead.
//!
//! ```rust
//! use heapscope::{prelude::*, Error};
//!
//! let session = HeapSession::new(MemorySnapshot::new(8));
//! let unknown = session.object(0x1000);
//! assert!(unknown.is_undefined());
//! assert!(matches!(unknown.field("x"), Err(Error::UnresolvedType { .. })));
//! ```

#[macro_use]
pub(crate) mod error;

pub mod decoder;
pub mod memory;
pub mod obfuscation;
pub mod objects;
pub mod prelude;
pub mod references;
pub mod runtime;
pub mod session;
pub mod visualizers;

#[cfg(test)]
pub(crate) mod test;

/// `heapscope` Result type.
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `heapscope` Error type.
///
/// The main error type for all operations in this crate. Provides detailed error information
/// for heap reads, object navigation, value decoding and renaming-map loading.
///
/// # Example
///
/// ```rust
/// use heapscope::{prelude::*, Error};
///
/// let session = HeapSession::new(MemorySnapshot::new(8));
/// match session.object(0x1000).field("total") {
///     Ok(total) => println!("{total}"),
///     Err(Error::UnresolvedType { address }) => println!("nothing at 0x{address:X}"),
///     Err(e) => println!("Error: {e}"),
/// }
/// ```
pub use error::Error;
