//! # heapscope Prelude
//!
//! Convenient re-exports of the types most heap-inspection code needs. Import everything
//! with:
//!
//! ```rust
//! use heapscope::prelude::*;
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all heapscope operations
pub use crate::Error;

/// The result type used throughout heapscope
pub use crate::Result;

// ================================================================================================
// Session
// ================================================================================================

/// Inspection context and its settings
pub use crate::session::{HeapSession, SessionConfig};

// ================================================================================================
// Target Access
// ================================================================================================

/// Collaborator traits and the in-memory snapshot backend
pub use crate::runtime::{MemoryReader, MemorySnapshot, TypeCatalog};

/// Runtime type model
pub use crate::runtime::{ElementKind, RuntimeField, RuntimeType, RuntimeTypeRc, TypeFlags};

// ================================================================================================
// Objects and Values
// ================================================================================================

/// Dynamic objects, decoded values and rendering options
pub use crate::objects::{DetailOptions, DynamicObject, SimpleValue};

/// Decoded framework values
pub use crate::decoder::{Certificate, DnsEndPoint, TimeSpan, Timestamp};

// ================================================================================================
// Deobfuscation
// ================================================================================================

/// Renaming-map lookups
pub use crate::obfuscation::{Deobfuscator, MethodLookup, TypeDeobfuscator, TypeName};

// ================================================================================================
// Derived Views
// ================================================================================================

/// Reverse reference index
pub use crate::references::ReferenceIndex;

/// Type visualizers
pub use crate::visualizers::{TypeVisualizer, TypeVisualizerRegistry, Visualization};
