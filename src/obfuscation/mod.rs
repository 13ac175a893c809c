//! Obfuscator renaming maps and structural type names.
//!
//! Build-time obfuscators rename types, fields and methods and write a renaming map describing
//! every rename. This module loads such a map and answers lookups in both directions:
//!
//! - [`TypeName`] parses composite names (`Dictionary<a,b[]>[,]`) so that every component can be
//!   translated independently and compared in one canonical spelling
//! - [`RenamingMap`] is the raw document model of the XML map
//! - [`Deobfuscator`] indexes the map by module and obfuscated type name and hands out one
//!   [`TypeDeobfuscator`] per type
//!
//! Lookups never fail for names the map does not mention: they fall back to an
//! [`IdentityDeobfuscator`] or return the name unchanged.
//!
//! # Examples
//!
//! ```rust
//! use heapscope::obfuscation::{Deobfuscator, MethodLookup, TypeDeobfuscator};
//!
//! let xml = r#"<dotfuscatorMap><mapping><module><name>App.dll</name>
//!   <type><name>App.Worker</name><newname>System.Obfuscation.b</newname>
//!     <methodlist>
//!       <method><name>Run</name><newname>a</newname><signature>void(int32)</signature></method>
//!     </methodlist>
//!   </type>
//! </module></mapping></dotfuscatorMap>"#;
//! let map: Deobfuscator = xml.parse()?;
//!
//! let worker = map.type_deobfuscator("System.Obfuscation.b");
//! let lookup = worker.deobfuscate_method("a", &["System.Int32".to_string()]);
//! assert!(matches!(lookup, MethodLookup::Unique(m) if m.original_name == "Run"));
//!
//! let trace = map.deobfuscate_callstack("   at System.Obfuscation.b.a(Int32 count)");
//! assert_eq!(trace, "   at App.Worker.Run(System.Int32)");
//! # Ok::<(), heapscope::Error>(())
//! ```

mod deobfuscator;
mod map;
mod type_deobfuscator;
mod typename;

pub use deobfuscator::{Deobfuscator, AMBIGUOUS_MARKER, OBFUSCATED_FRAME_MARKER};
pub use map::{MemberRecord, ModuleRecord, RenamingMap, TypeRecord};
pub use type_deobfuscator::{
    IdentityDeobfuscator, MappedType, MethodLookup, ObfuscatedField, ObfuscatedMethod,
    TypeDeobfuscator,
};
pub use typename::{could_be_nested_type, parse_method_info, sanitize, TypeName, MethodInfo};
