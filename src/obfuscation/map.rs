//! Renaming-map document model and XML loader.
//!
//! Obfuscators emit a renaming map describing, per module, every type they renamed together with
//! the renamed fields and methods. The loader understands the layout written by Dotfuscator:
//!
//! ```xml
//! <dotfuscatorMap version="1.1">
//!   <mapping>
//!     <module>
//!       <name>Shop.dll</name>
//!       <type>
//!         <name>Shop.Order/Line</name>
//!         <newname>a/b</newname>
//!         <fieldlist>
//!           <field><name>quantity</name><newname>a</newname><signature>int32</signature></field>
//!         </fieldlist>
//!         <methodlist>
//!           <method><name>Total</name><newname>a</newname><signature>float64()</signature></method>
//!         </methodlist>
//!       </type>
//!     </module>
//!   </mapping>
//! </dotfuscatorMap>
//! ```
//!
//! Elements outside of this structure (headers, statistics) are ignored. The records are kept
//! verbatim here; normalization of names and signatures happens when the
//! [`crate::obfuscation::Deobfuscator`] builds its lookup tables.

use std::{path::Path, str::FromStr};

use quick_xml::{events::Event, Reader};

use crate::{Error, Result};

/// A field or method record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemberRecord {
    /// Original name
    pub name: String,
    /// Obfuscated name, absent if the member was not renamed
    pub new_name: Option<String>,
    /// Field type, or method signature in `return(arg, ...)` form
    pub signature: String,
}

/// A type record with its renamed members.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeRecord {
    /// Original name, `/`-separated for nested types
    pub name: String,
    /// Obfuscated name, absent if the type itself was not renamed
    pub new_name: Option<String>,
    /// Field records in document order
    pub fields: Vec<MemberRecord>,
    /// Method records in document order
    pub methods: Vec<MemberRecord>,
}

/// All type records of one module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleRecord {
    /// File name of the module
    pub name: String,
    /// Type records in document order
    pub types: Vec<TypeRecord>,
}

/// A parsed renaming map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenamingMap {
    /// Module records in document order
    pub modules: Vec<ModuleRecord>,
}

impl RenamingMap {
    /// Load and parse a renaming map from disk.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be read, or [`Error::Xml`] if it is not
    /// well-formed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let xml = std::fs::read_to_string(path)?;
        xml.parse()
    }

    /// Number of type records over all modules
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.modules.iter().map(|module| module.types.len()).sum()
    }
}

impl FromStr for RenamingMap {
    type Err = Error;

    fn from_str(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut loader = Loader::default();
        loop {
            match reader.read_event()? {
                Event::Start(element) => {
                    loader.open(String::from_utf8_lossy(element.name().as_ref()).into_owned());
                }
                Event::End(_) => loader.close()?,
                Event::Text(text) => loader.text(&text.unescape()?),
                Event::CData(data) => loader.text(&String::from_utf8_lossy(&data)),
                Event::Eof => break,
                _ => {}
            }
        }

        if !loader.stack.is_empty() {
            return Err(malformed_error!(
                "Renaming map ended inside <{}>",
                loader.stack.join("/")
            ));
        }

        Ok(loader.map)
    }
}

#[derive(Default)]
struct Loader {
    stack: Vec<String>,
    map: RenamingMap,
    module: Option<ModuleRecord>,
    current_type: Option<TypeRecord>,
    member: Option<MemberRecord>,
}

fn path(stack: &[String]) -> Vec<&str> {
    stack.iter().map(String::as_str).collect()
}

impl Loader {
    fn open(&mut self, name: String) {
        self.stack.push(name);
        match path(&self.stack).as_slice() {
            ["dotfuscatorMap", "mapping", "module"] => self.module = Some(ModuleRecord::default()),
            ["dotfuscatorMap", "mapping", "module", "type"] => {
                self.current_type = Some(TypeRecord::default());
            }
            ["dotfuscatorMap", "mapping", "module", "type", "fieldlist", "field"]
            | ["dotfuscatorMap", "mapping", "module", "type", "methodlist", "method"] => {
                self.member = Some(MemberRecord::default());
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        match path(&self.stack).as_slice() {
            ["dotfuscatorMap", "mapping", "module", "name"] => {
                if let Some(module) = self.module.as_mut() {
                    module.name = text.to_string();
                }
            }
            ["dotfuscatorMap", "mapping", "module", "type", element] => {
                if let Some(record) = self.current_type.as_mut() {
                    match *element {
                        "name" => record.name = text.to_string(),
                        "newname" => record.new_name = Some(text.to_string()),
                        _ => {}
                    }
                }
            }
            ["dotfuscatorMap", "mapping", "module", "type", "fieldlist" | "methodlist", "field" | "method", element] => {
                if let Some(member) = self.member.as_mut() {
                    match *element {
                        "name" => member.name = text.to_string(),
                        "newname" => member.new_name = Some(text.to_string()),
                        "signature" => member.signature = text.to_string(),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn close(&mut self) -> Result<()> {
        match path(&self.stack).as_slice() {
            ["dotfuscatorMap", "mapping", "module", "type", "fieldlist", "field"] => {
                if let (Some(member), Some(record)) = (self.member.take(), self.current_type.as_mut()) {
                    record.fields.push(member);
                }
            }
            ["dotfuscatorMap", "mapping", "module", "type", "methodlist", "method"] => {
                if let (Some(member), Some(record)) = (self.member.take(), self.current_type.as_mut()) {
                    record.methods.push(member);
                }
            }
            ["dotfuscatorMap", "mapping", "module", "type"] => {
                if let (Some(record), Some(module)) = (self.current_type.take(), self.module.as_mut()) {
                    module.types.push(record);
                }
            }
            ["dotfuscatorMap", "mapping", "module"] => {
                if let Some(module) = self.module.take() {
                    self.map.modules.push(module);
                }
            }
            _ => {}
        }

        if self.stack.pop().is_none() {
            return Err(malformed_error!("Unbalanced closing element in renaming map"));
        }
        Ok(())
    }
}
