//! Byte-level decoding helpers shared by the runtime collaborators and the value decoders.

mod io;
mod parser;

pub use io::{read_be, read_be_at, read_le, read_le_at, read_pointer_le, HeapIO};
pub use parser::Parser;
