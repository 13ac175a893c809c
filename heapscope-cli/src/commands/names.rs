use std::path::Path;

use serde::Serialize;

use crate::{app::GlobalOptions, commands::common::load_map, output::print_output};

#[derive(Debug, Serialize)]
struct NameOutput<'a> {
    input: &'a str,
    output: String,
    mapped: bool,
}

impl<'a> NameOutput<'a> {
    fn new(input: &'a str, output: String) -> Self {
        let mapped = output != input;
        NameOutput {
            input,
            output,
            mapped,
        }
    }
}

pub fn deobfuscate(map: &Path, name: &str, opts: &GlobalOptions) -> anyhow::Result<()> {
    let map = load_map(map)?;
    let output = NameOutput::new(name, map.deobfuscate_type(name));
    print_output(&output, opts, |out| println!("{}", out.output))
}

pub fn obfuscate(map: &Path, name: &str, opts: &GlobalOptions) -> anyhow::Result<()> {
    let map = load_map(map)?;
    let output = NameOutput::new(name, map.obfuscate_type(name));
    print_output(&output, opts, |out| println!("{}", out.output))
}
