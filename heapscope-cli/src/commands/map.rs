use std::{collections::BTreeSet, path::Path};

use heapscope::obfuscation::TypeDeobfuscator;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_map,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct TypeEntry {
    module: String,
    obfuscated: String,
    original: String,
    fields: usize,
    methods: usize,
}

#[derive(Debug, Serialize)]
struct MapOutput {
    modules: usize,
    types: Vec<TypeEntry>,
    count: usize,
}

pub fn run(map: &Path, filter: Option<&str>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let map = load_map(map)?;

    let modules: BTreeSet<&str> = map.types().iter().map(|ty| ty.module()).collect();

    let types: Vec<TypeEntry> = map
        .types()
        .iter()
        .filter(|ty| {
            filter.map_or(true, |text| {
                ty.original_name().contains(text) || ty.obfuscated_name().contains(text)
            })
        })
        .map(|ty| TypeEntry {
            module: ty.module().to_string(),
            obfuscated: ty.obfuscated_name().to_string(),
            original: ty.original_name().to_string(),
            fields: ty.fields().len(),
            methods: ty.methods().len(),
        })
        .collect();

    let output = MapOutput {
        modules: modules.len(),
        count: types.len(),
        types,
    };

    print_output(&output, opts, |out| {
        let mut tw = TabWriter::new(&[
            ("Module", Align::Left),
            ("Obfuscated", Align::Left),
            ("Original", Align::Left),
            ("Fields", Align::Right),
            ("Methods", Align::Right),
        ]);
        for entry in &out.types {
            tw.row(vec![
                entry.module.clone(),
                entry.obfuscated.clone(),
                entry.original.clone(),
                entry.fields.to_string(),
                entry.methods.to_string(),
            ]);
        }
        tw.print();
        println!(
            "\n{} type(s) listed from {} module(s).",
            out.count, out.modules
        );
    })
}
