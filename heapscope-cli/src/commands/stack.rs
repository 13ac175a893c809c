use std::{io::Read, path::Path};

use anyhow::Context;
use serde::Serialize;

use crate::{app::GlobalOptions, commands::common::load_map, output::print_output};

#[derive(Debug, Serialize)]
struct StackOutput {
    frames: usize,
    callstack: String,
}

pub fn run(map: &Path, path: Option<&Path>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let map = load_map(map)?;

    let input = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read stack trace: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stack trace from stdin")?;
            buffer
        }
    };

    let callstack = map.deobfuscate_callstack(&input);
    let output = StackOutput {
        frames: callstack.lines().count(),
        callstack,
    };

    print_output(&output, opts, |out| println!("{}", out.callstack))
}
