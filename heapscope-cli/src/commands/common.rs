use std::path::Path;

use anyhow::Context;
use heapscope::obfuscation::Deobfuscator;

/// Load a renaming map, naming the file in the error.
pub fn load_map(path: &Path) -> anyhow::Result<Deobfuscator> {
    let map = Deobfuscator::from_file(path)
        .with_context(|| format!("failed to load renaming map: {}", path.display()))?;
    log::debug!("Loaded {} renamed type(s) from {}", map.types().len(), path.display());
    Ok(map)
}
