pub mod keygen;
pub mod ledger;
pub mod simulate;
pub mod verify;

use std::path::Path;

use anyhow::Context;
use serde_json::Value;

pub(crate) fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
