use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use chadsembler::Program;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelKV {
    pub addr: usize,
    pub name: String,
}

pub fn load_image(path: &Path) -> Result<Program> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let program: Program =
        serde_json::from_str(&text).with_context(|| format!("{} is not a program image", path.display()))?;
    anyhow::ensure!(
        program.memory.len() == program.config.memory_size,
        "image holds {} cells but declares memory_size {}",
        program.memory.len(),
        program.config.memory_size
    );
    program.layout()?;
    Ok(program)
}

pub fn save_image(program: &Program, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(program)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Labels ordered by address, then name.
pub fn label_list(program: &Program) -> Vec<LabelKV> {
    let mut labels: Vec<LabelKV> = program
        .symbols()
        .into_iter()
        .map(|(addr, name)| LabelKV { addr, name })
        .collect();
    labels.sort_by(|a, b| (a.addr, &a.name).cmp(&(b.addr, &b.name)));
    labels
}
