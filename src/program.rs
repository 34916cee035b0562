use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, MachineConfig};
use crate::decoder::Layout;

/// An assembled memory image with its symbols and the config it was built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub memory: Vec<u64>, // one entry per cell, `memory_size` long
    pub labels: BTreeMap<String, usize>, // global labels and procedure names
    #[serde(default)]
    pub scopes: BTreeMap<String, BTreeMap<String, usize>>, // procedure -> local labels
    pub entry: usize,
    pub len: usize, // cells occupied by code, data and reservations
    pub lines: BTreeMap<usize, usize>, // address -> 1-based source line
    pub data: BTreeSet<usize>,         // addresses holding DAT/RES rather than code
    pub config: MachineConfig,
}

impl Program {
    pub fn layout(&self) -> Result<Layout, ConfigError> {
        self.config.validate()
    }

    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(&name.to_ascii_uppercase()).copied()
    }

    pub fn source_line(&self, addr: usize) -> Option<usize> {
        self.lines.get(&addr).copied()
    }

    /// Every symbol with its address; locals are qualified as `PROC.NAME`.
    pub fn symbols(&self) -> Vec<(usize, String)> {
        let globals = self.labels.iter().map(|(name, &a)| (a, name.clone()));
        let locals = self.scopes.iter().flat_map(|(proc, table)| {
            table.iter().map(move |(name, &a)| (a, format!("{proc}.{name}")))
        });
        globals.chain(locals).collect()
    }

    /// Names bound to `addr`, globals first.
    pub fn labels_at(&self, addr: usize) -> Vec<String> {
        self.symbols()
            .into_iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, name)| name)
            .collect()
    }

    pub fn is_data(&self, addr: usize) -> bool {
        self.data.contains(&addr)
    }
}
