use serde::{Deserialize, Serialize};

use crate::cpu::FaultKind;

/// Word-addressed storage seen by the executor.
pub trait Bus {
    fn read(&self, addr: usize) -> Result<u64, FaultKind>;
    fn write(&mut self, addr: usize, val: u64) -> Result<(), FaultKind>;
    fn size(&self) -> usize;

    /// Bounds-checks a computed (possibly negative) address.
    fn check(&self, addr: i64) -> Result<usize, FaultKind> {
        usize::try_from(addr)
            .ok()
            .filter(|&a| a < self.size())
            .ok_or(FaultKind::InvalidAddress { addr })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearMemory {
    pub cells: Vec<u64>,
    mask: u64,
}

impl LinearMemory {
    pub fn new(size: usize, mask: u64) -> Self {
        Self {
            cells: vec![0; size],
            mask,
        }
    }

    pub fn from_image(image: &[u64], mask: u64) -> Self {
        Self {
            cells: image.iter().map(|w| w & mask).collect(),
            mask,
        }
    }
}

impl Bus for LinearMemory {
    fn read(&self, addr: usize) -> Result<u64, FaultKind> {
        self.cells
            .get(addr)
            .copied()
            .ok_or(FaultKind::InvalidAddress { addr: addr as i64 })
    }

    fn write(&mut self, addr: usize, val: u64) -> Result<(), FaultKind> {
        let mask = self.mask;
        let cell = self
            .cells
            .get_mut(addr)
            .ok_or(FaultKind::InvalidAddress { addr: addr as i64 })?;
        *cell = val & mask;
        Ok(())
    }

    fn size(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_masked() {
        let mut mem = LinearMemory::new(4, 0xffff);
        mem.write(1, 0x1_2345).unwrap();
        assert_eq!(mem.read(1), Ok(0x2345));
        assert_eq!(mem.write(4, 1), Err(FaultKind::InvalidAddress { addr: 4 }));
        assert_eq!(mem.check(-1), Err(FaultKind::InvalidAddress { addr: -1 }));
        assert_eq!(mem.check(3), Ok(3));
    }
}
