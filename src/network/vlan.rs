//! VLAN ID allocation

use thiserror::Error;
use tracing::debug;

use crate::config::VlanRange;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VlanError {
    #[error("VLAN range {start}-{end} exhausted")]
    Exhausted { start: u16, end: u16 },
}

/// Hands out VLAN IDs from a range in ascending order, each at most once
#[derive(Debug)]
pub struct VlanAllocator {
    range: VlanRange,
    next: Option<u16>,
}

impl VlanAllocator {
    pub fn new(range: VlanRange) -> Self {
        Self {
            range,
            next: Some(range.start),
        }
    }

    /// Next unused VLAN ID
    pub fn allocate(&mut self) -> Result<u16, VlanError> {
        let id = self
            .next
            .filter(|id| *id <= self.range.end)
            .ok_or(VlanError::Exhausted {
                start: self.range.start,
                end: self.range.end,
            })?;
        self.next = id.checked_add(1);
        debug!("Allocated VLAN {}", id);
        Ok(id)
    }

    /// IDs still available
    pub fn remaining(&self) -> usize {
        self.next
            .filter(|id| *id <= self.range.end)
            .map(|id| usize::from(self.range.end - id) + 1)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocates_in_order_without_repeats() {
        let mut vlans = VlanAllocator::new(VlanRange { start: 1000, end: 1004 });
        assert_eq!(vlans.remaining(), 5);

        let ids: Vec<u16> = (0..5).map(|_| vlans.allocate().unwrap()).collect();
        assert_eq!(ids, vec![1000, 1001, 1002, 1003, 1004]);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
        assert_eq!(vlans.remaining(), 0);
    }

    #[test]
    fn test_exhausted() {
        let mut vlans = VlanAllocator::new(VlanRange { start: 4094, end: 4094 });
        assert_eq!(vlans.allocate(), Ok(4094));
        assert_eq!(
            vlans.allocate(),
            Err(VlanError::Exhausted {
                start: 4094,
                end: 4094
            })
        );
        assert_eq!(vlans.allocate().unwrap_err().to_string(), "VLAN range 4094-4094 exhausted");
    }
}
