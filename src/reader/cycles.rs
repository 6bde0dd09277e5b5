//! Cycle detection for the IFD chain
//!
//! The directory chain of a well-formed file is a simple list; SubIFD
//! references fan out into a forest. A malicious or corrupt file can make
//! `next` pointers loop, so the walk keeps an ordered set of every offset it
//! has visited and treats any repeat as a cycle.

use crate::tags::IfdPointer;
use crate::{TiffError, TiffFormatError, TiffResult};
use std::collections::BTreeSet;

#[derive(Default, Debug)]
pub(crate) struct VisitedOffsets {
    seen: BTreeSet<u64>,
}

impl VisitedOffsets {
    pub fn new() -> Self {
        VisitedOffsets::default()
    }

    /// Records a directory offset about to be visited. A previously seen
    /// offset halts the walk with a format error.
    pub fn insert(&mut self, pointer: IfdPointer) -> TiffResult<()> {
        if !self.seen.insert(pointer.0) {
            return Err(TiffError::FormatError(TiffFormatError::CycleInOffsets(
                pointer.0,
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_ifd_cycle_is_detected() {
        let mut visited = VisitedOffsets::new();
        visited.insert(IfdPointer(0x20)).expect("fresh offset is valid");
        visited
            .insert(IfdPointer(0x800))
            .expect("fresh offset is valid");
        visited
            .insert(IfdPointer(0x20))
            .expect_err("revisiting the first offset must fail");
    }

    #[test]
    fn self_referential_cycle_is_detected() {
        let mut visited = VisitedOffsets::new();
        visited.insert(IfdPointer(0x20)).expect("fresh offset is valid");
        visited
            .insert(IfdPointer(0x20))
            .expect_err("self-referential cycle must be detected");
    }
}
