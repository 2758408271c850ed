//! Reassembly of command responses split across several datagrams.
//!
//! Parts may arrive in any order. They are stored by their declared index
//! and concatenated in index order once every slot has been filled. A part
//! that repeats an index overwrites the earlier copy.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("response {sequence}: part declares {actual} parts, assembly expects {expected}")]
    InconsistentPartCount {
        sequence: u8,
        expected: u8,
        actual: u8,
    },

    #[error("response {sequence}: part index {index} is outside 0..{total}")]
    PartOutOfRange { sequence: u8, index: u8, total: u8 },
}

/// One fragment of a multi-part command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePart {
    pub sequence: u8,
    pub total: u8,
    pub index: u8,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MultiPartAssembly {
    sequence: u8,
    total: u8,
    parts: Vec<Option<Vec<u8>>>,
}

impl MultiPartAssembly {
    /// Starts an assembly from the first part that arrived, whichever index
    /// it carries.
    pub fn start(part: ResponsePart) -> Result<Self, AssemblyError> {
        let mut assembly = Self {
            sequence: part.sequence,
            total: part.total,
            parts: vec![None; part.total as usize],
        };
        assembly.add_part(part)?;
        Ok(assembly)
    }

    pub fn add_part(&mut self, part: ResponsePart) -> Result<(), AssemblyError> {
        if part.total != self.total {
            return Err(AssemblyError::InconsistentPartCount {
                sequence: self.sequence,
                expected: self.total,
                actual: part.total,
            });
        }
        if part.index >= self.total {
            return Err(AssemblyError::PartOutOfRange {
                sequence: self.sequence,
                index: part.index,
                total: self.total,
            });
        }

        self.parts[part.index as usize] = Some(part.body);
        Ok(())
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn total_parts(&self) -> u8 {
        self.total
    }

    pub fn received_parts(&self) -> usize {
        self.parts.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(Option::is_some)
    }

    /// Concatenates the parts by index and decodes the result as text.
    ///
    /// Returns `None` while any part is still missing.
    pub fn compose(&self) -> Option<String> {
        if !self.is_complete() {
            return None;
        }
        let bytes: Vec<u8> = self.parts.iter().flatten().flatten().copied().collect();
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}
