//! Frame reliability modes
//!
//! The top three bits of an encapsulated frame's flags byte select one of
//! eight modes. The mode decides which index fields follow the length.

use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reliability {
    Unreliable = 0,
    UnreliableSequenced = 1,
    Reliable = 2,
    ReliableOrdered = 3,
    ReliableSequenced = 4,
    UnreliableWithAckReceipt = 5,
    ReliableWithAckReceipt = 6,
    ReliableOrderedWithAckReceipt = 7,
}

impl Reliability {
    /// Mode selected by the top three bits of a frame flags byte
    pub fn from_flags(flags: u8) -> Self {
        match flags >> 5 {
            0 => Reliability::Unreliable,
            1 => Reliability::UnreliableSequenced,
            2 => Reliability::Reliable,
            3 => Reliability::ReliableOrdered,
            4 => Reliability::ReliableSequenced,
            5 => Reliability::UnreliableWithAckReceipt,
            6 => Reliability::ReliableWithAckReceipt,
            _ => Reliability::ReliableOrderedWithAckReceipt,
        }
    }

    /// Bits to OR into a frame flags byte
    pub fn to_flags(self) -> u8 {
        (self as u8) << 5
    }

    /// Carries a reliable message index
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Reliability::Reliable
                | Reliability::ReliableOrdered
                | Reliability::ReliableSequenced
                | Reliability::ReliableWithAckReceipt
                | Reliability::ReliableOrderedWithAckReceipt
        )
    }

    /// Carries a sequence index
    pub fn is_sequenced(self) -> bool {
        matches!(
            self,
            Reliability::UnreliableSequenced | Reliability::ReliableSequenced
        )
    }

    /// Carries an order index and channel. Sequenced modes do too.
    pub fn is_ordered(self) -> bool {
        self.is_sequenced()
            || matches!(
                self,
                Reliability::ReliableOrdered | Reliability::ReliableOrderedWithAckReceipt
            )
    }
}

impl TryFrom<u8> for Reliability {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        if value > 7 {
            return Err(ProtocolError::ValueOutOfRange(format!(
                "reliability {value} exceeds 3 bits"
            )));
        }
        Ok(Reliability::from_flags(value << 5))
    }
}
