//! Build-time layout of the instrument and runtime bus options.

/// Number of carrier boards in the chain. The bring-up variant drives
/// a single board over direct chip select wiring.
#[cfg(feature = "single-board")]
pub const NUM_BOARDS: usize = 1;
#[cfg(not(feature = "single-board"))]
pub const NUM_BOARDS: usize = 8;

/// Each board carries two LTC2662 current DACs (slots 0, 1) and one
/// LTC2664 voltage DAC (slot 2).
pub const DACS_PER_BOARD: usize = 3;

/// Total downstream chips reachable through the decoder tree.
pub const NUM_DACS: usize = NUM_BOARDS * DACS_PER_BOARD;

/// Widest channel count of any DAC family (LTC2662 has 5).
pub const MAX_CHANNELS_PER_DAC: usize = 5;

/// Serial number storage per board, including the terminating NUL.
pub const SERIAL_NUMBER_MAX_LEN: usize = 32;

/// LTC2662-16 parts are populated by default.
pub const DEFAULT_CURRENT_DAC_RESOLUTION: u8 = 16;
/// LTC2664-12 parts are populated by default.
pub const DEFAULT_VOLTAGE_DAC_RESOLUTION: u8 = 12;

/// How the 5-bit decoder address maps onto the expander output pins.
///
/// Hardware revisions disagree: on current boards CS4..CS0 are routed to
/// pins 0..4, so the address must be bit-reversed before the port write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsBitOrder {
    /// Address bit n drives pin n.
    Straight,
    /// Address bit n drives pin 4-n.
    #[default]
    Reversed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusOptions {
    pub cs_bit_order: CsBitOrder,
}
