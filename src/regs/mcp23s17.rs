#![allow(dead_code)]

//! Register map of the MCP23S17 SPI I/O expander (BANK=0 paired addressing).

use bitflags::bitflags;

/// Port A/B direction (1 = input, 0 = output).
pub const REG_IODIRA: u8 = 0x00;
pub const REG_IODIRB: u8 = 0x01;

/// Input polarity (1 = inverted).
pub const REG_IPOLA: u8 = 0x02;
pub const REG_IPOLB: u8 = 0x03;

/// Interrupt-on-change enable.
pub const REG_GPINTENA: u8 = 0x04;
pub const REG_GPINTENB: u8 = 0x05;

/// Default compare value for interrupt-on-change.
pub const REG_DEFVALA: u8 = 0x06;
pub const REG_DEFVALB: u8 = 0x07;

/// Interrupt control (1 = compare to DEFVAL, 0 = compare to previous).
pub const REG_INTCONA: u8 = 0x08;
pub const REG_INTCONB: u8 = 0x09;

/// Shared configuration register.
pub const REG_IOCON: u8 = 0x0A;

/// Pull-up enable on inputs.
pub const REG_GPPUA: u8 = 0x0C;
pub const REG_GPPUB: u8 = 0x0D;

/// Interrupt flags (read-only).
pub const REG_INTFA: u8 = 0x0E;
pub const REG_INTFB: u8 = 0x0F;

/// Port value captured at interrupt time (read-only).
pub const REG_INTCAPA: u8 = 0x10;
pub const REG_INTCAPB: u8 = 0x11;

/// Port registers. Reading GPIO also clears a pending interrupt.
pub const REG_GPIOA: u8 = 0x12;
pub const REG_GPIOB: u8 = 0x13;

/// Output latches.
pub const REG_OLATA: u8 = 0x14;
pub const REG_OLATB: u8 = 0x15;

bitflags! {
    /// IOCON configuration bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Iocon: u8 {
        /// Register addressing mode (must stay 0 for paired addressing).
        const BANK   = 1<<7;
        /// Mirror INTA/INTB into a single interrupt output.
        const MIRROR = 1<<6;
        /// Disable sequential register addressing.
        const SEQOP  = 1<<5;
        /// Disable SDA slew rate control.
        const DISSLW = 1<<4;
        /// Honor the A2..A0 hardware address pins. Until this is set,
        /// every chip on the bus answers to address 0.
        const HAEN   = 1<<3;
        /// Open-drain interrupt output.
        const ODR    = 1<<2;
        /// Interrupt output polarity (1 = active-high).
        const INTPOL = 1<<1;
    }
}

/// SPI control byte: fixed 0100 prefix, hardware address, R/W bit.
const OPCODE_BASE: u8 = 0x40;

pub const fn write_opcode(hw_addr: u8) -> u8 {
    OPCODE_BASE | ((hw_addr & 0x07) << 1)
}

pub const fn read_opcode(hw_addr: u8) -> u8 {
    OPCODE_BASE | ((hw_addr & 0x07) << 1) | 0x01
}

/// Hardware addresses of the three expanders on the controller board.
pub const CTRL_EXPANDER: u8 = 0;
pub const FAULT_EXPANDER: u8 = 1;
pub const TEMP_EXPANDER: u8 = 2;
pub const NUM_EXPANDERS: usize = 3;

bitflags! {
    /// Control expander port A: decoder address pins 0..4 plus enable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtrlPortA: u8 {
        const DECODER_EN = 1<<5;
    }
}

bitflags! {
    /// Control expander port B: broadcast latch and clear lines, both
    /// active-low and idle-high.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtrlPortB: u8 {
        const LDAC = 1<<0;
        const CLR  = 1<<7;
    }
}
