//! Shared SPI bus sequencing and the two-level chip-select decoder tree.
//!
//! All 24 DACs hang off one SPI bus. Their chip selects come from a
//! decoder tree driven by expander output pins: a 5-bit address plus an
//! enable line. This module owns that state exclusively; nothing else may
//! touch the decoder or issue bus transfers.

use crate::config::{BusOptions, CsBitOrder, DACS_PER_BOARD, NUM_BOARDS};
use crate::regs::mcp23s17 as mcp;
use crate::regs::mcp23s17::{CtrlPortA, CtrlPortB, Iocon};
use crate::sys::Driver;
use crate::Result;

// Decoder output settle time before clocking the first bit, and DAC data
// latch time after the last one.
const SETTLE_US: u32 = 1;
// LDAC minimum pulse width is ~20 ns per datasheet; 1 us leaves margin.
const LDAC_PULSE_US: u32 = 1;

#[derive(Debug)]
pub struct DacBus<D: Driver> {
    driver: D,
    options: BusOptions,
    // Mirror of each expander's output latches, for read-modify-write of
    // single lines without bus round-trips.
    olat: [u16; mcp::NUM_EXPANDERS],
}

impl<D: Driver> DacBus<D> {
    pub fn new(driver: D, options: BusOptions) -> DacBus<D> {
        DacBus { driver, options, olat: [0; mcp::NUM_EXPANDERS] }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Configure all three expanders and park the control lines idle.
    /// Must run once before any DAC traffic.
    pub fn init(&mut self) -> Result<()> {
        // Until HAEN is set every chip answers to address 0, so one write
        // reaches all of them.
        self.write_register(0, mcp::REG_IOCON, (Iocon::HAEN | Iocon::MIRROR).bits())?;
        self.driver.delay_us(10);

        // Expander 0: decoder address/enable on port A, LDAC and CLR on
        // port B, all outputs.
        self.init_expander(mcp::CTRL_EXPANDER, [0x00, 0x00], [0x00, 0x00], [0x00, 0x00])?;
        self.write_register(mcp::CTRL_EXPANDER, mcp::REG_GPIOA, 0x00)?;
        let idle_b = (CtrlPortB::LDAC | CtrlPortB::CLR).bits();
        self.write_register(mcp::CTRL_EXPANDER, mcp::REG_GPIOB, idle_b)?;
        self.olat[mcp::CTRL_EXPANDER as usize] = (idle_b as u16) << 8;

        // Expander 1: the 16 LTC2662 fault lines, boards 0-3 on port A and
        // 4-7 on port B. Interrupt-on-change against an all-high DEFVAL.
        self.init_expander(mcp::FAULT_EXPANDER, [0xFF, 0xFF], [0xFF, 0xFF], [0xFF, 0xFF])?;

        // Expander 2: the 8 LTC2664 temperature fault lines on port A,
        // port B unused.
        self.init_expander(mcp::TEMP_EXPANDER, [0xFF, 0xFF], [0xFF, 0x00], [0xFF, 0xFF])?;

        // The fault inputs may have latched an interrupt during power-up.
        self.clear_interrupts()?;
        Ok(())
    }

    fn init_expander(&mut self, hw_addr: u8, iodir: [u8; 2], gpinten: [u8; 2],
                     defval: [u8; 2]) -> Result<()> {
        self.write_register(hw_addr, mcp::REG_IODIRA, iodir[0])?;
        self.write_register(hw_addr, mcp::REG_IODIRB, iodir[1])?;
        // Pull up whatever is an input; the fault lines are open-drain.
        self.write_register(hw_addr, mcp::REG_GPPUA, iodir[0])?;
        self.write_register(hw_addr, mcp::REG_GPPUB, iodir[1])?;
        if gpinten[0] != 0 || gpinten[1] != 0 {
            self.write_register(hw_addr, mcp::REG_DEFVALA, defval[0])?;
            self.write_register(hw_addr, mcp::REG_DEFVALB, defval[1])?;
            self.write_register(hw_addr, mcp::REG_INTCONA, gpinten[0])?;
            self.write_register(hw_addr, mcp::REG_INTCONB, gpinten[1])?;
            self.write_register(hw_addr, mcp::REG_GPINTENA, gpinten[0])?;
            self.write_register(hw_addr, mcp::REG_GPINTENB, gpinten[1])?;
        }
        self.write_register(hw_addr, mcp::REG_GPIOA, 0x00)?;
        self.write_register(hw_addr, mcp::REG_GPIOB, 0x00)?;
        self.olat[hw_addr as usize] = 0;
        Ok(())
    }

    pub fn write_register(&mut self, hw_addr: u8, reg: u8, value: u8) -> Result<()> {
        log::trace!("write_register({}, {:#04x}, {:#04x})", hw_addr, reg, value);
        let tx = [mcp::write_opcode(hw_addr), reg, value];
        self.driver.set_expander_cs(true);
        let result = self.driver.transfer(&tx, None);
        self.driver.set_expander_cs(false);
        result
    }

    pub fn read_register(&mut self, hw_addr: u8, reg: u8) -> Result<u8> {
        let tx = [mcp::read_opcode(hw_addr), reg, 0x00];
        let mut rx = [0u8; 3];
        self.driver.set_expander_cs(true);
        let result = self.driver.transfer(&tx, Some(&mut rx));
        self.driver.set_expander_cs(false);
        result?;
        log::trace!("read_register({}, {:#04x}) = {:#04x}", hw_addr, reg, rx[2]);
        Ok(rx[2])
    }

    /// Read ports A and B in one burst (sequential addressing).
    pub fn read_gpio16(&mut self, hw_addr: u8) -> Result<u16> {
        let tx = [mcp::read_opcode(hw_addr), mcp::REG_GPIOA, 0x00, 0x00];
        let mut rx = [0u8; 4];
        self.driver.set_expander_cs(true);
        let result = self.driver.transfer(&tx, Some(&mut rx));
        self.driver.set_expander_cs(false);
        result?;
        Ok(rx[2] as u16 | (rx[3] as u16) << 8)
    }

    fn write_ctrl_port_a(&mut self, value: u8) -> Result<()> {
        self.write_register(mcp::CTRL_EXPANDER, mcp::REG_GPIOA, value)?;
        let cached = &mut self.olat[mcp::CTRL_EXPANDER as usize];
        *cached = (*cached & 0xFF00) | value as u16;
        Ok(())
    }

    fn write_ctrl_port_b(&mut self, value: u8) -> Result<()> {
        self.write_register(mcp::CTRL_EXPANDER, mcp::REG_GPIOB, value)?;
        let cached = &mut self.olat[mcp::CTRL_EXPANDER as usize];
        *cached = (*cached & 0x00FF) | (value as u16) << 8;
        Ok(())
    }

    fn decoder_address(&self, board: u8, slot: u8) -> u8 {
        let index = board * DACS_PER_BOARD as u8 + slot;
        match self.options.cs_bit_order {
            CsBitOrder::Straight => index & 0x1F,
            CsBitOrder::Reversed => {
                let mut pins = 0;
                for bit in 0..5 {
                    pins |= ((index >> bit) & 1) << (4 - bit);
                }
                pins
            }
        }
    }

    /// Drive the decoder address and enable it, then let the tree settle.
    pub fn select(&mut self, board: u8, slot: u8) -> Result<()> {
        log::debug!("select(board={}, slot={})", board, slot);
        let port_a = self.decoder_address(board, slot) | CtrlPortA::DECODER_EN.bits();
        self.write_ctrl_port_a(port_a)?;
        self.driver.delay_us(SETTLE_US);
        Ok(())
    }

    /// Disable the decoder tree; the address bits become don't-care.
    pub fn deselect(&mut self) -> Result<()> {
        self.write_ctrl_port_a(0x00)
    }

    /// The unit of exclusion: select, transfer, deselect. No other select
    /// can happen in between because the bus is owned by `&mut self`.
    pub fn transaction(&mut self, board: u8, slot: u8, tx: &[u8],
                       rx: Option<&mut [u8]>) -> Result<()> {
        log::debug!("transaction(board={}, slot={}, {:02x?})", board, slot, tx);
        self.select(board, slot)?;
        let result = self.driver.transfer(tx, rx);
        self.driver.delay_us(SETTLE_US);
        self.deselect()?;
        result
    }

    /// Pulse the shared LDAC line low. Every DAC moves its input registers
    /// to its output registers on the falling edge, simultaneously.
    pub fn pulse_ldac(&mut self) -> Result<()> {
        log::debug!("pulse_ldac()");
        let idle = (self.olat[mcp::CTRL_EXPANDER as usize] >> 8) as u8;
        self.write_ctrl_port_b(idle & !CtrlPortB::LDAC.bits())?;
        self.driver.delay_us(LDAC_PULSE_US);
        self.write_ctrl_port_b(idle | CtrlPortB::LDAC.bits())
    }

    /// Assert the shared CLR line (active-low). Held until released.
    pub fn assert_clear(&mut self) -> Result<()> {
        let current = (self.olat[mcp::CTRL_EXPANDER as usize] >> 8) as u8;
        self.write_ctrl_port_b(current & !CtrlPortB::CLR.bits())
    }

    pub fn release_clear(&mut self) -> Result<()> {
        let current = (self.olat[mcp::CTRL_EXPANDER as usize] >> 8) as u8;
        self.write_ctrl_port_b(current | CtrlPortB::CLR.bits())
    }

    /// Sample the combined FAULT line (active-low wired-OR).
    pub fn is_fault_active(&mut self) -> bool {
        self.driver.fault_line_low()
    }

    /// Rebuild the 24-bit per-device fault map from the expander inputs.
    ///
    /// Physical layout does not match logical addressing: expander 1 packs
    /// the LTC2662 faults two pins per board (boards 0-3 on port A, 4-7 on
    /// port B), and expander 2 port A has one LTC2664 temperature fault
    /// pin per board. Logical bit `3b+s` = fault on (board b, slot s).
    pub fn read_faults(&mut self) -> Result<u32> {
        let current_raw = self.read_gpio16(mcp::FAULT_EXPANDER)?;
        let temp_raw = self.read_register(mcp::TEMP_EXPANDER, mcp::REG_GPIOA)?;

        // Active-low to "1 = fault present".
        let current_faults = !current_raw;
        let temp_faults = !temp_raw;

        let mut faults = 0u32;
        for board in 0..NUM_BOARDS {
            let logical = board * DACS_PER_BOARD;
            let pin = board * 2;
            faults |= ((current_faults >> pin) as u32 & 1) << logical;
            faults |= ((current_faults >> (pin + 1)) as u32 & 1) << (logical + 1);
            faults |= ((temp_faults >> board) as u32 & 1) << (logical + 2);
        }
        log::debug!("read_faults() = {:#08x}", faults);
        Ok(faults)
    }

    /// Reading GPIO clears latched interrupt-on-change flags; done once
    /// after init in case the fault lines bounced during power-up.
    pub fn clear_interrupts(&mut self) -> Result<()> {
        for hw_addr in 0..mcp::NUM_EXPANDERS as u8 {
            self.read_gpio16(hw_addr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sys::sim::SimDriver;

    fn bus_with(order: CsBitOrder) -> DacBus<SimDriver> {
        let mut bus = DacBus::new(SimDriver::new(), BusOptions { cs_bit_order: order });
        bus.init().unwrap();
        bus
    }

    #[test]
    fn select_reversed_bit_order() {
        let mut bus = bus_with(CsBitOrder::Reversed);
        // Board 2, slot 1: index 7 = 0b00111, reversed onto pins = 0b11100.
        bus.select(2, 1).unwrap();
        let port_a = bus.driver().expander_reg(mcp::CTRL_EXPANDER, mcp::REG_OLATA);
        assert_eq!(port_a, 0b11100 | CtrlPortA::DECODER_EN.bits());
        bus.deselect().unwrap();
        let port_a = bus.driver().expander_reg(mcp::CTRL_EXPANDER, mcp::REG_OLATA);
        assert_eq!(port_a, 0x00);
    }

    #[test]
    fn select_straight_bit_order() {
        let mut bus = bus_with(CsBitOrder::Straight);
        bus.select(2, 1).unwrap();
        let port_a = bus.driver().expander_reg(mcp::CTRL_EXPANDER, mcp::REG_OLATA);
        assert_eq!(port_a, 0b00111 | CtrlPortA::DECODER_EN.bits());
    }

    #[test]
    fn transaction_routes_to_decoded_dac() {
        let mut bus = bus_with(CsBitOrder::Reversed);
        bus.transaction(2, 1, &[0x31, 0x80, 0x00], None).unwrap();
        let frames = bus.driver().frames();
        assert_eq!(frames, &[(7, vec![0x31, 0x80, 0x00])]);
        // Decoder must be disabled again after the exchange.
        let port_a = bus.driver().expander_reg(mcp::CTRL_EXPANDER, mcp::REG_OLATA);
        assert_eq!(port_a & CtrlPortA::DECODER_EN.bits(), 0);
    }

    #[test]
    fn ldac_pulse_counted_once() {
        let mut bus = bus_with(CsBitOrder::Reversed);
        bus.pulse_ldac().unwrap();
        bus.pulse_ldac().unwrap();
        assert_eq!(bus.driver().ldac_pulses(), 2);
        // Line parks high between pulses.
        let port_b = bus.driver().expander_reg(mcp::CTRL_EXPANDER, mcp::REG_OLATB);
        assert_ne!(port_b & CtrlPortB::LDAC.bits(), 0);
    }

    #[test]
    fn clear_line_round_trip() {
        let mut bus = bus_with(CsBitOrder::Reversed);
        bus.assert_clear().unwrap();
        let port_b = bus.driver().expander_reg(mcp::CTRL_EXPANDER, mcp::REG_OLATB);
        assert_eq!(port_b & CtrlPortB::CLR.bits(), 0);
        bus.release_clear().unwrap();
        let port_b = bus.driver().expander_reg(mcp::CTRL_EXPANDER, mcp::REG_OLATB);
        assert_ne!(port_b & CtrlPortB::CLR.bits(), 0);
    }

    #[cfg(not(feature = "single-board"))]
    #[test]
    fn fault_remap_single_pins() {
        let mut bus = bus_with(CsBitOrder::Reversed);

        // Board 0, slot 0: expander 1 port A pin 0 low.
        bus.driver_mut().set_port_inputs(mcp::FAULT_EXPANDER, 0xFE, 0xFF);
        assert_eq!(bus.read_faults().unwrap(), 1 << 0);

        // Board 5, slot 1: pin 11 of the 16-bit snapshot = port B pin 3.
        bus.driver_mut().set_port_inputs(mcp::FAULT_EXPANDER, 0xFF, !(1 << 3));
        assert_eq!(bus.read_faults().unwrap(), 1 << (5 * 3 + 1));

        // Board 3, slot 2: temperature fault, expander 2 port A pin 3.
        bus.driver_mut().set_port_inputs(mcp::FAULT_EXPANDER, 0xFF, 0xFF);
        bus.driver_mut().set_port_inputs(mcp::TEMP_EXPANDER, !(1 << 3), 0xFF);
        assert_eq!(bus.read_faults().unwrap(), 1 << (3 * 3 + 2));
    }

    #[cfg(not(feature = "single-board"))]
    #[test]
    fn fault_remap_no_faults() {
        let mut bus = bus_with(CsBitOrder::Reversed);
        assert_eq!(bus.read_faults().unwrap(), 0);
    }
}
