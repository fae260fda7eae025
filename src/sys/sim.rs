//! Simulated downstream hardware: three MCP23S17 expanders and the DAC
//! decoder tree. Stands in for the SPI peripheral on the host, both for
//! the interactive console and for tests that check wire traffic.

use crate::config::NUM_DACS;
use crate::regs::mcp23s17 as mcp;
use crate::sys::Driver;
use crate::Error;

const NUM_REGS: usize = 0x16;

#[derive(Debug, Clone)]
struct Expander {
    regs: [u8; NUM_REGS],
    // Raw pin levels on ports A and B; relevant only for input pins.
    inputs: [u8; 2],
}

impl Expander {
    fn new() -> Expander {
        let mut regs = [0u8; NUM_REGS];
        // Power-on defaults: everything is an input, pins float high
        // through the pull-ups.
        regs[mcp::REG_IODIRA as usize] = 0xFF;
        regs[mcp::REG_IODIRB as usize] = 0xFF;
        Expander { regs, inputs: [0xFF, 0xFF] }
    }

    fn haen(&self) -> bool {
        self.regs[mcp::REG_IOCON as usize] & mcp::Iocon::HAEN.bits() != 0
    }

    fn read_reg(&self, reg: u8) -> u8 {
        let (port, value_reg) = match reg {
            mcp::REG_GPIOA | mcp::REG_INTCAPA => (0, mcp::REG_OLATA),
            mcp::REG_GPIOB | mcp::REG_INTCAPB => (1, mcp::REG_OLATB),
            _ => return self.regs.get(reg as usize).copied().unwrap_or(0),
        };
        // Input pins read back the external level, output pins the latch.
        let iodir = self.regs[(mcp::REG_IODIRA + port as u8) as usize];
        let olat = self.regs[value_reg as usize];
        (self.inputs[port] & iodir) | (olat & !iodir)
    }

    fn write_reg(&mut self, reg: u8, value: u8) {
        let latch = match reg {
            mcp::REG_GPIOA => mcp::REG_OLATA,
            mcp::REG_GPIOB => mcp::REG_OLATB,
            _ => reg,
        };
        if (latch as usize) < NUM_REGS {
            self.regs[latch as usize] = value;
        }
    }
}

#[derive(Debug)]
pub struct SimDriver {
    chips: [Expander; mcp::NUM_EXPANDERS],
    cs_asserted: bool,
    fault_line: bool,
    // Captured DAC traffic: (dac index, frame bytes) per transfer.
    frames: Vec<(u8, Vec<u8>)>,
    // Fault register each LTC2662 would shift out during a readback.
    dac_fault_regs: [u8; NUM_DACS],
    ldac_pulses: u32,
    ldac_low: bool,
}

impl SimDriver {
    pub fn new() -> SimDriver {
        SimDriver {
            chips: [Expander::new(), Expander::new(), Expander::new()],
            cs_asserted: false,
            fault_line: false,
            frames: Vec::new(),
            dac_fault_regs: [0; NUM_DACS],
            ldac_pulses: 0,
            ldac_low: false,
        }
    }

    /// Set the raw pin levels of one expander's input ports. Fault lines
    /// are active-low, so 0xFF means "no fault anywhere".
    pub fn set_port_inputs(&mut self, chip: u8, port_a: u8, port_b: u8) {
        let chip = &mut self.chips[chip as usize];
        chip.inputs = [port_a, port_b];
    }

    pub fn set_fault_line(&mut self, active: bool) {
        self.fault_line = active;
    }

    pub fn set_dac_fault_register(&mut self, dac_index: usize, value: u8) {
        self.dac_fault_regs[dac_index] = value;
    }

    /// DAC frames captured since the last `clear_frames`.
    pub fn frames(&self) -> &[(u8, Vec<u8>)] {
        &self.frames
    }

    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }

    pub fn ldac_pulses(&self) -> u32 {
        self.ldac_pulses
    }

    /// Peek at an expander register, for assertions on wire state.
    pub fn expander_reg(&self, chip: u8, reg: u8) -> u8 {
        self.chips[chip as usize].read_reg(reg)
    }

    fn expander_transfer(&mut self, tx: &[u8], mut rx: Option<&mut [u8]>) {
        if tx.len() < 2 {
            return;
        }
        let opcode = tx[0];
        let hw_addr = (opcode >> 1) & 0x07;
        let is_read = opcode & 0x01 != 0;
        let base_reg = tx[1];

        // Until HAEN is latched a chip answers to address 0, which is how
        // the broadcast IOCON write at init reaches all three at once.
        let targets: Vec<usize> = (0..mcp::NUM_EXPANDERS)
            .filter(|&c| {
                if self.chips[c].haen() { c as u8 == hw_addr } else { hw_addr == 0 }
            })
            .collect();

        for (i, &byte) in tx.iter().enumerate().skip(2) {
            let reg = base_reg + (i as u8 - 2);
            if is_read {
                let value = targets.first()
                    .map(|&c| self.chips[c].read_reg(reg))
                    .unwrap_or(0);
                if let Some(rx) = rx.as_deref_mut() {
                    rx[i] = value;
                }
            } else {
                for &c in &targets {
                    self.write_tracked(c, reg, byte);
                }
            }
        }
    }

    fn write_tracked(&mut self, chip: usize, reg: u8, value: u8) {
        // Watch the LDAC line (control expander port B bit 0) so tests can
        // count complete low pulses.
        if chip == mcp::CTRL_EXPANDER as usize
                && (reg == mcp::REG_GPIOB || reg == mcp::REG_OLATB) {
            let ldac_bit = mcp::CtrlPortB::LDAC.bits();
            let was_low = self.ldac_low;
            let now_low = value & ldac_bit == 0;
            if was_low && !now_low {
                self.ldac_pulses += 1;
            }
            self.ldac_low = now_low;
        }
        self.chips[chip].write_reg(reg, value);
    }

    fn selected_dac(&self) -> Option<u8> {
        let port_a = self.chips[mcp::CTRL_EXPANDER as usize].read_reg(mcp::REG_OLATA);
        if port_a & mcp::CtrlPortA::DECODER_EN.bits() == 0 {
            return None;
        }
        // Physical wiring runs CS4..CS0 to pins 0..4, so the decoder sees
        // the bit-reversed address.
        let pins = port_a & 0x1F;
        let mut index = 0u8;
        for bit in 0..5 {
            index |= ((pins >> (4 - bit)) & 1) << bit;
        }
        Some(index)
    }

    fn dac_transfer(&mut self, tx: &[u8], rx: Option<&mut [u8]>) {
        let Some(index) = self.selected_dac() else {
            log::warn!("DAC transfer with decoder disabled, {:02x?} dropped", tx);
            return;
        };
        if let Some(rx) = rx {
            rx.fill(0);
            if (index as usize) < NUM_DACS && !rx.is_empty() {
                rx[0] = self.dac_fault_regs[index as usize];
            }
        }
        self.frames.push((index, tx.to_vec()));
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SimDriver {
    fn transfer(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<(), Error> {
        if self.cs_asserted {
            self.expander_transfer(tx, rx);
        } else {
            self.dac_transfer(tx, rx);
        }
        Ok(())
    }

    fn set_expander_cs(&mut self, asserted: bool) {
        self.cs_asserted = asserted;
    }

    fn fault_line_low(&mut self) -> bool {
        self.fault_line
    }

    fn delay_us(&mut self, _us: u32) {
        // Simulated time passes instantly.
    }
}
