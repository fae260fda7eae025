//! Instrument state and command dispatch.
//!
//! [`BoardManager`] owns the bus, the per-board device table, the
//! calibration table, and the persistent store. `execute` maps every
//! parsed [`Command`] to exactly one response string; bus failures
//! surface as `ERROR:` responses rather than panics.

use crate::bus::DacBus;
use crate::cal::{self, CalTable, ChannelCalibration, Store};
use crate::config::{
    BusOptions, DACS_PER_BOARD, DEFAULT_CURRENT_DAC_RESOLUTION,
    DEFAULT_VOLTAGE_DAC_RESOLUTION, MAX_CHANNELS_PER_DAC, NUM_BOARDS,
};
use crate::dac::{Dac, Ltc2662, Ltc2664};
use crate::scpi::{self, Command, CommandKind};
use crate::sys::Driver;
use crate::Result;

const IDN_RESPONSE: &str = "GreyMatter,DAC Controller,001,0.1";

pub struct BoardManager<D: Driver, S: Store> {
    bus: DacBus<D>,
    dacs: [[Dac; DACS_PER_BOARD]; NUM_BOARDS],
    resolution: [[u8; DACS_PER_BOARD]; NUM_BOARDS],
    calibration: CalTable,
    serials: [String; NUM_BOARDS],
    store: S,
}

fn make_dac(board: u8, slot: u8, resolution_bits: u8) -> Dac {
    if slot < 2 {
        Dac::Current(Ltc2662::new(board, slot, resolution_bits))
    } else {
        Dac::Voltage(Ltc2664::new(board, slot, resolution_bits))
    }
}

impl<D: Driver, S: Store> BoardManager<D, S> {
    pub fn new(driver: D, options: BusOptions, store: S) -> BoardManager<D, S> {
        let dacs = std::array::from_fn(|board| {
            std::array::from_fn(|slot| {
                let resolution_bits = if slot < 2 {
                    DEFAULT_CURRENT_DAC_RESOLUTION
                } else {
                    DEFAULT_VOLTAGE_DAC_RESOLUTION
                };
                make_dac(board as u8, slot as u8, resolution_bits)
            })
        });
        let resolution = [[
            DEFAULT_CURRENT_DAC_RESOLUTION,
            DEFAULT_CURRENT_DAC_RESOLUTION,
            DEFAULT_VOLTAGE_DAC_RESOLUTION,
        ]; NUM_BOARDS];
        BoardManager {
            bus: DacBus::new(driver, options),
            dacs,
            resolution,
            calibration: [[[ChannelCalibration::default();
                MAX_CHANNELS_PER_DAC]; DACS_PER_BOARD]; NUM_BOARDS],
            serials: Default::default(),
            store,
        }
    }

    pub fn bus(&mut self) -> &mut DacBus<D> {
        &mut self.bus
    }

    /// Bring up the expanders and every device, then pick up any
    /// calibration record the store holds.
    pub fn init_all(&mut self) -> Result<()> {
        self.bus.init()?;
        for board in 0..NUM_BOARDS {
            for slot in 0..DACS_PER_BOARD {
                self.dacs[board][slot].init(&mut self.bus)?;
            }
        }
        cal::load(&self.store, &mut self.serials, &mut self.calibration);
        Ok(())
    }

    /// Power down every device and re-initialize the hardware.
    /// Calibration and serial numbers are state of the instrument,
    /// not of the chips, and survive.
    pub fn reset_all(&mut self) -> Result<()> {
        for board in 0..NUM_BOARDS {
            for slot in 0..DACS_PER_BOARD {
                self.dacs[board][slot].power_down_chip(&mut self.bus)?;
            }
        }
        self.bus.init()?;
        for board in 0..NUM_BOARDS {
            for slot in 0..DACS_PER_BOARD {
                let bits = self.resolution[board][slot];
                self.dacs[board][slot] = make_dac(board as u8, slot as u8, bits);
                self.dacs[board][slot].init(&mut self.bus)?;
            }
        }
        Ok(())
    }

    /// Parse and execute one protocol line.
    pub fn execute_line(&mut self, line: &str) -> String {
        match scpi::parse(line) {
            Ok(command) => self.execute(&command),
            Err(error) => format!("ERROR:{}", error),
        }
    }

    pub fn execute(&mut self, command: &Command) -> String {
        use CommandKind::*;
        match command.kind {
            IdnQuery => IDN_RESPONSE.to_owned(),
            Reset => respond(self.reset_all()),
            FaultQuery => self.execute_fault_query(),
            PulseLdac => respond(self.bus.pulse_ldac()),
            UpdateAll => self.execute_update_all(),
            SystErrQuery => "0,\"No error\"".to_owned(),
            SetVoltage => self.execute_set_voltage(command),
            SetCurrent => self.execute_set_current(command),
            GetVoltage | GetCurrent => "ERROR:Query not implemented".to_owned(),
            SetCode => self.execute_set_code(command),
            SetSpan | SetSpanAll => self.execute_set_span(command),
            Update => self.execute_update(command),
            PowerDown | PowerDownChip => self.execute_power_down(command),
            GetResolution => self.execute_get_resolution(command),
            SetResolution => self.execute_set_resolution(command),
            SetSerial => self.execute_set_serial(command),
            GetSerial => self.execute_get_serial(command),
            SetCalGain | GetCalGain | SetCalOffset | GetCalOffset
                | SetCalEnable | GetCalEnable => self.execute_cal_channel(command),
            CalDataQuery => self.export_calibration_data(),
            CalClear => self.execute_cal_clear(),
            CalSave => match cal::save(&mut self.store, &self.serials, &self.calibration) {
                Ok(()) => "OK".to_owned(),
                Err(_) => "ERROR:Flash write failed".to_owned(),
            },
            CalLoad => {
                if cal::load(&self.store, &mut self.serials, &mut self.calibration) {
                    "OK".to_owned()
                } else {
                    "ERROR:No valid calibration data".to_owned()
                }
            }
        }
    }

    #[cfg(feature = "single-board")]
    fn execute_fault_query(&mut self) -> String {
        // One wired-NAND line: any fault vs no fault, nothing finer.
        if self.bus.is_fault_active() {
            "FAULT:ACTIVE".to_owned()
        } else {
            "OK".to_owned()
        }
    }

    #[cfg(not(feature = "single-board"))]
    fn execute_fault_query(&mut self) -> String {
        if self.bus.is_fault_active() {
            match self.bus.read_faults() {
                Ok(faults) => format!("FAULT:0x{:06X}", faults),
                Err(error) => format!("ERROR:{}", error),
            }
        } else {
            "OK".to_owned()
        }
    }

    fn execute_update_all(&mut self) -> String {
        for board in 0..NUM_BOARDS {
            for slot in 0..DACS_PER_BOARD {
                if let Err(error) = self.dacs[board][slot].update_all(&mut self.bus) {
                    return format!("ERROR:{}", error);
                }
            }
        }
        respond(self.bus.pulse_ldac())
    }

    fn execute_set_voltage(&mut self, command: &Command) -> String {
        let Some((board, slot, channel)) = channel_address(command) else {
            return "ERROR:Missing address".to_owned();
        };
        let Dac::Voltage(ref dac) = self.dacs[board][slot] else {
            return "ERROR:Use CURR for current DACs".to_owned();
        };
        if channel >= Ltc2664::NUM_CHANNELS {
            return "ERROR:Invalid channel".to_owned();
        }
        let requested = command.float_value.unwrap_or(0.0);
        let voltage = self.calibration[board][slot][channel].apply(requested);
        respond(dac.set_voltage(&mut self.bus, channel as u8, voltage))
    }

    fn execute_set_current(&mut self, command: &Command) -> String {
        let Some((board, slot, channel)) = channel_address(command) else {
            return "ERROR:Missing address".to_owned();
        };
        let Dac::Current(ref dac) = self.dacs[board][slot] else {
            return "ERROR:Use VOLT for voltage DACs".to_owned();
        };
        if channel >= Ltc2662::NUM_CHANNELS {
            return "ERROR:Invalid channel".to_owned();
        }
        let requested = command.float_value.unwrap_or(0.0);
        let current_ma = self.calibration[board][slot][channel].apply(requested);
        respond(dac.set_current_ma(&mut self.bus, channel as u8, current_ma))
    }

    fn execute_set_code(&mut self, command: &Command) -> String {
        let Some((board, slot, channel)) = channel_address(command) else {
            return "ERROR:Missing address".to_owned();
        };
        let dac = &self.dacs[board][slot];
        if channel >= dac.num_channels() {
            return "ERROR:Invalid channel".to_owned();
        }
        let code = command.int_value.unwrap_or(0);
        if code > dac.max_code() {
            return format!("ERROR:Code exceeds max ({} for {}-bit)",
                           dac.max_code(), dac.resolution());
        }
        respond(dac.write_and_update(&mut self.bus, channel as u8, code))
    }

    fn execute_set_span(&mut self, command: &Command) -> String {
        let Some((board, slot)) = dac_address(command) else {
            return "ERROR:Missing address".to_owned();
        };
        let span = command.int_value.unwrap_or(0) as u8;
        if command.kind == CommandKind::SetSpanAll {
            respond(self.dacs[board][slot].set_span_all(&mut self.bus, span))
        } else {
            let Some(channel) = command.channel else {
                return "ERROR:Missing channel".to_owned();
            };
            respond(self.dacs[board][slot].set_span(&mut self.bus, channel, span))
        }
    }

    fn execute_update(&mut self, command: &Command) -> String {
        let Some((board, slot)) = dac_address(command) else {
            return "ERROR:Missing address".to_owned();
        };
        respond(self.dacs[board][slot].update_all(&mut self.bus))
    }

    fn execute_power_down(&mut self, command: &Command) -> String {
        let Some((board, slot)) = dac_address(command) else {
            return "ERROR:Missing address".to_owned();
        };
        if command.kind == CommandKind::PowerDownChip {
            respond(self.dacs[board][slot].power_down_chip(&mut self.bus))
        } else {
            let Some(channel) = command.channel else {
                return "ERROR:Missing channel".to_owned();
            };
            respond(self.dacs[board][slot].power_down(&mut self.bus, channel))
        }
    }

    fn execute_get_resolution(&mut self, command: &Command) -> String {
        let Some((board, slot)) = dac_address(command) else {
            return "ERROR:Missing address".to_owned();
        };
        format!("{}", self.dacs[board][slot].resolution())
    }

    fn execute_set_resolution(&mut self, command: &Command) -> String {
        let Some((board, slot)) = dac_address(command) else {
            return "ERROR:Missing address".to_owned();
        };
        let bits = if command.int_value == Some(12) { 12 } else { 16 };
        self.resolution[board][slot] = bits;
        // Swap in a fresh device at the new resolution and bring it up.
        self.dacs[board][slot] = make_dac(board as u8, slot as u8, bits);
        respond(self.dacs[board][slot].init(&mut self.bus))
    }

    fn execute_set_serial(&mut self, command: &Command) -> String {
        let Some(board) = board_address(command) else {
            return "ERROR:Invalid board".to_owned();
        };
        self.serials[board] = command.text.clone().unwrap_or_default();
        "OK".to_owned()
    }

    fn execute_get_serial(&mut self, command: &Command) -> String {
        let Some(board) = board_address(command) else {
            return "ERROR:Invalid board".to_owned();
        };
        if self.serials[board].is_empty() {
            "(not set)".to_owned()
        } else {
            self.serials[board].clone()
        }
    }

    fn execute_cal_channel(&mut self, command: &Command) -> String {
        use CommandKind::*;
        let Some((board, slot, channel)) = channel_address(command) else {
            return "ERROR:Missing address".to_owned();
        };
        if channel >= self.dacs[board][slot].num_channels() {
            return "ERROR:Invalid channel".to_owned();
        }
        let calibration = &mut self.calibration[board][slot][channel];
        match command.kind {
            SetCalGain => {
                calibration.gain = command.float_value.unwrap_or(1.0);
                "OK".to_owned()
            }
            GetCalGain => format!("{:.6}", calibration.gain),
            SetCalOffset => {
                calibration.offset = command.float_value.unwrap_or(0.0);
                "OK".to_owned()
            }
            GetCalOffset => format!("{:.6}", calibration.offset),
            SetCalEnable => {
                calibration.enabled = command.int_value.unwrap_or(0) != 0;
                "OK".to_owned()
            }
            GetCalEnable => if calibration.enabled { "1" } else { "0" }.to_owned(),
            _ => unreachable!(),
        }
    }

    /// Compact dump of serial numbers and every non-default channel
    /// calibration, one board per stanza.
    fn export_calibration_data(&self) -> String {
        let mut result = String::new();
        for board in 0..NUM_BOARDS {
            result.push_str(&format!("BOARD{}:SN={}\n", board, self.serials[board]));
            for slot in 0..DACS_PER_BOARD {
                let num_channels = self.dacs[board][slot].num_channels();
                for channel in 0..num_channels {
                    let calibration = &self.calibration[board][slot][channel];
                    if calibration.enabled
                        || calibration.gain != 1.0
                        || calibration.offset != 0.0
                    {
                        result.push_str(&format!(
                            "  DAC{}:CH{}:G={:.6},O={:.6},E={}\n",
                            slot, channel, calibration.gain, calibration.offset,
                            calibration.enabled as u8));
                    }
                }
            }
        }
        result
    }

    fn execute_cal_clear(&mut self) -> String {
        self.serials = Default::default();
        self.calibration = [[[ChannelCalibration::default();
            MAX_CHANNELS_PER_DAC]; DACS_PER_BOARD]; NUM_BOARDS];
        respond(cal::erase(&mut self.store))
    }
}

fn respond(result: Result<()>) -> String {
    match result {
        Ok(()) => "OK".to_owned(),
        Err(error) => format!("ERROR:{}", error),
    }
}

fn board_address(command: &Command) -> Option<usize> {
    let board = command.board? as usize;
    (board < NUM_BOARDS).then_some(board)
}

fn dac_address(command: &Command) -> Option<(usize, usize)> {
    let board = command.board? as usize;
    let slot = command.dac? as usize;
    (board < NUM_BOARDS && slot < DACS_PER_BOARD).then_some((board, slot))
}

fn channel_address(command: &Command) -> Option<(usize, usize, usize)> {
    let (board, slot) = dac_address(command)?;
    let channel = command.channel? as usize;
    Some((board, slot, channel))
}
