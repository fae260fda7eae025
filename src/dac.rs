//! Protocol encoders for the two DAC families sharing the bus: the
//! LTC2662 5-channel current source and the LTC2664 4-channel voltage
//! output. Both speak the same 24-bit frame: opcode(4) | address(4) |
//! data(16), MSB first.

use crate::bus::DacBus;
use crate::sys::Driver;
use crate::Result;

/// The fixed command set shared by both chip families. Codes a family
/// does not implement are ignored by that chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    WriteCodeN        = 0x0,
    UpdateN           = 0x1,
    WriteNUpdateAll   = 0x2,
    WriteUpdateN      = 0x3,
    PowerDownN        = 0x4,
    PowerDownChip     = 0x5,
    WriteSpanN        = 0x6,
    Config            = 0x7,
    WriteCodeAll      = 0x8,
    UpdateAll         = 0x9,
    WriteAllUpdateAll = 0xA,
    Mux               = 0xB,
    ToggleSelect      = 0xC,
    GlobalToggle      = 0xD,
    WriteSpanAll      = 0xE,
    NoOp              = 0xF,
}

/// Pack one logical operation into its wire frame.
pub fn frame(opcode: Opcode, address: u8, data: u16) -> [u8; 3] {
    [
        (opcode as u8) << 4 | (address & 0x0F),
        (data >> 8) as u8,
        data as u8,
    ]
}

/// LTC2662 span codes.
pub mod current_span {
    /// Output disabled, high impedance.
    pub const HI_Z: u8 = 0x0;
    pub const MA_3_125: u8 = 0x1;
    pub const MA_6_25: u8 = 0x2;
    pub const MA_12_5: u8 = 0x3;
    pub const MA_25: u8 = 0x4;
    pub const MA_50: u8 = 0x5;
    pub const MA_100: u8 = 0x6;
    pub const MA_200: u8 = 0x7;
    /// Output switched to the negative supply.
    pub const SWITCH_NEG: u8 = 0x8;
    pub const MA_300: u8 = 0xF;
}

/// Full-scale current in mA per LTC2662 span code. Hi-Z, switch-to-V−
/// and the undefined codes all carry full scale 0; a unit-based write on
/// such a span converts to code 0 rather than erroring out.
const FULL_SCALE_MA: [f32; 16] = [
    0.0,    // 0x0: Hi-Z
    3.125,  // 0x1
    6.25,   // 0x2
    12.5,   // 0x3
    25.0,   // 0x4
    50.0,   // 0x5
    100.0,  // 0x6
    200.0,  // 0x7
    0.0,    // 0x8: switch to V-
    0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // 0x9-0xE: undefined
    300.0,  // 0xF
];

/// LTC2664 span codes.
pub mod voltage_span {
    pub const V_0_5: u8 = 0x0;
    pub const V_0_10: u8 = 0x1;
    pub const V_PM5: u8 = 0x2;
    pub const V_PM10: u8 = 0x3;
    pub const V_PM2_5: u8 = 0x4;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageRange {
    pub min: f32,
    pub max: f32,
    pub bipolar: bool,
}

const VOLTAGE_RANGES: [VoltageRange; 5] = [
    VoltageRange { min: 0.0, max: 5.0, bipolar: false },   // 0x0
    VoltageRange { min: 0.0, max: 10.0, bipolar: false },  // 0x1
    VoltageRange { min: -5.0, max: 5.0, bipolar: true },   // 0x2
    VoltageRange { min: -10.0, max: 10.0, bipolar: true }, // 0x3
    VoltageRange { min: -2.5, max: 2.5, bipolar: true },   // 0x4
];

fn clamp_resolution(bits: u8) -> (u8, u16) {
    // Only the -12 and -16 part variants exist.
    if bits == 12 { (12, 4095) } else { (16, 65535) }
}

/// One LTC2662 current-output DAC.
#[derive(Debug, Clone)]
pub struct Ltc2662 {
    board: u8,
    slot: u8,
    resolution: u8,
    max_code: u16,
    span: [u8; Self::NUM_CHANNELS],
}

impl Ltc2662 {
    pub const NUM_CHANNELS: usize = 5;

    pub fn new(board: u8, slot: u8, resolution_bits: u8) -> Ltc2662 {
        let (resolution, max_code) = clamp_resolution(resolution_bits);
        Ltc2662 {
            board, slot, resolution, max_code,
            span: [current_span::HI_Z; Self::NUM_CHANNELS],
        }
    }

    fn send<D: Driver>(&self, bus: &mut DacBus<D>, opcode: Opcode, address: u8,
                       data: u16) -> Result<()> {
        bus.transaction(self.board, self.slot, &frame(opcode, address, data), None)
    }

    /// Power-on state is all outputs Hi-Z. Pick the lowest active span as
    /// a safe default and latch it.
    pub fn init<D: Driver>(&mut self, bus: &mut DacBus<D>) -> Result<()> {
        self.set_span_all(bus, current_span::MA_3_125)?;
        self.update_all(bus)
    }

    // The chip always expects left-justified 16-bit data, so a 12-bit
    // code gets shifted up before framing.
    fn justify(&self, code: u16) -> u16 {
        if self.resolution == 12 { code << 4 } else { code }
    }

    pub fn write_code<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8,
                                 code: u16) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        self.send(bus, Opcode::WriteCodeN, channel, self.justify(code))
    }

    pub fn write_and_update<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8,
                                       code: u16) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        self.send(bus, Opcode::WriteUpdateN, channel, self.justify(code))
    }

    pub fn update_channel<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        self.send(bus, Opcode::UpdateN, channel, 0)
    }

    pub fn update_all<D: Driver>(&self, bus: &mut DacBus<D>) -> Result<()> {
        self.send(bus, Opcode::UpdateAll, 0, 0)
    }

    pub fn set_span<D: Driver>(&mut self, bus: &mut DacBus<D>, channel: u8,
                               span_code: u8) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        self.send(bus, Opcode::WriteSpanN, channel, (span_code & 0x0F) as u16)?;
        self.span[channel as usize] = span_code;
        Ok(())
    }

    pub fn set_span_all<D: Driver>(&mut self, bus: &mut DacBus<D>,
                                   span_code: u8) -> Result<()> {
        self.send(bus, Opcode::WriteSpanAll, 0, (span_code & 0x0F) as u16)?;
        self.span = [span_code; Self::NUM_CHANNELS];
        Ok(())
    }

    pub fn power_down<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        self.send(bus, Opcode::PowerDownN, channel, 0)
    }

    pub fn power_down_chip<D: Driver>(&self, bus: &mut DacBus<D>) -> Result<()> {
        self.send(bus, Opcode::PowerDownChip, 0, 0)
    }

    /// Optional protections, all enabled by default on the chip.
    pub fn configure<D: Driver>(&self, bus: &mut DacBus<D>, ref_disable: bool,
                                thermal_disable: bool, power_limit_disable: bool,
                                open_circuit_disable: bool) -> Result<()> {
        let mut config = 0u16;
        if ref_disable          { config |= 0x01 }
        if thermal_disable      { config |= 0x02 }
        if power_limit_disable  { config |= 0x04 }
        if open_circuit_disable { config |= 0x08 }
        self.send(bus, Opcode::Config, 0, config)
    }

    /// Shift out the fault register with a no-op frame. FR0-FR4 flag
    /// open circuits per channel, FR5 overtemperature, FR6 power limit,
    /// FR7 an invalid SPI sequence length.
    pub fn read_fault_register<D: Driver>(&self, bus: &mut DacBus<D>) -> Result<u8> {
        let tx = frame(Opcode::NoOp, 0, 0);
        let mut rx = [0u8; 3];
        bus.transaction(self.board, self.slot, &tx, Some(&mut rx))?;
        Ok(rx[0])
    }

    pub fn full_scale_ma(&self, channel: u8) -> f32 {
        match self.span.get(channel as usize) {
            Some(&span) => FULL_SCALE_MA[span as usize & 0x0F],
            None => 0.0,
        }
    }

    pub fn current_to_code(&self, channel: u8, current_ma: f32) -> u16 {
        let fs = self.full_scale_ma(channel);
        if fs <= 0.0 {
            // Hi-Z or switch-to-V-: no unit mapping exists.
            return 0;
        }
        let clamped = current_ma.clamp(0.0, fs);
        (clamped / fs * self.max_code as f32 + 0.5) as u16
    }

    pub fn code_to_current(&self, channel: u8, code: u16) -> f32 {
        let fs = self.full_scale_ma(channel);
        fs * code as f32 / self.max_code as f32
    }

    pub fn set_current_ma<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8,
                                     current_ma: f32) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        let code = self.current_to_code(channel, current_ma);
        self.write_and_update(bus, channel, code)
    }

    pub fn resolution(&self) -> u8 {
        self.resolution
    }

    pub fn max_code(&self) -> u16 {
        self.max_code
    }
}

/// One LTC2664 voltage-output DAC.
#[derive(Debug, Clone)]
pub struct Ltc2664 {
    board: u8,
    slot: u8,
    resolution: u8,
    max_code: u16,
    span: [u8; Self::NUM_CHANNELS],
}

impl Ltc2664 {
    pub const NUM_CHANNELS: usize = 4;

    pub fn new(board: u8, slot: u8, resolution_bits: u8) -> Ltc2664 {
        let (resolution, max_code) = clamp_resolution(resolution_bits);
        Ltc2664 {
            board, slot, resolution, max_code,
            span: [voltage_span::V_0_5; Self::NUM_CHANNELS],
        }
    }

    fn send<D: Driver>(&self, bus: &mut DacBus<D>, opcode: Opcode, address: u8,
                       data: u16) -> Result<()> {
        bus.transaction(self.board, self.slot, &frame(opcode, address, data), None)
    }

    /// Assumes SoftSpan strapping; ±10V covers every use downstream has
    /// asked for so far.
    pub fn init<D: Driver>(&mut self, bus: &mut DacBus<D>) -> Result<()> {
        self.set_span_all(bus, voltage_span::V_PM10)?;
        self.update_all(bus)
    }

    pub fn write_code<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8,
                                 code: u16) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        self.send(bus, Opcode::WriteCodeN, channel, code)
    }

    pub fn write_and_update<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8,
                                       code: u16) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        self.send(bus, Opcode::WriteUpdateN, channel, code)
    }

    pub fn update_channel<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        self.send(bus, Opcode::UpdateN, channel, 0)
    }

    pub fn update_all<D: Driver>(&self, bus: &mut DacBus<D>) -> Result<()> {
        self.send(bus, Opcode::UpdateAll, 0, 0)
    }

    pub fn set_span<D: Driver>(&mut self, bus: &mut DacBus<D>, channel: u8,
                               span_code: u8) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        if span_code > voltage_span::V_PM2_5 { return Ok(()) }
        self.send(bus, Opcode::WriteSpanN, channel, (span_code & 0x07) as u16)?;
        self.span[channel as usize] = span_code;
        Ok(())
    }

    pub fn set_span_all<D: Driver>(&mut self, bus: &mut DacBus<D>,
                                   span_code: u8) -> Result<()> {
        if span_code > voltage_span::V_PM2_5 { return Ok(()) }
        self.send(bus, Opcode::WriteSpanAll, 0, (span_code & 0x07) as u16)?;
        self.span = [span_code; Self::NUM_CHANNELS];
        Ok(())
    }

    pub fn power_down<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        self.send(bus, Opcode::PowerDownN, channel, 0)
    }

    pub fn power_down_chip<D: Driver>(&self, bus: &mut DacBus<D>) -> Result<()> {
        self.send(bus, Opcode::PowerDownChip, 0, 0)
    }

    pub fn configure<D: Driver>(&self, bus: &mut DacBus<D>, ref_disable: bool,
                                thermal_disable: bool) -> Result<()> {
        let mut config = 0u16;
        if ref_disable     { config |= 0x01 }
        if thermal_disable { config |= 0x02 }
        self.send(bus, Opcode::Config, 0, config)
    }

    fn range(&self, channel: u8) -> Option<&'static VoltageRange> {
        let span = *self.span.get(channel as usize)?;
        VOLTAGE_RANGES.get(span as usize)
    }

    pub fn min_voltage(&self, channel: u8) -> f32 {
        self.range(channel).map_or(0.0, |r| r.min)
    }

    pub fn max_voltage(&self, channel: u8) -> f32 {
        self.range(channel).map_or(0.0, |r| r.max)
    }

    pub fn is_bipolar(&self, channel: u8) -> bool {
        self.range(channel).map_or(false, |r| r.bipolar)
    }

    pub fn voltage_to_code(&self, channel: u8, voltage: f32) -> u16 {
        let Some(range) = self.range(channel) else { return 0 };
        let span_width = range.max - range.min;
        if span_width <= 0.0 { return 0 }
        let clamped = voltage.clamp(range.min, range.max);
        let normalized = (clamped - range.min) / span_width;
        (normalized * self.max_code as f32 + 0.5) as u16
    }

    pub fn code_to_voltage(&self, channel: u8, code: u16) -> f32 {
        let Some(range) = self.range(channel) else { return 0.0 };
        let normalized = code as f32 / self.max_code as f32;
        range.min + normalized * (range.max - range.min)
    }

    pub fn set_voltage<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8,
                                  voltage: f32) -> Result<()> {
        if channel as usize >= Self::NUM_CHANNELS { return Ok(()) }
        let code = self.voltage_to_code(channel, voltage);
        self.write_and_update(bus, channel, code)
    }

    pub fn resolution(&self) -> u8 {
        self.resolution
    }

    pub fn max_code(&self) -> u16 {
        self.max_code
    }
}

/// The closed set of DAC kinds; the chip population is fixed by the board
/// layout, so a tagged variant beats an open trait object here.
#[derive(Debug, Clone)]
pub enum Dac {
    Current(Ltc2662),
    Voltage(Ltc2664),
}

impl Dac {
    pub fn init<D: Driver>(&mut self, bus: &mut DacBus<D>) -> Result<()> {
        match self {
            Dac::Current(dac) => dac.init(bus),
            Dac::Voltage(dac) => dac.init(bus),
        }
    }

    pub fn write_code<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8,
                                 code: u16) -> Result<()> {
        match self {
            Dac::Current(dac) => dac.write_code(bus, channel, code),
            Dac::Voltage(dac) => dac.write_code(bus, channel, code),
        }
    }

    pub fn write_and_update<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8,
                                       code: u16) -> Result<()> {
        match self {
            Dac::Current(dac) => dac.write_and_update(bus, channel, code),
            Dac::Voltage(dac) => dac.write_and_update(bus, channel, code),
        }
    }

    pub fn update_channel<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8) -> Result<()> {
        match self {
            Dac::Current(dac) => dac.update_channel(bus, channel),
            Dac::Voltage(dac) => dac.update_channel(bus, channel),
        }
    }

    pub fn update_all<D: Driver>(&self, bus: &mut DacBus<D>) -> Result<()> {
        match self {
            Dac::Current(dac) => dac.update_all(bus),
            Dac::Voltage(dac) => dac.update_all(bus),
        }
    }

    pub fn set_span<D: Driver>(&mut self, bus: &mut DacBus<D>, channel: u8,
                               span_code: u8) -> Result<()> {
        match self {
            Dac::Current(dac) => dac.set_span(bus, channel, span_code),
            Dac::Voltage(dac) => dac.set_span(bus, channel, span_code),
        }
    }

    pub fn set_span_all<D: Driver>(&mut self, bus: &mut DacBus<D>,
                                   span_code: u8) -> Result<()> {
        match self {
            Dac::Current(dac) => dac.set_span_all(bus, span_code),
            Dac::Voltage(dac) => dac.set_span_all(bus, span_code),
        }
    }

    pub fn power_down<D: Driver>(&self, bus: &mut DacBus<D>, channel: u8) -> Result<()> {
        match self {
            Dac::Current(dac) => dac.power_down(bus, channel),
            Dac::Voltage(dac) => dac.power_down(bus, channel),
        }
    }

    pub fn power_down_chip<D: Driver>(&self, bus: &mut DacBus<D>) -> Result<()> {
        match self {
            Dac::Current(dac) => dac.power_down_chip(bus),
            Dac::Voltage(dac) => dac.power_down_chip(bus),
        }
    }

    pub fn num_channels(&self) -> usize {
        match self {
            Dac::Current(_) => Ltc2662::NUM_CHANNELS,
            Dac::Voltage(_) => Ltc2664::NUM_CHANNELS,
        }
    }

    pub fn resolution(&self) -> u8 {
        match self {
            Dac::Current(dac) => dac.resolution(),
            Dac::Voltage(dac) => dac.resolution(),
        }
    }

    pub fn max_code(&self) -> u16 {
        match self {
            Dac::Current(dac) => dac.max_code(),
            Dac::Voltage(dac) => dac.max_code(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Dac::Current(_) => "LTC2662",
            Dac::Voltage(_) => "LTC2664",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{BusOptions, CsBitOrder};
    use crate::sys::sim::SimDriver;

    fn bus() -> DacBus<SimDriver> {
        let mut bus = DacBus::new(SimDriver::new(), BusOptions::default());
        bus.init().unwrap();
        bus
    }

    #[test]
    fn frame_packing() {
        assert_eq!(frame(Opcode::WriteUpdateN, 3, 0x8001), [0x33, 0x80, 0x01]);
        assert_eq!(frame(Opcode::NoOp, 0, 0), [0xF0, 0x00, 0x00]);
        assert_eq!(frame(Opcode::WriteSpanAll, 0, 0x0004), [0xE0, 0x00, 0x04]);
    }

    #[test]
    fn current_dac_12_bit_left_justifies() {
        let mut bus = bus();
        let dac = Ltc2662::new(0, 0, 12);
        bus.driver_mut().clear_frames();
        dac.write_and_update(&mut bus, 2, 0x0ABC).unwrap();
        let frames = bus.driver().frames();
        assert_eq!(frames, &[(0, frame(Opcode::WriteUpdateN, 2, 0xABC0).to_vec())]);
    }

    #[test]
    fn current_dac_16_bit_passes_code_through() {
        let mut bus = bus();
        let dac = Ltc2662::new(1, 1, 16);
        bus.driver_mut().clear_frames();
        dac.write_and_update(&mut bus, 0, 0xABCD).unwrap();
        let frames = bus.driver().frames();
        assert_eq!(frames, &[(4, frame(Opcode::WriteUpdateN, 0, 0xABCD).to_vec())]);
    }

    #[test]
    fn current_conversion_round_trip() {
        let mut bus = bus();
        let mut dac = Ltc2662::new(0, 0, 16);
        dac.set_span_all(&mut bus, current_span::MA_100).unwrap();
        let lsb = 100.0 / 65535.0;
        for ma in [0.0, 0.05, 12.5, 50.0, 99.9, 100.0] {
            let code = dac.current_to_code(0, ma);
            let back = dac.code_to_current(0, code);
            assert!((back - ma).abs() <= lsb, "{} mA -> {} -> {} mA", ma, code, back);
        }
    }

    #[test]
    fn current_conversion_clamps() {
        let mut bus = bus();
        let mut dac = Ltc2662::new(0, 0, 16);
        dac.set_span_all(&mut bus, current_span::MA_25).unwrap();
        assert_eq!(dac.current_to_code(0, -3.0), 0);
        assert_eq!(dac.current_to_code(0, 500.0), 65535);
    }

    #[test]
    fn hi_z_span_converts_to_zero() {
        let mut bus = bus();
        let mut dac = Ltc2662::new(0, 0, 16);
        dac.set_span_all(&mut bus, current_span::HI_Z).unwrap();
        assert_eq!(dac.current_to_code(0, 10.0), 0);
        dac.set_span_all(&mut bus, current_span::SWITCH_NEG).unwrap();
        assert_eq!(dac.current_to_code(0, 10.0), 0);
    }

    #[test]
    fn voltage_conversion_round_trip_bipolar() {
        let mut bus = bus();
        let mut dac = Ltc2664::new(0, 2, 16);
        dac.set_span_all(&mut bus, voltage_span::V_PM10).unwrap();
        let lsb = 20.0 / 65535.0;
        for v in [-10.0, -3.3, 0.0, 2.5, 9.99, 10.0] {
            let code = dac.voltage_to_code(0, v);
            let back = dac.code_to_voltage(0, code);
            assert!((back - v).abs() <= lsb, "{} V -> {} -> {} V", v, code, back);
        }
    }

    #[test]
    fn voltage_unipolar_range() {
        let mut bus = bus();
        let mut dac = Ltc2664::new(0, 2, 16);
        dac.set_span_all(&mut bus, voltage_span::V_0_5).unwrap();
        assert!(!dac.is_bipolar(0));
        assert_eq!(dac.voltage_to_code(0, 0.0), 0);
        assert_eq!(dac.voltage_to_code(0, 5.0), 65535);
        assert_eq!(dac.voltage_to_code(0, -1.0), 0);
        assert_eq!(dac.voltage_to_code(0, 2.5), 32768);
    }

    #[test]
    fn voltage_rejects_invalid_span() {
        let mut bus = bus();
        let mut dac = Ltc2664::new(0, 2, 16);
        dac.set_span_all(&mut bus, voltage_span::V_PM5).unwrap();
        bus.driver_mut().clear_frames();
        // Out-of-table code leaves state and wire untouched.
        dac.set_span(&mut bus, 0, 0x9).unwrap();
        assert!(bus.driver().frames().is_empty());
        assert_eq!(dac.min_voltage(0), -5.0);
    }

    #[test]
    fn set_span_is_idempotent() {
        let mut bus = bus();
        let mut dac = Ltc2662::new(0, 0, 16);
        dac.set_span(&mut bus, 1, current_span::MA_50).unwrap();
        let first = dac.current_to_code(1, 20.0);
        dac.set_span(&mut bus, 1, current_span::MA_50).unwrap();
        assert_eq!(dac.current_to_code(1, 20.0), first);
        assert_eq!(dac.full_scale_ma(1), 50.0);
    }

    #[test]
    fn configure_packs_protection_bits() {
        let mut bus = bus();
        let dac = Ltc2662::new(0, 0, 16);
        bus.driver_mut().clear_frames();
        dac.configure(&mut bus, false, true, false, true).unwrap();
        let frames = bus.driver().frames();
        assert_eq!(frames[0].1, frame(Opcode::Config, 0, 0x000A).to_vec());
    }

    #[test]
    fn fault_register_readback() {
        let mut bus = bus();
        let dac = Ltc2662::new(0, 1, 16);
        bus.driver_mut().set_dac_fault_register(1, 0x21);
        assert_eq!(dac.read_fault_register(&mut bus).unwrap(), 0x21);
    }

    #[test]
    fn init_sets_default_spans() {
        let mut bus = bus();
        let mut dac = Dac::Current(Ltc2662::new(0, 0, 16));
        bus.driver_mut().clear_frames();
        dac.init(&mut bus).unwrap();
        let frames = bus.driver().frames();
        assert_eq!(frames[0].1, frame(Opcode::WriteSpanAll, 0, current_span::MA_3_125 as u16).to_vec());
        assert_eq!(frames[1].1, frame(Opcode::UpdateAll, 0, 0).to_vec());
    }

    #[test]
    fn straight_cs_order_still_routes() {
        // The sim models reversed wiring; a Straight-configured bus must
        // end up addressing the wrong chip, which is exactly the failure
        // the CsBitOrder option exists to avoid.
        let mut bus = DacBus::new(SimDriver::new(),
            BusOptions { cs_bit_order: CsBitOrder::Straight });
        bus.init().unwrap();
        let dac = Ltc2662::new(2, 0, 16); // index 6 = 0b00110
        bus.driver_mut().clear_frames();
        dac.update_all(&mut bus).unwrap();
        // Pins read back 0b00110, decoder sees the reversal: 0b01100 = 12.
        assert_eq!(bus.driver().frames()[0].0, 12);
    }
}
