//! Parser for the line-oriented SCPI-style control protocol.
//!
//! One line in, exactly one structured [`Command`] or one diagnostic
//! [`ParseError`] out; nothing here ever panics on malformed input.
//! Keywords are case-insensitive, index tokens are a single decimal
//! digit glued to their keyword (`BOARD3`, `DAC1`, `CH0`).

use std::fmt;

use crate::config::NUM_BOARDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    // IEEE 488.2 common commands
    IdnQuery,        // *IDN?
    Reset,           // *RST
    // System commands
    FaultQuery,      // FAULT?
    PulseLdac,       // LDAC
    UpdateAll,       // UPDATE:ALL
    SystErrQuery,    // SYST:ERR?
    CalDataQuery,    // CAL:DATA?
    CalClear,        // CAL:CLEAR
    CalSave,         // CAL:SAVE
    CalLoad,         // CAL:LOAD
    // Addressed board/DAC commands
    SetVoltage,      // BOARD<n>:DAC<m>:CH<c>:VOLT <value>
    GetVoltage,      // BOARD<n>:DAC<m>:CH<c>:VOLT?
    SetCurrent,      // BOARD<n>:DAC<m>:CH<c>:CURR <value>
    GetCurrent,      // BOARD<n>:DAC<m>:CH<c>:CURR?
    SetCode,         // BOARD<n>:DAC<m>:CH<c>:CODE <value>
    SetSpan,         // BOARD<n>:DAC<m>:SPAN <value>
    SetSpanAll,      // BOARD<n>:DAC<m>:SPAN:ALL <value>
    Update,          // BOARD<n>:DAC<m>:UPDATE
    PowerDown,       // BOARD<n>:DAC<m>:CH<c>:PDOWN
    PowerDownChip,   // BOARD<n>:DAC<m>:PDOWN
    SetResolution,   // BOARD<n>:DAC<m>:RES <12|16>
    GetResolution,   // BOARD<n>:DAC<m>:RES?
    // Calibration commands
    SetSerial,       // BOARD<n>:SN <string>
    GetSerial,       // BOARD<n>:SN?
    SetCalGain,      // BOARD<n>:DAC<m>:CH<c>:CAL:GAIN <value>
    GetCalGain,      // BOARD<n>:DAC<m>:CH<c>:CAL:GAIN?
    SetCalOffset,    // BOARD<n>:DAC<m>:CH<c>:CAL:OFFS <value>
    GetCalOffset,    // BOARD<n>:DAC<m>:CH<c>:CAL:OFFS?
    SetCalEnable,    // BOARD<n>:DAC<m>:CH<c>:CAL:EN <0|1>
    GetCalEnable,    // BOARD<n>:DAC<m>:CH<c>:CAL:EN?
}

/// A fully validated command. Address fields are `None` where the
/// grammar alternative carries no such index.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub board: Option<u8>,
    pub dac: Option<u8>,
    pub channel: Option<u8>,
    pub float_value: Option<f32>,
    pub int_value: Option<u16>,
    pub text: Option<String>,
}

impl Command {
    fn bare(kind: CommandKind) -> Command {
        Command {
            kind,
            board: None, dac: None, channel: None,
            float_value: None, int_value: None, text: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> ParseError {
        ParseError { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ParseError {}

type Parsed = core::result::Result<Command, ParseError>;

/// Parse one line into a command. Alternatives are tried in order:
/// `*` common commands, system commands, then addressed `BOARD` commands.
pub fn parse(line: &str) -> Parsed {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::new("Empty command"));
    }

    if let Some(rest) = line.strip_prefix('*') {
        return parse_common(rest);
    }
    if let Some(command) = parse_system(line) {
        return Ok(command);
    }
    if let Some(rest) = eat_keyword(line, "BOARD") {
        return parse_board(rest);
    }
    Err(ParseError::new("Unknown command"))
}

fn parse_common(rest: &str) -> Parsed {
    if rest.eq_ignore_ascii_case("IDN?") {
        Ok(Command::bare(CommandKind::IdnQuery))
    } else if rest.eq_ignore_ascii_case("RST") {
        Ok(Command::bare(CommandKind::Reset))
    } else {
        Err(ParseError::new("Unknown command"))
    }
}

fn parse_system(line: &str) -> Option<Command> {
    const TABLE: &[(&str, CommandKind)] = &[
        ("FAULT?",     CommandKind::FaultQuery),
        ("LDAC",       CommandKind::PulseLdac),
        ("UPDATE:ALL", CommandKind::UpdateAll),
        ("SYST:ERR?",  CommandKind::SystErrQuery),
        ("CAL:DATA?",  CommandKind::CalDataQuery),
        ("CAL:CLEAR",  CommandKind::CalClear),
        ("CAL:SAVE",   CommandKind::CalSave),
        ("CAL:LOAD",   CommandKind::CalLoad),
    ];
    TABLE.iter()
        .find(|(keyword, _)| line.eq_ignore_ascii_case(keyword))
        .map(|&(_, kind)| Command::bare(kind))
}

fn parse_board(rest: &str) -> Parsed {
    let Some((board, rest)) = take_digit(rest) else {
        return Err(invalid_board());
    };
    if board as usize >= NUM_BOARDS {
        return Err(invalid_board());
    }

    let Some(rest) = rest.strip_prefix(':') else {
        return Err(ParseError::new("Expected :DAC or :SN after BOARD"));
    };

    if let Some(rest) = eat_keyword(rest, "SN") {
        return parse_serial(board, rest);
    }

    let Some(rest) = eat_keyword(rest, "DAC") else {
        return Err(ParseError::new("Expected DAC<n>"));
    };
    let Some((dac, rest)) = take_digit(rest) else {
        return Err(ParseError::new("Invalid DAC number (0-2)"));
    };
    if dac > 2 {
        return Err(ParseError::new("Invalid DAC number (0-2)"));
    }
    let Some(rest) = rest.strip_prefix(':') else {
        return Err(ParseError::new("Expected command after DAC"));
    };

    if let Some(rest) = eat_keyword(rest, "CH") {
        return parse_channel(board, dac, rest);
    }
    parse_dac_verb(board, dac, rest)
}

fn parse_serial(board: u8, rest: &str) -> Parsed {
    let mut command = Command::bare(CommandKind::GetSerial);
    command.board = Some(board);
    if rest == "?" {
        return Ok(command);
    }
    let serial = rest.trim();
    if serial.is_empty() {
        return Err(ParseError::new("Serial number required"));
    }
    command.kind = CommandKind::SetSerial;
    command.text = Some(serial.to_owned());
    Ok(command)
}

fn parse_channel(board: u8, dac: u8, rest: &str) -> Parsed {
    let Some((channel, rest)) = take_digit(rest) else {
        return Err(ParseError::new("Invalid channel number (0-4)"));
    };
    if channel > 4 {
        return Err(ParseError::new("Invalid channel number (0-4)"));
    }
    let Some(rest) = rest.strip_prefix(':') else {
        return Err(ParseError::new("Expected command after CH"));
    };

    let mut command = Command::bare(CommandKind::SetVoltage);
    command.board = Some(board);
    command.dac = Some(dac);
    command.channel = Some(channel);

    if let Some(rest) = eat_keyword(rest, "VOLT") {
        if rest == "?" {
            command.kind = CommandKind::GetVoltage;
        } else {
            command.kind = CommandKind::SetVoltage;
            command.float_value = Some(parse_f32(rest)
                .ok_or_else(|| ParseError::new("Invalid voltage value"))?);
        }
        return Ok(command);
    }
    if let Some(rest) = eat_keyword(rest, "CURR") {
        if rest == "?" {
            command.kind = CommandKind::GetCurrent;
        } else {
            command.kind = CommandKind::SetCurrent;
            command.float_value = Some(parse_f32(rest)
                .ok_or_else(|| ParseError::new("Invalid current value"))?);
        }
        return Ok(command);
    }
    if let Some(rest) = eat_keyword(rest, "CODE") {
        command.kind = CommandKind::SetCode;
        command.int_value = Some(parse_u16(rest)
            .ok_or_else(|| ParseError::new("Invalid code value"))?);
        return Ok(command);
    }
    if eat_keyword(rest, "PDOWN").is_some() {
        command.kind = CommandKind::PowerDown;
        return Ok(command);
    }
    if let Some(rest) = eat_keyword(rest, "CAL:") {
        return parse_channel_cal(command, rest);
    }
    Err(ParseError::new("Unknown channel command"))
}

fn parse_channel_cal(mut command: Command, rest: &str) -> Parsed {
    if let Some(rest) = eat_keyword(rest, "GAIN") {
        if rest == "?" {
            command.kind = CommandKind::GetCalGain;
        } else {
            command.kind = CommandKind::SetCalGain;
            command.float_value = Some(parse_f32(rest)
                .ok_or_else(|| ParseError::new("Invalid gain value"))?);
        }
        return Ok(command);
    }
    if let Some(rest) = eat_keyword(rest, "OFFS") {
        if rest == "?" {
            command.kind = CommandKind::GetCalOffset;
        } else {
            command.kind = CommandKind::SetCalOffset;
            command.float_value = Some(parse_f32(rest)
                .ok_or_else(|| ParseError::new("Invalid offset value"))?);
        }
        return Ok(command);
    }
    if let Some(rest) = eat_keyword(rest, "EN") {
        if rest == "?" {
            command.kind = CommandKind::GetCalEnable;
        } else {
            command.kind = CommandKind::SetCalEnable;
            command.int_value = Some(parse_u16(rest)
                .ok_or_else(|| ParseError::new("Invalid enable value (0 or 1)"))?);
        }
        return Ok(command);
    }
    Err(ParseError::new("Unknown calibration command (use GAIN, OFFS, or EN)"))
}

fn parse_dac_verb(board: u8, dac: u8, rest: &str) -> Parsed {
    let mut command = Command::bare(CommandKind::Update);
    command.board = Some(board);
    command.dac = Some(dac);

    if let Some(rest) = eat_keyword(rest, "SPAN") {
        let (kind, rest) = match eat_keyword(rest, ":ALL") {
            Some(rest) => (CommandKind::SetSpanAll, rest),
            None => (CommandKind::SetSpan, rest),
        };
        command.kind = kind;
        command.int_value = Some(parse_u16(rest)
            .ok_or_else(|| ParseError::new("Invalid span value"))?);
        return Ok(command);
    }
    if eat_keyword(rest, "UPDATE").is_some() {
        command.kind = CommandKind::Update;
        return Ok(command);
    }
    if eat_keyword(rest, "PDOWN").is_some() {
        command.kind = CommandKind::PowerDownChip;
        return Ok(command);
    }
    if let Some(rest) = eat_keyword(rest, "RES") {
        if rest == "?" {
            command.kind = CommandKind::GetResolution;
        } else {
            command.kind = CommandKind::SetResolution;
            let bits = parse_u16(rest)
                .ok_or_else(|| ParseError::new("Invalid resolution value (12 or 16)"))?;
            if bits != 12 && bits != 16 {
                return Err(ParseError::new("Resolution must be 12 or 16"));
            }
            command.int_value = Some(bits);
        }
        return Ok(command);
    }
    Err(ParseError::new("Unknown DAC command"))
}

fn invalid_board() -> ParseError {
    ParseError::new(format!("Invalid board number (0-{})", NUM_BOARDS - 1))
}

/// Case-insensitive keyword strip.
fn eat_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(&s[keyword.len()..])
    } else {
        None
    }
}

/// Exactly one decimal digit, immediately following the keyword.
fn take_digit(s: &str) -> Option<(u8, &str)> {
    let first = *s.as_bytes().first()?;
    if first.is_ascii_digit() {
        Some((first - b'0', &s[1..]))
    } else {
        None
    }
}

/// Integer payload: decimal, or hex with a `0x` prefix, 0..=65535.
fn parse_u16(s: &str) -> Option<u16> {
    let token = s.trim();
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        token.parse::<u16>().ok()
    }
}

/// Float payload: optional sign, decimal digits, at most one point.
/// No exponents; the protocol has no use for them.
fn parse_f32(s: &str) -> Option<f32> {
    let token = s.trim();
    let (sign, digits) = match token.as_bytes().first()? {
        b'-' => (-1.0, &token[1..]),
        b'+' => (1.0, &token[1..]),
        _ => (1.0, token),
    };
    let mut result = 0.0f32;
    let mut fraction_place = 0.1f32;
    let mut seen_point = false;
    let mut seen_digit = false;
    for byte in digits.bytes() {
        match byte {
            b'.' if !seen_point => seen_point = true,
            b'0'..=b'9' => {
                seen_digit = true;
                let digit = (byte - b'0') as f32;
                if seen_point {
                    result += digit * fraction_place;
                    fraction_place *= 0.1;
                } else {
                    result = result * 10.0 + digit;
                }
            }
            _ => return None,
        }
    }
    if !seen_digit {
        return None;
    }
    Some(sign * result)
}

#[cfg(test)]
mod test {
    use super::*;

    fn ok(line: &str) -> Command {
        parse(line).unwrap_or_else(|e| panic!("{:?} failed to parse: {}", line, e))
    }

    fn err(line: &str) -> String {
        parse(line).err()
            .unwrap_or_else(|| panic!("{:?} parsed unexpectedly", line))
            .message().to_owned()
    }

    #[test]
    fn common_commands() {
        assert_eq!(ok("*IDN?").kind, CommandKind::IdnQuery);
        assert_eq!(ok("*idn?").kind, CommandKind::IdnQuery);
        assert_eq!(ok("*RST").kind, CommandKind::Reset);
        assert!(!err("*FOO").is_empty());
    }

    #[test]
    fn system_commands() {
        assert_eq!(ok("FAULT?").kind, CommandKind::FaultQuery);
        assert_eq!(ok("ldac").kind, CommandKind::PulseLdac);
        assert_eq!(ok("UPDATE:ALL").kind, CommandKind::UpdateAll);
        assert_eq!(ok("SYST:ERR?").kind, CommandKind::SystErrQuery);
        assert_eq!(ok("cal:data?").kind, CommandKind::CalDataQuery);
        assert_eq!(ok("CAL:CLEAR").kind, CommandKind::CalClear);
        assert_eq!(ok("CAL:SAVE").kind, CommandKind::CalSave);
        assert_eq!(ok("CAL:LOAD").kind, CommandKind::CalLoad);
    }

    #[test]
    fn set_voltage_full_address() {
        let command = ok("BOARD0:DAC2:CH1:VOLT 2.5");
        assert_eq!(command.kind, CommandKind::SetVoltage);
        assert_eq!(command.board, Some(0));
        assert_eq!(command.dac, Some(2));
        assert_eq!(command.channel, Some(1));
        assert_eq!(command.float_value, Some(2.5));
    }

    #[test]
    fn negative_and_signed_floats() {
        assert_eq!(ok("BOARD0:DAC2:CH0:VOLT -7.5").float_value, Some(-7.5));
        assert_eq!(ok("BOARD0:DAC2:CH0:VOLT +0.125").float_value, Some(0.125));
        assert_eq!(err("BOARD0:DAC2:CH0:VOLT 1.2.3"), "Invalid voltage value");
        assert_eq!(err("BOARD0:DAC2:CH0:VOLT"), "Invalid voltage value");
    }

    #[test]
    fn voltage_query() {
        assert_eq!(ok("BOARD0:DAC2:CH0:VOLT?").kind, CommandKind::GetVoltage);
        assert_eq!(ok("BOARD0:DAC0:CH0:CURR?").kind, CommandKind::GetCurrent);
    }

    #[test]
    fn code_accepts_hex_and_decimal() {
        assert_eq!(ok("BOARD0:DAC0:CH0:CODE 1234").int_value, Some(1234));
        assert_eq!(ok("BOARD0:DAC0:CH0:CODE 0xFFFF").int_value, Some(0xFFFF));
        assert_eq!(ok("board0:dac0:ch0:code 0X10").int_value, Some(0x10));
        assert_eq!(err("BOARD0:DAC0:CH0:CODE 70000"), "Invalid code value");
        assert_eq!(err("BOARD0:DAC0:CH0:CODE -1"), "Invalid code value");
    }

    #[test]
    fn index_bounds() {
        assert_eq!(err("BOARD9:DAC0:UPDATE"),
                   format!("Invalid board number (0-{})", NUM_BOARDS - 1));
        assert_eq!(err("BOARD0:DAC3:UPDATE"), "Invalid DAC number (0-2)");
        assert_eq!(err("BOARD0:DAC0:CH5:CODE 1"), "Invalid channel number (0-4)");
    }

    #[test]
    fn indices_are_single_digit() {
        // A second digit is not part of the index token.
        assert_eq!(err("BOARD10:DAC0:UPDATE"), "Expected :DAC or :SN after BOARD");
        assert_eq!(err("BOARD0:DAC01:UPDATE"), "Expected command after DAC");
    }

    #[test]
    fn span_and_span_all() {
        let command = ok("BOARD0:DAC1:SPAN:ALL 4");
        assert_eq!(command.kind, CommandKind::SetSpanAll);
        assert_eq!(command.int_value, Some(4));
        let command = ok("BOARD0:DAC1:SPAN 7");
        assert_eq!(command.kind, CommandKind::SetSpan);
        assert_eq!(err("BOARD0:DAC1:SPAN"), "Invalid span value");
    }

    #[test]
    fn update_and_power_down() {
        assert_eq!(ok("BOARD3:DAC1:UPDATE").kind, CommandKind::Update);
        assert_eq!(ok("BOARD3:DAC1:PDOWN").kind, CommandKind::PowerDownChip);
        assert_eq!(ok("BOARD3:DAC1:CH2:PDOWN").kind, CommandKind::PowerDown);
    }

    #[test]
    fn resolution() {
        assert_eq!(ok("BOARD0:DAC0:RES?").kind, CommandKind::GetResolution);
        let command = ok("BOARD0:DAC0:RES 12");
        assert_eq!(command.kind, CommandKind::SetResolution);
        assert_eq!(command.int_value, Some(12));
        assert_eq!(err("BOARD0:DAC0:RES 14"), "Resolution must be 12 or 16");
        assert_eq!(err("BOARD0:DAC0:RES x"), "Invalid resolution value (12 or 16)");
    }

    #[test]
    fn serial_number() {
        let command = ok("BOARD0:SN GM-0042 rev B");
        assert_eq!(command.kind, CommandKind::SetSerial);
        assert_eq!(command.text.as_deref(), Some("GM-0042 rev B"));
        assert_eq!(ok("BOARD0:SN?").kind, CommandKind::GetSerial);
        assert_eq!(err("BOARD0:SN "), "Serial number required");
    }

    #[test]
    fn calibration_verbs() {
        let command = ok("BOARD1:DAC2:CH3:CAL:GAIN 1.001");
        assert_eq!(command.kind, CommandKind::SetCalGain);
        assert_eq!(command.float_value, Some(1.001));
        assert_eq!(ok("BOARD1:DAC2:CH3:CAL:GAIN?").kind, CommandKind::GetCalGain);
        assert_eq!(ok("BOARD1:DAC2:CH3:CAL:OFFS -0.02").kind, CommandKind::SetCalOffset);
        assert_eq!(ok("BOARD1:DAC2:CH3:CAL:EN 1").kind, CommandKind::SetCalEnable);
        assert_eq!(ok("BOARD1:DAC2:CH3:CAL:EN?").kind, CommandKind::GetCalEnable);
        assert_eq!(err("BOARD1:DAC2:CH3:CAL:FOO 1"),
                   "Unknown calibration command (use GAIN, OFFS, or EN)");
    }

    #[test]
    fn diagnostics_are_distinct() {
        assert_eq!(err("BOARD0:DAC0:CH0:FROB 1"), "Unknown channel command");
        assert_eq!(err("BOARD0:DAC0:FROB"), "Unknown DAC command");
        assert_eq!(err("BOARD0:FROB"), "Expected DAC<n>");
        assert_eq!(err("FROBNICATE"), "Unknown command");
        assert_eq!(err(""), "Empty command");
        assert_eq!(err("   "), "Empty command");
    }

    #[test]
    fn addressed_indices_always_in_range() {
        // Any accepted addressed command carries validated indices.
        let lines = [
            "BOARD7:DAC2:CH4:VOLT 1.0",
            "BOARD0:DAC0:CH0:CODE 0",
            "BOARD7:DAC1:SPAN 3",
            "BOARD7:SN unit-7",
        ];
        for line in lines {
            #[cfg(feature = "single-board")]
            let line = &line.replace("BOARD7", "BOARD0");
            let command = ok(line);
            if let Some(board) = command.board {
                assert!((board as usize) < NUM_BOARDS);
            }
            if let Some(dac) = command.dac {
                assert!(dac < 3);
            }
            if let Some(channel) = command.channel {
                assert!(channel < 5);
            }
        }
    }
}
