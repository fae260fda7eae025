//! Per-channel calibration state and its persistent storage format.
//!
//! The on-flash record is a fixed-layout binary image: a small header
//! with a CRC, then one serial number string per board, then one entry
//! per channel in board/slot/channel order. The record is padded to a
//! whole number of flash pages and must fit in one erase sector.

use bytemuck::{Pod, Zeroable};

use crate::config::{
    DACS_PER_BOARD, MAX_CHANNELS_PER_DAC, NUM_BOARDS, SERIAL_NUMBER_MAX_LEN,
};
use crate::Result;

pub const PAGE_SIZE: usize = 256;
pub const SECTOR_SIZE: usize = 4096;

const RECORD_MAGIC: u32 = 0x4752_4d43; // "GRMC"
const RECORD_VERSION: u16 = 1;

const NUM_ENTRIES: usize = NUM_BOARDS * DACS_PER_BOARD * MAX_CHANNELS_PER_DAC;

/// Linear correction applied to requested values before conversion to
/// a device code. Disabled channels pass values through untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCalibration {
    pub gain: f32,
    pub offset: f32,
    pub enabled: bool,
}

impl Default for ChannelCalibration {
    fn default() -> ChannelCalibration {
        ChannelCalibration { gain: 1.0, offset: 0.0, enabled: false }
    }
}

impl ChannelCalibration {
    /// Corrected value for a requested one, identity when disabled.
    pub fn apply(&self, value: f32) -> f32 {
        if self.enabled {
            value * self.gain + self.offset
        } else {
            value
        }
    }
}

pub type CalTable = [[[ChannelCalibration; MAX_CHANNELS_PER_DAC]; DACS_PER_BOARD]; NUM_BOARDS];

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RecordHeader {
    magic: u32,
    version: u16,
    checksum: u16,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct CalEntry {
    gain: f32,
    offset: f32,
    enabled: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<RecordHeader>();
const PAYLOAD_SIZE: usize =
    NUM_BOARDS * SERIAL_NUMBER_MAX_LEN + NUM_ENTRIES * std::mem::size_of::<CalEntry>();
const RECORD_SIZE: usize =
    (HEADER_SIZE + PAYLOAD_SIZE).div_ceil(PAGE_SIZE) * PAGE_SIZE;

const _: () = assert!(RECORD_SIZE <= SECTOR_SIZE);

/// CRC-16/CCITT-FALSE: polynomial 0x1021, initial value 0xFFFF,
/// no reflection, no final XOR.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0xffffu16;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Backing storage for the calibration record. Modeled on NOR flash:
/// erase sets every byte to 0xFF, programming only clears bits and is
/// done in whole aligned pages.
pub trait Store {
    fn erase(&mut self) -> Result<()>;
    fn program(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;
    fn contents(&self) -> &[u8];
}

/// In-memory [`Store`] with NOR-like semantics, for hosts without a
/// flash part and for tests.
#[derive(Debug)]
pub struct RamStore {
    data: Vec<u8>,
}

impl RamStore {
    pub fn new() -> RamStore {
        RamStore { data: vec![0xff; SECTOR_SIZE] }
    }
}

impl Default for RamStore {
    fn default() -> RamStore {
        RamStore::new()
    }
}

impl Store for RamStore {
    fn erase(&mut self) -> Result<()> {
        self.data.fill(0xff);
        Ok(())
    }

    fn program(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        if offset % PAGE_SIZE != 0 || bytes.len() % PAGE_SIZE != 0 {
            return Err(crate::Error::Other("unaligned program".into()));
        }
        let Some(target) = self.data.get_mut(offset..offset + bytes.len()) else {
            return Err(crate::Error::Other("program beyond store".into()));
        };
        if target.iter().any(|&byte| byte != 0xff) {
            return Err(crate::Error::Other("program over unerased page".into()));
        }
        target.copy_from_slice(bytes);
        Ok(())
    }

    fn contents(&self) -> &[u8] {
        &self.data
    }
}

/// Serialize the table and serials into one record image.
fn encode(serials: &[String; NUM_BOARDS], table: &CalTable) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PAYLOAD_SIZE);
    for serial in serials {
        let mut field = [0u8; SERIAL_NUMBER_MAX_LEN];
        let bytes = serial.as_bytes();
        let len = bytes.len().min(SERIAL_NUMBER_MAX_LEN - 1);
        field[..len].copy_from_slice(&bytes[..len]);
        payload.extend_from_slice(&field);
    }
    for board in table.iter() {
        for slot in board.iter() {
            for channel in slot.iter() {
                let entry = CalEntry {
                    gain: channel.gain,
                    offset: channel.offset,
                    enabled: channel.enabled as u32,
                };
                payload.extend_from_slice(bytemuck::bytes_of(&entry));
            }
        }
    }
    debug_assert_eq!(payload.len(), PAYLOAD_SIZE);

    let header = RecordHeader {
        magic: RECORD_MAGIC,
        version: RECORD_VERSION,
        checksum: crc16(&payload),
    };
    let mut record = Vec::with_capacity(RECORD_SIZE);
    record.extend_from_slice(bytemuck::bytes_of(&header));
    record.extend_from_slice(&payload);
    record.resize(RECORD_SIZE, 0xff);
    record
}

/// Validate and deserialize a record image. Returns `None` for any
/// image that is not a well-formed current-version record.
fn decode(image: &[u8]) -> Option<([String; NUM_BOARDS], CalTable)> {
    if image.len() < HEADER_SIZE + PAYLOAD_SIZE {
        return None;
    }
    let header: RecordHeader =
        bytemuck::pod_read_unaligned(&image[..HEADER_SIZE]);
    if header.magic != RECORD_MAGIC || header.version != RECORD_VERSION {
        return None;
    }
    let payload = &image[HEADER_SIZE..HEADER_SIZE + PAYLOAD_SIZE];
    if crc16(payload) != header.checksum {
        return None;
    }

    let mut serials: [String; NUM_BOARDS] = Default::default();
    for (index, serial) in serials.iter_mut().enumerate() {
        let field = &payload[index * SERIAL_NUMBER_MAX_LEN..][..SERIAL_NUMBER_MAX_LEN];
        let len = field.iter().position(|&byte| byte == 0).unwrap_or(field.len());
        *serial = String::from_utf8_lossy(&field[..len]).into_owned();
    }

    let mut table: CalTable =
        [[[ChannelCalibration::default(); MAX_CHANNELS_PER_DAC]; DACS_PER_BOARD]; NUM_BOARDS];
    let mut cursor = NUM_BOARDS * SERIAL_NUMBER_MAX_LEN;
    for board in table.iter_mut() {
        for slot in board.iter_mut() {
            for channel in slot.iter_mut() {
                let entry: CalEntry = bytemuck::pod_read_unaligned(
                    &payload[cursor..cursor + std::mem::size_of::<CalEntry>()]);
                cursor += std::mem::size_of::<CalEntry>();
                *channel = ChannelCalibration {
                    gain: entry.gain,
                    offset: entry.offset,
                    enabled: entry.enabled != 0,
                };
            }
        }
    }
    Some((serials, table))
}

/// Write the record to the store and read it back for verification.
pub fn save<S: Store>(
    store: &mut S,
    serials: &[String; NUM_BOARDS],
    table: &CalTable,
) -> Result<()> {
    let record = encode(serials, table);
    store.erase()?;
    store.program(0, &record)?;
    if decode(store.contents()).is_none() {
        return Err(crate::Error::Other("calibration readback mismatch".into()));
    }
    log::debug!("saved calibration record ({} bytes)", record.len());
    Ok(())
}

/// Load a record if the store holds a valid one. On failure the
/// caller's state is left untouched and `false` is returned.
pub fn load<S: Store>(
    store: &S,
    serials: &mut [String; NUM_BOARDS],
    table: &mut CalTable,
) -> bool {
    match decode(store.contents()) {
        Some((loaded_serials, loaded_table)) => {
            *serials = loaded_serials;
            *table = loaded_table;
            log::debug!("loaded calibration record");
            true
        }
        None => {
            log::debug!("no valid calibration record found");
            false
        }
    }
}

/// Erase the stored record without touching in-memory state.
pub fn erase<S: Store>(store: &mut S) -> Result<()> {
    store.erase()
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_state() -> ([String; NUM_BOARDS], CalTable) {
        let mut serials: [String; NUM_BOARDS] = Default::default();
        serials[0] = "GM-0001".to_owned();
        let mut table: CalTable = [[[ChannelCalibration::default();
            MAX_CHANNELS_PER_DAC]; DACS_PER_BOARD]; NUM_BOARDS];
        table[0][1][2] = ChannelCalibration { gain: 1.002, offset: -0.015, enabled: true };
        table[0][2][4] = ChannelCalibration { gain: 0.998, offset: 0.5, enabled: true };
        (serials, table)
    }

    #[test]
    fn crc16_check_vector() {
        // Standard CRC-16/CCITT-FALSE check value.
        assert_eq!(crc16(b"123456789"), 0x29b1);
        assert_eq!(crc16(b""), 0xffff);
    }

    #[test]
    fn save_then_load_round_trip() {
        let (serials, table) = sample_state();
        let mut store = RamStore::new();
        save(&mut store, &serials, &table).unwrap();

        let mut loaded_serials: [String; NUM_BOARDS] = Default::default();
        let mut loaded_table: CalTable = [[[ChannelCalibration::default();
            MAX_CHANNELS_PER_DAC]; DACS_PER_BOARD]; NUM_BOARDS];
        assert!(load(&store, &mut loaded_serials, &mut loaded_table));
        assert_eq!(loaded_serials[0], "GM-0001");
        assert_eq!(loaded_table[0][1][2].gain, 1.002);
        assert_eq!(loaded_table[0][1][2].offset, -0.015);
        assert!(loaded_table[0][1][2].enabled);
        assert_eq!(loaded_table[0][0][0], ChannelCalibration::default());
    }

    #[test]
    fn erased_store_fails_to_load() {
        let store = RamStore::new();
        let mut serials: [String; NUM_BOARDS] = Default::default();
        serials[0] = "keep me".to_owned();
        let mut table: CalTable = [[[ChannelCalibration::default();
            MAX_CHANNELS_PER_DAC]; DACS_PER_BOARD]; NUM_BOARDS];
        table[0][0][0].gain = 3.0;
        assert!(!load(&store, &mut serials, &mut table));
        // State untouched on failure.
        assert_eq!(serials[0], "keep me");
        assert_eq!(table[0][0][0].gain, 3.0);
    }

    #[test]
    fn corrupted_record_is_rejected() {
        let (serials, table) = sample_state();
        let mut store = RamStore::new();
        save(&mut store, &serials, &table).unwrap();
        // Flip a payload bit behind the checksum's back.
        store.data[HEADER_SIZE + 1] ^= 0x04;

        let mut loaded_serials: [String; NUM_BOARDS] = Default::default();
        let mut loaded_table: CalTable = [[[ChannelCalibration::default();
            MAX_CHANNELS_PER_DAC]; DACS_PER_BOARD]; NUM_BOARDS];
        assert!(!load(&store, &mut loaded_serials, &mut loaded_table));
    }

    #[test]
    fn record_fits_in_whole_pages() {
        let (serials, table) = sample_state();
        let record = encode(&serials, &table);
        assert_eq!(record.len() % PAGE_SIZE, 0);
        assert!(record.len() <= SECTOR_SIZE);
    }

    #[test]
    fn serial_longer_than_field_is_truncated() {
        let mut serials: [String; NUM_BOARDS] = Default::default();
        serials[0] = "x".repeat(SERIAL_NUMBER_MAX_LEN + 10);
        let table: CalTable = [[[ChannelCalibration::default();
            MAX_CHANNELS_PER_DAC]; DACS_PER_BOARD]; NUM_BOARDS];
        let mut store = RamStore::new();
        save(&mut store, &serials, &table).unwrap();

        let mut loaded_serials: [String; NUM_BOARDS] = Default::default();
        let mut loaded_table = table;
        assert!(load(&store, &mut loaded_serials, &mut loaded_table));
        assert_eq!(loaded_serials[0].len(), SERIAL_NUMBER_MAX_LEN - 1);
    }

    #[test]
    fn program_requires_erase() {
        let mut store = RamStore::new();
        let page = vec![0u8; PAGE_SIZE];
        store.program(0, &page).unwrap();
        assert!(store.program(0, &page).is_err());
        store.erase().unwrap();
        store.program(0, &page).unwrap();
    }

    #[test]
    fn disabled_calibration_is_identity() {
        let calibration = ChannelCalibration { gain: 2.0, offset: 0.1, enabled: false };
        assert_eq!(calibration.apply(1.5), 1.5);
        let calibration = ChannelCalibration { enabled: true, ..calibration };
        assert_eq!(calibration.apply(1.5), 3.1);
    }
}
