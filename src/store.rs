//! Calibration records on the EPROM.
//!
//! Two records share one layout, the FACTORY reference and the USER working
//! copy. Each starts with a magic number and a checksum over its data words;
//! a record is only trusted when both match.
//!
//! | word offset | content |
//! |---|---|
//! | 0..2 | magic, little-endian word order |
//! | 2..4 | checksum: wrapping sum of the data words |
//! | 4.. | per scale: `mult` then `add`, each an `f32` in two words |
//!
//! The device serial number lives in its own block with the same header.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::calibration::{CoefficientPair, CoefficientTable};
use crate::eprom::{Eprom, BLOCK_WORDS};
use crate::error::DmmError;
use crate::scale::{Scale, SCALE_COUNT};

pub const CALIB_MAGIC: u32 = 0x444D_4D43;
pub const SERIAL_MAGIC: u32 = 0x444D_4D53;

const HEADER_WORDS: usize = 4;
const ENTRY_WORDS: usize = 4;
pub const RECORD_WORDS: usize = HEADER_WORDS + SCALE_COUNT * ENTRY_WORDS;

pub const FACTORY_BASE: usize = 0x100;
pub const USER_BASE: usize = 0x200;
pub const SERIAL_BASE: usize = 0x300;
/// Characters in a serial number.
pub const SERIAL_LEN: usize = 16;
const SERIAL_WORDS: usize = HEADER_WORDS + SERIAL_LEN / 2;

/// One of the two calibration records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Factory,
    User,
}

impl Region {
    pub fn base(self) -> usize {
        match self {
            Region::Factory => FACTORY_BASE,
            Region::User => USER_BASE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Region::Factory => "FACTORY",
            Region::User => "USER",
        }
    }
}

fn checksum(data: &[u16]) -> u32 {
    data.iter().fold(0u32, |acc, w| acc.wrapping_add(u32::from(*w)))
}

fn split_u32(value: u32) -> [u16; 2] {
    [(value & 0xFFFF) as u16, (value >> 16) as u16]
}

fn join_u32(words: &[u16]) -> u32 {
    u32::from(words[0]) | (u32::from(words[1]) << 16)
}

fn with_header(magic: u32, data: &[u16]) -> Vec<u16> {
    let mut words = Vec::with_capacity(HEADER_WORDS + data.len());
    words.extend_from_slice(&split_u32(magic));
    words.extend_from_slice(&split_u32(checksum(data)));
    words.extend_from_slice(data);
    words
}

// Magic first, then checksum. Returns the data words.
fn validate(magic: u32, words: &[u16]) -> Result<&[u16], DmmError> {
    if join_u32(&words[0..2]) != magic {
        return Err(DmmError::MagicNumber);
    }
    let data = &words[HEADER_WORDS..];
    if join_u32(&words[2..4]) != checksum(data) {
        return Err(DmmError::Checksum);
    }
    Ok(data)
}

fn encode_table(table: &CoefficientTable) -> Vec<u16> {
    let data: Vec<u16> = table
        .pairs()
        .iter()
        .flat_map(|p| {
            let [m0, m1] = split_u32(p.mult.to_bits());
            let [a0, a1] = split_u32(p.add.to_bits());
            [m0, m1, a0, a1]
        })
        .collect();
    with_header(CALIB_MAGIC, &data)
}

fn decode_table(data: &[u16]) -> Result<CoefficientTable, DmmError> {
    let mut table = CoefficientTable::default();
    for (index, entry) in data.chunks_exact(ENTRY_WORDS).enumerate() {
        let pair = CoefficientPair::new(
            f32::from_bits(join_u32(&entry[0..2])),
            f32::from_bits(join_u32(&entry[2..4])),
        );
        table.set(Scale::from_index(index)?, pair);
    }
    Ok(table)
}

/// Load/save/verify access to the calibration records.
pub struct CalibrationStore<E: Eprom> {
    eprom: E,
    write_timeout: Duration,
}

impl<E: Eprom> CalibrationStore<E> {
    pub fn new(eprom: E, write_timeout: Duration) -> Self {
        Self {
            eprom,
            write_timeout,
        }
    }

    pub fn eprom(&self) -> &E {
        &self.eprom
    }

    pub fn eprom_mut(&mut self) -> &mut E {
        &mut self.eprom
    }

    fn read_record(&mut self, region: Region) -> Result<Vec<u16>, DmmError> {
        let mut words = vec![0u16; RECORD_WORDS];
        self.eprom.read_words(region.base(), &mut words)?;
        Ok(words)
    }

    /// Reads and validates a record.
    ///
    /// The returned table is only produced once magic and checksum have
    /// matched, so callers assigning it never see partially read data.
    pub fn load(&mut self, region: Region) -> Result<CoefficientTable, DmmError> {
        let words = self.read_record(region)?;
        let data = validate(CALIB_MAGIC, &words).map_err(|e| {
            warn!(region = region.name(), error = %e, "calibration record rejected");
            e
        })?;
        decode_table(data)
    }

    /// Writes the entries of `table` that differ from what is stored and
    /// returns how many entries that was.
    ///
    /// Each block write waits for write-ready; a timeout aborts the save.
    pub fn save(&mut self, region: Region, table: &CoefficientTable) -> Result<usize, DmmError> {
        let stored = self.read_record(region)?;
        let wanted = encode_table(table);
        let base = region.base();

        let mut changed = 0;
        for index in 0..SCALE_COUNT {
            let start = HEADER_WORDS + index * ENTRY_WORDS;
            let range = start..start + ENTRY_WORDS;
            if stored[range.clone()] != wanted[range.clone()] {
                self.write_block(base + start, &wanted[range])?;
                changed += 1;
            }
        }
        if stored[..HEADER_WORDS] != wanted[..HEADER_WORDS] {
            self.write_block(base, &wanted[..HEADER_WORDS])?;
        }
        info!(region = region.name(), changed, "calibration record saved");
        Ok(changed)
    }

    /// Re-reads a record and compares it with `table` without touching it.
    pub fn verify(&mut self, region: Region, table: &CoefficientTable) -> Result<(), DmmError> {
        let words = self.read_record(region)?;
        validate(CALIB_MAGIC, &words)?;
        if words != encode_table(table) {
            return Err(DmmError::VerifyMismatch);
        }
        Ok(())
    }

    /// Replaces `user` with the FACTORY record and persists it as USER.
    /// Returns the number of USER entries rewritten.
    pub fn restore_factory_into_user(
        &mut self,
        user: &mut CoefficientTable,
    ) -> Result<usize, DmmError> {
        let factory = self.load(Region::Factory)?;
        *user = factory;
        let changed = self.save(Region::User, user)?;
        info!(changed, "USER calibration restored from FACTORY");
        Ok(changed)
    }

    /// Writes the FACTORY record. Provisioning only, never part of the
    /// command flow.
    pub fn provision_factory(&mut self, table: &CoefficientTable) -> Result<usize, DmmError> {
        self.save(Region::Factory, table)
    }

    pub fn read_serial_number(&mut self) -> Result<String, DmmError> {
        let mut words = vec![0u16; SERIAL_WORDS];
        self.eprom.read_words(SERIAL_BASE, &mut words)?;
        let data = validate(SERIAL_MAGIC, &words)?;
        let bytes: Vec<u8> = data
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .take_while(|b| *b != 0)
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write_serial_number(&mut self, serial: &str) -> Result<(), DmmError> {
        if serial.len() > SERIAL_LEN || !serial.is_ascii() {
            return Err(DmmError::Generic(format!(
                "Serial number must be at most {} ASCII characters",
                SERIAL_LEN
            )));
        }
        let mut bytes = [0u8; SERIAL_LEN];
        bytes[..serial.len()].copy_from_slice(serial.as_bytes());
        let data: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        let words = with_header(SERIAL_MAGIC, &data);
        for (offset, block) in words.chunks(BLOCK_WORDS).enumerate() {
            self.write_block(SERIAL_BASE + offset * BLOCK_WORDS, block)?;
        }
        Ok(())
    }

    fn write_block(&mut self, address: usize, words: &[u16]) -> Result<(), DmmError> {
        debug!(address, len = words.len(), "EPROM block write");
        self.eprom.write_words(address, words)?;
        self.wait_write_ready()
    }

    fn wait_write_ready(&mut self) -> Result<(), DmmError> {
        let start = Instant::now();
        loop {
            if self.eprom.is_write_ready() {
                return Ok(());
            }
            if start.elapsed() > self.write_timeout {
                warn!(timeout = ?self.write_timeout, "EPROM write ready timeout");
                return Err(DmmError::WriteTimeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}
