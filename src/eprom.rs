//! Word-addressed non-volatile storage.
//!
//! The storage is organised in 16-bit words. Writes are issued one block at a
//! time and complete asynchronously; the caller polls
//! [`Eprom::is_write_ready`] before issuing the next block.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::DmmError;

/// Total capacity of the part, in words.
pub const EPROM_WORDS: usize = 1024;
/// Largest number of words accepted by one [`Eprom::write_words`] call.
pub const BLOCK_WORDS: usize = 16;
/// Content of a cell that was never written.
pub const BLANK_WORD: u16 = 0xFFFF;

pub trait Eprom {
    fn capacity(&self) -> usize;
    fn read_words(&mut self, address: usize, buf: &mut [u16]) -> Result<(), DmmError>;
    /// Starts writing `words` (at most [`BLOCK_WORDS`]) at `address`.
    fn write_words(&mut self, address: usize, words: &[u16]) -> Result<(), DmmError>;
    /// `true` once the last write has completed.
    fn is_write_ready(&mut self) -> bool;
}

fn check_range(capacity: usize, address: usize, len: usize) -> Result<(), DmmError> {
    if address.checked_add(len).map_or(true, |end| end > capacity) {
        return Err(DmmError::Generic(format!(
            "EPROM access out of range: {} words at {:#05X}",
            len, address
        )));
    }
    Ok(())
}

/// EPROM image held in memory.
#[derive(Debug, Clone)]
pub struct MemoryEprom {
    cells: Vec<u16>,
    stalled: bool,
    block_writes: usize,
}

impl Default for MemoryEprom {
    fn default() -> Self {
        Self::new(EPROM_WORDS)
    }
}

impl MemoryEprom {
    pub fn new(words: usize) -> Self {
        Self {
            cells: vec![BLANK_WORD; words],
            stalled: false,
            block_writes: 0,
        }
    }

    pub fn from_words(cells: Vec<u16>) -> Self {
        Self {
            cells,
            stalled: false,
            block_writes: 0,
        }
    }

    pub fn words(&self) -> &[u16] {
        &self.cells
    }

    /// Direct cell access, bypassing the write protocol.
    pub fn poke(&mut self, address: usize, word: u16) {
        self.cells[address] = word;
    }

    /// A stalled part accepts no data and never reports write-ready.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Number of block writes issued so far.
    pub fn block_writes(&self) -> usize {
        self.block_writes
    }
}

impl Eprom for MemoryEprom {
    fn capacity(&self) -> usize {
        self.cells.len()
    }

    fn read_words(&mut self, address: usize, buf: &mut [u16]) -> Result<(), DmmError> {
        check_range(self.cells.len(), address, buf.len())?;
        buf.copy_from_slice(&self.cells[address..address + buf.len()]);
        Ok(())
    }

    fn write_words(&mut self, address: usize, words: &[u16]) -> Result<(), DmmError> {
        if words.len() > BLOCK_WORDS {
            return Err(DmmError::Generic(format!(
                "EPROM block too large: {} words",
                words.len()
            )));
        }
        check_range(self.cells.len(), address, words.len())?;
        self.block_writes += 1;
        if !self.stalled {
            self.cells[address..address + words.len()].copy_from_slice(words);
        }
        Ok(())
    }

    fn is_write_ready(&mut self) -> bool {
        !self.stalled
    }
}

/// EPROM image mirrored to a file after every block write.
#[derive(Debug)]
pub struct FileEprom {
    path: PathBuf,
    image: MemoryEprom,
}

impl FileEprom {
    /// Opens `path`, starting from a blank image when the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DmmError> {
        let path = path.as_ref().to_path_buf();
        let image = match fs::read(&path) {
            Ok(bytes) => {
                let mut cells: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();
                cells.resize(EPROM_WORDS, BLANK_WORD);
                MemoryEprom::from_words(cells)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no EPROM image, starting blank");
                MemoryEprom::default()
            }
            Err(e) => {
                return Err(DmmError::Generic(format!(
                    "cannot read EPROM image '{}': {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(Self { path, image })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), DmmError> {
        let bytes: Vec<u8> = self
            .image
            .words()
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        fs::write(&self.path, bytes).map_err(|e| {
            DmmError::Generic(format!(
                "cannot write EPROM image '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl Eprom for FileEprom {
    fn capacity(&self) -> usize {
        self.image.capacity()
    }

    fn read_words(&mut self, address: usize, buf: &mut [u16]) -> Result<(), DmmError> {
        self.image.read_words(address, buf)
    }

    fn write_words(&mut self, address: usize, words: &[u16]) -> Result<(), DmmError> {
        self.image.write_words(address, words)?;
        self.flush()
    }

    fn is_write_ready(&mut self) -> bool {
        self.image.is_write_ready()
    }
}
