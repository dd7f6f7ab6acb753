//! Firmware image handling.

use std::fs;
use std::path::Path;

use crate::error::Error;

/// Offset of the embedded, human-readable firmware version string.
const VERSION_OFFSET: usize = 0xC0;

/// Size of the version string field, padding NULs included.
const VERSION_LEN: usize = 51;

/// A raw firmware image, programmed verbatim from target address 0.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Firmware {
    data: Vec<u8>,
}

impl Firmware {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Firmware, Error> {
        let data = fs::read(path)?;

        Ok(Firmware { data })
    }

    pub fn from_bytes(data: Vec<u8>) -> Firmware {
        Firmware { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The version string baked into the image, with padding stripped.
    pub fn version(&self) -> Result<String, Error> {
        let end = VERSION_OFFSET + VERSION_LEN;
        let field = self.data.get(VERSION_OFFSET..end).ok_or(Error::ShortImage {
            len: self.data.len(),
            needed: end,
        })?;

        let printable = field
            .iter()
            .position(|&byte| byte == 0)
            .map_or(field, |nul| &field[..nul]);

        Ok(String::from_utf8_lossy(printable).trim_end().to_string())
    }
}
