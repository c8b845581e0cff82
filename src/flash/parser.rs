//! Flash file parser (component F)
//!
//! Parses Intel HEX, Motorola S1/S2/S3 and raw binary images into address-tagged
//! [`FlashBlock`]s, coalescing contiguous records and rejecting files whose blocks overlap.

use crate::hex::{hex_to_bytes, HexError};

/// One contiguous run of bytes at a fixed base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashBlock {
    /// The block's starting address.
    pub address: u32,
    /// The block's bytes.
    pub bytes: Vec<u8>,
    /// A simple additive checksum of `bytes`, useful for a quick comparison during verify.
    pub checksum: u32,
}

impl FlashBlock {
    fn new(address: u32, bytes: Vec<u8>) -> Self {
        let checksum = bytes.iter().fold(0u32, |acc, b| acc.wrapping_add(*b as u32));
        Self { address, bytes, checksum }
    }

    /// The address one past the last byte of this block.
    pub fn end_address(&self) -> u32 {
        self.address.wrapping_add(self.bytes.len() as u32)
    }
}

/// An ordered set of non-overlapping [`FlashBlock`]s parsed from a flash image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlashFile {
    /// The parsed blocks, in ascending address order.
    pub blocks: Vec<FlashBlock>,
}

impl FlashFile {
    /// Total byte count across every block.
    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.bytes.len()).sum()
    }

    /// Validates that no two distinct blocks' address ranges overlap. Blocks need not be
    /// sorted to call this.
    pub fn validate(&self) -> bool {
        for (i, a) in self.blocks.iter().enumerate() {
            for b in &self.blocks[i + 1..] {
                let a_range = a.address..a.end_address();
                let b_range = b.address..b.end_address();
                if a_range.start < b_range.end && b_range.start < a_range.end {
                    return false;
                }
            }
        }
        true
    }

    fn sorted_by_address(mut self) -> Self {
        self.blocks.sort_by_key(|b| b.address);
        self
    }
}

/// Error parsing a flash image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A record's checksum did not validate. `line` is 1-indexed within the input.
    #[error("checksum mismatch on line {line}")]
    ChecksumMismatch {
        /// The 1-indexed line number.
        line: usize,
    },
    /// A record was structurally malformed (wrong length, bad hex digit, missing marker).
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord {
        /// The 1-indexed line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },
    /// The parsed blocks overlap; see [`FlashFile::validate`].
    #[error("flash file contains overlapping blocks")]
    OverlappingBlocks,
    /// The input was empty.
    #[error("flash image contained no data records")]
    Empty,
}

impl From<HexError> for ParseError {
    fn from(_: HexError) -> Self {
        ParseError::MalformedRecord {
            line: 0,
            reason: "invalid hex digit".into(),
        }
    }
}

/// A builder that coalesces consecutive-address byte runs into blocks, starting a new block
/// whenever a gap (or the first write) is seen. Shared by the Intel HEX and S-Record parsers.
#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<FlashBlock>,
    current_address: Option<u32>,
    current_bytes: Vec<u8>,
}

impl BlockBuilder {
    fn push(&mut self, address: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        match self.current_address {
            Some(start) if start.wrapping_add(self.current_bytes.len() as u32) == address => {
                self.current_bytes.extend_from_slice(data);
            }
            _ => {
                self.flush();
                self.current_address = Some(address);
                self.current_bytes = data.to_vec();
            }
        }
    }

    fn flush(&mut self) {
        if let Some(address) = self.current_address.take() {
            let bytes = std::mem::take(&mut self.current_bytes);
            self.blocks.push(FlashBlock::new(address, bytes));
        }
    }

    fn finish(mut self) -> Vec<FlashBlock> {
        self.flush();
        self.blocks
    }
}

/// Parses a raw binary image as a single block at address 0.
pub fn parse_binary(data: &[u8]) -> Result<FlashFile, ParseError> {
    if data.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(FlashFile {
        blocks: vec![FlashBlock::new(0, data.to_vec())],
    })
}

/// Parses an Intel HEX image (record types `00` data, `01` end-of-file, `04` extended linear
/// address; all other types are silently ignored).
pub fn parse_intel_hex(text: &str) -> Result<FlashFile, ParseError> {
    let mut builder = BlockBuilder::default();
    let mut high_base: u32 = 0;
    let mut saw_any_record = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(rest) = line.strip_prefix(':') else {
            return Err(ParseError::MalformedRecord {
                line: line_no,
                reason: "record does not start with ':'".into(),
            });
        };
        let bytes = hex_to_bytes(rest).map_err(|_| ParseError::MalformedRecord {
            line: line_no,
            reason: "invalid hex digit".into(),
        })?;
        if bytes.len() < 5 {
            return Err(ParseError::MalformedRecord {
                line: line_no,
                reason: "record too short".into(),
            });
        }

        let byte_count = bytes[0] as usize;
        let address = u16::from_be_bytes([bytes[1], bytes[2]]);
        let record_type = bytes[3];
        let expected_len = 4 + byte_count + 1;
        if bytes.len() != expected_len {
            return Err(ParseError::MalformedRecord {
                line: line_no,
                reason: format!("byte count {byte_count} does not match record length"),
            });
        }
        let data = &bytes[4..4 + byte_count];
        let stored_checksum = bytes[4 + byte_count];

        let sum: u32 = bytes[..bytes.len() - 1].iter().map(|b| *b as u32).sum();
        if ((sum + stored_checksum as u32) & 0xFF) != 0 {
            return Err(ParseError::ChecksumMismatch { line: line_no });
        }

        saw_any_record = true;
        match record_type {
            0x00 => builder.push(high_base | address as u32, data),
            0x01 => break,
            0x04 => {
                if data.len() != 2 {
                    return Err(ParseError::MalformedRecord {
                        line: line_no,
                        reason: "extended linear address record must carry 2 data bytes".into(),
                    });
                }
                high_base = (u16::from_be_bytes([data[0], data[1]]) as u32) << 16;
            }
            _ => {} // types 02, 03, 05: ignored
        }
    }

    if !saw_any_record {
        return Err(ParseError::Empty);
    }
    let file = FlashFile { blocks: builder.finish() }.sorted_by_address();
    if !file.validate() {
        return Err(ParseError::OverlappingBlocks);
    }
    Ok(file)
}

fn srec_address_width(kind: char) -> Option<usize> {
    match kind {
        '1' => Some(2),
        '2' => Some(3),
        '3' => Some(4),
        _ => None,
    }
}

/// Parses a Motorola S-Record image. Only `S1`/`S2`/`S3` carry data; `S0`/`S5`/`S7`/`S8`/`S9`
/// are metadata/terminators and contribute nothing to the block set.
pub fn parse_srecord(text: &str) -> Result<FlashFile, ParseError> {
    let mut builder = BlockBuilder::default();
    let mut saw_any_record = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let mut chars = line.chars();
        let marker = chars.next();
        let kind = chars.next();
        let (Some('S'), Some(kind)) = (marker, kind) else {
            return Err(ParseError::MalformedRecord {
                line: line_no,
                reason: "record does not start with 'S<type>'".into(),
            });
        };
        let rest = &line[2..];
        let bytes = hex_to_bytes(rest).map_err(|_| ParseError::MalformedRecord {
            line: line_no,
            reason: "invalid hex digit".into(),
        })?;
        if bytes.is_empty() {
            return Err(ParseError::MalformedRecord {
                line: line_no,
                reason: "record too short".into(),
            });
        }

        let byte_count = bytes[0] as usize;
        if bytes.len() != 1 + byte_count {
            return Err(ParseError::MalformedRecord {
                line: line_no,
                reason: format!("byte count {byte_count} does not match record length"),
            });
        }
        let payload = &bytes[1..];
        let stored_checksum = *payload.last().ok_or_else(|| ParseError::MalformedRecord {
            line: line_no,
            reason: "record missing checksum byte".into(),
        })?;
        let sum: u32 = std::iter::once(byte_count as u32)
            .chain(payload[..payload.len() - 1].iter().map(|b| *b as u32))
            .sum();
        let computed = !(sum & 0xFF) & 0xFF;
        if computed != stored_checksum as u32 {
            return Err(ParseError::ChecksumMismatch { line: line_no });
        }

        saw_any_record = true;
        if let Some(width) = srec_address_width(kind) {
            let addr_bytes = payload.get(..width).ok_or_else(|| ParseError::MalformedRecord {
                line: line_no,
                reason: "record shorter than its address width".into(),
            })?;
            let mut address: u32 = 0;
            for b in addr_bytes {
                address = (address << 8) | *b as u32;
            }
            let data = &payload[width..payload.len() - 1];
            builder.push(address, data);
        }
        // S0, S5, S7, S8, S9: metadata/terminators, no data to coalesce.
    }

    if !saw_any_record {
        return Err(ParseError::Empty);
    }
    let file = FlashFile { blocks: builder.finish() }.sorted_by_address();
    if !file.validate() {
        return Err(ParseError::OverlappingBlocks);
    }
    Ok(file)
}
