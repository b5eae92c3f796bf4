//! Color palettes for PALETTE coverages.

use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};
use crate::types::SampleType;

const PALETTE_START: u8 = 0x00;
const PALETTE_MARKER: u8 = 0x04;
const PALETTE_END: u8 = 0x24;

/// One palette color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// An ordered list of colors indexed by a palette pixel's sample value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
}

impl Palette {
    /// Create a palette of `num_entries` black entries (1..=256).
    pub fn new(num_entries: usize) -> Result<Self> {
        if num_entries == 0 || num_entries > 256 {
            return Err(RasterError::InvalidPalette(format!(
                "{} entries (expected 1..=256)",
                num_entries
            )));
        }
        Ok(Self {
            entries: vec![PaletteEntry::default(); num_entries],
        })
    }

    /// Build a palette from (r, g, b) triples.
    pub fn from_colors(colors: &[(u8, u8, u8)]) -> Result<Self> {
        let mut palette = Self::new(colors.len())?;
        for (idx, &(r, g, b)) in colors.iter().enumerate() {
            palette.set_entry(idx, r, g, b)?;
        }
        Ok(palette)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<PaletteEntry> {
        self.entries.get(index).copied()
    }

    pub fn set_entry(&mut self, index: usize, red: u8, green: u8, blue: u8) -> Result<()> {
        let len = self.entries.len();
        let entry = self.entries.get_mut(index).ok_or_else(|| {
            RasterError::InvalidPalette(format!("index {} out of range ({} entries)", index, len))
        })?;
        *entry = PaletteEntry { red, green, blue };
        Ok(())
    }

    /// Whether a palette pixel of `sample` can address every entry.
    pub fn fits(&self, sample: SampleType) -> bool {
        sample
            .max_palette_entries()
            .map_or(false, |max| self.entries.len() <= max)
    }

    /// Serialize to the palette BLOB format.
    pub fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(4 + self.entries.len() * 3 + 5);
        blob.push(PALETTE_START);
        blob.push(PALETTE_MARKER);
        blob.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for e in &self.entries {
            blob.extend_from_slice(&[e.red, e.green, e.blue]);
        }
        let crc = crc32fast::hash(&blob);
        blob.extend_from_slice(&crc.to_le_bytes());
        blob.push(PALETTE_END);
        blob
    }

    /// Deserialize a palette BLOB.
    pub fn decode(blob: &[u8]) -> Result<Self> {
        let bad = |reason: &str| RasterError::malformed("palette", reason);

        if blob.len() < 9 || blob[0] != PALETTE_START || blob[1] != PALETTE_MARKER {
            return Err(bad("missing start marker"));
        }
        let count = u16::from_le_bytes([blob[2], blob[3]]) as usize;
        let crc_at = 4 + count * 3;
        if blob.len() != crc_at + 5 || blob[blob.len() - 1] != PALETTE_END {
            return Err(bad("unexpected length"));
        }
        let crc = u32::from_le_bytes([
            blob[crc_at],
            blob[crc_at + 1],
            blob[crc_at + 2],
            blob[crc_at + 3],
        ]);
        if crc32fast::hash(&blob[..crc_at]) != crc {
            return Err(bad("checksum mismatch"));
        }

        let colors: Vec<(u8, u8, u8)> = blob[4..crc_at]
            .chunks_exact(3)
            .map(|c| (c[0], c[1], c[2]))
            .collect();
        Self::from_colors(&colors)
    }

    /// Check a BLOB decodes into a palette usable with `sample`.
    pub fn is_valid_blob(blob: &[u8], sample: SampleType) -> bool {
        Self::decode(blob).map(|p| p.fits(sample)).unwrap_or(false)
    }
}
