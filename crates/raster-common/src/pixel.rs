//! Typed pixel values and their BLOB encoding.
//!
//! A [`Pixel`] is used as the no-data sentinel of a coverage and as the
//! background value when priming output buffers.

use crate::error::{RasterError, Result};
use crate::types::{validate_format, PixelType, SampleType};

const PIXEL_START: u8 = 0x00;
const PIXEL_MARKER: u8 = 0x03;
const SAMPLE_MARKER: u8 = 0x06;
const PIXEL_END: u8 = 0x23;

/// One band value. Sub-byte samples (1/2/4-bit) are held as `UInt8`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Float(f32),
    Double(f64),
}

impl SampleValue {
    /// Zero value for a sample type.
    pub fn zero(sample: SampleType) -> Self {
        Self::from_f64(sample, 0.0)
    }

    /// Convert a floating point value, rounding and saturating as needed.
    pub fn from_f64(sample: SampleType, value: f64) -> Self {
        let rounded = value.round();
        match sample {
            SampleType::Bit1 | SampleType::Bit2 | SampleType::Bit4 => {
                let max = sample.sub_byte_max().unwrap_or(1) as f64;
                Self::UInt8(rounded.clamp(0.0, max) as u8)
            }
            SampleType::Int8 => Self::Int8(rounded as i8),
            SampleType::UInt8 => Self::UInt8(rounded as u8),
            SampleType::Int16 => Self::Int16(rounded as i16),
            SampleType::UInt16 => Self::UInt16(rounded as u16),
            SampleType::Int32 => Self::Int32(rounded as i32),
            SampleType::UInt32 => Self::UInt32(rounded as u32),
            SampleType::Float => Self::Float(value as f32),
            SampleType::Double => Self::Double(value),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int8(v) => v as f64,
            Self::UInt8(v) => v as f64,
            Self::Int16(v) => v as f64,
            Self::UInt16(v) => v as f64,
            Self::Int32(v) => v as f64,
            Self::UInt32(v) => v as f64,
            Self::Float(v) => v as f64,
            Self::Double(v) => v,
        }
    }

    /// Whether this value is representable by `sample`.
    pub fn fits(&self, sample: SampleType) -> bool {
        match (sample, self) {
            (SampleType::Bit1 | SampleType::Bit2 | SampleType::Bit4, Self::UInt8(v)) => {
                sample.sub_byte_max().map_or(false, |max| *v <= max)
            }
            (SampleType::Int8, Self::Int8(_))
            | (SampleType::UInt8, Self::UInt8(_))
            | (SampleType::Int16, Self::Int16(_))
            | (SampleType::UInt16, Self::UInt16(_))
            | (SampleType::Int32, Self::Int32(_))
            | (SampleType::UInt32, Self::UInt32(_))
            | (SampleType::Float, Self::Float(_))
            | (SampleType::Double, Self::Double(_)) => true,
            _ => false,
        }
    }

    /// Read a little-endian value. `bytes` must hold `bytes_per_sample` bytes.
    pub fn read_le(sample: SampleType, bytes: &[u8]) -> Self {
        match sample {
            SampleType::Bit1 | SampleType::Bit2 | SampleType::Bit4 | SampleType::UInt8 => {
                Self::UInt8(bytes[0])
            }
            SampleType::Int8 => Self::Int8(bytes[0] as i8),
            SampleType::Int16 => Self::Int16(i16::from_le_bytes([bytes[0], bytes[1]])),
            SampleType::UInt16 => Self::UInt16(u16::from_le_bytes([bytes[0], bytes[1]])),
            SampleType::Int32 => Self::Int32(i32::from_le_bytes(le4(bytes))),
            SampleType::UInt32 => Self::UInt32(u32::from_le_bytes(le4(bytes))),
            SampleType::Float => Self::Float(f32::from_le_bytes(le4(bytes))),
            SampleType::Double => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[..8]);
                Self::Double(f64::from_le_bytes(b))
            }
        }
    }

    /// Write the little-endian representation into `out`.
    pub fn write_le(&self, out: &mut [u8]) {
        match *self {
            Self::Int8(v) => out[0] = v as u8,
            Self::UInt8(v) => out[0] = v,
            Self::Int16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Self::UInt16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Self::Int32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Self::UInt32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Self::Float(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Self::Double(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
        }
    }
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// A typed multi-band pixel value.
#[derive(Debug, Clone, PartialEq)]
pub struct Pixel {
    sample_type: SampleType,
    pixel_type: PixelType,
    samples: Vec<SampleValue>,
    transparent: bool,
}

impl Pixel {
    /// Create a pixel with every band set to zero.
    pub fn new(sample_type: SampleType, pixel_type: PixelType, num_bands: u8) -> Result<Self> {
        validate_format(sample_type, pixel_type, num_bands)?;
        Ok(Self {
            sample_type,
            pixel_type,
            samples: vec![SampleValue::zero(sample_type); num_bands as usize],
            transparent: false,
        })
    }

    /// Create a pixel from explicit band values.
    pub fn with_samples(
        sample_type: SampleType,
        pixel_type: PixelType,
        samples: Vec<SampleValue>,
    ) -> Result<Self> {
        let bands = u8::try_from(samples.len())
            .map_err(|_| RasterError::invalid_format("too many bands"))?;
        let mut pixel = Self::new(sample_type, pixel_type, bands)?;
        for (band, value) in samples.into_iter().enumerate() {
            pixel.set_sample(band, value)?;
        }
        Ok(pixel)
    }

    /// Convenience constructor for UINT8 RGB pixels.
    pub fn rgb8(red: u8, green: u8, blue: u8) -> Self {
        Self {
            sample_type: SampleType::UInt8,
            pixel_type: PixelType::Rgb,
            samples: vec![
                SampleValue::UInt8(red),
                SampleValue::UInt8(green),
                SampleValue::UInt8(blue),
            ],
            transparent: false,
        }
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn num_bands(&self) -> u8 {
        self.samples.len() as u8
    }

    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    pub fn set_transparent(&mut self, transparent: bool) {
        self.transparent = transparent;
    }

    pub fn sample(&self, band: usize) -> Result<SampleValue> {
        self.samples
            .get(band)
            .copied()
            .ok_or(RasterError::BandOutOfRange {
                index: band,
                bands: self.samples.len(),
            })
    }

    pub fn samples(&self) -> &[SampleValue] {
        &self.samples
    }

    /// Set one band, rejecting values the sample type cannot hold.
    pub fn set_sample(&mut self, band: usize, value: SampleValue) -> Result<()> {
        if !value.fits(self.sample_type) {
            return Err(RasterError::invalid_sample(format!(
                "{:?} does not fit a {} sample",
                value, self.sample_type
            )));
        }
        let bands = self.samples.len();
        let slot = self
            .samples
            .get_mut(band)
            .ok_or(RasterError::BandOutOfRange { index: band, bands })?;
        *slot = value;
        Ok(())
    }

    /// True when sample/pixel/band layout equals the given one.
    pub fn matches(&self, sample: SampleType, pixel: PixelType, bands: u8) -> bool {
        self.sample_type == sample && self.pixel_type == pixel && self.num_bands() == bands
    }

    /// The pixel as packed little-endian band-interleaved bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let bps = self.sample_type.bytes_per_sample();
        let mut out = vec![0u8; bps * self.samples.len()];
        for (value, chunk) in self.samples.iter().zip(out.chunks_exact_mut(bps)) {
            value.write_le(chunk);
        }
        out
    }

    /// Serialize to the pixel BLOB format.
    pub fn encode(&self) -> Vec<u8> {
        let bps = self.sample_type.bytes_per_sample();
        let mut blob = Vec::with_capacity(12 + self.samples.len() * (bps + 1));
        blob.push(PIXEL_START);
        blob.push(PIXEL_MARKER);
        blob.push(self.sample_type.code());
        blob.push(self.pixel_type.code());
        blob.push(self.num_bands());
        let mut scratch = [0u8; 8];
        for value in &self.samples {
            blob.push(SAMPLE_MARKER);
            value.write_le(&mut scratch);
            blob.extend_from_slice(&scratch[..bps]);
        }
        blob.push(u8::from(self.transparent));
        let crc = crc32fast::hash(&blob);
        blob.extend_from_slice(&crc.to_le_bytes());
        blob.push(PIXEL_END);
        blob
    }

    /// Deserialize a pixel BLOB.
    pub fn decode(blob: &[u8]) -> Result<Self> {
        let bad = |reason: &str| RasterError::malformed("pixel", reason);

        if blob.len() < 11 || blob[0] != PIXEL_START || blob[1] != PIXEL_MARKER {
            return Err(bad("missing start marker"));
        }
        if blob[blob.len() - 1] != PIXEL_END {
            return Err(bad("missing end marker"));
        }
        let sample_type = SampleType::from_code(blob[2]).ok_or_else(|| bad("sample type"))?;
        let pixel_type = PixelType::from_code(blob[3]).ok_or_else(|| bad("pixel type"))?;
        let bands = blob[4] as usize;
        let bps = sample_type.bytes_per_sample();
        let expected = 5 + bands * (bps + 1) + 1 + 4 + 1;
        if blob.len() != expected {
            return Err(bad("unexpected length"));
        }

        let crc_at = expected - 5;
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&blob[crc_at..crc_at + 4]);
        if crc32fast::hash(&blob[..crc_at]) != u32::from_le_bytes(crc) {
            return Err(bad("checksum mismatch"));
        }

        let mut samples = Vec::with_capacity(bands);
        let mut pos = 5;
        for _ in 0..bands {
            if blob[pos] != SAMPLE_MARKER {
                return Err(bad("missing sample marker"));
            }
            samples.push(SampleValue::read_le(sample_type, &blob[pos + 1..pos + 1 + bps]));
            pos += bps + 1;
        }
        let transparent = match blob[pos] {
            0 => false,
            1 => true,
            _ => return Err(bad("transparency flag")),
        };

        let mut pixel = Self::with_samples(sample_type, pixel_type, samples)?;
        pixel.transparent = transparent;
        Ok(pixel)
    }

    /// Check a BLOB against an expected layout without keeping the value.
    pub fn is_valid_blob(blob: &[u8], sample: SampleType, bands: u8) -> bool {
        Self::decode(blob)
            .map(|p| p.sample_type == sample && p.num_bands() == bands)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_for(sample: SampleType, band: usize) -> SampleValue {
        match sample {
            SampleType::Bit1 => SampleValue::UInt8(1),
            SampleType::Bit2 => SampleValue::UInt8(2),
            SampleType::Bit4 => SampleValue::UInt8(9),
            SampleType::Int8 => SampleValue::Int8(-7),
            SampleType::UInt8 => SampleValue::UInt8(200 + band as u8),
            SampleType::Int16 => SampleValue::Int16(-1234),
            SampleType::UInt16 => SampleValue::UInt16(60000 - band as u16),
            SampleType::Int32 => SampleValue::Int32(-123_456),
            SampleType::UInt32 => SampleValue::UInt32(4_000_000_000),
            SampleType::Float => SampleValue::Float(-3.5),
            SampleType::Double => SampleValue::Double(1234.5678),
        }
    }

    #[test]
    fn test_roundtrip_every_valid_layout() {
        for sample in SampleType::ALL {
            for pixel in PixelType::ALL {
                for bands in [1u8, 2, 3, 4, 7] {
                    if validate_format(sample, pixel, bands).is_err() {
                        continue;
                    }
                    let samples = (0..bands as usize).map(|b| sample_for(sample, b)).collect();
                    let mut original = Pixel::with_samples(sample, pixel, samples).unwrap();
                    original.set_transparent(bands % 2 == 0);

                    let decoded = Pixel::decode(&original.encode()).unwrap();
                    assert_eq!(decoded, original, "{} {} {}", sample, pixel, bands);
                }
            }
        }
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut blob = Pixel::rgb8(10, 20, 30).encode();
        blob[7] ^= 0xff;
        assert!(matches!(
            Pixel::decode(&blob),
            Err(RasterError::MalformedBlob { .. })
        ));
        assert!(Pixel::decode(&[0x00, 0x03]).is_err());
    }

    #[test]
    fn test_set_sample_checks_range() {
        let mut pixel = Pixel::new(SampleType::Bit2, PixelType::Palette, 1).unwrap();
        assert!(pixel.set_sample(0, SampleValue::UInt8(3)).is_ok());
        assert!(pixel.set_sample(0, SampleValue::UInt8(4)).is_err());
        assert!(pixel.set_sample(1, SampleValue::UInt8(0)).is_err());
        assert!(pixel.set_sample(0, SampleValue::Int16(1)).is_err());
    }

    #[test]
    fn test_is_valid_blob_checks_layout() {
        let blob = Pixel::rgb8(0, 0, 0).encode();
        assert!(Pixel::is_valid_blob(&blob, SampleType::UInt8, 3));
        assert!(!Pixel::is_valid_blob(&blob, SampleType::UInt16, 3));
        assert!(!Pixel::is_valid_blob(&blob, SampleType::UInt8, 1));
    }

    #[test]
    fn test_le_bytes_layout() {
        let pixel = Pixel::with_samples(
            SampleType::UInt16,
            PixelType::Rgb,
            vec![
                SampleValue::UInt16(1),
                SampleValue::UInt16(0x0203),
                SampleValue::UInt16(0xffff),
            ],
        )
        .unwrap();
        assert_eq!(pixel.to_le_bytes(), vec![1, 0, 3, 2, 0xff, 0xff]);
    }
}
