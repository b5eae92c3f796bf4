//! Per-band raster statistics and their BLOB encoding.

use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};
use crate::pixel::Pixel;
use crate::raster::Raster;
use crate::types::SampleType;

const STATS_START: u8 = 0x00;
const STATS_MARKER: u8 = 0x27;
const BAND_MARKER: u8 = 0x37;
const STATS_END: u8 = 0x29;

/// Summary of one band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub variance: f64,
    pub histogram: Vec<f64>,
}

impl BandStatistics {
    fn empty(bins: usize) -> Self {
        Self {
            min: f64::MAX,
            max: f64::MIN,
            mean: 0.0,
            variance: 0.0,
            histogram: vec![0.0; bins],
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Statistics of a raster (or an aggregate of several).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterStatistics {
    pub sample_type: SampleType,
    /// Count of no-data pixels skipped.
    pub no_data: f64,
    /// Count of valid pixels summarized.
    pub count: f64,
    pub bands: Vec<BandStatistics>,
}

impl RasterStatistics {
    /// Compute statistics, skipping transparent and no-data pixels.
    ///
    /// Sub-byte and 8-bit samples are binned by value; wider samples use 256
    /// bins spanning the observed range.
    pub fn compute(raster: &Raster) -> Self {
        Self::compute_with_no_data(raster, raster.no_data())
    }

    /// Like [`compute`](Self::compute), with the no-data pixel given
    /// explicitly instead of taken from the raster.
    pub fn compute_with_no_data(raster: &Raster, no_data: Option<&Pixel>) -> Self {
        let sample_type = raster.sample_type();
        let num_bands = raster.num_bands() as usize;
        let bins = sample_type.histogram_bins();
        let no_data = no_data.map(|p| p.to_le_bytes());

        let mut bands = vec![BandStatistics::empty(bins); num_bands];
        let mut sums = vec![0.0f64; num_bands];
        let mut count = 0.0f64;
        let mut skipped = 0.0f64;

        let is_valid = |row: u32, col: u32| -> bool {
            raster.is_opaque(row, col)
                && no_data
                    .as_deref()
                    .map_or(true, |nd| raster.pixel_bytes(row, col) != nd)
        };

        for row in 0..raster.height() {
            for col in 0..raster.width() {
                if !is_valid(row, col) {
                    if raster.is_opaque(row, col) {
                        skipped += 1.0;
                    }
                    continue;
                }
                count += 1.0;
                for (band, stats) in bands.iter_mut().enumerate() {
                    let v = raster.sample_f64(row, col, band);
                    stats.min = stats.min.min(v);
                    stats.max = stats.max.max(v);
                    sums[band] += v;
                }
            }
        }

        if count == 0.0 {
            return Self {
                sample_type,
                no_data: skipped,
                count,
                bands: vec![BandStatistics::empty(bins); num_bands],
            };
        }

        for (band, stats) in bands.iter_mut().enumerate() {
            stats.mean = sums[band] / count;
        }

        // second pass: variance and histogram
        let direct_bins = sample_type.bytes_per_sample() == 1
            && !matches!(sample_type, SampleType::Int8);
        let mut sq = vec![0.0f64; num_bands];
        for row in 0..raster.height() {
            for col in 0..raster.width() {
                if !is_valid(row, col) {
                    continue;
                }
                for (band, stats) in bands.iter_mut().enumerate() {
                    let v = raster.sample_f64(row, col, band);
                    let d = v - stats.mean;
                    sq[band] += d * d;
                    let bin = if direct_bins {
                        v as usize
                    } else {
                        range_bin(v, stats.min, stats.max, bins)
                    };
                    stats.histogram[bin.min(bins - 1)] += 1.0;
                }
            }
        }
        for (band, stats) in bands.iter_mut().enumerate() {
            stats.variance = sq[band] / count;
        }

        Self {
            sample_type,
            no_data: skipped,
            count,
            bands,
        }
    }

    /// Merge another statistics set into this one (pooled mean/variance).
    pub fn aggregate(&mut self, other: &RasterStatistics) -> Result<()> {
        if other.sample_type != self.sample_type || other.bands.len() != self.bands.len() {
            return Err(RasterError::mismatch("statistics layouts differ"));
        }
        let n1 = self.count;
        let n2 = other.count;
        let total = n1 + n2;
        if total > 0.0 {
            for (a, b) in self.bands.iter_mut().zip(&other.bands) {
                if n2 == 0.0 {
                    continue;
                }
                let mean = (a.mean * n1 + b.mean * n2) / total;
                let da = a.mean - mean;
                let db = b.mean - mean;
                a.variance = (n1 * (a.variance + da * da) + n2 * (b.variance + db * db)) / total;
                a.mean = mean;
                a.min = a.min.min(b.min);
                a.max = a.max.max(b.max);
                for (ha, hb) in a.histogram.iter_mut().zip(&b.histogram) {
                    *ha += hb;
                }
            }
        }
        self.count = total;
        self.no_data += other.no_data;
        Ok(())
    }

    /// Serialize to the statistics BLOB format.
    pub fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.push(STATS_START);
        blob.push(STATS_MARKER);
        blob.push(self.sample_type.code());
        blob.push(self.bands.len() as u8);
        blob.extend_from_slice(&self.no_data.to_le_bytes());
        blob.extend_from_slice(&self.count.to_le_bytes());
        for band in &self.bands {
            blob.push(BAND_MARKER);
            for v in [band.min, band.max, band.mean, band.variance] {
                blob.extend_from_slice(&v.to_le_bytes());
            }
            blob.extend_from_slice(&(band.histogram.len() as u16).to_le_bytes());
            for h in &band.histogram {
                blob.extend_from_slice(&h.to_le_bytes());
            }
        }
        let crc = crc32fast::hash(&blob);
        blob.extend_from_slice(&crc.to_le_bytes());
        blob.push(STATS_END);
        blob
    }

    /// Deserialize a statistics BLOB.
    pub fn decode(blob: &[u8]) -> Result<Self> {
        let bad = |reason: &str| RasterError::malformed("statistics", reason);

        if blob.len() < 25 || blob[0] != STATS_START || blob[1] != STATS_MARKER {
            return Err(bad("missing start marker"));
        }
        if blob[blob.len() - 1] != STATS_END {
            return Err(bad("missing end marker"));
        }
        let crc_at = blob.len() - 5;
        let crc = u32::from_le_bytes([
            blob[crc_at],
            blob[crc_at + 1],
            blob[crc_at + 2],
            blob[crc_at + 3],
        ]);
        if crc32fast::hash(&blob[..crc_at]) != crc {
            return Err(bad("checksum mismatch"));
        }

        let sample_type = SampleType::from_code(blob[2]).ok_or_else(|| bad("sample type"))?;
        let num_bands = blob[3] as usize;
        let mut reader = Reader {
            data: &blob[..crc_at],
            pos: 4,
        };
        let no_data = reader.f64().ok_or_else(|| bad("truncated header"))?;
        let count = reader.f64().ok_or_else(|| bad("truncated header"))?;

        let mut bands = Vec::with_capacity(num_bands);
        for _ in 0..num_bands {
            if reader.u8() != Some(BAND_MARKER) {
                return Err(bad("missing band marker"));
            }
            let mut values = [0.0f64; 4];
            for v in values.iter_mut() {
                *v = reader.f64().ok_or_else(|| bad("truncated band"))?;
            }
            let bins = reader.u16().ok_or_else(|| bad("truncated band"))? as usize;
            let mut histogram = Vec::with_capacity(bins);
            for _ in 0..bins {
                histogram.push(reader.f64().ok_or_else(|| bad("truncated histogram"))?);
            }
            bands.push(BandStatistics {
                min: values[0],
                max: values[1],
                mean: values[2],
                variance: values[3],
                histogram,
            });
        }
        if reader.pos != reader.data.len() {
            return Err(bad("trailing bytes"));
        }

        Ok(Self {
            sample_type,
            no_data,
            count,
            bands,
        })
    }

    /// Check a BLOB against the expected sample type and band count.
    pub fn is_valid_blob(blob: &[u8], sample: SampleType, bands: u8) -> bool {
        Self::decode(blob)
            .map(|s| s.sample_type == sample && s.bands.len() == bands as usize)
            .unwrap_or(false)
    }
}

fn range_bin(v: f64, min: f64, max: f64, bins: usize) -> usize {
    if max <= min {
        return 0;
    }
    (((v - min) / (max - min)) * (bins as f64 - 1.0)).round() as usize
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        let slice = self.data.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn f64(&mut self) -> Option<f64> {
        self.take(8).map(|b| {
            let mut a = [0u8; 8];
            a.copy_from_slice(b);
            f64::from_le_bytes(a)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelType;

    fn rgb_raster() -> Raster {
        // 2x2: one black no-data pixel
        let buffer = vec![0, 0, 0, 10, 20, 30, 20, 40, 60, 30, 60, 90];
        Raster::new(2, 2, SampleType::UInt8, PixelType::Rgb, 3, buffer, None)
            .unwrap()
            .with_no_data(Some(Pixel::rgb8(0, 0, 0)))
            .unwrap()
    }

    #[test]
    fn test_compute_skips_no_data() {
        let stats = RasterStatistics::compute(&rgb_raster());
        assert_eq!(stats.count, 3.0);
        assert_eq!(stats.no_data, 1.0);
        assert_eq!(stats.bands.len(), 3);
        assert_eq!(stats.bands[0].min, 10.0);
        assert_eq!(stats.bands[0].max, 30.0);
        assert!((stats.bands[0].mean - 20.0).abs() < 1e-9);
        assert!((stats.bands[0].variance - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.bands[2].histogram[90], 1.0);
        assert_eq!(stats.bands[2].histogram.iter().sum::<f64>(), 3.0);
    }

    #[test]
    fn test_encode_decode() {
        let stats = RasterStatistics::compute(&rgb_raster());
        let decoded = RasterStatistics::decode(&stats.encode()).unwrap();
        assert_eq!(decoded, stats);
        assert!(RasterStatistics::is_valid_blob(&stats.encode(), SampleType::UInt8, 3));
        assert!(!RasterStatistics::is_valid_blob(&stats.encode(), SampleType::UInt8, 1));
    }

    #[test]
    fn test_aggregate_pools_mean_and_variance() {
        let mut a = RasterStatistics::compute(&rgb_raster());
        let b = a.clone();
        a.aggregate(&b).unwrap();
        assert_eq!(a.count, 6.0);
        assert!((a.bands[0].mean - 20.0).abs() < 1e-9);
        assert!((a.bands[0].variance - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(a.bands[2].histogram[90], 2.0);
    }

    #[test]
    fn test_float_histogram_uses_range() {
        let values: Vec<u8> = [1.0f32, 2.0, 3.0, 5.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let raster =
            Raster::new(2, 2, SampleType::Float, PixelType::DataGrid, 1, values, None).unwrap();
        let stats = RasterStatistics::compute(&raster);
        assert_eq!(stats.bands[0].histogram[0], 1.0);
        assert_eq!(stats.bands[0].histogram[255], 1.0);
    }
}
