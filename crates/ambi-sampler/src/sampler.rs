use ambi_codec::LedFormat;
use thiserror::Error;

use crate::geometry::StripGeometry;
use crate::tint::TintFilter;

/// Fraction of the frame height/width sampled as the border band.
pub const DEFAULT_BORDER_FRACTION: f64 = 0.05;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("frame is {got} bytes, expected {expected} ({width}x{height} rgb24)")]
    FrameSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
}

/// One LED's pixel rectangle, half-open on both axes.
#[derive(Debug, Clone, Copy)]
struct Zone {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

/// Samples decoded frames into LED payloads for one fixed geometry and
/// frame size. Zones are computed once at construction.
pub struct BorderSampler {
    geometry: StripGeometry,
    zones: Vec<Zone>,
    width: u32,
    height: u32,
    tint: Option<TintFilter>,
}

impl BorderSampler {
    #[must_use]
    pub fn new(
        geometry: StripGeometry,
        width: u32,
        height: u32,
        border_fraction: f64,
        tint: Option<TintFilter>,
    ) -> Self {
        let zones = compute_zones(&geometry, width, height, border_fraction);
        Self {
            geometry,
            zones,
            width,
            height,
            tint,
        }
    }

    #[must_use]
    pub fn led_count(&self) -> u16 {
        self.geometry.led_count()
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.geometry.payload_len()
    }

    /// Sample one RGB24 frame into a payload in physical LED order.
    ///
    /// # Errors
    ///
    /// Fails if the frame byte count does not match the construction-time
    /// dimensions.
    pub fn sample(&self, frame: &[u8]) -> Result<Vec<u8>, SamplerError> {
        let expected = self.width as usize * self.height as usize * 3;
        if frame.len() != expected {
            return Err(SamplerError::FrameSize {
                got: frame.len(),
                expected,
                width: self.width,
                height: self.height,
            });
        }

        let mut colors: Vec<[u8; 3]> = self
            .zones
            .iter()
            .map(|z| average_zone(frame, self.width, z))
            .collect();

        if let Some(tint) = &self.tint {
            for c in &mut colors {
                *c = tint.apply(*c);
            }
        }

        // Counter-clockwise offset: the last `offset` LEDs of the clockwise
        // sequence move to the front.
        let n = colors.len();
        if n > 0 {
            let offset = usize::from(self.geometry.offset) % n;
            colors.rotate_right(offset);
        }

        let mut payload = Vec::with_capacity(self.payload_len());
        match self.geometry.format {
            LedFormat::Rgb => {
                for [r, g, b] in colors {
                    payload.extend_from_slice(&[r, g, b]);
                }
            }
            LedFormat::Rgbw => {
                for [r, g, b] in colors {
                    let w = r.min(g).min(b);
                    payload.extend_from_slice(&[r - w, g - w, b - w, w]);
                }
            }
        }
        Ok(payload)
    }
}

/// Integer-average the pixels of one zone; an empty zone is black.
fn average_zone(frame: &[u8], width: u32, zone: &Zone) -> [u8; 3] {
    let mut sum = [0u32; 3];
    let mut count = 0u32;
    for y in zone.y1..zone.y2 {
        let row = (y * width) as usize * 3;
        for x in zone.x1..zone.x2 {
            let p = row + x as usize * 3;
            sum[0] += u32::from(frame[p]);
            sum[1] += u32::from(frame[p + 1]);
            sum[2] += u32::from(frame[p + 2]);
            count += 1;
        }
    }
    if count == 0 {
        return [0, 0, 0];
    }
    [
        ((sum[0] + count / 2) / count) as u8,
        ((sum[1] + count / 2) / count) as u8,
        ((sum[2] + count / 2) / count) as u8,
    ]
}

/// Split `len` pixels into `count` contiguous segments of equal size, the
/// last absorbing the remainder. Half-open `(start, end)` pairs, ascending.
fn partition_edge(len: u32, count: u16) -> Vec<(u32, u32)> {
    let count = u32::from(count);
    if count == 0 {
        return Vec::new();
    }
    let base = len / count;
    let mut segments = Vec::with_capacity(count as usize);
    let mut cursor = 0;
    for i in 0..count {
        let seg_len = if i == count - 1 { len - base * (count - 1) } else { base };
        segments.push((cursor, cursor + seg_len));
        cursor += seg_len;
    }
    segments
}

/// Build zones in canonical clockwise order starting at the top-right
/// corner: right (top→bottom), bottom (right→left), left (bottom→top),
/// top (left→right).
///
/// Each edge's band spans the full edge, so an edge with as many LEDs as
/// pixels gives every LED a rectangle. Within one edge's partition every
/// pixel (corners included) belongs to exactly one rectangle; the corner
/// squares are visible to both adjacent edges, as in the original
/// zoning.
fn compute_zones(
    geometry: &StripGeometry,
    width: u32,
    height: u32,
    border_fraction: f64,
) -> Vec<Zone> {
    let depth_tb = (((border_fraction * f64::from(height)) as u32).max(1)).min(height);
    let depth_lr = (((border_fraction * f64::from(width)) as u32).max(1)).min(width);

    let mut zones = Vec::with_capacity(usize::from(geometry.led_count()));

    // Right: top → bottom.
    for (y1, y2) in partition_edge(height, geometry.right) {
        zones.push(Zone {
            x1: width - depth_lr,
            y1,
            x2: width,
            y2,
        });
    }

    // Bottom: right → left.
    let mut bottom = partition_edge(width, geometry.bottom);
    bottom.reverse();
    for (x1, x2) in bottom {
        zones.push(Zone {
            x1,
            y1: height - depth_tb,
            x2,
            y2: height,
        });
    }

    // Left: bottom → top.
    let mut left = partition_edge(height, geometry.left);
    left.reverse();
    for (y1, y2) in left {
        zones.push(Zone {
            x1: 0,
            y1,
            x2: depth_lr,
            y2,
        });
    }

    // Top: left → right.
    for (x1, x2) in partition_edge(width, geometry.top) {
        zones.push(Zone {
            x1,
            y1: 0,
            x2,
            y2: depth_tb,
        });
    }

    zones
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo(top: u16, right: u16, bottom: u16, left: u16, offset: u16, format: LedFormat) -> StripGeometry {
        StripGeometry {
            top,
            right,
            bottom,
            left,
            offset,
            format,
        }
    }

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let mut frame = Vec::with_capacity((width * height) as usize * 3);
        for _ in 0..width * height {
            frame.extend_from_slice(&rgb);
        }
        frame
    }

    fn set(frame: &mut [u8], width: u32, x: u32, y: u32, rgb: [u8; 3]) {
        let p = ((y * width + x) * 3) as usize;
        frame[p..p + 3].copy_from_slice(&rgb);
    }

    #[test]
    fn uniform_frame_yields_uniform_payload() {
        let g = geo(8, 4, 8, 4, 0, LedFormat::Rgb);
        let sampler = BorderSampler::new(g, 8, 4, DEFAULT_BORDER_FRACTION, None);
        let payload = sampler.sample(&solid_frame(8, 4, [255, 0, 0])).unwrap();
        assert_eq!(payload.len(), 24 * 3);
        for led in payload.chunks_exact(3) {
            assert_eq!(led, [255, 0, 0]);
        }
    }

    #[test]
    fn uniform_frame_is_uniform_at_the_default_geometry() {
        // One pixel column/row per LED at the decode resolution; no LED
        // may come out black.
        let g = geo(89, 49, 89, 49, 46, LedFormat::Rgb);
        let sampler = BorderSampler::new(g, 89, 49, DEFAULT_BORDER_FRACTION, None);
        let payload = sampler.sample(&solid_frame(89, 49, [10, 200, 30])).unwrap();
        assert_eq!(payload.len(), 276 * 3);
        for led in payload.chunks_exact(3) {
            assert_eq!(led, [10, 200, 30]);
        }
    }

    #[test]
    fn zone_order_is_clockwise_from_top_right() {
        // 6x6 frame, one LED per edge, depth 1. One lit pixel in the
        // middle of each border band; every band has 6 pixels.
        let g = geo(1, 1, 1, 1, 0, LedFormat::Rgb);
        let (w, h) = (6u32, 6u32);
        let mut frame = solid_frame(w, h, [0, 0, 0]);
        set(&mut frame, w, 5, 2, [60, 0, 0]); // right
        set(&mut frame, w, 2, 5, [0, 60, 0]); // bottom
        set(&mut frame, w, 0, 2, [0, 0, 60]); // left
        set(&mut frame, w, 2, 0, [60, 60, 0]); // top

        let payload = BorderSampler::new(g, w, h, DEFAULT_BORDER_FRACTION, None)
            .sample(&frame)
            .unwrap();
        assert_eq!(
            payload,
            vec![10, 0, 0, 0, 10, 0, 0, 0, 10, 10, 10, 0]
        );
    }

    #[test]
    fn corner_pixels_count_for_both_adjacent_edges() {
        let g = geo(1, 1, 1, 1, 0, LedFormat::Rgb);
        let (w, h) = (6u32, 6u32);
        let mut frame = solid_frame(w, h, [0, 0, 0]);
        set(&mut frame, w, 5, 5, [120, 120, 120]); // bottom-right corner

        let payload = BorderSampler::new(g, w, h, DEFAULT_BORDER_FRACTION, None)
            .sample(&frame)
            .unwrap();
        let leds: Vec<&[u8]> = payload.chunks_exact(3).collect();
        assert_eq!(leds[0], [20, 20, 20]); // right edge sees it
        assert_eq!(leds[1], [20, 20, 20]); // bottom edge sees it
        assert_eq!(leds[2], [0, 0, 0]);
        assert_eq!(leds[3], [0, 0, 0]);
    }

    #[test]
    fn rotation_moves_last_leds_to_front() {
        let g = geo(1, 1, 1, 1, 1, LedFormat::Rgb);
        let (w, h) = (4u32, 4u32);
        let mut frame = solid_frame(w, h, [0, 0, 0]);
        for x in 0..w {
            set(&mut frame, w, x, 0, [8, 8, 8]); // whole top row
        }
        let payload = BorderSampler::new(g, w, h, DEFAULT_BORDER_FRACTION, None)
            .sample(&frame)
            .unwrap();
        // offset 1: the top LED (last in clockwise order) is now first.
        assert_eq!(&payload[0..3], [8, 8, 8]);
        // The right edge only sees the shared top-right corner pixel.
        assert_eq!(&payload[3..6], [2, 2, 2]);
    }

    #[test]
    fn rgbw_projection_subtracts_white() {
        let g = geo(1, 0, 0, 0, 0, LedFormat::Rgbw);
        let sampler = BorderSampler::new(g, 1, 1, DEFAULT_BORDER_FRACTION, None);
        let payload = sampler.sample(&[200, 180, 160]).unwrap();
        assert_eq!(payload, vec![40, 20, 0, 160]);
    }

    #[test]
    fn averaging_rounds_to_nearest() {
        // Two pixels in the zone: 10 and 11 average to 10.5 → 11 after
        // rounding, not the floor.
        let g = geo(0, 1, 0, 0, 0, LedFormat::Rgb);
        let mut frame = solid_frame(1, 2, [10, 10, 10]);
        frame[3] = 11;
        frame[4] = 11;
        frame[5] = 11;
        let payload = BorderSampler::new(g, 1, 2, DEFAULT_BORDER_FRACTION, None)
            .sample(&frame)
            .unwrap();
        assert_eq!(payload, vec![11, 11, 11]);
    }

    #[test]
    fn uneven_edges_absorb_the_remainder_in_the_last_zone() {
        // 5 pixels across 2 LEDs: 2 + 3.
        let segments = partition_edge(5, 2);
        assert_eq!(segments, vec![(0, 2), (2, 5)]);
        // More LEDs than pixels: zero-width zones are tolerated.
        let segments = partition_edge(2, 4);
        assert_eq!(segments, vec![(0, 0), (0, 0), (0, 0), (0, 2)]);
    }

    #[test]
    fn tint_zeroes_dark_leds_in_payload() {
        let g = geo(1, 0, 0, 0, 0, LedFormat::Rgb);
        let tint = TintFilter {
            dark_threshold: 0.1,
            saturation_boost: 1.0,
        };
        let sampler = BorderSampler::new(g, 1, 1, DEFAULT_BORDER_FRACTION, Some(tint));
        assert_eq!(sampler.sample(&[10, 8, 6]).unwrap(), vec![0, 0, 0]);
        assert_eq!(sampler.sample(&[255, 0, 0]).unwrap(), vec![255, 0, 0]);
    }

    #[test]
    fn wrong_frame_size_is_rejected() {
        let g = geo(1, 1, 1, 1, 0, LedFormat::Rgb);
        let sampler = BorderSampler::new(g, 4, 4, DEFAULT_BORDER_FRACTION, None);
        assert!(matches!(
            sampler.sample(&[0u8; 3]),
            Err(SamplerError::FrameSize { expected: 48, .. })
        ));
    }
}
