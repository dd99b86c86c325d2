//! OLED line formatting
//!
//! Each reading becomes one short fixed-format line; a missing reading keeps
//! the line's shape with dashes so the layout does not jump around while
//! sensors warm up. Pushing the pixels to the panel is the host's job.

use core::fmt::Write;

use embedded_graphics::mono_font::{MonoTextStyle, ascii::FONT_5X8};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use heapless::{String, Vec};

use crate::metrics::AirQuality;
use crate::sensors_state::Snapshot;

/// Characters per line on a 128 px wide OLED with a 6 px font.
pub const LINE_CAPACITY: usize = 21;
/// Lines per 64 px tall OLED with an 8 px line height.
pub const MAX_LINES: usize = 8;
pub const LINE_HEIGHT: i32 = 8;

pub type Line = String<LINE_CAPACITY>;

fn line(args: core::fmt::Arguments<'_>) -> Line {
    let mut line = Line::new();
    // A chunk that would overflow the line is dropped whole, not cut
    line.write_fmt(args).ok();
    line
}

pub fn temperature_line(celsius: Option<f32>) -> Line {
    match celsius {
        Some(t) => line(format_args!("T:{:.1} C", t)),
        None => line(format_args!("T:--.- C")),
    }
}

pub fn humidity_line(percent: Option<f32>) -> Line {
    match percent {
        Some(h) => line(format_args!("H:{:.1} %", h)),
        None => line(format_args!("H:--.- %")),
    }
}

pub fn co2_line(ppm: Option<u16>) -> Line {
    match ppm {
        Some(ppm) => line(format_args!("CO2:{}ppm", ppm)),
        None => line(format_args!("CO2:---ppm")),
    }
}

pub fn tvoc_line(ppb: Option<u16>) -> Line {
    match ppb {
        Some(ppb) => line(format_args!("TVOC:{}ppb", ppb)),
        None => line(format_args!("TVOC:--ppb")),
    }
}

/// Pressure in hPa from a reading in Pa.
pub fn pressure_line(pascal: Option<f32>) -> Line {
    match pascal {
        Some(pa) => line(format_args!("P:{:.0} hPa", pa / 100.0)),
        None => line(format_args!("P:---- hPa")),
    }
}

pub fn gas_line(ohms: Option<u32>) -> Line {
    match ohms {
        Some(ohms) => line(format_args!("G:{} ohm", ohms)),
        None => line(format_args!("G:------ ohm")),
    }
}

/// Index on the 0..=500 scale and its short category.
pub fn iaq_line(quality: Option<AirQuality>) -> Line {
    match quality {
        Some(q) => line(format_args!("IAQ:{} {}", q.index, q.category.short_label())),
        None => line(format_args!("IAQ:--")),
    }
}

/// Stack of text lines drawn top-down in a monochrome font.
pub struct SensorPanel {
    lines: Vec<Line, MAX_LINES>,
    origin: Point,
}

impl SensorPanel {
    pub const fn new(origin: Point) -> Self {
        Self {
            lines: Vec::new(),
            origin,
        }
    }

    /// All sensor lines for one snapshot. Temperature and humidity fall back
    /// to the BME68x when the HTU21D has nothing yet.
    pub fn from_snapshot(snapshot: &Snapshot, origin: Point) -> Self {
        let htu = snapshot.htu21d;
        let bme = snapshot.bme68x;
        let ccs = snapshot.ccs811;

        let temperature = htu
            .map(|r| r.temperature_c)
            .or(bme.map(|r| r.temperature_c));
        let humidity = htu
            .map(|r| r.humidity_percent)
            .or(bme.map(|r| r.humidity_percent));

        let mut panel = Self::new(origin);
        panel.push(temperature_line(temperature));
        panel.push(humidity_line(humidity));
        panel.push(co2_line(ccs.map(|r| r.eco2_ppm)));
        panel.push(tvoc_line(ccs.map(|r| r.tvoc_ppb)));
        panel.push(pressure_line(bme.map(|r| r.pressure_pa)));
        panel.push(gas_line(bme.map(|r| r.gas_resistance_ohms)));
        panel.push(iaq_line(snapshot.air_quality));
        panel
    }

    /// Append a line; returns false once the panel is full.
    pub fn push(&mut self, line: Line) -> bool {
        self.lines.push(line).is_ok()
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn draw<D: DrawTarget<Color = BinaryColor>>(&self, target: &mut D) -> Result<(), D::Error> {
        let style = MonoTextStyle::new(&FONT_5X8, BinaryColor::On);

        let mut position = self.origin;
        for line in &self.lines {
            Text::with_baseline(line, position, style, Baseline::Top).draw(target)?;
            position.y += LINE_HEIGHT;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{IaqCategory, IaqParams};
    use crate::sensors::{Bme68xReading, Ccs811Reading, Htu21dReading};
    use core::convert::Infallible;

    struct Canvas {
        pixels: [[bool; 128]; 64],
    }

    impl Canvas {
        fn new() -> Self {
            Self {
                pixels: [[false; 128]; 64],
            }
        }

        fn row_lit(&self, row: usize) -> bool {
            self.pixels[row].iter().any(|p| *p)
        }
    }

    impl OriginDimensions for Canvas {
        fn size(&self) -> Size {
            Size::new(128, 64)
        }
    }

    impl DrawTarget for Canvas {
        type Color = BinaryColor;
        type Error = Infallible;

        fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
        where
            I: IntoIterator<Item = Pixel<Self::Color>>,
        {
            for Pixel(point, color) in pixels {
                if (0..128).contains(&point.x) && (0..64).contains(&point.y) {
                    self.pixels[point.y as usize][point.x as usize] = color.is_on();
                }
            }
            Ok(())
        }
    }

    fn full_snapshot() -> Snapshot {
        Snapshot {
            htu21d: Some(Htu21dReading {
                temperature_c: 23.44,
                humidity_percent: 45.06,
            }),
            ccs811: Some(Ccs811Reading {
                eco2_ppm: 400,
                tvoc_ppb: 12,
            }),
            bme68x: Some(Bme68xReading {
                temperature_c: 24.0,
                humidity_percent: 44.0,
                pressure_pa: 101_325.0,
                gas_resistance_ohms: 123_456,
                gas_index: 0,
                gas_valid: true,
            }),
            air_quality: Some(AirQuality::assess(&IaqParams::default(), 50_000, 40)),
        }
    }

    #[test]
    fn test_line_formats() {
        assert_eq!(temperature_line(Some(23.44)), "T:23.4 C");
        assert_eq!(temperature_line(Some(-5.06)), "T:-5.1 C");
        assert_eq!(humidity_line(Some(45.06)), "H:45.1 %");
        assert_eq!(co2_line(Some(400)), "CO2:400ppm");
        assert_eq!(tvoc_line(Some(12)), "TVOC:12ppb");
        assert_eq!(pressure_line(Some(101_325.0)), "P:1013 hPa");
        assert_eq!(gas_line(Some(123_456)), "G:123456 ohm");
    }

    #[test]
    fn test_missing_values_keep_line_shape() {
        assert_eq!(temperature_line(None), "T:--.- C");
        assert_eq!(humidity_line(None), "H:--.- %");
        assert_eq!(co2_line(None), "CO2:---ppm");
        assert_eq!(tvoc_line(None), "TVOC:--ppb");
        assert_eq!(pressure_line(None), "P:---- hPa");
        assert_eq!(gas_line(None), "G:------ ohm");
        assert_eq!(iaq_line(None), "IAQ:--");
    }

    #[test]
    fn test_iaq_line_uses_short_label() {
        let quality = AirQuality {
            score: 65,
            index: 175,
            category: IaqCategory::UnhealthyForSensitiveGroups,
        };

        assert_eq!(iaq_line(Some(quality)), "IAQ:175 Sensitive");
    }

    #[test]
    fn test_overflowing_chunk_is_dropped() {
        let long = "0123456789ABCDEFGHIJKLMNOP";

        assert_eq!(line(format_args!("G:{} ohm", long)), "G:");
    }

    #[test]
    fn test_every_line_fits_the_panel_width() {
        let extremes = [
            temperature_line(Some(-40.0)),
            pressure_line(Some(110_000.0)),
            gas_line(Some(u32::MAX)),
            co2_line(Some(u16::MAX)),
            tvoc_line(Some(u16::MAX)),
            iaq_line(Some(AirQuality::assess(&IaqParams::default(), 0, 100))),
        ];
        for line in extremes {
            assert!(!line.is_empty());
            assert!(line.len() <= LINE_CAPACITY);
        }
    }

    #[test]
    fn test_panel_from_snapshot() {
        let panel = SensorPanel::from_snapshot(&full_snapshot(), Point::zero());

        assert_eq!(
            panel.lines(),
            [
                "T:23.4 C",
                "H:45.1 %",
                "CO2:400ppm",
                "TVOC:12ppb",
                "P:1013 hPa",
                "G:123456 ohm",
                "IAQ:0 Good",
            ]
        );
    }

    #[test]
    fn test_panel_falls_back_to_bme68x_climate() {
        let snapshot = Snapshot {
            htu21d: None,
            ..full_snapshot()
        };
        let panel = SensorPanel::from_snapshot(&snapshot, Point::zero());

        assert_eq!(panel.lines()[0], "T:24.0 C");
        assert_eq!(panel.lines()[1], "H:44.0 %");
    }

    #[test]
    fn test_panel_is_bounded() {
        let mut panel = SensorPanel::new(Point::zero());
        for _ in 0..MAX_LINES {
            assert!(panel.push(co2_line(None)));
        }
        assert!(!panel.push(co2_line(None)));
    }

    #[test]
    fn test_panel_draws_one_band_per_line() {
        let panel = SensorPanel::from_snapshot(&Snapshot::default(), Point::zero());
        let mut canvas = Canvas::new();

        panel.draw(&mut canvas).unwrap();

        for line in 0..7 {
            let band = line * LINE_HEIGHT as usize;
            assert!(
                (band..band + LINE_HEIGHT as usize).any(|row| canvas.row_lit(row)),
                "line {line} not drawn"
            );
        }
        // Eighth band is empty
        assert!(!(56..64).any(|row| canvas.row_lit(row)));
    }
}
