use std::io::Cursor;

use image::{ImageFormat, RgbImage};
use plotters::prelude::*;
use serde_json::Value;

use crate::error::AppError;
use crate::models::{ChartDescriptor, ChartType, Row};

const PURPLE: RGBColor = RGBColor(0x88, 0x84, 0xd8);
const GREEN: RGBColor = RGBColor(0x82, 0xca, 0x9d);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartShape {
    Bars,
    GroupedBars,
    Line,
    Area,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub key: String,
    pub values: Vec<f64>,
    pub color: RGBColor,
}

/// A chart descriptor resolved into something drawable: category labels on
/// the x axis and one value per label for each series.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub shape: ChartShape,
    pub x_key: &'static str,
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

impl ChartSpec {
    /// `fallback_value_key` stands in when an area chart arrives without a
    /// `value_key`; the backend keys those by the aggregated column.
    pub fn from_descriptor(
        descriptor: &ChartDescriptor,
        fallback_value_key: Option<&str>,
    ) -> Option<ChartSpec> {
        let rows = &descriptor.chart_data;
        let (shape, x_key, keys, color) = match descriptor.chart_type {
            ChartType::Histogram => (
                ChartShape::Bars,
                "bin",
                vec![descriptor.value_key.clone()],
                PURPLE,
            ),
            ChartType::Bar => (
                ChartShape::Bars,
                "name",
                vec![descriptor.value_key.clone()],
                GREEN,
            ),
            ChartType::TwoBars => (
                ChartShape::GroupedBars,
                "name",
                rows.first()
                    .map(|row| {
                        row.keys()
                            .filter(|k| *k != "name")
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default(),
                GREEN,
            ),
            ChartType::Line => (
                ChartShape::Line,
                "date",
                vec![descriptor.value_key.clone()],
                GREEN,
            ),
            ChartType::Area => {
                let key = if descriptor.value_key.is_empty() {
                    fallback_value_key.unwrap_or_default().to_string()
                } else {
                    descriptor.value_key.clone()
                };
                (ChartShape::Area, "name", vec![key], PURPLE)
            }
            ChartType::Unknown => {
                tracing::warn!("Skipping chart with unsupported type");
                return None;
            }
        };

        let series = keys
            .into_iter()
            .map(|key| Series {
                values: rows.iter().map(|row| value_of(row, &key)).collect(),
                color: if shape == ChartShape::GroupedBars {
                    series_color(&key, 65.0)
                } else {
                    color
                },
                key,
            })
            .collect();

        Some(ChartSpec {
            chart_type: descriptor.chart_type,
            shape,
            x_key,
            labels: rows.iter().map(|row| label_of(row, x_key)).collect(),
            series,
        })
    }

    fn value_range(&self) -> (f64, f64) {
        let values = self.series.iter().flat_map(|s| s.values.iter().copied());
        let (min, max) = values.fold((0.0_f64, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if (max - min).abs() < f64::EPSILON {
            (min, min + 1.0)
        } else {
            (min, max + (max - min) * 0.1)
        }
    }
}

fn value_of(row: &Row, key: &str) -> f64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn label_of(row: &Row, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Stable colour for a series key so the same column keeps its colour
/// between charts.
pub fn series_color(key: &str, lightness: f64) -> RGBColor {
    let hash = key.chars().fold(0i32, |hash, c| {
        (c as i32).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash))
    });
    let hue = (hash % 360).abs() as f64;
    let (r, g, b) = HSLColor(hue / 360.0, 0.65, lightness / 100.0)
        .to_backend_color()
        .rgb;
    RGBColor(r, g, b)
}

pub fn render_png(spec: &ChartSpec, width: u32, height: u32) -> Result<Vec<u8>, AppError> {
    if spec.labels.is_empty() || spec.series.is_empty() {
        return Err(AppError::Export("Chart has no data to draw".to_string()));
    }

    let mut buffer = vec![0u8; width as usize * height as usize * 3];
    draw(spec, &mut buffer, width, height)
        .map_err(|e| AppError::Export(format!("Failed to draw chart: {}", e)))?;

    let image = RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| AppError::Export("Chart buffer has the wrong size".to_string()))?;
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| AppError::Export(format!("Failed to encode PNG: {}", e)))?;
    Ok(png.into_inner())
}

fn draw(
    spec: &ChartSpec,
    buffer: &mut [u8],
    width: u32,
    height: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::with_buffer(buffer, (width, height)).into_drawing_area();
    root.fill(&WHITE)?;

    let points = spec.labels.len();
    let (y_min, y_max) = spec.value_range();

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0f64..points as f64, y_min..y_max)?;

    let labels = &spec.labels;
    let label_at = |x: &f64| labels.get(x.floor() as usize).cloned().unwrap_or_default();
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(points.min(20))
        .x_label_formatter(&label_at)
        .x_desc(spec.x_key)
        .draw()?;

    match spec.shape {
        ChartShape::Bars | ChartShape::GroupedBars => {
            let slot = 0.8 / spec.series.len() as f64;
            for (index, series) in spec.series.iter().enumerate() {
                let color = series.color;
                let offset = 0.1 + slot * index as f64;
                chart
                    .draw_series(series.values.iter().enumerate().map(|(i, v)| {
                        let left = i as f64 + offset;
                        Rectangle::new([(left, 0.0), (left + slot, *v)], color.filled())
                    }))?
                    .label(series.key.as_str())
                    .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
            }
        }
        ChartShape::Line => {
            for series in &spec.series {
                let color = series.color;
                chart
                    .draw_series(LineSeries::new(
                        series.values.iter().enumerate().map(|(i, v)| (i as f64 + 0.5, *v)),
                        color.stroke_width(2),
                    ))?
                    .label(series.key.as_str())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], color));
            }
        }
        ChartShape::Area => {
            for series in &spec.series {
                let color = series.color;
                chart
                    .draw_series(
                        AreaSeries::new(
                            series.values.iter().enumerate().map(|(i, v)| (i as f64 + 0.5, *v)),
                            0.0,
                            color.mix(0.3),
                        )
                        .border_style(color),
                    )?
                    .label(series.key.as_str())
                    .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.mix(0.3).filled()));
            }
        }
    }

    if spec.series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: serde_json::Value) -> Vec<Row> {
        serde_json::from_value(value).unwrap()
    }

    fn descriptor(chart_type: ChartType, data: serde_json::Value, value_key: &str) -> ChartDescriptor {
        ChartDescriptor {
            chart_type,
            chart_data: rows(data),
            value_key: value_key.to_string(),
        }
    }

    #[test]
    fn bar_uses_name_axis_and_value_key() {
        let spec = ChartSpec::from_descriptor(
            &descriptor(
                ChartType::Bar,
                json!([{"name": "north", "sales": 120}, {"name": "south", "sales": "80.5"}]),
                "sales",
            ),
            None,
        )
        .unwrap();
        assert_eq!(spec.shape, ChartShape::Bars);
        assert_eq!(spec.x_key, "name");
        assert_eq!(spec.labels, vec!["north", "south"]);
        assert_eq!(spec.series[0].values, vec![120.0, 80.5]);
    }

    #[test]
    fn histogram_and_line_pick_their_axes() {
        let histogram = ChartSpec::from_descriptor(
            &descriptor(ChartType::Histogram, json!([{"bin": "0-10", "count": 3}]), "count"),
            None,
        )
        .unwrap();
        assert_eq!(histogram.x_key, "bin");
        assert_eq!(histogram.labels, vec!["0-10"]);

        let line = ChartSpec::from_descriptor(
            &descriptor(ChartType::Line, json!([{"date": "2024-01-01", "total": 9}]), "total"),
            None,
        )
        .unwrap();
        assert_eq!(line.shape, ChartShape::Line);
        assert_eq!(line.x_key, "date");
    }

    #[test]
    fn two_bars_derives_series_from_row_keys() {
        let spec = ChartSpec::from_descriptor(
            &descriptor(
                ChartType::TwoBars,
                json!([
                    {"name": "north", "mean": 10, "max": 40},
                    {"name": "south", "mean": 12, "max": 33}
                ]),
                "",
            ),
            None,
        )
        .unwrap();
        let keys: Vec<&str> = spec.series.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["mean", "max"]);
        assert_eq!(spec.series[1].values, vec![40.0, 33.0]);
        assert_eq!(spec.series[0].color, series_color("mean", 65.0));
        assert_ne!(spec.series[0].color, spec.series[1].color);
    }

    #[test]
    fn area_falls_back_to_aggregate_column() {
        let spec = ChartSpec::from_descriptor(
            &descriptor(ChartType::Area, json!([{"name": "a", "sales": 5}]), ""),
            Some("sales"),
        )
        .unwrap();
        assert_eq!(spec.series[0].key, "sales");
        assert_eq!(spec.series[0].values, vec![5.0]);
    }

    #[test]
    fn unknown_chart_is_skipped() {
        let spec = ChartSpec::from_descriptor(&descriptor(ChartType::Unknown, json!([]), "x"), None);
        assert!(spec.is_none());
    }

    #[test]
    fn renders_png_bytes() {
        let spec = ChartSpec::from_descriptor(
            &descriptor(
                ChartType::TwoBars,
                json!([
                    {"name": "north", "mean": 10, "max": 40},
                    {"name": "south", "mean": -4, "max": 33}
                ]),
                "",
            ),
            None,
        )
        .unwrap();
        let png = render_png(&spec, 320, 200).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn empty_chart_cannot_be_exported() {
        let spec = ChartSpec::from_descriptor(&descriptor(ChartType::Bar, json!([]), "sales"), None)
            .unwrap();
        assert!(matches!(render_png(&spec, 100, 100), Err(AppError::Export(_))));
    }
}
