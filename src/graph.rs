//! PNG rendering of the four dashboard series.
//!
//! Charts are drawn with plotters into an in-memory RGB buffer and encoded
//! with the `image` crate, so nothing touches the filesystem.

use image::{DynamicImage, ImageOutputFormat, RgbImage};
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::io::Cursor;
use thiserror::Error;

use crate::aggregator::{ChartData, Dashboard, SeriesKind};
use crate::error::EmptyDatasetError;

const ASSETS: RGBColor = RGBColor(0x2e, 0xcc, 0x71);
const LIABILITIES: RGBColor = RGBColor(0xe7, 0x4c, 0x3c);
const NET_WORTH: RGBColor = RGBColor(0x34, 0x98, 0xdb);

const AMOUNT_AXIS: &str = "Сумма (₽)";

/// Chart failures; each affects only the chart being rendered
#[derive(Error, Debug)]
pub enum ChartError {
    #[error(transparent)]
    NoData(#[from] EmptyDatasetError),

    #[error("Ошибка построения графика: {0}")]
    Draw(String),

    #[error("Ошибка кодирования PNG: {0}")]
    Encode(#[from] image::ImageError),
}

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for ChartError {
    fn from(e: DrawingAreaErrorKind<E>) -> Self {
        ChartError::Draw(e.to_string())
    }
}

/// Image size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChartOptions {
    pub width: u32,
    pub height: u32,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            width: 900,
            height: 480,
        }
    }
}

struct Series {
    name: &'static str,
    color: RGBColor,
    values: Vec<f64>,
}

fn amount(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn ready<T>(data: &ChartData<T>) -> Result<&[T], ChartError> {
    match data {
        ChartData::Ready { points } => Ok(points),
        ChartData::NoData(e) => Err(ChartError::NoData(e.clone())),
    }
}

/// Render one series of `dashboard` as a PNG image.
///
/// # Arguments
/// * `dashboard` - Series of the current dataset
/// * `kind` - Which chart to draw
/// * `options` - Image size
///
/// # Returns
/// * `Result<Vec<u8>, ChartError>` - PNG bytes, or `NoData` when the series is empty
pub fn render(dashboard: &Dashboard, kind: SeriesKind, options: &ChartOptions) -> Result<Vec<u8>, ChartError> {
    match kind {
        SeriesKind::NetWorth => {
            let points = ready(&dashboard.net_worth)?;
            let labels = points.iter().map(|p| p.date.format("%d.%m.%Y").to_string()).collect();
            line_chart(
                kind.title(),
                labels,
                vec![
                    Series {
                        name: "Активы",
                        color: ASSETS,
                        values: points.iter().map(|p| amount(p.assets)).collect(),
                    },
                    Series {
                        name: "Обязательства",
                        color: LIABILITIES,
                        values: points.iter().map(|p| amount(p.liabilities)).collect(),
                    },
                    Series {
                        name: "Чистая стоимость",
                        color: NET_WORTH,
                        values: points.iter().map(|p| amount(p.net_worth)).collect(),
                    },
                ],
                options,
            )
        }
        SeriesKind::IncomeExpenses => {
            let months = ready(&dashboard.income_vs_expenses)?;
            bar_chart(
                kind.title(),
                months.iter().map(|m| m.month.to_string()).collect(),
                vec![
                    Series {
                        name: "Доходы",
                        color: ASSETS,
                        values: months.iter().map(|m| amount(m.income)).collect(),
                    },
                    Series {
                        name: "Расходы",
                        color: LIABILITIES,
                        values: months.iter().map(|m| amount(m.expenses)).collect(),
                    },
                ],
                options,
            )
        }
        SeriesKind::Categories => {
            let shares = ready(&dashboard.category_breakdown)?;
            bar_chart(
                kind.title(),
                shares
                    .iter()
                    .map(|s| format!("{} ({:.1}%)", s.category, s.percent))
                    .collect(),
                vec![Series {
                    name: "Расходы",
                    color: NET_WORTH,
                    values: shares.iter().map(|s| amount(s.total)).collect(),
                }],
                options,
            )
        }
        SeriesKind::Budget => {
            let rows = ready(&dashboard.budget_vs_actual)?;
            bar_chart(
                kind.title(),
                rows.iter().map(|r| r.category.clone()).collect(),
                vec![
                    Series {
                        name: "Бюджет",
                        color: NET_WORTH,
                        values: rows.iter().map(|r| amount(r.budget)).collect(),
                    },
                    Series {
                        name: "Фактические расходы",
                        color: LIABILITIES,
                        values: rows.iter().map(|r| amount(r.actual)).collect(),
                    },
                ],
                options,
            )
        }
    }
}

/// Y range covering every value and zero, with headroom
fn value_range(series: &[Series]) -> std::ops::Range<f64> {
    let values = series.iter().flat_map(|s| s.values.iter().copied());
    let (min, max) = values.fold((0.0_f64, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let max = if max <= 0.0 { 1.0 } else { max * 1.1 };
    let min = if min < 0.0 { min * 1.1 } else { 0.0 };
    min..max
}

/// Label for an integer x position; blank between positions
fn label_at(labels: &[String], x: f64) -> String {
    let index = x.round();
    if (x - index).abs() > 1e-6 || index < 0.0 {
        return String::new();
    }
    labels.get(index as usize).cloned().unwrap_or_default()
}

fn line_chart(
    title: &str,
    labels: Vec<String>,
    series: Vec<Series>,
    options: &ChartOptions,
) -> Result<Vec<u8>, ChartError> {
    let mut buffer = vec![0u8; (options.width * options.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE)?;

        let x_range = -0.5..(labels.len() as f64 - 0.5);
        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 24).into_font())
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(80)
            .build_cartesian_2d(x_range, value_range(&series))?;

        chart
            .configure_mesh()
            .x_labels(labels.len().clamp(2, 12))
            .x_label_formatter(&|x| label_at(&labels, *x))
            .x_desc("Дата")
            .y_desc(AMOUNT_AXIS)
            .draw()?;

        for s in &series {
            let color = s.color;
            chart
                .draw_series(LineSeries::new(
                    s.values.iter().enumerate().map(|(i, v)| (i as f64, *v)),
                    color.stroke_width(2),
                ))?
                .label(s.name)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;

        root.present()?;
    }
    encode_png(buffer, options)
}

fn bar_chart(
    title: &str,
    labels: Vec<String>,
    series: Vec<Series>,
    options: &ChartOptions,
) -> Result<Vec<u8>, ChartError> {
    let mut buffer = vec![0u8; (options.width * options.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE)?;

        let x_range = -0.5..(labels.len() as f64 - 0.5);
        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 24).into_font())
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(80)
            .build_cartesian_2d(x_range, value_range(&series))?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(labels.len().max(2))
            .x_label_formatter(&|x| label_at(&labels, *x))
            .y_desc(AMOUNT_AXIS)
            .draw()?;

        // Bars of one position share 80% of its width
        let width = 0.8 / series.len().max(1) as f64;
        for (n, s) in series.iter().enumerate() {
            let color = s.color;
            let offset = -0.4 + width * n as f64;
            chart
                .draw_series(s.values.iter().enumerate().map(|(i, v)| {
                    let left = i as f64 + offset;
                    Rectangle::new([(left, 0.0), (left + width, *v)], color.filled())
                }))?
                .label(s.name)
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], color.filled()));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;

        root.present()?;
    }
    encode_png(buffer, options)
}

fn encode_png(buffer: Vec<u8>, options: &ChartOptions) -> Result<Vec<u8>, ChartError> {
    let image = RgbImage::from_raw(options.width, options.height, buffer)
        .ok_or_else(|| ChartError::Draw("buffer size mismatch".to_string()))?;
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Tables;
    use crate::schema::SheetKind;

    #[test]
    fn empty_series_is_no_data() {
        let dashboard = Dashboard::build(&Tables::default());
        match render(&dashboard, SeriesKind::Budget, &ChartOptions::default()) {
            Err(ChartError::NoData(e)) => {
                assert_eq!(e.sheets, vec![SheetKind::Budget, SheetKind::Expenses])
            }
            other => panic!("expected NoData, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn value_range_includes_zero_and_negatives() {
        let series = vec![Series {
            name: "x",
            color: NET_WORTH,
            values: vec![-100.0, 50.0],
        }];
        let range = value_range(&series);
        assert!(range.start <= -100.0);
        assert!(range.end >= 50.0);
        assert_eq!(value_range(&[]), 0.0..1.0);
    }

    #[test]
    fn labels_only_on_whole_positions() {
        let labels = vec!["2024-01".to_string(), "2024-02".to_string()];
        assert_eq!(label_at(&labels, 1.0), "2024-02");
        assert_eq!(label_at(&labels, 0.5), "");
        assert_eq!(label_at(&labels, -1.0), "");
        assert_eq!(label_at(&labels, 5.0), "");
    }
}
