//! Pure conversions from query results into widget view models.

use crate::config::PresentationConfig;
use crate::errors::AppError;
use crate::models::{
    AggregateResult, BarDatum, KpiCard, KpiSet, LineSeries, ParetoInsight, ParetoPoint, SeriesPoint,
    SqlValue, WidgetContent, WidgetState,
};
use std::collections::BTreeMap;

pub const EMPTY_MESSAGE: &str = "No data for selection";

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub fn empty_state() -> WidgetState {
    WidgetState::Empty {
        message: EMPTY_MESSAGE.to_string(),
    }
}

pub fn error_state(error: &AppError) -> WidgetState {
    WidgetState::Error {
        code: error.code().to_string(),
        message: error.to_string(),
        recoverable: error.is_recoverable(),
    }
}

pub fn month_name(month: i64) -> Option<&'static str> {
    usize::try_from(month)
        .ok()
        .and_then(|month| month.checked_sub(1))
        .and_then(|index| MONTH_NAMES.get(index).copied())
}

/// `1234567.891` → `1,234,567.89`
pub fn format_amount(value: f64) -> String {
    let rounded = format!("{:.2}", value.abs());
    let (whole, fraction) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));
    let sign = if value < 0.0 && rounded != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, group_thousands(whole), fraction)
}

pub fn format_currency(value: f64, prefix: &str) -> String {
    if prefix.is_empty() {
        format_amount(value)
    } else {
        format!("{} {}", prefix, format_amount(value))
    }
}

pub fn format_count(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let sign = if value < 0 { "-" } else { "" };
    format!("{}{}", sign, group_thousands(&digits))
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

pub fn render_kpis(kpis: &KpiSet, config: &PresentationConfig) -> WidgetState {
    if kpis.transaction_count == 0 {
        return empty_state();
    }
    let prefix = config.currency_prefix.as_str();
    let cards = vec![
        KpiCard {
            label: "Total Revenue".to_string(),
            value: kpis.total_revenue,
            display: format_currency(kpis.total_revenue, prefix),
        },
        KpiCard {
            label: "Transactions".to_string(),
            value: kpis.transaction_count as f64,
            display: format_count(kpis.transaction_count),
        },
        KpiCard {
            label: "Average Ticket".to_string(),
            value: kpis.average_ticket,
            display: format_currency(kpis.average_ticket, prefix),
        },
        KpiCard {
            label: "Total Units Sold".to_string(),
            value: kpis.units_sold as f64,
            display: format_count(kpis.units_sold),
        },
    ];
    WidgetState::Ready {
        content: WidgetContent::KpiCards { cards },
    }
}

fn bars(result: &AggregateResult, config: &PresentationConfig) -> Vec<BarDatum> {
    (0..result.len())
        .map(|row| {
            let value = result.f64_at(row, "total_sales").unwrap_or(0.0);
            BarDatum {
                label: label_at(result, row, "label"),
                value,
                display: format_currency(value, &config.currency_prefix),
            }
        })
        .collect()
}

fn label_at(result: &AggregateResult, row: usize, column: &str) -> String {
    match result.value(row, column) {
        Some(SqlValue::Null) | None => "(unknown)".to_string(),
        Some(value) => value.render(),
    }
}

/// Horizontal ranking of `label`/`total_sales` rows, best first.
pub fn render_ranking(result: &AggregateResult, y_title: &str, config: &PresentationConfig) -> WidgetState {
    if result.is_empty() {
        return empty_state();
    }
    WidgetState::Ready {
        content: WidgetContent::BarChart {
            x_title: format!("Total Sales ({})", config.currency_prefix),
            y_title: y_title.to_string(),
            horizontal: true,
            bars: bars(result, config),
        },
    }
}

pub fn render_category_donut(result: &AggregateResult, config: &PresentationConfig) -> WidgetState {
    if result.is_empty() {
        return empty_state();
    }
    WidgetState::Ready {
        content: WidgetContent::DonutChart {
            slices: bars(result, config),
        },
    }
}

/// One line per store city over `YYYY-MM` months. Months missing for a city are
/// left out of that series rather than plotted as zero.
pub fn render_trend(result: &AggregateResult, config: &PresentationConfig) -> WidgetState {
    if result.is_empty() {
        return empty_state();
    }
    let mut by_series: BTreeMap<String, Vec<SeriesPoint>> = BTreeMap::new();
    for row in 0..result.len() {
        let series = label_at(result, row, "series");
        by_series.entry(series).or_default().push(SeriesPoint {
            x: label_at(result, row, "month"),
            y: result.f64_at(row, "total_sales").unwrap_or(0.0),
        });
    }
    let series = by_series
        .into_iter()
        .map(|(name, mut points)| {
            points.sort_by(|a, b| a.x.cmp(&b.x));
            LineSeries { name, points }
        })
        .collect();
    WidgetState::Ready {
        content: WidgetContent::LineChart {
            x_title: "Month".to_string(),
            y_title: format!("Total Sales ({})", config.currency_prefix),
            series,
        },
    }
}

pub fn render_monthly_pattern(result: &AggregateResult, config: &PresentationConfig) -> WidgetState {
    if result.is_empty() {
        return empty_state();
    }
    let points = (0..result.len())
        .filter_map(|row| {
            let month = result.i64_at(row, "month")?;
            Some(SeriesPoint {
                x: month_name(month)?.to_string(),
                y: result.f64_at(row, "total_sales").unwrap_or(0.0),
            })
        })
        .collect();
    WidgetState::Ready {
        content: WidgetContent::LineChart {
            x_title: "Month".to_string(),
            y_title: format!("Total Sales ({})", config.currency_prefix),
            series: vec![LineSeries {
                name: "Sales".to_string(),
                points,
            }],
        },
    }
}

pub fn render_quarterly(result: &AggregateResult, config: &PresentationConfig) -> WidgetState {
    if result.is_empty() {
        return empty_state();
    }
    let bars = (0..result.len())
        .filter_map(|row| {
            let quarter = result.i64_at(row, "quarter")?;
            let value = result.f64_at(row, "total_sales").unwrap_or(0.0);
            Some(BarDatum {
                label: format!("Q{}", quarter),
                value,
                display: format_currency(value, &config.currency_prefix),
            })
        })
        .collect();
    WidgetState::Ready {
        content: WidgetContent::BarChart {
            x_title: "Quarter".to_string(),
            y_title: format!("Total Sales ({})", config.currency_prefix),
            horizontal: false,
            bars,
        },
    }
}

/// Ranks products by sales and accumulates their share of the total.
pub fn pareto_points(result: &AggregateResult) -> Vec<ParetoPoint> {
    let mut rows: Vec<(String, f64)> = (0..result.len())
        .map(|row| {
            (
                label_at(result, row, "label"),
                result.f64_at(row, "total_sales").unwrap_or(0.0),
            )
        })
        .collect();
    rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let total: f64 = rows.iter().map(|(_, sales)| sales).sum();
    let mut cumulative = 0.0;
    rows.into_iter()
        .enumerate()
        .map(|(index, (product, sales))| {
            cumulative += sales;
            ParetoPoint {
                rank: index + 1,
                product,
                sales,
                cumulative_sales: cumulative,
                cumulative_percentage: if total > 0.0 { cumulative / total * 100.0 } else { 0.0 },
            }
        })
        .collect()
}

/// Products whose cumulative share stays within `threshold` percent.
pub fn pareto_insight(points: &[ParetoPoint], threshold: f64) -> ParetoInsight {
    let products_in_head = points
        .iter()
        .filter(|point| point.cumulative_percentage <= threshold)
        .count();
    let total_products = points.len();
    let share_of_products = if total_products > 0 {
        products_in_head as f64 / total_products as f64 * 100.0
    } else {
        0.0
    };
    ParetoInsight {
        products_in_head,
        total_products,
        share_of_products,
        message: format!(
            "{} products ({:.1}%) generate {:.0}% of total sales.",
            products_in_head, share_of_products, threshold
        ),
    }
}

pub fn render_pareto(result: &AggregateResult, config: &PresentationConfig) -> WidgetState {
    let points = pareto_points(result);
    if points.is_empty() || points.iter().all(|point| point.sales <= 0.0) {
        return empty_state();
    }
    let insight = pareto_insight(&points, config.pareto_threshold);
    WidgetState::Ready {
        content: WidgetContent::ParetoChart {
            points,
            reference_percentage: config.pareto_threshold,
            insight,
        },
    }
}

pub fn render_table(result: &AggregateResult, config: &PresentationConfig) -> WidgetState {
    if result.is_empty() {
        return empty_state();
    }
    let amount_column = result.column_index("total_amount");
    let quantity_column = result.column_index("quantity");
    let rows = result
        .rows
        .iter()
        .map(|cells| {
            cells
                .iter()
                .enumerate()
                .map(|(index, cell)| match cell {
                    _ if Some(index) == amount_column => {
                        format_currency(cell.as_f64().unwrap_or(0.0), &config.currency_prefix)
                    }
                    _ if Some(index) == quantity_column => format_count(cell.as_i64().unwrap_or(0)),
                    other => other.render(),
                })
                .collect()
        })
        .collect();
    WidgetState::Ready {
        content: WidgetContent::Table {
            columns: result.columns.clone(),
            rows,
        },
    }
}

/// Header plus one line per row, RFC 4180 quoting.
pub fn to_csv(result: &AggregateResult) -> String {
    let mut out = String::new();
    push_csv_line(&mut out, result.columns.iter().map(String::as_str));
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(SqlValue::render).collect();
        push_csv_line(&mut out, cells.iter().map(String::as_str));
    }
    out
}

fn push_csv_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let line = cells
        .map(|cell| {
            if cell.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", cell.replace('"', "\"\""))
            } else {
                cell.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::{
        format_amount, format_count, format_currency, month_name, pareto_insight, pareto_points, render_kpis,
        render_pareto, render_ranking, render_table, render_trend, to_csv, EMPTY_MESSAGE,
    };
    use crate::config::PresentationConfig;
    use crate::models::{AggregateResult, KpiSet, SqlValue, WidgetContent, WidgetState};

    fn ranked(rows: &[(&str, f64)]) -> AggregateResult {
        AggregateResult {
            query: "product_pareto".to_string(),
            columns: vec!["label".to_string(), "total_sales".to_string()],
            rows: rows
                .iter()
                .map(|(label, sales)| vec![SqlValue::from(*label), SqlValue::Real(*sales)])
                .collect(),
        }
    }

    #[test]
    fn amounts_are_grouped_and_rounded() {
        assert_eq!(format_amount(216_000.0), "216,000.00");
        assert_eq!(format_amount(590.1639), "590.16");
        assert_eq!(format_amount(999.999), "1,000.00");
        assert_eq!(format_amount(-1234.5), "-1,234.50");
        assert_eq!(format_currency(12.0, "R$"), "R$ 12.00");
        assert_eq!(format_count(1_234_567), "1,234,567");
        assert_eq!(format_count(12), "12");
    }

    #[test]
    fn month_names_cover_calendar() {
        assert_eq!(month_name(1), Some("Jan"));
        assert_eq!(month_name(12), Some("Dec"));
        assert_eq!(month_name(0), None);
        assert_eq!(month_name(13), None);
    }

    #[test]
    fn zero_transactions_render_empty_state() {
        let state = render_kpis(&KpiSet::default(), &PresentationConfig::default());
        assert_eq!(
            state,
            WidgetState::Empty {
                message: EMPTY_MESSAGE.to_string()
            }
        );
    }

    #[test]
    fn kpi_cards_use_currency_prefix() {
        let kpis = KpiSet {
            total_revenue: 216_000.0,
            transaction_count: 366,
            average_ticket: 216_000.0 / 366.0,
            units_sold: 400,
        };
        let WidgetState::Ready {
            content: WidgetContent::KpiCards { cards },
        } = render_kpis(&kpis, &PresentationConfig::default())
        else {
            panic!("expected kpi cards");
        };
        assert_eq!(cards[0].display, "R$ 216,000.00");
        assert_eq!(cards[1].display, "366");
        assert_eq!(cards[2].display, "R$ 590.16");
    }

    #[test]
    fn empty_results_never_error() {
        let config = PresentationConfig::default();
        let empty = ranked(&[]);
        assert!(matches!(render_ranking(&empty, "Product", &config), WidgetState::Empty { .. }));
        assert!(matches!(render_trend(&empty, &config), WidgetState::Empty { .. }));
        assert!(matches!(render_pareto(&empty, &config), WidgetState::Empty { .. }));
        assert!(matches!(render_table(&empty, &config), WidgetState::Empty { .. }));
    }

    #[test]
    fn pareto_accumulates_share_in_rank_order() {
        let result = ranked(&[("C", 10.0), ("A", 60.0), ("B", 30.0)]);
        let points = pareto_points(&result);
        assert_eq!(points[0].product, "A");
        assert_eq!(points[0].rank, 1);
        assert!((points[1].cumulative_percentage - 90.0).abs() < 1e-9);
        assert!((points[2].cumulative_percentage - 100.0).abs() < 1e-9);

        let insight = pareto_insight(&points, 80.0);
        assert_eq!(insight.products_in_head, 1);
        assert_eq!(insight.total_products, 3);
        assert_eq!(insight.message, "1 products (33.3%) generate 80% of total sales.");
    }

    #[test]
    fn trend_groups_rows_per_city() {
        let result = AggregateResult {
            query: "monthly_trend_by_city".to_string(),
            columns: vec!["month".to_string(), "series".to_string(), "total_sales".to_string()],
            rows: vec![
                vec![SqlValue::from("2024-01"), SqlValue::from("Recife"), SqlValue::Real(10.0)],
                vec![SqlValue::from("2024-01"), SqlValue::from("Curitiba"), SqlValue::Real(5.0)],
                vec![SqlValue::from("2024-02"), SqlValue::from("Recife"), SqlValue::Real(7.0)],
            ],
        };
        let WidgetState::Ready {
            content: WidgetContent::LineChart { series, .. },
        } = render_trend(&result, &PresentationConfig::default())
        else {
            panic!("expected line chart");
        };
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name, "Curitiba");
        assert_eq!(series[1].points.len(), 2);
    }

    #[test]
    fn csv_quotes_special_cells() {
        let result = AggregateResult {
            query: "raw_records".to_string(),
            columns: vec!["product_name".to_string(), "total_amount".to_string()],
            rows: vec![vec![SqlValue::from("Desk, \"XL\""), SqlValue::Real(10.5)]],
        };
        assert_eq!(to_csv(&result), "product_name,total_amount\n\"Desk, \"\"XL\"\"\",10.5\n");
    }
}
