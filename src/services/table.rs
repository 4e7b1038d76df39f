use serde_json::Value;

use crate::models::{DatasetMetadata, ResultData, Row};
use crate::services::charts::ChartSpec;

const SAMPLE_ROWS: usize = 5;

/// Renders rows as a plain-text table. Headers come from the first row's
/// keys; `None` when there is nothing to show.
pub fn render_table(rows: Option<&[Row]>) -> Option<String> {
    let rows = rows?;
    let headers: Vec<&String> = rows.first()?.keys().collect();

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|h| row.get(h.as_str()).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_line = |values: Vec<&str>| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_line(headers.iter().map(|h| h.as_str()).collect()));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in &cells {
        lines.push(format_line(row.iter().map(String::as_str).collect()));
    }

    Some(lines.join("\n"))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn render_sample(metadata: &DatasetMetadata, limit: Option<usize>) -> Option<String> {
    let limit = limit.unwrap_or(SAMPLE_ROWS).min(metadata.sample_data.len());
    render_table(Some(&metadata.sample_data[..limit]))
}

pub fn describe_metadata(metadata: &DatasetMetadata) -> String {
    let mut lines = vec![format!(
        "{} columns (filter: {}, aggregate: {})",
        metadata.columns.len(),
        if metadata.can_filter { "yes" } else { "no" },
        if metadata.can_aggregate { "yes" } else { "no" },
    )];
    for column in &metadata.columns {
        lines.push(format!(
            "  {} [{}] unique={} missing={}",
            column.name, column.dtype, column.unique_count, column.missing_count
        ));
    }
    lines.join("\n")
}

/// Text report of a processing result: the table, then one line per chart.
pub fn describe_results(data: &ResultData, fallback_value_key: Option<&str>) -> String {
    let mut sections = Vec::new();
    if let Some(table) = render_table(data.result.as_deref()) {
        sections.push(table);
    }

    for (index, graph) in data.graphs.iter().enumerate() {
        match ChartSpec::from_descriptor(graph, fallback_value_key) {
            Some(spec) => {
                let keys: Vec<&str> = spec.series.iter().map(|s| s.key.as_str()).collect();
                sections.push(format!(
                    "chart {}: {:?} by {} [{}], {} points",
                    index,
                    spec.chart_type,
                    spec.x_key,
                    keys.join(", "),
                    spec.labels.len()
                ));
            }
            None => sections.push(format!("chart {}: unsupported chart type", index)),
        }
    }

    sections.join("\n\n")
}
