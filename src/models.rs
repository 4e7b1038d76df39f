use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

/// One row of a result table or chart series, keyed by column name in the
/// order the backend sent them.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: String,
    #[serde(default, alias = "unique")]
    pub unique_count: u64,
    #[serde(default, alias = "missing")]
    pub missing_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub can_aggregate: bool,
    #[serde(default)]
    pub can_filter: bool,
    #[serde(default)]
    pub sample_data: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingType {
    #[serde(rename = "Filter data")]
    Filter,
    #[serde(rename = "Aggregate data")]
    Aggregate,
    #[serde(rename = "Generate summary")]
    Summary,
}

impl ProcessingType {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingType::Filter => "Filter data",
            ProcessingType::Aggregate => "Aggregate data",
            ProcessingType::Summary => "Generate summary",
        }
    }
}

impl fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ProcessingType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "filter" | "filter data" => Ok(ProcessingType::Filter),
            "aggregate" | "aggregate data" => Ok(ProcessingType::Aggregate),
            "summary" | "generate summary" => Ok(ProcessingType::Summary),
            other => Err(AppError::InvalidInput(format!(
                "Unknown processing type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 5] = [
        AggregateFunction::Sum,
        AggregateFunction::Mean,
        AggregateFunction::Count,
        AggregateFunction::Min,
        AggregateFunction::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Mean => "mean",
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregateFunction::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown aggregation function: {}", s)))
    }
}

/// User choices in the option form. The aggregation function stays as typed
/// text until validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOptions {
    pub processing_type: ProcessingType,
    pub condition: String,
    pub group_by_column: String,
    pub aggregate_column: String,
    pub aggregate_function: String,
    pub is_sample_data: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            processing_type: ProcessingType::Filter,
            condition: String::new(),
            group_by_column: String::new(),
            aggregate_column: String::new(),
            aggregate_function: String::new(),
            is_sample_data: false,
        }
    }
}

/// A single edit to the option form.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionEdit {
    ProcessingType(ProcessingType),
    Condition(String),
    GroupByColumn(String),
    AggregateColumn(String),
    AggregateFunction(String),
    SampleData(bool),
}

impl OptionEdit {
    pub fn field(&self) -> Option<Field> {
        match self {
            OptionEdit::ProcessingType(_) => Some(Field::ProcessingType),
            OptionEdit::Condition(_) => Some(Field::Condition),
            OptionEdit::GroupByColumn(_) => Some(Field::GroupByColumn),
            OptionEdit::AggregateColumn(_) => Some(Field::AggregateColumn),
            OptionEdit::AggregateFunction(_) => Some(Field::AggregateFunction),
            OptionEdit::SampleData(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub progress: f64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Histogram,
    Bar,
    Line,
    Area,
    TwoBars,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDescriptor {
    pub chart_type: ChartType,
    #[serde(default)]
    pub chart_data: Vec<Row>,
    #[serde(default)]
    pub value_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultData {
    #[serde(default)]
    pub result: Option<Vec<Row>>,
    #[serde(default)]
    pub graphs: Vec<ChartDescriptor>,
}

/// JSON body of `POST /process-dataset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub processing_type: ProcessingType,
    pub is_sample_data: bool,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation_function: Option<AggregateFunction>,
}

impl ProcessRequest {
    /// Builds the payload carrying only the keys the selected operation uses.
    /// Call after validation; an unparsable function is dropped.
    pub fn from_options(options: &ProcessingOptions, session_id: &str) -> Self {
        let mut request = ProcessRequest {
            processing_type: options.processing_type,
            is_sample_data: options.is_sample_data,
            session_id: session_id.to_string(),
            condition: None,
            group_by_column: None,
            aggregation_column: None,
            aggregation_function: None,
        };

        match options.processing_type {
            ProcessingType::Filter => {
                request.condition = Some(options.condition.clone());
            }
            ProcessingType::Aggregate => {
                request.group_by_column = Some(options.group_by_column.clone());
                request.aggregation_column = Some(options.aggregate_column.clone());
                request.aggregation_function = options.aggregate_function.parse().ok();
            }
            ProcessingType::Summary => {}
        }

        request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    File,
    ProcessingType,
    Condition,
    GroupByColumn,
    AggregateColumn,
    AggregateFunction,
    Submission,
    Graph,
    Connection,
}

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Field::File => "file",
            Field::ProcessingType => "processingType",
            Field::Condition => "condition",
            Field::GroupByColumn => "groupByColumn",
            Field::AggregateColumn => "aggregateColumn",
            Field::AggregateFunction => "aggregateFunction",
            Field::Submission => "submission",
            Field::Graph => "graph",
            Field::Connection => "connection",
        }
    }

    /// Fields gated by option validation.
    pub const FORM: [Field; 5] = [
        Field::ProcessingType,
        Field::Condition,
        Field::GroupByColumn,
        Field::AggregateColumn,
        Field::AggregateFunction,
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    messages: BTreeMap<Field, String>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: Field, message: impl Into<String>) {
        self.messages.insert(field, message.into());
    }

    pub fn clear(&mut self, field: Field) {
        self.messages.remove(&field);
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.messages.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.messages.iter().map(|(field, msg)| (*field, msg.as_str()))
    }

    /// Replaces every field of `subset` with its value in `fresh`, clearing the
    /// ones `fresh` does not mention. Fields outside `subset` are kept.
    pub fn replace_subset(&mut self, subset: &[Field], fresh: &FieldErrors) {
        for field in subset {
            match fresh.get(*field) {
                Some(message) => self.set(*field, message),
                None => self.clear(*field),
            }
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .messages
            .iter()
            .map(|(field, msg)| format!("{}: {}", field.key(), msg))
            .collect();
        f.write_str(&parts.join("; "))
    }
}
