use crate::models::{AggregateFunction, DatasetMetadata, ProcessingType};

const NUMERIC_DTYPES: [&str; 2] = ["int64", "float64"];
const CATEGORICAL_DTYPES: [&str; 3] = ["object", "category", "string"];

/// What the option form may offer for one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionChoices {
    pub processing_types: Vec<ProcessingType>,
    pub numeric_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub aggregate_functions: Vec<AggregateFunction>,
}

impl OptionChoices {
    pub fn from_metadata(metadata: &DatasetMetadata) -> Self {
        let mut processing_types = Vec::with_capacity(3);
        if metadata.can_filter {
            processing_types.push(ProcessingType::Filter);
        }
        if metadata.can_aggregate {
            processing_types.push(ProcessingType::Aggregate);
        }
        processing_types.push(ProcessingType::Summary);

        let columns_of = |dtypes: &[&str]| {
            metadata
                .columns
                .iter()
                .filter(|col| dtypes.contains(&col.dtype.as_str()))
                .map(|col| col.name.clone())
                .collect::<Vec<_>>()
        };

        Self {
            processing_types,
            numeric_columns: columns_of(&NUMERIC_DTYPES),
            categorical_columns: columns_of(&CATEGORICAL_DTYPES),
            aggregate_functions: AggregateFunction::ALL.to_vec(),
        }
    }

    pub fn allows(&self, processing_type: ProcessingType) -> bool {
        self.processing_types.contains(&processing_type)
    }

    pub fn default_type(&self) -> ProcessingType {
        self.processing_types
            .first()
            .copied()
            .unwrap_or(ProcessingType::Summary)
    }
}
