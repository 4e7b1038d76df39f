use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AppError;
use crate::models::{
    DatasetMetadata, Field, FieldErrors, OptionEdit, ProcessingOptions, ProgressEvent, ResultData,
};
use crate::services::file_check::SelectedFile;
use crate::services::options::OptionChoices;
use crate::services::progress::{is_error_message, ProgressPhase};
use crate::services::validation;

pub const STATUS_UPLOADING: &str = "Uploading...";
pub const STATUS_ANALYSIS_COMPLETE: &str = "Analysis Complete";
pub const STATUS_PROCESSING: &str = "Processing...";
pub const STATUS_COMPLETED: &str = "Completed!";
pub const STATUS_CANCELLED: &str = "Cancelled";
pub const STATUS_ERROR: &str = "Error!";

/// The one owner of form state. Every component mutates it through the
/// methods below; the lock is never held across an `.await`.
pub type SharedState = Arc<Mutex<FormState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessStatus {
    #[default]
    Idle,
    Uploading,
    Processing,
    Completed,
    Cancelled,
    Error,
}

impl ProcessStatus {
    pub fn in_flight(&self) -> bool {
        matches!(self, ProcessStatus::Uploading | ProcessStatus::Processing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Success,
    Failure,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryAction {
    Cancel,
    StartProcessing,
    ProcessAgain,
}

impl PrimaryAction {
    pub fn label(&self) -> &'static str {
        match self {
            PrimaryAction::Cancel => "Cancel",
            PrimaryAction::StartProcessing => "Start Processing",
            PrimaryAction::ProcessAgain => "Process Again",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FormState {
    pub file: Option<SelectedFile>,
    pub metadata: Option<DatasetMetadata>,
    pub options: ProcessingOptions,
    pub upload_progress: f64,
    pub analysis_progress: f64,
    pub processing_progress: f64,
    pub status: ProcessStatus,
    pub status_message: String,
    pub results: Option<ResultData>,
    pub errors: FieldErrors,
    channel_generation: u64,
    active_request: Option<RequestTicket>,
    last_ticket: u64,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Drops everything tied to the current dataset. Channel and ticket
    /// counters survive so stale events stay recognisable, and so does a
    /// lost progress connection.
    pub fn reset(&mut self) {
        let mut errors = FieldErrors::new();
        if let Some(message) = self.errors.get(Field::Connection) {
            errors.set(Field::Connection, message);
        }
        *self = FormState {
            errors,
            channel_generation: self.channel_generation,
            last_ticket: self.last_ticket,
            ..FormState::default()
        };
    }

    pub fn choices(&self) -> Option<OptionChoices> {
        self.metadata.as_ref().map(OptionChoices::from_metadata)
    }

    pub fn update_option(&mut self, edit: OptionEdit) {
        if let Some(field) = edit.field() {
            self.errors.clear(field);
        }
        match edit {
            OptionEdit::ProcessingType(value) => self.options.processing_type = value,
            OptionEdit::Condition(value) => self.options.condition = value,
            OptionEdit::GroupByColumn(value) => self.options.group_by_column = value,
            OptionEdit::AggregateColumn(value) => self.options.aggregate_column = value,
            OptionEdit::AggregateFunction(value) => self.options.aggregate_function = value,
            OptionEdit::SampleData(value) => self.options.is_sample_data = value,
        }
    }

    fn next_ticket(&mut self) -> RequestTicket {
        self.last_ticket += 1;
        let ticket = RequestTicket(self.last_ticket);
        self.active_request = Some(ticket);
        ticket
    }

    fn accepts(&self, ticket: RequestTicket, expected: ProcessStatus) -> bool {
        self.active_request == Some(ticket) && self.status == expected
    }

    pub fn begin_upload(&mut self, file: SelectedFile) -> RequestTicket {
        self.file = Some(file);
        self.metadata = None;
        self.upload_progress = 0.0;
        self.analysis_progress = 0.0;
        self.status = ProcessStatus::Uploading;
        self.status_message = STATUS_UPLOADING.to_string();
        self.next_ticket()
    }

    /// Applies an upload outcome. Returns `false` when the ticket was
    /// superseded or cancelled and the outcome was dropped.
    pub fn finish_upload(
        &mut self,
        ticket: RequestTicket,
        outcome: &Result<DatasetMetadata, AppError>,
    ) -> bool {
        if !self.accepts(ticket, ProcessStatus::Uploading) {
            tracing::warn!("Discarding late upload response for {:?}", ticket);
            return false;
        }
        self.active_request = None;

        match outcome {
            Ok(metadata) => {
                let choices = OptionChoices::from_metadata(metadata);
                if !choices.allows(self.options.processing_type) {
                    self.options.processing_type = choices.default_type();
                }
                self.metadata = Some(metadata.clone());
                self.upload_progress = 100.0;
                self.analysis_progress = 100.0;
                self.status = ProcessStatus::Idle;
                self.status_message = STATUS_ANALYSIS_COMPLETE.to_string();
            }
            Err(err) => {
                self.errors
                    .set(Field::File, format!("Failed to analyze file: {}", err.detail()));
                self.upload_progress = 0.0;
                self.analysis_progress = 0.0;
                self.status = ProcessStatus::Error;
                self.status_message = STATUS_ERROR.to_string();
            }
        }
        true
    }

    /// Validates the fields relevant to the selected type, replacing that
    /// set's errors as one unit.
    pub fn validate_for_submit(&mut self) -> Result<(), FieldErrors> {
        let Some(choices) = self.choices() else {
            let mut errors = FieldErrors::new();
            errors.set(Field::File, "Please upload a file");
            self.errors.set(Field::File, "Please upload a file");
            return Err(errors);
        };

        match validation::validate(&self.options, &choices) {
            Ok(()) => {
                self.errors.replace_subset(&Field::FORM, &FieldErrors::new());
                Ok(())
            }
            Err(errors) => {
                self.errors.replace_subset(&Field::FORM, &errors);
                Err(errors)
            }
        }
    }

    pub fn begin_processing(&mut self) -> RequestTicket {
        self.processing_progress = 0.0;
        self.status = ProcessStatus::Processing;
        self.status_message = STATUS_PROCESSING.to_string();
        self.errors.clear(Field::Submission);
        self.next_ticket()
    }

    pub fn finish_processing(
        &mut self,
        ticket: RequestTicket,
        outcome: &Result<ResultData, AppError>,
    ) -> bool {
        if !self.accepts(ticket, ProcessStatus::Processing) {
            tracing::warn!("Discarding late processing response for {:?}", ticket);
            return false;
        }
        self.active_request = None;

        match outcome {
            Ok(data) => {
                self.results = Some(data.clone());
                self.processing_progress = 100.0;
                self.status = ProcessStatus::Completed;
                self.status_message = STATUS_COMPLETED.to_string();
            }
            Err(err) => {
                self.errors
                    .set(Field::Submission, format!("Failed to process: {}", err.detail()));
                self.processing_progress = 0.0;
                self.status = ProcessStatus::Error;
                self.status_message = STATUS_ERROR.to_string();
            }
        }
        true
    }

    /// Stops whatever request is in flight. Returns `false` if nothing was.
    pub fn cancel(&mut self) -> bool {
        if !self.status.in_flight() {
            return false;
        }
        if self.status == ProcessStatus::Uploading {
            self.upload_progress = 0.0;
            self.analysis_progress = 0.0;
        }
        self.active_request = None;
        self.processing_progress = 0.0;
        self.results = None;
        self.status = ProcessStatus::Cancelled;
        self.status_message = STATUS_CANCELLED.to_string();
        true
    }

    /// Starts a new progress-channel instance; events from older ones are
    /// discarded from here on.
    pub fn open_channel(&mut self) -> u64 {
        self.channel_generation += 1;
        self.channel_generation
    }

    pub fn apply_progress(&mut self, generation: u64, event: &ProgressEvent) -> bool {
        if generation != self.channel_generation {
            tracing::debug!("Dropping event from superseded channel {}", generation);
            return false;
        }
        if self.status == ProcessStatus::Cancelled {
            return false;
        }

        let progress = if event.progress.is_finite() {
            event.progress.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let mut applied = false;

        if is_error_message(&event.message) {
            self.errors.set(Field::Submission, event.message.clone());
            applied = true;
        }

        let counter = match (ProgressPhase::classify(&event.message), self.status) {
            (Some(ProgressPhase::Upload), ProcessStatus::Uploading) => {
                Some(&mut self.upload_progress)
            }
            (Some(ProgressPhase::Analysis), ProcessStatus::Uploading) => {
                Some(&mut self.analysis_progress)
            }
            (Some(ProgressPhase::Processing), ProcessStatus::Processing) => {
                Some(&mut self.processing_progress)
            }
            _ => None,
        };

        if let Some(counter) = counter {
            *counter = progress;
            self.status_message = event.message.clone();
            applied = true;
        } else if ProgressPhase::classify(&event.message).is_none() && self.status.in_flight() {
            self.status_message = event.message.clone();
            applied = true;
        }

        applied
    }

    /// Records that the progress channel gave up. Stays until a channel
    /// opens again.
    pub fn connection_lost(&mut self, message: &str) {
        self.errors.set(Field::Connection, message);
    }

    pub fn connection_restored(&mut self) {
        self.errors.clear(Field::Connection);
    }

    pub fn connection_error(&self) -> Option<&str> {
        self.errors.get(Field::Connection)
    }

    pub fn set_graph_error(&mut self, message: impl Into<String>) {
        self.errors.set(Field::Graph, message);
    }

    /// The counter the status panel should show for the current message.
    pub fn current_progress(&self) -> f64 {
        match ProgressPhase::classify(&self.status_message) {
            Some(ProgressPhase::Upload) => self.upload_progress,
            Some(ProgressPhase::Analysis) => self.analysis_progress,
            _ => self.processing_progress,
        }
    }

    pub fn progress_label(&self) -> &'static str {
        match ProgressPhase::classify(&self.status_message) {
            Some(ProgressPhase::Analysis) => "Analysis progress",
            Some(ProgressPhase::Upload) => "Upload progress",
            _ => "Processing progress",
        }
    }

    pub fn status_tone(&self) -> StatusTone {
        match self.status_message.as_str() {
            STATUS_COMPLETED | STATUS_ANALYSIS_COMPLETE => StatusTone::Success,
            STATUS_CANCELLED | STATUS_ERROR => StatusTone::Failure,
            _ => StatusTone::Neutral,
        }
    }

    pub fn primary_action(&self) -> Option<PrimaryAction> {
        if self.status.in_flight() {
            return Some(PrimaryAction::Cancel);
        }
        self.metadata.as_ref()?;
        match self.status {
            ProcessStatus::Idle => Some(PrimaryAction::StartProcessing),
            _ => Some(PrimaryAction::ProcessAgain),
        }
    }
}
