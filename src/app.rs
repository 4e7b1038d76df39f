use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{
    ChartDescriptor, DatasetMetadata, Field, OptionEdit, ProcessRequest, ResultData,
};
use crate::services::api_client::ApiClient;
use crate::services::charts::{render_png, ChartSpec};
use crate::services::file_check::{check_file, SelectedFile};
use crate::services::progress::ProgressChannel;
use crate::session::SessionId;
use crate::state::{FormState, RequestTicket, SharedState};

pub const NO_GRAPH: &str = "No graph available to download.";

/// Drives one processing session: upload, option edits, submission,
/// cancellation and export. All methods take `&self` so the app can sit in
/// an `Arc` and be cancelled from another task.
pub struct App {
    config: Config,
    session: SessionId,
    api: ApiClient,
    state: SharedState,
    progress: Mutex<Option<ProgressChannel>>,
    inflight: Mutex<Option<(RequestTicket, CancellationToken)>>,
}

impl App {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let api = ApiClient::new(&config)?;
        Ok(Self {
            config,
            session: SessionId::generate(),
            api,
            state: FormState::shared(),
            progress: Mutex::new(None),
            inflight: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn snapshot(&self) -> FormState {
        self.state.lock().clone()
    }

    /// Opens the progress channel. Calling it again while a channel is live
    /// does nothing; a channel that gave up is replaced.
    pub fn mount(&self) {
        let mut slot = self.progress.lock();
        if slot.as_ref().map_or(false, |channel| !channel.is_finished()) {
            return;
        }
        if slot.is_some() {
            tracing::info!("Reopening progress channel");
        }
        *slot = Some(ProgressChannel::open(
            &self.config,
            &self.session,
            self.state.clone(),
        ));
    }

    pub async fn unmount(&self) {
        self.cancel();
        let channel = self.progress.lock().take();
        if let Some(channel) = channel {
            channel.close().await;
        }
    }

    /// Registers the token for `ticket`. Callers hold the state lock so a
    /// concurrent `cancel` sees either no request or this token.
    fn arm(&self, ticket: RequestTicket) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some((_, previous)) = self.inflight.lock().replace((ticket, token.clone())) {
            previous.cancel();
        }
        token
    }

    fn disarm(&self, ticket: RequestTicket) {
        let mut slot = self.inflight.lock();
        if slot.as_ref().map_or(false, |(current, _)| *current == ticket) {
            *slot = None;
        }
    }

    pub async fn select_file(&self, file: SelectedFile) -> Result<DatasetMetadata, AppError> {
        self.state.lock().errors.clear(Field::File);
        if let Err(err) = check_file(&file, self.config.max_file_size) {
            tracing::warn!("Rejected {}: {}", file.name, err.detail());
            self.state.lock().errors.set(Field::File, err.detail());
            return Err(err);
        }

        let (ticket, is_sample_data, token) = self.start_upload(&file);
        let outcome = tokio::select! {
            _ = token.cancelled() => {
                self.disarm(ticket);
                return Err(AppError::Cancelled);
            }
            result = self.api.analyze_dataset(&file, &self.session, is_sample_data) => result,
        };
        self.disarm(ticket);

        let applied = self.state.lock().finish_upload(ticket, &outcome);
        if !applied {
            return Err(AppError::Cancelled);
        }
        outcome
    }

    fn start_upload(&self, file: &SelectedFile) -> (RequestTicket, bool, CancellationToken) {
        let mut state = self.state.lock();
        let is_sample_data = state.options.is_sample_data;
        state.reset();
        let ticket = state.begin_upload(file.clone());
        (ticket, is_sample_data, self.arm(ticket))
    }

    pub fn update_option(&self, edit: OptionEdit) {
        self.state.lock().update_option(edit);
    }

    pub async fn submit(&self) -> Result<ResultData, AppError> {
        let (ticket, request, token) = self.start_processing()?;
        let outcome = tokio::select! {
            _ = token.cancelled() => {
                self.disarm(ticket);
                return Err(AppError::Cancelled);
            }
            result = self.api.process_dataset(&request) => result,
        };
        self.disarm(ticket);

        let applied = self.state.lock().finish_processing(ticket, &outcome);
        if !applied {
            return Err(AppError::Cancelled);
        }
        outcome
    }

    fn start_processing(
        &self,
    ) -> Result<(RequestTicket, ProcessRequest, CancellationToken), AppError> {
        let mut state = self.state.lock();
        if state.status.in_flight() {
            return Err(AppError::InvalidInput(
                "A request is already in progress".to_string(),
            ));
        }
        state
            .validate_for_submit()
            .map_err(AppError::Validation)?;
        let request = ProcessRequest::from_options(&state.options, &self.session.as_string());
        let ticket = state.begin_processing();
        Ok((ticket, request, self.arm(ticket)))
    }

    /// Uploads `file`, applies `edits` to the freshly analysed form and
    /// submits it. Cancelling at any point ends the whole flow.
    pub async fn upload_and_process(
        &self,
        file: SelectedFile,
        edits: impl IntoIterator<Item = OptionEdit>,
    ) -> Result<ResultData, AppError> {
        self.select_file(file).await?;
        for edit in edits {
            self.update_option(edit);
        }
        self.submit().await
    }

    /// Aborts whichever request is in flight. Returns `false` when there
    /// was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        let cancelled = state.cancel();
        if let Some((_, token)) = self.inflight.lock().take() {
            token.cancel();
        }
        drop(state);
        if cancelled {
            tracing::info!("Request cancelled");
        }
        cancelled
    }

    /// Writes chart `index` of the current result as a PNG into `dir`.
    pub async fn export_chart(&self, index: usize, dir: impl AsRef<Path>) -> Result<PathBuf, AppError> {
        let (descriptor, aggregate_column) = {
            let state = self.state.lock();
            let descriptor = state
                .results
                .as_ref()
                .and_then(|results| results.graphs.get(index))
                .cloned();
            (descriptor, state.options.aggregate_column.clone())
        };

        let Some(descriptor) = descriptor else {
            self.state.lock().set_graph_error(NO_GRAPH);
            return Err(AppError::Export(NO_GRAPH.to_string()));
        };

        let fallback = (!aggregate_column.is_empty()).then_some(aggregate_column.as_str());
        match self.write_chart(index, &descriptor, fallback, dir.as_ref()).await {
            Ok(path) => {
                self.state.lock().errors.clear(Field::Graph);
                Ok(path)
            }
            Err(err) => {
                let message = format!("Failed to export chart: {}", err.detail());
                tracing::error!("{}", message);
                self.state.lock().set_graph_error(message.clone());
                Err(AppError::Export(message))
            }
        }
    }

    async fn write_chart(
        &self,
        index: usize,
        descriptor: &ChartDescriptor,
        fallback_value_key: Option<&str>,
        dir: &Path,
    ) -> Result<PathBuf, AppError> {
        let spec = ChartSpec::from_descriptor(descriptor, fallback_value_key)
            .ok_or_else(|| AppError::Export("unsupported chart type".to_string()))?;
        let png = render_png(&spec, self.config.chart_width, self.config.chart_height)?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!(
            "chart-{}-{}.png",
            index,
            chrono::Utc::now().timestamp_millis()
        ));
        tokio::fs::write(&path, &png).await?;

        tracing::info!("Exported chart {} to {} ({} bytes)", index, path.display(), png.len());
        Ok(path)
    }

    pub fn download_processed_data(&self) -> Result<(), AppError> {
        tracing::info!("Downloading processed data...");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChartType, ProcessingType};
    use crate::state::ProcessStatus;
    use tokio_test::{assert_err, assert_ok};

    fn offline_app() -> App {
        // nothing listens here; tests below never reach the network
        App::new(Config::with_api_url("http://127.0.0.1:9")).unwrap()
    }

    #[tokio::test]
    async fn submit_without_upload_asks_for_a_file() {
        let app = offline_app();
        let err = app.submit().await.unwrap_err();
        match err {
            AppError::Validation(errors) => {
                assert_eq!(errors.get(Field::File), Some("Please upload a file"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(app.snapshot().status, ProcessStatus::Idle);
    }

    #[tokio::test]
    async fn rejected_file_sets_file_error() {
        let app = offline_app();
        let file = SelectedFile {
            path: PathBuf::from("report.pdf"),
            name: "report.pdf".to_string(),
            declared_type: Some("application/pdf".to_string()),
            size: 10,
        };
        let err = assert_err!(app.select_file(file).await);
        assert!(matches!(err, AppError::FileRejected(_)));

        let state = app.snapshot();
        assert_eq!(
            state.errors.get(Field::File),
            Some("Please select a valid file type")
        );
        assert!(state.file.is_none());
    }

    #[tokio::test]
    async fn export_without_results_sets_graph_error() {
        let app = offline_app();
        let dir = tempfile::tempdir().unwrap();
        let err = assert_err!(app.export_chart(0, dir.path()).await);
        assert_eq!(err.detail(), NO_GRAPH);
        assert_eq!(app.snapshot().errors.get(Field::Graph), Some(NO_GRAPH));
    }

    #[tokio::test]
    async fn export_writes_png_for_installed_chart() {
        let app = offline_app();
        {
            let state = app.state();
            let mut state = state.lock();
            state.options.processing_type = ProcessingType::Aggregate;
            state.options.aggregate_column = "sales".to_string();
            state.results = Some(ResultData {
                result: None,
                graphs: vec![ChartDescriptor {
                    chart_type: ChartType::Area,
                    chart_data: serde_json::from_value(serde_json::json!([
                        {"name": "north", "sales": 3},
                        {"name": "south", "sales": 7}
                    ]))
                    .unwrap(),
                    value_key: String::new(),
                }],
            });
        }

        let dir = tempfile::tempdir().unwrap();
        let path = assert_ok!(app.export_chart(0, dir.path()).await);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("chart-0-"));
        assert!(name.ends_with(".png"));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
    }

    fn csv_file() -> SelectedFile {
        SelectedFile {
            path: PathBuf::from("sales.csv"),
            name: "sales.csv".to_string(),
            declared_type: Some("text/csv".to_string()),
            size: 10,
        }
    }

    #[tokio::test]
    async fn started_upload_is_cancellable_immediately() {
        let app = offline_app();
        let (_, _, token) = app.start_upload(&csv_file());
        assert_eq!(app.snapshot().status, ProcessStatus::Uploading);

        assert!(app.cancel());
        assert!(token.is_cancelled());
        assert_eq!(app.snapshot().status, ProcessStatus::Cancelled);
    }

    #[tokio::test]
    async fn started_processing_is_cancellable_immediately() {
        let app = offline_app();
        {
            let state = app.state();
            let mut state = state.lock();
            state.metadata = Some(DatasetMetadata::default());
            state.options.processing_type = ProcessingType::Summary;
        }
        let (_, _, token) = assert_ok!(app.start_processing());
        assert!(app.inflight.lock().is_some());

        assert!(app.cancel());
        assert!(token.is_cancelled());
        assert!(app.inflight.lock().is_none());
    }

    #[tokio::test]
    async fn cancel_with_nothing_in_flight() {
        let app = offline_app();
        assert!(!app.cancel());
        assert_ok!(app.download_processed_data());
    }
}
