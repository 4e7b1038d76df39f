use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use data_processor::models::{OptionEdit, ProcessingType};
use data_processor::services::file_check::SelectedFile;
use data_processor::services::table;
use data_processor::{load_config, logging, App, AppError};

/// Upload a dataset to the analysis backend, then filter, aggregate or
/// summarize it.
#[derive(Parser, Debug)]
#[command(name = "data-processor", version)]
struct Cli {
    /// CSV, Parquet, Excel or text file to upload
    file: PathBuf,

    /// Stop after the dataset has been analysed
    #[arg(long)]
    analyze_only: bool,

    /// filter, aggregate or summary
    #[arg(long = "type", value_name = "TYPE")]
    processing_type: Option<ProcessingType>,

    /// Filter condition, e.g. "price > 100"
    #[arg(long)]
    condition: Option<String>,

    #[arg(long)]
    group_by: Option<String>,

    #[arg(long)]
    aggregate_column: Option<String>,

    /// sum, mean, count, min or max
    #[arg(long)]
    function: Option<String>,

    /// Let the backend work on a sample of the file
    #[arg(long)]
    sample: bool,

    /// Directory to write a chart PNG into
    #[arg(long, value_name = "DIR")]
    export: Option<PathBuf>,

    /// Which chart to export
    #[arg(long, default_value_t = 0)]
    chart: usize,
}

impl Cli {
    fn edits(&self) -> Vec<OptionEdit> {
        let mut edits = Vec::new();
        if let Some(processing_type) = self.processing_type {
            edits.push(OptionEdit::ProcessingType(processing_type));
        }
        if let Some(condition) = &self.condition {
            edits.push(OptionEdit::Condition(condition.clone()));
        }
        if let Some(column) = &self.group_by {
            edits.push(OptionEdit::GroupByColumn(column.clone()));
        }
        if let Some(column) = &self.aggregate_column {
            edits.push(OptionEdit::AggregateColumn(column.clone()));
        }
        if let Some(function) = &self.function {
            edits.push(OptionEdit::AggregateFunction(function.clone()));
        }
        edits
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = load_config()?;

    let app = Arc::new(App::new(config)?);
    app.mount();

    let interrupt = {
        let app = app.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling");
                app.cancel();
            }
        })
    };
    let ticker = tokio::spawn(report_progress(app.clone()));

    let outcome = run(&app, &cli).await;
    interrupt.abort();
    ticker.abort();
    app.unmount().await;

    if let Err(err) = outcome {
        let state = app.snapshot();
        if state.errors.is_empty() {
            eprintln!("Error: {}", err.detail());
        }
        for (field, message) in state.errors.iter() {
            eprintln!("{}: {}", field.key(), message);
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(app: &App, cli: &Cli) -> Result<(), AppError> {
    if cli.sample {
        app.update_option(OptionEdit::SampleData(true));
    }

    let file = SelectedFile::from_path(&cli.file).await?;
    let metadata = app.select_file(file).await?;
    println!("{}", table::describe_metadata(&metadata));
    if let Some(sample) = table::render_sample(&metadata, None) {
        println!("\nSample data:\n{}", sample);
    }
    if cli.analyze_only {
        return Ok(());
    }

    for edit in cli.edits() {
        app.update_option(edit);
    }
    let results = app.submit().await?;
    println!(
        "\n{}\n{}",
        app.snapshot().status_message,
        table::describe_results(&results, cli.aggregate_column.as_deref())
    );

    if let Some(dir) = &cli.export {
        let path = app.export_chart(cli.chart, dir).await?;
        println!("Saved chart to {}", path.display());
    }

    Ok(())
}

/// Prints the active progress counter whenever it moves.
async fn report_progress(app: Arc<App>) {
    let mut last: Option<(String, i64)> = None;
    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let current = {
            let state = app.state();
            let state = state.lock();
            if !state.status.in_flight() {
                continue;
            }
            (
                format!("{} ({})", state.status_message, state.progress_label()),
                state.current_progress().round() as i64,
            )
        };
        if last.as_ref() != Some(&current) {
            eprintln!("{}: {}%", current.0, current.1);
            last = Some(current);
        }
    }
}
