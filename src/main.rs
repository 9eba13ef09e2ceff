use std::fs::File;
use std::io::Read;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod inputter;
mod model;
mod ui;

use controller::Controller;
use model::{Model, Status};
use recview::domain::{RVConfig, RVError};
use recview::session::Upload;
use ui::RecordUI;

/// Browse the records of a CSV, SAS7BDAT or text directory dataset.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Dataset to open on start
    path: Option<String>,

    /// Read the dataset from stdin
    #[arg(long)]
    stdin: bool,

    /// File name of the stdin dataset, its extension selects the format
    #[arg(long, default_value = "stdin.csv", requires = "stdin")]
    name: String,

    /// Write logs to this file, the terminal is owned by the UI
    #[arg(long)]
    log_file: Option<String>,

    /// Event poll interval in ms
    #[arg(long, default_value_t = 100)]
    poll: u64,

    /// Lines shown for long text fields
    #[arg(long, default_value_t = 4)]
    textarea_height: u16,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(args.log_file.as_deref()) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let result = run(args);
    ratatui::restore();
    match result {
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn init_logging(log_file: Option<&str>) -> Result<(), RVError> {
    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        None => None,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn run(args: Args) -> Result<(), RVError> {
    info!("Starting recview");
    let cfg = RVConfig::default()
        .event_poll_time(args.poll)
        .textarea_height(args.textarea_height);

    // Stdin has to be drained before the terminal switches to raw mode.
    let upload = if args.stdin {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes)?;
        Some(Upload {
            name: args.name.clone(),
            bytes,
        })
    } else {
        None
    };

    let mut terminal = ratatui::init();
    let size = terminal.size()?;
    let mut model = Model::init(&cfg, size.width as usize, size.height as usize)?;
    if upload.is_some() || args.path.is_some() {
        model.load(upload, args.path.as_deref());
    }

    let mut ui = RecordUI::new(model.config());
    let controller = Controller::new(&cfg);

    while model.status != Status::QUITTING {
        terminal.draw(|f| ui.draw(&model, f))?;

        let message = controller.handle_event(&model)?;
        model.update(message)?;
    }

    info!("Bye");
    Ok(())
}
