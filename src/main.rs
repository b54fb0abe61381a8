mod categorizer;
mod cli;
mod db;
mod error;
mod extractor;
mod fmt;
mod intake;
mod models;
mod ocr;
mod receipts;
mod retry;
mod settings;
mod storage;
mod verifier;
mod workflow;

use clap::Parser;

use cli::{Cli, Commands, Identity};
use models::VerifiedData;

fn init_logging(level: &str) {
    let level = level.parse().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .format_module_path(false)
        .format_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&settings::load_settings().log_level);

    let identity = Identity {
        as_user: cli.as_user,
        role: cli.role,
    };

    let result = match cli.command {
        Commands::Init {
            data_dir,
            user,
            default_role,
        } => cli::init::run(data_dir, user, default_role),
        Commands::Status => cli::status::run(),
        Commands::Validate { file } => cli::scan::validate(&file),
        Commands::Ocr { file, json } => cli::scan::ocr(&file, json),
        Commands::Upload {
            file,
            trip,
            vehicle,
            description,
            defer_ocr,
        } => cli::upload::run(
            &identity,
            &file,
            trip.as_deref(),
            vehicle.as_deref(),
            description.as_deref(),
            defer_ocr,
        ),
        Commands::OcrPending => cli::upload::ocr_pending(),
        Commands::Pending {
            category,
            from_date,
            to_date,
            page,
            limit,
        } => cli::pending::run(&identity, category, from_date, to_date, page, limit),
        Commands::Show { id } => cli::show::run(&identity, &id),
        Commands::Approve {
            id,
            amount,
            currency,
            description,
            category,
            date,
            merchant,
            notes,
        } => cli::verify::approve(
            &identity,
            &id,
            VerifiedData {
                amount,
                currency,
                description,
                category,
                receipt_date: date,
                merchant,
            },
            notes,
        ),
        Commands::Reject { id, reason, notes } => cli::verify::reject(&identity, &id, reason, notes),
        Commands::BulkVerify { ids, action, reason } => {
            cli::verify::bulk(&identity, &ids, action, reason)
        }
        Commands::Review => cli::review::run(&identity),
        Commands::History { id } => cli::history::run(&identity, &id),
        Commands::Url { id, expires } => cli::url::run(&identity, &id, expires),
        Commands::Fetch { url, output } => cli::url::fetch(&url, &output),
        Commands::Export {
            from_date,
            to_date,
            output,
        } => cli::export::run(&identity, from_date, to_date, &output),
        Commands::Backup { output } => cli::backup::run(output),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
