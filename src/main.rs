use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use agenda_calendar::{CalendarService, IcsExport};
use agenda_core::{Config, EngineError};
use agenda_store::SqliteStore;

#[derive(Parser)]
#[command(name = "agenda")]
#[command(about = "Agenda - appointment calendar sync and iCalendar export")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a user's Google Calendar connection
    Status { user: String },
    /// Print the Google consent URL for a user
    AuthUrl { user: String },
    /// Complete the OAuth flow with the code and state from the redirect
    Callback { code: String, state: String },
    /// Create or update an appointment's remote event
    Sync { appointment: String },
    /// Remove an appointment's remote event
    Unsync { appointment: String },
    /// Disconnect a user and unlink their appointments
    Disconnect { user: String },
    /// Write an .ics file
    Export {
        #[command(subcommand)]
        target: ExportTarget,
        /// Output path; defaults to stdout
        #[arg(short, long, global = true)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ExportTarget {
    /// A single appointment
    Appointment { id: String },
    /// A patient's upcoming appointments
    Patient { id: String },
    /// Appointments over whole clinic-local days
    Range {
        /// First day, YYYY-MM-DD
        from: NaiveDate,
        /// Last day, YYYY-MM-DD
        to: NaiveDate,
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    agenda_core::init()?;
    let cli = Cli::parse();

    let (config, _) = Config::load_validated()?;
    let store = SqliteStore::new(config.database_path())
        .with_context(|| format!("Opening {}", config.database_path().display()))?;
    let service = CalendarService::from_config(&config, Arc::new(store))?;

    if let Err(e) = run(&service, cli.command).await {
        tracing::error!("{:#}", e);
        match e.downcast_ref::<EngineError>() {
            Some(engine) => eprintln!("{}", engine.user_message()),
            None => eprintln!("{:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(service: &CalendarService, command: Commands) -> Result<()> {
    match command {
        Commands::Status { user } => {
            let status = service.integration_status(&user).await?;
            println!("connected: {}", status.connected);
            if let Some(state) = status.status {
                println!("status: {}", state.as_str());
            }
            if let Some(email) = status.email {
                println!("email: {}", email);
            }
            if let Some(name) = status.calendar_name {
                println!("calendar: {}", name);
            }
            if let Some(at) = status.last_sync_at {
                println!("last sync: {}", at.to_rfc3339());
            }
            if let Some(error) = status.error {
                println!("error: {}", error);
            }
        }
        Commands::AuthUrl { user } => println!("{}", service.authorization_url(&user)),
        Commands::Callback { code, state } => {
            let integration = service.handle_callback(&code, &state).await?;
            println!(
                "Connected {} to calendar {}",
                integration.user_id,
                integration.target_calendar()
            );
        }
        Commands::Sync { appointment } => {
            let outcome = service.sync(&appointment).await?;
            println!("{:?} {}", outcome.action, outcome.remote_event_id);
        }
        Commands::Unsync { appointment } => {
            if service.unsync(&appointment).await? {
                println!("Removed remote event of {}", appointment);
            } else {
                println!("{} has no remote event", appointment);
            }
        }
        Commands::Disconnect { user } => {
            let outcome = service.disconnect(&user).await?;
            println!(
                "Disconnected: {} ({} appointments unlinked)",
                outcome.was_connected, outcome.appointments_reset
            );
        }
        Commands::Export { target, output } => {
            let export = match target {
                ExportTarget::Appointment { id } => service.export_appointment_ics(&id).await?,
                ExportTarget::Patient { id } => service.export_patient_ics(&id).await?,
                ExportTarget::Range { from, to, user } => {
                    service.export_days_ics(from, to, user.as_deref()).await?
                }
            };
            write_export(&export, output)?;
        }
    }
    Ok(())
}

fn write_export(export: &IcsExport, output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            let path = if path.is_dir() {
                path.join(&export.file_name)
            } else {
                path
            };
            std::fs::write(&path, &export.content)
                .with_context(|| format!("Writing {}", path.display()))?;
            tracing::info!("Wrote {}", path.display());
        }
        None => print!("{}", export.content),
    }
    Ok(())
}
