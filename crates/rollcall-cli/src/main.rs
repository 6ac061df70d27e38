use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn register(&self, label: &str, image: &[u8]) -> zbus::Result<bool>;
    fn train(&self) -> zbus::Result<String>;
    fn recognize(&self, image: &[u8]) -> zbus::Result<String>;
    fn log_attendance(&self, label: &str, confidence: f64, details: &str)
        -> zbus::Result<String>;
    fn get_logs(&self, date: &str) -> zbus::Result<String>;
    fn get_stats(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face sample for a person
    Register {
        /// Person label (e.g., "alice")
        label: String,
        /// Image file containing the person's face
        image: PathBuf,
    },
    /// Retrain the classifier on every stored sample
    Train,
    /// Recognize the face in an image and log attendance on a match
    Recognize {
        /// Image file to classify
        image: PathBuf,
    },
    /// Record attendance for a person directly
    Log {
        label: String,
        /// Distance reported for the match
        #[arg(short, long, default_value_t = 0.0)]
        confidence: f64,
        /// Ranked candidates as a JSON list
        #[arg(short, long, default_value = "[]")]
        details: String,
    },
    /// Show attendance records for a day
    Logs {
        /// Day to show (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Show dataset and model statistics
    Stats,
    /// Show daemon status
    Status,
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read image {}", path.display()))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_logs(raw: &str) -> Result<()> {
    let records: Vec<serde_json::Value> =
        serde_json::from_str(raw).context("daemon returned malformed JSON")?;
    if records.is_empty() {
        println!("No attendance recorded");
        return Ok(());
    }
    println!("{:<24} {:<10} {:>10}", "NAME", "TIME", "DISTANCE");
    for record in &records {
        let field = |key: &str| record[key].as_str().unwrap_or("N/A").to_string();
        println!(
            "{:<24} {:<10} {:>10}",
            field("name"),
            field("timestamp"),
            field("confidence")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("cannot connect to D-Bus")?;
    let proxy = AttendanceProxy::new(&connection)
        .await
        .context("rollcalld is not reachable")?;
    tracing::debug!(system = cli.system, "connected to rollcalld");

    match cli.command {
        Commands::Register { label, image } => {
            let bytes = read_image(&image)?;
            if proxy.register(&label, &bytes).await? {
                println!("Registered a sample for {label}");
            } else {
                println!("No face detected in {}", image.display());
            }
        }
        Commands::Train => {
            println!("{}", proxy.train().await?);
        }
        Commands::Recognize { image } => {
            let bytes = read_image(&image)?;
            print_json(&proxy.recognize(&bytes).await?)?;
        }
        Commands::Log {
            label,
            confidence,
            details,
        } => {
            let outcome = proxy.log_attendance(&label, confidence, &details).await?;
            println!("{label}: {outcome}");
        }
        Commands::Logs { date } => {
            let date = date.map(|d| d.format("%Y-%m-%d").to_string());
            print_logs(&proxy.get_logs(date.as_deref().unwrap_or("")).await?)?;
        }
        Commands::Stats => {
            print_json(&proxy.get_stats().await?)?;
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
    }

    Ok(())
}
