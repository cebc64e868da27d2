use anyhow::Result;
use clap::{Parser, Subcommand};
use rollcall_store::AttendanceDb;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance roster administration")]
struct Cli {
    /// Path to the attendance database
    #[arg(long, env = "ROLLCALL_DB_PATH", default_value = "attendance.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student or replace an existing enrollment
    Enroll {
        /// Unique student id
        id: String,
        /// Display name
        name: String,
        /// Path to the reference face image
        image: PathBuf,
    },
    /// List the enrolled roster in sweep order
    Roster,
    /// Show all attendance records, newest date first
    Attendance,
    /// Delete every attendance record. Destructive and unguarded.
    Clear,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db = AttendanceDb::open(&cli.db)?;

    match cli.command {
        Commands::Enroll { id, name, image } => {
            if !image.exists() {
                tracing::warn!(path = %image.display(), "reference image does not exist yet");
            }
            db.upsert_student(&id, &name, &image.to_string_lossy())?;
            println!("Added {name} to database");
        }
        Commands::Roster => {
            let roster = db.roster()?;
            if roster.is_empty() {
                println!("No students enrolled");
            }
            for student in roster {
                println!("{}\t{}\t{}", student.student_id, student.name, student.image_path);
            }
        }
        Commands::Attendance => {
            let rows = db.attendance()?;
            if rows.is_empty() {
                println!("No attendance records");
            }
            for row in rows {
                println!("{}\t{}\t{}\t{}", row.student_id, row.name, row.date, row.status);
            }
        }
        Commands::Clear => {
            let deleted = db.clear_attendance()?;
            println!("✅ All attendance records have been cleared! ({deleted} removed)");
        }
    }

    Ok(())
}
