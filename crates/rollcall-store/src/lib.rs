//! rollcall-store — durable roster and attendance ledger over SQLite.
//!
//! Two tables survive process restarts: `students` (the roster of
//! enrolled identities, `student_id` primary key) and `attendance`
//! (one row per student per calendar day, `(student_id, date)`
//! composite primary key). The composite key is the only guard against
//! duplicate records under concurrent scans; inserts are
//! insert-if-absent and a second insert for the same key is silently
//! absorbed.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;

/// The only status the ledger ever records. An identity with no row
/// for a given date is implicitly absent.
pub const STATUS_PRESENT: &str = "Present";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    student_id TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    image_path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    student_id TEXT NOT NULL,
    date       TEXT NOT NULL,
    status     TEXT NOT NULL,
    PRIMARY KEY (student_id, date)
);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad date in ledger: {0}")]
    BadDate(String),
}

/// An enrolled identity: unique id, display name, and the path of the
/// reference face image used for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub image_path: String,
}

/// One ledger row joined with the student's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRow {
    pub student_id: String,
    pub name: String,
    pub date: NaiveDate,
    pub status: String,
}

/// Handle over the roster and ledger tables.
pub struct AttendanceDb {
    conn: Connection,
}

impl AttendanceDb {
    /// Open (creating if needed) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Enroll a student, replacing name and reference image if the id
    /// already exists. Never duplicates a row.
    pub fn upsert_student(
        &self,
        student_id: &str,
        name: &str,
        image_path: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO students (student_id, name, image_path) VALUES (?, ?, ?)",
            params![student_id, name, image_path],
        )?;
        tracing::info!(student_id, name, image_path, "student enrolled");
        Ok(())
    }

    /// Roster snapshot in insertion (rowid) order. The matcher sweeps
    /// candidates in exactly this order.
    pub fn roster(&self) -> Result<Vec<Student>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT student_id, name, image_path FROM students ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(Student {
                student_id: row.get(0)?,
                name: row.get(1)?,
                image_path: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Record the student as present for the given day.
    ///
    /// Idempotent: a duplicate `(student_id, date)` insert is a no-op,
    /// never an error. Returns whether a new row was written.
    pub fn record_present(&self, student_id: &str, date: NaiveDate) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO attendance (student_id, date, status) VALUES (?, ?, ?)",
            params![student_id, date.format("%Y-%m-%d").to_string(), STATUS_PRESENT],
        )?;
        tracing::debug!(student_id, %date, inserted = changed > 0, "attendance recorded");
        Ok(changed > 0)
    }

    /// All attendance records joined with display names, newest date first.
    pub fn attendance(&self) -> Result<Vec<AttendanceRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.student_id, s.name, a.date, a.status
            FROM attendance a
            JOIN students s ON a.student_id = s.student_id
            ORDER BY a.date DESC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (student_id, name, date, status) = row?;
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|_| StoreError::BadDate(date))?;
            out.push(AttendanceRow { student_id, name, date, status });
        }
        Ok(out)
    }

    /// Delete every attendance record unconditionally. Operator-only;
    /// there is no confirmation step. Returns the number of rows removed.
    pub fn clear_attendance(&self) -> Result<usize, StoreError> {
        let deleted = self.conn.execute("DELETE FROM attendance", [])?;
        tracing::info!(deleted, "attendance ledger cleared");
        Ok(deleted)
    }
}
