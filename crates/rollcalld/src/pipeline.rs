//! The attendance matcher: normalize → extract → sweep roster → record.
//!
//! One scan is processed start to finish on the calling thread. The
//! roster is swept strictly in store (insertion) order and the first
//! candidate the oracle verifies wins — there is no search for a best
//! match across the whole roster. Two visually similar enrollees can
//! therefore match nondeterministically depending on stored order and
//! oracle sensitivity; this is a documented latency-over-optimality
//! trade, not a bug.

use chrono::NaiveDate;
use rollcall_core::detector::DetectorError;
use rollcall_core::{enhance, extract_face, FaceLocator, VerifyOracle};
use rollcall_store::{AttendanceDb, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one scan. Semantic failures share the same channel as
/// success; callers look for the ✅ marker rather than parsing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Capture bytes were not a readable image. The extractor is never
    /// invoked and the ledger is untouched.
    UndecodableImage,
    /// Detection ran and found nothing — a normal outcome, not an error.
    NoFaceDetected,
    /// The sweep exhausted the roster without a positive verification.
    /// Indistinguishable from "every comparison failed internally".
    NotRecognized,
    /// Attendance recorded (or already on file for today).
    Marked { name: String },
}

impl ScanOutcome {
    /// Human-readable response message for the capture boundary.
    pub fn message(&self) -> String {
        match self {
            Self::UndecodableImage => "❌ Could not decode image".to_string(),
            Self::NoFaceDetected => "❌ No face detected".to_string(),
            Self::NotRecognized => "❌ Face not recognized in database".to_string(),
            Self::Marked { name } => format!("✅ Attendance marked for {name}"),
        }
    }
}

/// Long-lived pipeline over injected detection and verification
/// services. Constructed once at startup; a scan borrows it mutably,
/// so scans on one pipeline are strictly sequential.
pub struct AttendancePipeline {
    locator: Box<dyn FaceLocator + Send>,
    oracle: Box<dyn VerifyOracle + Send>,
}

impl AttendancePipeline {
    pub fn new(
        locator: Box<dyn FaceLocator + Send>,
        oracle: Box<dyn VerifyOracle + Send>,
    ) -> Self {
        Self { locator, oracle }
    }

    /// Run the full pipeline against today's date.
    pub fn scan(
        &mut self,
        db: &AttendanceDb,
        image_bytes: &[u8],
    ) -> Result<ScanOutcome, PipelineError> {
        self.scan_on(db, image_bytes, chrono::Local::now().date_naive())
    }

    /// Run the full pipeline, recording attendance under `today`.
    pub fn scan_on(
        &mut self,
        db: &AttendanceDb,
        image_bytes: &[u8],
        today: NaiveDate,
    ) -> Result<ScanOutcome, PipelineError> {
        let frame = match image::load_from_memory(image_bytes) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!(error = %e, "capture bytes are not a decodable image");
                return Ok(ScanOutcome::UndecodableImage);
            }
        };

        let frame = enhance::normalize(&frame);

        let Some(probe) = extract_face(&frame, self.locator.as_mut())? else {
            return Ok(ScanOutcome::NoFaceDetected);
        };

        // Point-in-time snapshot; no isolation beyond the single query.
        let roster = db.roster()?;
        tracing::debug!(candidates = roster.len(), "sweeping roster");

        for student in &roster {
            let reference = match image::open(&student.image_path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(
                        student_id = %student.student_id,
                        path = %student.image_path,
                        error = %e,
                        "reference image unreadable, skipping candidate"
                    );
                    continue;
                }
            };

            match self.oracle.verify(&probe.image, &reference) {
                Ok(v) if v.verified => {
                    // First match wins; stop the sweep immediately.
                    db.record_present(&student.student_id, today)?;
                    tracing::info!(
                        student_id = %student.student_id,
                        name = %student.name,
                        distance = v.distance,
                        %today,
                        "attendance marked"
                    );
                    return Ok(ScanOutcome::Marked { name: student.name.clone() });
                }
                Ok(v) => {
                    tracing::debug!(
                        student_id = %student.student_id,
                        distance = v.distance,
                        "not verified"
                    );
                }
                Err(e) => {
                    // One bad comparison must not abort the sweep over
                    // the rest of the roster.
                    tracing::warn!(
                        student_id = %student.student_id,
                        error = %e,
                        "verification failed for candidate, continuing sweep"
                    );
                }
            }
        }

        Ok(ScanOutcome::NotRecognized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rollcall_core::embedder::EmbedderError;
    use rollcall_core::oracle::OracleError;
    use rollcall_core::types::{BoundingBox, Verification};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Locator that reports one centered face per frame and counts calls.
    struct OneFaceLocator {
        calls: Arc<AtomicUsize>,
    }

    impl FaceLocator for OneFaceLocator {
        fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (w, h) = frame.dimensions();
            Ok(vec![BoundingBox {
                x: w as f32 / 4.0,
                y: h as f32 / 4.0,
                width: w as f32 / 2.0,
                height: h as f32 / 2.0,
                confidence: 0.95,
                landmarks: None,
            }])
        }
    }

    struct NoFaceLocator;

    impl FaceLocator for NoFaceLocator {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(vec![])
        }
    }

    /// Oracle that replays a script, one entry per verify call in sweep order.
    struct ScriptedOracle {
        script: VecDeque<Result<Verification, OracleError>>,
        calls: Arc<AtomicUsize>,
    }

    impl VerifyOracle for ScriptedOracle {
        fn verify(
            &mut self,
            _probe: &RgbImage,
            _reference: &RgbImage,
        ) -> Result<Verification, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .pop_front()
                .unwrap_or(Ok(Verification { verified: false, distance: 1.0 }))
        }
    }

    fn verified() -> Result<Verification, OracleError> {
        Ok(Verification { verified: true, distance: 0.2 })
    }

    fn not_verified() -> Result<Verification, OracleError> {
        Ok(Verification { verified: false, distance: 0.9 })
    }

    fn oracle_error() -> Result<Verification, OracleError> {
        Err(OracleError::Embedding(EmbedderError::InferenceFailed("boom".into())))
    }

    fn png_bytes(color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(64, 64, Rgb(color));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    struct Fixture {
        db: AttendanceDb,
        pipeline: AttendancePipeline,
        detect_calls: Arc<AtomicUsize>,
        verify_calls: Arc<AtomicUsize>,
        _refs: tempfile::TempDir,
    }

    /// Roster of `names` with readable reference images, a one-face
    /// locator, and an oracle replaying `script`.
    fn fixture(names: &[(&str, &str)], script: Vec<Result<Verification, OracleError>>) -> Fixture {
        let refs = tempfile::tempdir().unwrap();
        let db = AttendanceDb::open_in_memory().unwrap();
        for (id, name) in names {
            let path = refs.path().join(format!("{id}.png"));
            RgbImage::from_pixel(32, 32, Rgb([9, 9, 9])).save(&path).unwrap();
            db.upsert_student(id, name, &path.to_string_lossy()).unwrap();
        }

        let detect_calls = Arc::new(AtomicUsize::new(0));
        let verify_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = AttendancePipeline::new(
            Box::new(OneFaceLocator { calls: detect_calls.clone() }),
            Box::new(ScriptedOracle { script: script.into(), calls: verify_calls.clone() }),
        );

        Fixture { db, pipeline, detect_calls, verify_calls, _refs: refs }
    }

    #[test]
    fn test_undecodable_bytes_skip_extractor_and_ledger() {
        let mut fx = fixture(&[("03", "Amarnath Ghosh")], vec![verified()]);

        let outcome = fx
            .pipeline
            .scan_on(&fx.db, b"not an image", day("2024-03-01"))
            .unwrap();

        assert_eq!(outcome, ScanOutcome::UndecodableImage);
        assert_eq!(fx.detect_calls.load(Ordering::SeqCst), 0);
        assert!(fx.db.attendance().unwrap().is_empty());
    }

    #[test]
    fn test_no_face_regardless_of_roster() {
        for names in [&[][..], &[("03", "A"), ("13", "D"), ("05", "B")][..]] {
            let fx = fixture(names, vec![verified()]);
            let mut pipeline = AttendancePipeline::new(
                Box::new(NoFaceLocator),
                Box::new(ScriptedOracle {
                    script: VecDeque::new(),
                    calls: Arc::new(AtomicUsize::new(0)),
                }),
            );
            let outcome = pipeline
                .scan_on(&fx.db, &png_bytes([100, 100, 100]), day("2024-03-01"))
                .unwrap();
            assert_eq!(outcome, ScanOutcome::NoFaceDetected);
        }
    }

    #[test]
    fn test_empty_roster_is_not_recognized() {
        let mut fx = fixture(&[], vec![]);
        let outcome = fx
            .pipeline
            .scan_on(&fx.db, &png_bytes([100, 100, 100]), day("2024-03-01"))
            .unwrap();
        assert_eq!(outcome, ScanOutcome::NotRecognized);
    }

    #[test]
    fn test_match_records_exactly_one_row_for_today() {
        let mut fx = fixture(&[("03", "Amarnath Ghosh")], vec![verified()]);
        let today = day("2024-03-01");

        let outcome = fx.pipeline.scan_on(&fx.db, &png_bytes([100, 100, 100]), today).unwrap();

        assert_eq!(outcome, ScanOutcome::Marked { name: "Amarnath Ghosh".into() });
        assert_eq!(outcome.message(), "✅ Attendance marked for Amarnath Ghosh");
        let rows = fx.db.attendance().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, "03");
        assert_eq!(rows[0].date, today);
    }

    #[test]
    fn test_first_match_wins_in_roster_order() {
        // Both A and B would verify; the sweep must stop at A.
        let mut fx = fixture(
            &[("A", "Early Enrollee"), ("B", "Later Enrollee")],
            vec![verified(), verified()],
        );

        let outcome = fx
            .pipeline
            .scan_on(&fx.db, &png_bytes([100, 100, 100]), day("2024-03-01"))
            .unwrap();

        assert_eq!(outcome, ScanOutcome::Marked { name: "Early Enrollee".into() });
        assert_eq!(fx.verify_calls.load(Ordering::SeqCst), 1);
        let rows = fx.db.attendance().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, "A");
    }

    #[test]
    fn test_oracle_error_does_not_abort_sweep() {
        // A's comparison blows up, B verifies: B is recorded.
        let mut fx = fixture(
            &[("A", "Broken Comparison"), ("B", "Good Match")],
            vec![oracle_error(), verified()],
        );

        let outcome = fx
            .pipeline
            .scan_on(&fx.db, &png_bytes([100, 100, 100]), day("2024-03-01"))
            .unwrap();

        assert_eq!(outcome, ScanOutcome::Marked { name: "Good Match".into() });
        let rows = fx.db.attendance().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, "B");
    }

    #[test]
    fn test_all_errors_look_like_not_recognized() {
        let mut fx = fixture(
            &[("A", "One"), ("B", "Two")],
            vec![oracle_error(), oracle_error()],
        );

        let outcome = fx
            .pipeline
            .scan_on(&fx.db, &png_bytes([100, 100, 100]), day("2024-03-01"))
            .unwrap();

        assert_eq!(outcome, ScanOutcome::NotRecognized);
        assert!(fx.db.attendance().unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_reference_skipped_without_oracle_call() {
        let refs = tempfile::tempdir().unwrap();
        let db = AttendanceDb::open_in_memory().unwrap();
        // A's reference image does not exist; B's does.
        db.upsert_student("A", "Missing Ref", "/nonexistent/ref.png").unwrap();
        let b_path = refs.path().join("b.png");
        RgbImage::from_pixel(32, 32, Rgb([9, 9, 9])).save(&b_path).unwrap();
        db.upsert_student("B", "Has Ref", &b_path.to_string_lossy()).unwrap();

        let verify_calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = AttendancePipeline::new(
            Box::new(OneFaceLocator { calls: Arc::new(AtomicUsize::new(0)) }),
            Box::new(ScriptedOracle {
                script: vec![verified()].into(),
                calls: verify_calls.clone(),
            }),
        );

        let outcome = pipeline
            .scan_on(&db, &png_bytes([100, 100, 100]), day("2024-03-01"))
            .unwrap();

        // The single scripted "verified" went to B, not A.
        assert_eq!(outcome, ScanOutcome::Marked { name: "Has Ref".into() });
        assert_eq!(verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(db.attendance().unwrap()[0].student_id, "B");
    }

    #[test]
    fn test_same_day_rescan_keeps_one_row() {
        let mut fx = fixture(
            &[("03", "Amarnath Ghosh")],
            vec![verified(), verified()],
        );
        let today = day("2024-03-01");

        let first = fx.pipeline.scan_on(&fx.db, &png_bytes([100, 100, 100]), today).unwrap();
        let second = fx.pipeline.scan_on(&fx.db, &png_bytes([100, 100, 100]), today).unwrap();

        // Second scan still reports success, ledger keeps one row.
        assert!(first.message().contains('✅'));
        assert!(second.message().contains('✅'));
        assert_eq!(fx.db.attendance().unwrap().len(), 1);
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(ScanOutcome::NoFaceDetected.message(), "❌ No face detected");
        assert_eq!(
            ScanOutcome::NotRecognized.message(),
            "❌ Face not recognized in database"
        );
        assert_eq!(ScanOutcome::UndecodableImage.message(), "❌ Could not decode image");
    }
}
