//! Single-face extraction policy.
//!
//! Produces at most one [`FaceCrop`] per frame. The selection policy is
//! deliberately simple: take the first candidate the locator returns.
//! Multi-face scenes are not disambiguated; with several faces in view
//! the choice follows detector ordering. This is a documented
//! simplification, not a correctness guarantee.

use crate::detector::{DetectorError, FaceLocator};
use crate::types::{BoundingBox, FaceCrop};
use image::RgbImage;

/// Candidate selection strategy: index into the ordered detection list.
pub type SelectionPolicy = fn(&[BoundingBox]) -> Option<usize>;

/// Default policy — index 0 of the ordered detection list.
pub fn first_candidate(candidates: &[BoundingBox]) -> Option<usize> {
    if candidates.is_empty() { None } else { Some(0) }
}

/// Locate the primary face in a frame and crop it out verbatim.
///
/// Returns `Ok(None)` when no face is present — a normal outcome the
/// caller reports as "no face detected", not an error. Box coordinates
/// are clamped to frame bounds before cropping; no padding or margin
/// is applied.
pub fn extract_face(
    frame: &RgbImage,
    locator: &mut dyn FaceLocator,
) -> Result<Option<FaceCrop>, DetectorError> {
    extract_face_with(frame, locator, first_candidate)
}

/// [`extract_face`] with an explicit selection policy.
pub fn extract_face_with(
    frame: &RgbImage,
    locator: &mut dyn FaceLocator,
    policy: SelectionPolicy,
) -> Result<Option<FaceCrop>, DetectorError> {
    let candidates = locator.detect(frame)?;

    let Some(idx) = policy(&candidates) else {
        tracing::debug!(candidates = candidates.len(), "no face selected");
        return Ok(None);
    };
    let bbox = candidates[idx].clone();

    let (fw, fh) = frame.dimensions();
    let x0 = bbox.x.max(0.0).round() as u32;
    let y0 = bbox.y.max(0.0).round() as u32;
    let x1 = ((bbox.x + bbox.width).round().max(0.0) as u32).min(fw);
    let y1 = ((bbox.y + bbox.height).round().max(0.0) as u32).min(fh);

    if x0 >= x1 || y0 >= y1 {
        tracing::warn!(
            x = bbox.x,
            y = bbox.y,
            width = bbox.width,
            height = bbox.height,
            "degenerate face box, treating as no detection"
        );
        return Ok(None);
    }

    let image = image::imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    tracing::debug!(
        x = x0,
        y = y0,
        width = x1 - x0,
        height = y1 - y0,
        confidence = bbox.confidence,
        "face extracted"
    );

    Ok(Some(FaceCrop { image, bbox }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Locator stub returning a fixed candidate list.
    struct FixedLocator(Vec<BoundingBox>);

    impl FaceLocator for FixedLocator {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingLocator;

    impl FaceLocator for FailingLocator {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_no_candidates_yields_none() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([10, 20, 30]));
        let mut locator = FixedLocator(vec![]);
        let crop = extract_face(&frame, &mut locator).unwrap();
        assert!(crop.is_none());
    }

    #[test]
    fn test_first_candidate_wins_over_larger_later_one() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([10, 20, 30]));
        let mut locator = FixedLocator(vec![
            bbox(10.0, 10.0, 20.0, 20.0, 0.9),
            bbox(0.0, 0.0, 90.0, 90.0, 0.8),
        ]);
        let crop = extract_face(&frame, &mut locator).unwrap().unwrap();
        assert_eq!(crop.image.dimensions(), (20, 20));
        assert!((crop.bbox.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_box_clamped_to_frame_bounds() {
        let frame = RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]));
        // Box spills over the right/bottom edge and starts negative
        let mut locator = FixedLocator(vec![bbox(-5.0, 40.0, 30.0, 30.0, 0.7)]);
        let crop = extract_face(&frame, &mut locator).unwrap().unwrap();
        assert_eq!(crop.image.dimensions(), (25, 10));
    }

    #[test]
    fn test_degenerate_box_yields_none() {
        let frame = RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]));
        // Entirely outside the frame
        let mut locator = FixedLocator(vec![bbox(60.0, 60.0, 10.0, 10.0, 0.7)]);
        let crop = extract_face(&frame, &mut locator).unwrap();
        assert!(crop.is_none());
    }

    #[test]
    fn test_locator_error_propagates() {
        let frame = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let result = extract_face(&frame, &mut FailingLocator);
        assert!(result.is_err());
    }

    #[test]
    fn test_crop_pixels_match_source_region() {
        let frame = RgbImage::from_fn(10, 10, |x, y| Rgb([x as u8, y as u8, 0]));
        let mut locator = FixedLocator(vec![bbox(2.0, 3.0, 4.0, 4.0, 0.9)]);
        let crop = extract_face(&frame, &mut locator).unwrap().unwrap();
        assert_eq!(crop.image.get_pixel(0, 0).0, [2, 3, 0]);
        assert_eq!(crop.image.get_pixel(3, 3).0, [5, 6, 0]);
    }
}
