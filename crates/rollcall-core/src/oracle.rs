//! Identity verification oracle.
//!
//! Answers one question per call: do a probe crop and a reference image
//! show the same person? The pipeline treats this as an external
//! capability behind [`VerifyOracle`], so the sweep logic never depends
//! on which embedding model backs it.

use crate::detector::FaceLocator;
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::Verification;
use image::RgbImage;
use thiserror::Error;

/// Cosine-distance operating point for ArcFace same-identity decisions.
const ARCFACE_DISTANCE_THRESHOLD: f32 = 0.68;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),
}

/// Same/different-identity decision over an image pair.
///
/// Implementations must tolerate a reference image without a cleanly
/// detectable face (relaxed detection) instead of failing outright —
/// detection already happened once upstream. Internal failures surface
/// as `Err`, which the sweep logs and treats as "not verified" for
/// that candidate only.
pub trait VerifyOracle {
    fn verify(
        &mut self,
        probe: &RgbImage,
        reference: &RgbImage,
    ) -> Result<Verification, OracleError>;
}

/// ArcFace-embedding oracle: embeds both images and thresholds the
/// cosine distance.
///
/// Owns its own detection session for locating the face inside
/// reference images; the probe is assumed to already be a crop.
pub struct EmbeddingOracle {
    locator: Box<dyn FaceLocator + Send>,
    embedder: FaceEmbedder,
    threshold: f32,
}

impl EmbeddingOracle {
    pub fn new(locator: Box<dyn FaceLocator + Send>, embedder: FaceEmbedder) -> Self {
        Self::with_threshold(locator, embedder, ARCFACE_DISTANCE_THRESHOLD)
    }

    pub fn with_threshold(
        locator: Box<dyn FaceLocator + Send>,
        embedder: FaceEmbedder,
        threshold: f32,
    ) -> Self {
        Self { locator, embedder, threshold }
    }
}

impl VerifyOracle for EmbeddingOracle {
    fn verify(
        &mut self,
        probe: &RgbImage,
        reference: &RgbImage,
    ) -> Result<Verification, OracleError> {
        let probe_embedding = self.embedder.embed(probe)?;

        let ref_crop = reference_crop(reference, self.locator.as_mut());
        let ref_embedding = self.embedder.embed(&ref_crop)?;

        let distance = probe_embedding.distance(&ref_embedding);
        let verified = distance <= self.threshold;
        tracing::debug!(distance, verified, "oracle comparison");

        Ok(Verification { verified, distance })
    }
}

/// Crop the first detected face out of a reference image, falling back
/// to the whole image when detection finds nothing or fails (relaxed
/// mode). A poorly framed reference degrades accuracy for that one
/// candidate; it must not abort the comparison.
fn reference_crop(reference: &RgbImage, locator: &mut dyn FaceLocator) -> RgbImage {
    let candidates = match locator.detect(reference) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "reference detection failed, embedding whole image");
            return reference.clone();
        }
    };

    let Some(bbox) = candidates.first() else {
        tracing::debug!("no face in reference, embedding whole image");
        return reference.clone();
    };

    let (fw, fh) = reference.dimensions();
    let x0 = bbox.x.max(0.0).round() as u32;
    let y0 = bbox.y.max(0.0).round() as u32;
    let x1 = ((bbox.x + bbox.width).round().max(0.0) as u32).min(fw);
    let y1 = ((bbox.y + bbox.height).round().max(0.0) as u32).min(fh);

    if x0 >= x1 || y0 >= y1 {
        return reference.clone();
    }

    image::imageops::crop_imm(reference, x0, y0, x1 - x0, y1 - y0).to_image()
}
