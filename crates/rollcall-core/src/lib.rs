//! rollcall-core — Face-match attendance primitives.
//!
//! Low-light enhancement, SCRFD face detection, first-face extraction,
//! and ArcFace-based identity verification, all running via ONNX
//! Runtime for CPU inference.

pub mod detector;
pub mod embedder;
pub mod enhance;
pub mod extractor;
pub mod oracle;
pub mod types;

pub use detector::{FaceLocator, ScrfdDetector};
pub use embedder::FaceEmbedder;
pub use extractor::extract_face;
pub use oracle::{EmbeddingOracle, VerifyOracle};
pub use types::{BoundingBox, Embedding, FaceCrop, Verification};
