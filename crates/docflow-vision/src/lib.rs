//! Docflow Vision — page orientation correction and recognition routing.
//!
//! A page image flows through [`OrientationCorrector`] and is then handed to
//! the [`RecognitionRouter`], which runs the cheap local engine first and only
//! escalates to the vision-language engine for pages it judges complex.
//!
//! ```text
//!  bytes ─► auto_orient ─► secondary OSD? ─► fast engine ─► classify
//!                                                   │
//!                                 simple ◄──────────┴──────► complex ─► vision (timeout)
//!                                                                   │
//!                                                   fast | vision | hybrid merge
//! ```

pub mod engine;
pub mod orientation;
pub mod router;
pub mod tesseract;
pub mod types;
pub mod vision;

pub use engine::{RecognitionEngine, VisionEngine};
pub use orientation::{
    AutoOriented, DetectorFactory, OrientationCorrector, OrientationDetection, OrientationDetector,
};
pub use router::RecognitionRouter;
pub use tesseract::{TesseractEngine, TesseractOsd};
pub use types::{Complexity, EngineChoice, EngineKind, EngineOutput, RecognitionResult};
pub use vision::{estimate_vision_confidence, HttpVisionEngine};
