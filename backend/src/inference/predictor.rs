use std::path::Path;
use std::sync::Arc;

use shared::Label;

use super::error::InferenceError;
use super::model::ModelCache;
use super::preprocess::preprocess_image;

pub const THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Probability of `label`, rounded to 4 decimals.
    pub confidence: f64,
}

/// Maps a sigmoid score to the winning class and its probability mass.
pub fn classify_score(score: f64) -> Prediction {
    let (label, confidence) = if score >= THRESHOLD {
        (Label::Fake, score)
    } else {
        (Label::Real, 1.0 - score)
    };
    Prediction {
        label,
        confidence: round4(confidence),
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Clone)]
pub struct Predictor {
    models: Arc<ModelCache>,
}

impl Predictor {
    pub fn new(models: Arc<ModelCache>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &ModelCache {
        &self.models
    }

    pub fn predict(
        &self,
        image_path: &Path,
        weights_path: Option<&Path>,
    ) -> Result<Prediction, InferenceError> {
        let model = self.models.get_with(weights_path)?;
        let image = preprocess_image(image_path)?;
        let score = model.score(&image)?;
        log::debug!("Raw score {:.6} for {}", score, image_path.display());
        Ok(classify_score(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::path::PathBuf;

    #[test]
    fn boundary_score_is_fake() {
        assert_eq!(
            classify_score(0.5),
            Prediction {
                label: Label::Fake,
                confidence: 0.5
            }
        );
    }

    #[test]
    fn real_confidence_is_complement() {
        let p = classify_score(0.2);
        assert_eq!(p.label, Label::Real);
        assert_eq!(p.confidence, 0.8);
    }

    #[test]
    fn confidence_is_rounded_to_four_places() {
        let p = classify_score(0.912_345_6);
        assert_eq!(p.label, Label::Fake);
        assert_eq!(p.confidence, 0.9123);

        let p = classify_score(0.000_04);
        assert_eq!(p.label, Label::Real);
        assert_eq!(p.confidence, 1.0);
    }

    #[test]
    fn label_and_confidence_hold_across_the_range() {
        for i in 0..=1000 {
            let score = i as f64 / 1000.0;
            let p = classify_score(score);
            assert_eq!(p.label == Label::Fake, score >= THRESHOLD);
            assert!((0.5..=1.0).contains(&p.confidence), "score {}", score);
            let expected = if p.label == Label::Fake { score } else { 1.0 - score };
            assert!((p.confidence - expected).abs() <= 5e-5);
        }
    }

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("predictor-{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn same_image_twice_gives_identical_results() {
        let dir = scratch_dir();
        let path = dir.join("face.jpg");
        RgbImage::from_fn(300, 200, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]))
            .save_with_format(&path, ImageFormat::Jpeg)
            .unwrap();

        let predictor = Predictor::new(Arc::new(ModelCache::new(dir.join("missing.safetensors"))));
        let first = predictor.predict(&path, None).unwrap();
        let second = predictor.predict(&path, None).unwrap();
        assert_eq!(first, second);
        assert!((0.5..=1.0).contains(&first.confidence));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn predictor_is_shareable_across_workers() {
        fn assert_shareable<T: Send + Sync + 'static>() {}
        assert_shareable::<Predictor>();
        assert_shareable::<Arc<Predictor>>();
    }

    #[test]
    fn propagates_validation_errors() {
        let predictor = Predictor::new(Arc::new(ModelCache::new("/no/such/weights.safetensors")));
        let err = predictor.predict(Path::new("/no/such/image.png"), None).unwrap_err();
        assert!(err.is_client_error());
    }
}
