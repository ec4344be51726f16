use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tch::nn::{self, ModuleT};
use tch::{Device, Tensor};

use super::error::InferenceError;
use super::mesonet::{MesoNet, SEED};
use super::preprocess::ImageTensor;

/// A constructed classifier. Weights are never modified after `build`.
pub struct LoadedModel {
    vs: nn::VarStore,
    // tch tensors are Send but not Sync; forward passes are serialised.
    net: Mutex<MesoNet>,
    weights_loaded: bool,
}

impl LoadedModel {
    pub fn build(weights_path: &Path) -> Result<Self, InferenceError> {
        let mut vs = nn::VarStore::new(Device::cuda_if_available());
        let net = MesoNet::seeded(&vs.root(), SEED);

        let weights_loaded = if weights_path.exists() {
            vs.load(weights_path)?;
            log::info!("Loaded classifier weights from {}", weights_path.display());
            true
        } else {
            log::warn!(
                "No weights file at {}; serving predictions from randomly initialised weights",
                weights_path.display()
            );
            false
        };

        Ok(Self {
            vs,
            net: Mutex::new(net),
            weights_loaded,
        })
    }

    pub fn weights_loaded(&self) -> bool {
        self.weights_loaded
    }

    /// Raw sigmoid output for a single preprocessed image.
    pub fn score(&self, image: &ImageTensor) -> Result<f64, InferenceError> {
        let shape: Vec<i64> = image.shape().iter().map(|&d| d as i64).collect();
        let pixels = image
            .as_slice()
            .ok_or_else(|| InferenceError::Internal("image tensor is not contiguous".into()))?;

        let input = Tensor::from_slice(pixels)
            .f_view(shape.as_slice())?
            .to_device(self.vs.device());
        let net = self
            .net
            .lock()
            .map_err(|_| InferenceError::Internal("model lock poisoned".into()))?;
        let output = tch::no_grad(|| net.forward_t(&input, false));
        drop(net);

        let score = output.f_double_value(&[0, 0])?;
        if !score.is_finite() {
            return Err(InferenceError::Internal(format!(
                "model produced a non-finite score: {}",
                score
            )));
        }
        Ok(score)
    }
}

/// Builds the classifier on first use and hands out the same instance afterwards.
pub struct ModelCache {
    weights_path: PathBuf,
    slot: Mutex<Option<Arc<LoadedModel>>>,
}

impl ModelCache {
    pub fn new(weights_path: impl Into<PathBuf>) -> Self {
        Self {
            weights_path: weights_path.into(),
            slot: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Result<Arc<LoadedModel>, InferenceError> {
        self.get_with(None)
    }

    /// `weights_override` is only consulted if the model has not been built yet.
    pub fn get_with(&self, weights_override: Option<&Path>) -> Result<Arc<LoadedModel>, InferenceError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| InferenceError::Internal("model cache lock poisoned".into()))?;

        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }

        let path = weights_override.unwrap_or(&self.weights_path);
        let model = Arc::new(LoadedModel::build(path)?);
        *slot = Some(model.clone());
        Ok(model)
    }

    /// `None` until the model has been built.
    pub fn weights_loaded(&self) -> Option<bool> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|m| m.weights_loaded()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("model-{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_image() -> ImageTensor {
        Array4::from_shape_fn((1, 256, 256, 3), |(_, y, x, c)| ((x + 2 * y + 3 * c) % 256) as f32)
    }

    fn assert_shareable<T: Send + Sync>() {}

    #[test]
    fn cache_can_be_shared_across_workers() {
        assert_shareable::<LoadedModel>();
        assert_shareable::<Arc<LoadedModel>>();
        assert_shareable::<ModelCache>();
    }

    #[test]
    fn concurrent_scoring_matches_sequential() {
        let cache = Arc::new(ModelCache::new("/no/such/weights.safetensors"));
        let expected = cache.get().unwrap().score(&sample_image()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.get().unwrap().score(&sample_image()).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn corrupt_weights_fail_construction() {
        let dir = scratch_dir();
        let weights = dir.join("weights.safetensors");
        std::fs::write(&weights, b"not a safetensors file").unwrap();

        let cache = ModelCache::new(&weights);
        let err = cache.get().err().unwrap();
        assert!(matches!(err, InferenceError::Model(_)));
        assert!(!err.is_client_error());
        assert_eq!(cache.weights_loaded(), None);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_weights_degrades_instead_of_failing() {
        let cache = ModelCache::new("/no/such/weights.safetensors");
        assert_eq!(cache.weights_loaded(), None);

        let model = cache.get().unwrap();
        assert!(!model.weights_loaded());
        assert_eq!(cache.weights_loaded(), Some(false));
    }

    #[test]
    fn get_returns_the_same_instance() {
        let cache = ModelCache::new("/no/such/weights.safetensors");
        let first = cache.get().unwrap();
        let second = cache.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn override_is_ignored_once_built() {
        let dir = scratch_dir();
        let weights = dir.join("weights.safetensors");
        LoadedModel::build(Path::new("/no/such/file")).unwrap().vs.save(&weights).unwrap();

        let cache = ModelCache::new("/no/such/weights.safetensors");
        let first = cache.get().unwrap();
        let second = cache.get_with(Some(&weights)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!second.weights_loaded());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn loads_saved_weights() {
        let dir = scratch_dir();
        let weights = dir.join("weights.safetensors");
        let original = LoadedModel::build(Path::new("/no/such/file")).unwrap();
        original.vs.save(&weights).unwrap();

        let cache = ModelCache::new(&weights);
        let restored = cache.get().unwrap();
        assert!(restored.weights_loaded());

        let image = sample_image();
        assert_eq!(original.score(&image).unwrap(), restored.score(&image).unwrap());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn scoring_is_deterministic() {
        let model = LoadedModel::build(Path::new("/no/such/file")).unwrap();
        let image = sample_image();

        let a = model.score(&image).unwrap();
        let b = model.score(&image).unwrap();
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn separately_built_models_agree() {
        let image = sample_image();
        let a = LoadedModel::build(Path::new("/no/such/file")).unwrap();
        let b = LoadedModel::build(Path::new("/no/such/file")).unwrap();
        assert_eq!(a.score(&image).unwrap(), b.score(&image).unwrap());
    }
}
