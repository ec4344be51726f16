//! Lightweight MesoNet-style CNN for binary REAL/FAKE classification.
//!
//! Input is a batch of NHWC images with raw 0-255 pixel values; rescaling
//! happens inside the network. Output is a single sigmoid unit per image:
//! near 0.0 means REAL, near 1.0 means FAKE.

use std::sync::Mutex;

use tch::nn::{self, ModuleT};
use tch::Tensor;

pub const SEED: i64 = 42;

// libtorch's generator is process-global; seeding and variable creation
// must not interleave with another construction.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Seeds libtorch's generator. Only affects variable initialisation; the
/// eval-mode forward pass is deterministic once weights are fixed.
pub fn set_global_determinism(seed: i64) {
    tch::manual_seed(seed);
}

// Keras-style batch norm epsilon.
const BN_EPS: f64 = 1e-3;
const FLAT_FEATURES: i64 = 16 * 8 * 8;

#[derive(Debug)]
pub struct MesoNet {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
    conv3: nn::Conv2D,
    bn3: nn::BatchNorm,
    conv4: nn::Conv2D,
    bn4: nn::BatchNorm,
    fc1: nn::Linear,
    fc2: nn::Linear,
}

fn same_conv(p: nn::Path, c_in: i64, c_out: i64, ksize: i64) -> nn::Conv2D {
    let cfg = nn::ConvConfig {
        padding: ksize / 2,
        ..Default::default()
    };
    nn::conv2d(p, c_in, c_out, ksize, cfg)
}

fn batch_norm(p: nn::Path, channels: i64) -> nn::BatchNorm {
    let cfg = nn::BatchNormConfig {
        eps: BN_EPS,
        ..Default::default()
    };
    nn::batch_norm2d(p, channels, cfg)
}

impl MesoNet {
    /// Seeds the generator and creates all variables under `vs` as one step.
    pub fn seeded(vs: &nn::Path, seed: i64) -> Self {
        let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set_global_determinism(seed);
        Self::new(vs)
    }

    fn new(vs: &nn::Path) -> Self {
        Self {
            conv1: same_conv(vs / "conv1", 3, 8, 3),
            bn1: batch_norm(vs / "bn1", 8),
            conv2: same_conv(vs / "conv2", 8, 8, 5),
            bn2: batch_norm(vs / "bn2", 8),
            conv3: same_conv(vs / "conv3", 8, 16, 5),
            bn3: batch_norm(vs / "bn3", 16),
            conv4: same_conv(vs / "conv4", 16, 16, 5),
            bn4: batch_norm(vs / "bn4", 16),
            fc1: nn::linear(vs / "fc1", FLAT_FEATURES, 16, Default::default()),
            fc2: nn::linear(vs / "fc2", 16, 1, Default::default()),
        }
    }
}

impl ModuleT for MesoNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = xs.permute([0, 3, 1, 2]) * (1.0 / 255.0);
        xs.apply(&self.conv1)
            .relu()
            .apply_t(&self.bn1, train)
            .max_pool2d_default(2)
            .apply(&self.conv2)
            .relu()
            .apply_t(&self.bn2, train)
            .max_pool2d_default(2)
            .apply(&self.conv3)
            .relu()
            .apply_t(&self.bn3, train)
            .max_pool2d_default(2)
            .apply(&self.conv4)
            .relu()
            .apply_t(&self.bn4, train)
            .max_pool2d_default(4)
            .flatten(1, -1)
            .dropout(0.5, train)
            .apply(&self.fc1)
            .relu()
            .apply(&self.fc2)
            .sigmoid()
    }
}
