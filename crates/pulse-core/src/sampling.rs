use rand::Rng;

/// Decides whether one item is kept.
pub trait Sampler: Send + Sync {
    fn sample(&self) -> bool;

    /// Percentage in `0.0..=100.0`, if the sampler is rate based.
    fn sample_rate(&self) -> Option<f32> {
        None
    }
}

/// Keeps each item with probability `rate / 100`.
#[derive(Clone, Copy, Debug)]
pub struct RateBasedSampler {
    rate: f32,
}

impl RateBasedSampler {
    pub fn new(rate: f32) -> Self {
        Self {
            rate: rate.clamp(0.0, 100.0),
        }
    }
}

impl Sampler for RateBasedSampler {
    fn sample(&self) -> bool {
        if self.rate <= 0.0 {
            return false;
        }
        if self.rate >= 100.0 {
            return true;
        }
        rand::thread_rng().gen_range(0.0_f32..100.0) < self.rate
    }

    fn sample_rate(&self) -> Option<f32> {
        Some(self.rate)
    }
}

/// Always returns the same decision.
#[derive(Clone, Copy, Debug)]
pub struct ConstantSampler(pub bool);

impl Sampler for ConstantSampler {
    fn sample(&self) -> bool {
        self.0
    }

    fn sample_rate(&self) -> Option<f32> {
        Some(if self.0 { 100.0 } else { 0.0 })
    }
}
