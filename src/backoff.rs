use rand::Rng;
use std::time::Duration;

/// Relative spread applied by [`jitter`].
pub const JITTER: f64 = 0.30;

/// Randomizes `d` by up to ±30% so that independent watchers do not poll or
/// retry in lockstep.
pub fn jitter(d: Duration) -> Duration {
    jitter_with(&mut rand::thread_rng(), d)
}

/// [`jitter`] drawing from a caller supplied generator.
pub fn jitter_with<R: Rng + ?Sized>(rng: &mut R, d: Duration) -> Duration {
    let factor = 1.0 + rng.gen_range(-JITTER..=JITTER);
    d.mul_f64(factor)
}
