// Temperature softmax and top-k / top-p (nucleus) sampling.
//
// The sampler sees a probability vector that has already been temperature-
// scaled, softmaxed, and masked, so suppressed IDs are exactly zero. It:
//
// 1. keeps the `k` largest entries (ties go to the lower index),
// 2. walks them in descending order and drops every entry whose cumulative
//    mass *before* it already exceeds `p`,
// 3. renormalizes the survivors and inverts the CDF at one uniform draw.
//
// If floating-point rounding leaves the draw past the last cumulative value,
// the last surviving entry is returned. Accumulation is done in f64.

use cadenza_prng::SessionRng;

/// Softmax of `logits / temperature`. `-inf` (an ID the model rules out) and
/// NaN contribute zero. `+inf` marks an ID as certain: the `+inf` entries
/// share all the mass equally. If no logit is usable the result is all zeros,
/// which the sampler reports as "nothing to sample".
pub fn softmax_with_temperature(logits: &[f32], temperature: f32) -> Vec<f32> {
    let certain = logits.iter().filter(|&&l| l == f32::INFINITY).count();
    if certain > 0 {
        let share = 1.0 / certain as f32;
        return logits
            .iter()
            .map(|&l| if l == f32::INFINITY { share } else { 0.0 })
            .collect();
    }

    let max = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; logits.len()];
    }
    let t = f64::from(temperature);
    let exps: Vec<f64> = logits
        .iter()
        .map(|&l| {
            if l.is_finite() {
                ((f64::from(l) - f64::from(max)) / t).exp()
            } else {
                0.0
            }
        })
        .collect();
    let sum: f64 = exps.iter().sum();
    if !(sum.is_finite() && sum > 0.0) {
        return vec![0.0; logits.len()];
    }
    exps.iter().map(|&e| (e / sum) as f32).collect()
}

/// Top-k then top-p truncation followed by one inverse-CDF draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NucleusSampler {
    pub top_p: f32,
    pub top_k: usize,
}

impl NucleusSampler {
    pub fn new(top_p: f32, top_k: usize) -> Self {
        Self { top_p, top_k }
    }

    /// Index of the sampled entry, or `None` when every entry is zero.
    pub fn sample(&self, probs: &[f32], rng: &mut SessionRng) -> Option<usize> {
        let candidates = self.truncate(probs);
        if candidates.is_empty() {
            return None;
        }
        let total: f64 = candidates.iter().map(|&(_, p)| p).sum();
        let draw = rng.next_f64() * total;
        let mut cumulative = 0.0;
        for &(idx, p) in &candidates {
            cumulative += p;
            if draw < cumulative {
                return Some(idx);
            }
        }
        candidates.last().map(|&(idx, _)| idx)
    }

    /// The surviving `(index, probability)` pairs in descending probability
    /// order, not yet renormalized. Zero entries never survive.
    pub fn truncate(&self, probs: &[f32]) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = probs
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p > 0.0 && p.is_finite())
            .map(|(i, &p)| (i, f64::from(p)))
            .collect();
        // Stable sort keeps lower indices first among equal probabilities.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(self.top_k.max(1));

        // Cumulative mass is taken from the masked vector as-is, not rescaled
        // to the top-k subset.
        let top_p = f64::from(self.top_p);
        let mut before = 0.0;
        let mut keep = 0;
        for &(_, p) in &ranked {
            if before > top_p {
                break;
            }
            before += p;
            keep += 1;
        }
        ranked.truncate(keep);
        ranked
    }
}
