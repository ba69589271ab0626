use ndarray::{Array2, Zip};

/// Keeps the IoU of an empty prediction against an empty target finite.
pub const IOU_EPSILON: f64 = 1e-7;

/// Intersection over union of `probs > threshold` against binary `masks`,
/// pooled over the whole batch.
pub fn batch_iou(probs: &[Array2<f32>], masks: &[Array2<f32>], threshold: f32) -> f64 {
    let mut inter = 0usize;
    let mut union = 0usize;
    for (p, m) in probs.iter().zip(masks) {
        Zip::from(p).and(m).for_each(|&pi, &mi| {
            let pred = pi > threshold;
            let truth = mi > 0.5;
            if pred && truth {
                inter += 1;
            }
            if pred || truth {
                union += 1;
            }
        });
    }
    inter as f64 / (union as f64 + IOU_EPSILON)
}

/// Mean of per-batch scores; 0 when nothing was evaluated.
pub fn mean_score(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}
