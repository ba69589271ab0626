//! One-cycle learning-rate policy.

use std::f64::consts::PI;

/// Cosine warm-up from `max_lr / div_factor` to `max_lr` over the first
/// `pct_start` of the steps, then cosine annealing down to
/// `initial_lr / final_div_factor`.
#[derive(Debug, Clone)]
pub struct OneCycle {
    max_lr: f64,
    total_steps: usize,
    pct_start: f64,
    div_factor: f64,
    final_div_factor: f64,
}

fn cos_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}

impl OneCycle {
    pub fn new(max_lr: f64, total_steps: usize) -> Self {
        Self {
            max_lr,
            total_steps,
            pct_start: 0.3,
            div_factor: 25.0,
            final_div_factor: 1e4,
        }
    }

    pub fn initial_lr(&self) -> f64 {
        self.max_lr / self.div_factor
    }

    pub fn min_lr(&self) -> f64 {
        self.initial_lr() / self.final_div_factor
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        let last = self.total_steps.saturating_sub(1) as f64;
        let warm_end = (self.pct_start * self.total_steps as f64 - 1.0).max(0.0);
        let step = (step as f64).min(last);

        if warm_end > 0.0 && step <= warm_end {
            return cos_anneal(self.initial_lr(), self.max_lr, step / warm_end);
        }
        let span = last - warm_end;
        if span <= 0.0 {
            return self.max_lr;
        }
        cos_anneal(self.max_lr, self.min_lr(), (step - warm_end) / span)
    }
}
