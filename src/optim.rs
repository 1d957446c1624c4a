//! Elementwise optimizer update rules over the network's flat
//! (values, gradients) arrays.
//!
//! The steppers know nothing about graphs: they consume exactly the two
//! slices `Network::parameters_mut` hands out. State buffers (momentum,
//! moment estimates) are sized lazily on the first step.

use crate::network::Network;

/// Stochastic gradient descent with optional classical momentum.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub lr: f32,
    pub momentum: f32,
    velocity: Vec<f32>,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self::with_momentum(lr, 0.0)
    }

    pub fn with_momentum(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocity: Vec::new(),
        }
    }

    pub fn step(&mut self, values: &mut [f32], grads: &[f32]) {
        if self.velocity.len() != values.len() {
            self.velocity = vec![0.0; values.len()];
        }
        for ((v, g), vel) in values.iter_mut().zip(grads).zip(self.velocity.iter_mut()) {
            *vel = self.momentum * *vel - self.lr * g;
            *v += *vel;
        }
    }
}

/// RMSProp: scales each update by a running estimate of the squared
/// gradient magnitude.
#[derive(Debug, Clone)]
pub struct RmsProp {
    pub lr: f32,
    pub decay: f32,
    pub eps: f32,
    sq_avg: Vec<f32>,
}

impl RmsProp {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            decay: 0.99,
            eps: 1e-8,
            sq_avg: Vec::new(),
        }
    }

    pub fn step(&mut self, values: &mut [f32], grads: &[f32]) {
        if self.sq_avg.len() != values.len() {
            self.sq_avg = vec![0.0; values.len()];
        }
        for ((v, g), sq) in values.iter_mut().zip(grads).zip(self.sq_avg.iter_mut()) {
            *sq = self.decay * *sq + (1.0 - self.decay) * g * g;
            *v -= self.lr * g / (sq.sqrt() + self.eps);
        }
    }
}

/// Adam with bias-corrected first and second moment estimates.
#[derive(Debug, Clone)]
pub struct Adam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    step_count: u64,
    first: Vec<f32>,
    second: Vec<f32>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step_count: 0,
            first: Vec::new(),
            second: Vec::new(),
        }
    }

    pub fn step(&mut self, values: &mut [f32], grads: &[f32]) {
        if self.first.len() != values.len() {
            self.first = vec![0.0; values.len()];
            self.second = vec![0.0; values.len()];
            self.step_count = 0;
        }
        self.step_count += 1;
        let correction1 = 1.0 - self.beta1.powi(self.step_count as i32);
        let correction2 = 1.0 - self.beta2.powi(self.step_count as i32);
        for (((v, g), m), s) in values
            .iter_mut()
            .zip(grads)
            .zip(self.first.iter_mut())
            .zip(self.second.iter_mut())
        {
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *s = self.beta2 * *s + (1.0 - self.beta2) * g * g;
            let m_hat = *m / correction1;
            let s_hat = *s / correction2;
            *v -= self.lr * m_hat / (s_hat.sqrt() + self.eps);
        }
    }
}

/// Dispatching wrapper so callers can hold one stepper of any kind.
#[derive(Debug, Clone)]
pub enum Optimizer {
    Sgd(Sgd),
    RmsProp(RmsProp),
    Adam(Adam),
}

impl Optimizer {
    pub fn step(&mut self, values: &mut [f32], grads: &[f32]) {
        match self {
            Optimizer::Sgd(o) => o.step(values, grads),
            Optimizer::RmsProp(o) => o.step(values, grads),
            Optimizer::Adam(o) => o.step(values, grads),
        }
    }

    /// Convenience: one update over a network's flattened parameters.
    pub fn step_network(&mut self, net: &mut Network) {
        let (values, grads) = net.parameters_mut();
        self.step(values, grads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sgd_moves_against_the_gradient() {
        let mut opt = Sgd::new(0.1);
        let mut values = [1.0, -1.0];
        let grads = [2.0, -2.0];
        opt.step(&mut values, &grads);
        assert_relative_eq!(values[0], 0.8);
        assert_relative_eq!(values[1], -0.8);
    }

    #[test]
    fn sgd_momentum_accumulates_velocity() {
        let mut opt = Sgd::with_momentum(0.1, 0.9);
        let mut values = [0.0];
        let grads = [1.0];
        opt.step(&mut values, &grads);
        assert_relative_eq!(values[0], -0.1);
        opt.step(&mut values, &grads);
        // velocity = 0.9 * -0.1 - 0.1 = -0.19
        assert_relative_eq!(values[0], -0.29, epsilon = 1e-6);
    }

    #[test]
    fn adam_first_step_is_lr_sized() {
        let mut opt = Adam::new(0.001);
        let mut values = [1.0];
        let grads = [3.0];
        opt.step(&mut values, &grads);
        // bias correction makes the first update ~lr regardless of scale
        assert_relative_eq!(values[0], 1.0 - 0.001, epsilon = 1e-5);
    }

    #[test]
    fn rmsprop_normalizes_step_size() {
        let mut opt = RmsProp::new(0.01);
        let mut small = [0.0];
        let mut large = [0.0];
        opt.step(&mut small, &[0.01]);
        let mut opt2 = RmsProp::new(0.01);
        opt2.step(&mut large, &[100.0]);
        // both updates land near lr / sqrt(1 - decay)
        assert_relative_eq!(small[0], large[0], epsilon = 1e-4);
    }
}
