//! Adamax: Adam with the second moment replaced by an exponentially weighted
//! infinity norm.

use candle_core::backprop::GradStore;
use candle_core::{Result, Var};
use candle_nn::Optimizer;

#[derive(Debug, Clone, Copy)]
pub struct ParamsAdamax {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for ParamsAdamax {
    fn default() -> Self {
        Self {
            lr: 0.002,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
        }
    }
}

#[derive(Debug)]
struct VarAdamax {
    var: Var,
    first_moment: Var,
    norm: Var,
}

#[derive(Debug)]
pub struct Adamax {
    vars: Vec<VarAdamax>,
    step_t: usize,
    params: ParamsAdamax,
}

impl Optimizer for Adamax {
    type Config = ParamsAdamax;

    fn new(vars: Vec<Var>, params: ParamsAdamax) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let first_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let norm = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarAdamax {
                    var,
                    first_moment,
                    norm,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let ParamsAdamax {
            lr,
            beta1,
            beta2,
            eps,
        } = self.params;
        let step_size = lr / (1.0 - beta1.powi(self.step_t as i32));

        for var in self.vars.iter() {
            let theta = &var.var;
            if let Some(g) = grads.get(theta) {
                let next_m = ((var.first_moment.as_tensor() * beta1)? + (g * (1.0 - beta1))?)?;
                let next_u = (var.norm.as_tensor() * beta2)?.maximum(&g.abs()?)?;
                let update = ((&next_m / (&next_u + eps)?)? * step_size)?;
                theta.set(&theta.sub(&update)?)?;
                var.first_moment.set(&next_m)?;
                var.norm.set(&next_u)?;
            }
        }
        Ok(())
    }
}
