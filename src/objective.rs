use tch::nn::{self, OptimizerConfig, VarStore};
use tch::{Kind, Reduction, Tensor};

use super::error::Result;
use super::hparams::HyperParams;
use super::neuralnet::{DualNet, Mode, NetOutput};
use super::preprocessing::Batch;

const INITIAL_LEARNING_RATE : f64 = 1e-2;
const DECAY_STEPS : f64 = 1e7;
const DECAY_RATE : f64 = 0.1;

/// exponential decay, 1e-2 at step 0 and x0.1 every 1e7 steps.
pub fn learning_rate(global_step : u64) -> f64 {
    INITIAL_LEARNING_RATE * DECAY_RATE.powf(global_step as f64 / DECAY_STEPS)
}

/// mean cross entropy between `logits` and the target distributions `pi`.
pub fn policy_cost(logits : &Tensor, pi : &Tensor) -> Tensor {
    let b = logits.size()[0] as f64;
    -(pi * logits.log_softmax(-1, Kind::Float)).sum(Kind::Float) / b
}

pub fn value_cost(value : &Tensor, target : &Tensor) -> Tensor {
    value.mse_loss(target, Reduction::Mean)
}

/// trainable variables whose name does not mention "bias", sorted by name.
pub fn regularized_variables(vs : &VarStore) -> Vec<(String, Tensor)> {
    let mut vars = vs.variables().into_iter()
        .filter(|(name, t)| t.requires_grad() && !name.contains("bias"))
        .collect::<Vec<_>>();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars
}

/// Loss tensors of one batch.
pub struct Losses {
    pub policy : Tensor,
    pub value : Tensor,
    pub l2 : Tensor,
    pub combined : Tensor,
}

/// Scalars of one optimization step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRecord {
    pub policy_cost : f64,
    pub value_cost : f64,
    pub l2_cost : f64,
    pub combined_cost : f64,
    pub global_step : u64,
}

/// Objective and momentum optimizer bound to one VarStore.
pub struct TrainOps {
    opt : nn::Optimizer,
    l2_vars : Vec<Tensor>,
    l2_strength : f64,
}

impl TrainOps {
    pub fn new(vs : &VarStore, hp : &HyperParams) -> Result<TrainOps> {
        let opt = nn::Sgd {
            momentum : hp.momentum,
            dampening : 0.0,
            wd : 0.0,
            nesterov : false,
        }.build(vs, INITIAL_LEARNING_RATE)?;
        let l2_vars = regularized_variables(vs).into_iter().map(|(_, t)| t).collect();
        Ok(TrainOps { opt, l2_vars, l2_strength : hp.l2_strength })
    }

    pub fn l2_cost(&self) -> Tensor {
        let sums = self.l2_vars.iter()
            .map(|w| w.square().sum(Kind::Float))
            .collect::<Vec<Tensor>>();
        Tensor::stack(&sums, 0).sum(Kind::Float) * self.l2_strength
    }

    pub fn losses(&self, out : &NetOutput, batch : &Batch) -> Losses {
        let policy = policy_cost(&out.logits, &batch.pi);
        let value = value_cost(&out.value, &batch.value);
        let l2 = self.l2_cost();
        let combined = &policy + &value + &l2;
        Losses { policy, value, l2, combined }
    }

    /// one update on `batch`. batch norm running averages are refreshed by the
    /// forward pass, before the gradient step.
    pub fn step(&mut self, net : &DualNet, batch : &Batch, global_step : &mut u64)
            -> Result<StepRecord> {
        let out = net.forward(&batch.pos, Mode::Training);
        let losses = self.losses(&out, batch);
        self.opt.set_lr(learning_rate(*global_step));
        self.opt.backward_step(&losses.combined);
        *global_step += 1;
        Ok(StepRecord {
            policy_cost : losses.policy.f_double_value(&[])?,
            value_cost : losses.value.f_double_value(&[])?,
            l2_cost : losses.l2.f_double_value(&[])?,
            combined_cost : losses.combined.f_double_value(&[])?,
            global_step : *global_step,
        })
    }
}

#[test]
fn test_learning_rate() {
    assert_eq!(learning_rate(0), 1e-2);
    assert!((learning_rate(10_000_000) - 1e-3).abs() < 1e-15);
    assert!((learning_rate(5_000_000) - 1e-2 * 0.1f64.sqrt()).abs() < 1e-12);
    assert!(learning_rate(1) < learning_rate(0));
}

#[test]
fn test_policy_cost() {
    let logits = Tensor::zeros([2, 4], (Kind::Float, tch::Device::Cpu));
    let pi = Tensor::from_slice(&[1.0f32, 0.0, 0.0, 0.0, 0.25, 0.25, 0.25, 0.25]).view([2, 4]);
    let c = policy_cost(&logits, &pi).double_value(&[]);
    assert!((c - 4f64.ln()).abs() < 1e-5, "{c}");
}

#[test]
fn test_value_cost() {
    let v = Tensor::from_slice(&[0.5f32, -0.5]);
    let t = Tensor::from_slice(&[1.0f32, 0.5]);
    let c = value_cost(&v, &t).double_value(&[]);
    assert!((c - (0.25 + 1.0) / 2.0).abs() < 1e-6, "{c}");
}

#[cfg(test)]
fn tiny_net(vs : &VarStore) -> (super::hparams::Geometry, HyperParams, DualNet) {
    let geom = super::hparams::Geometry::new(5);
    let hp = HyperParams { k : 2, fc_width : 4, num_shared_layers : 1,
        l2_strength : 2e-4, momentum : 0.9 };
    let net = DualNet::new(&vs.root(), &geom, &hp);
    (geom, hp, net)
}

#[test]
fn test_l2_excludes_biases() {
    let vs = VarStore::new(tch::Device::Cpu);
    let (_geom, hp, _net) = tiny_net(&vs);
    let names = regularized_variables(&vs).into_iter().map(|(n, _)| n).collect::<Vec<_>>();
    assert!(names.contains(&"init.conv.weight".to_string()));
    assert!(names.contains(&"init.bn.weight".to_string()));
    assert!(names.iter().all(|n| !n.contains("bias")));
    assert!(names.iter().all(|n| !n.contains("running")));

    let ops = TrainOps::new(&vs, &hp).unwrap();
    let expect = regularized_variables(&vs).iter()
        .map(|(_, t)| t.square().sum(Kind::Float).double_value(&[]))
        .sum::<f64>() * hp.l2_strength;
    let got = ops.l2_cost().double_value(&[]);
    assert!((got - expect).abs() <= 1e-6 * expect.abs().max(1.0), "{got} {expect}");
}

#[test]
fn test_step_updates_weights() {
    tch::manual_seed(3);
    let vs = VarStore::new(tch::Device::Cpu);
    let (geom, hp, net) = tiny_net(&vs);
    let mut ops = TrainOps::new(&vs, &hp).unwrap();
    let batch = Batch::from_examples(
        &super::preprocessing::dummy_examples(&geom, 8), &geom).unwrap();
    let before = vs.variables()["policy.fc.weight"].copy();
    let mut gs = 0u64;
    let rec = ops.step(&net, &batch, &mut gs).unwrap();
    assert_eq!(gs, 1);
    assert_eq!(rec.global_step, 1);
    let sum = rec.policy_cost + rec.value_cost + rec.l2_cost;
    assert!((rec.combined_cost - sum).abs() < 1e-5, "{rec:?}");
    assert!(rec.policy_cost > 0.0 && rec.value_cost > 0.0 && rec.l2_cost > 0.0);
    assert!(!vs.variables()["policy.fc.weight"].equal(&before));
}
