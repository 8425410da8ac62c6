use tch::nn;
use tch::{Kind, Tensor};

use super::hparams::{Geometry, HyperParams};

/// How batch normalization behaves in a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// normalize with the statistics of the current batch and update the
    /// running averages.
    Training,
    /// normalize with the stored running averages.
    Inference,
}

impl Mode {
    pub fn is_training(self) -> bool {
        self == Mode::Training
    }
}

// running = 0.997 * running + 0.003 * batch
const BN_MOMENTUM : f64 = 0.003;
const BN_EPSILON : f64 = 1e-5;

fn batchn(vs : &nn::Path, c : i64, affine : bool) -> nn::BatchNorm {
    let mut cfg = nn::BatchNormConfig {
        momentum : BN_MOMENTUM,
        eps : BN_EPSILON,
        ..Default::default()
    };
    if !affine {
        // no learned shift / scale
        cfg.affine = false;
    }
    nn::batch_norm2d(vs, c, cfg)
}

fn conv3x3(vs : &nn::Path, cin : i64, cout : i64) -> nn::Conv2D {
    nn::conv2d(vs, cin, cout, 3, nn::ConvConfig { padding : 1, ..Default::default() })
}

fn conv1x1(vs : &nn::Path, cin : i64, cout : i64) -> nn::Conv2D {
    nn::conv2d(vs, cin, cout, 1, Default::default())
}

/// conv -> bn -> relu -> conv -> bn, (+ input) -> relu
#[derive(Debug)]
struct ResBlock {
    conv1 : nn::Conv2D,
    bn1 : nn::BatchNorm,
    conv2 : nn::Conv2D,
    bn2 : nn::BatchNorm,
}

impl ResBlock {
    fn new(vs : &nn::Path, k : i64) -> ResBlock {
        ResBlock {
            conv1 : conv3x3(&(vs / "conv1"), k, k),
            bn1 : batchn(&(vs / "bn1"), k, true),
            conv2 : conv3x3(&(vs / "conv2"), k, k),
            bn2 : batchn(&(vs / "bn2"), k, true),
        }
    }

    fn forward(&self, xs : &Tensor, train : bool) -> Tensor {
        let out = xs.apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train);
        (out + xs).relu()
    }
}

/// What one forward pass produces.
#[derive(Debug)]
pub struct NetOutput {
    /// `[B, N*N+1]`
    pub logits : Tensor,
    /// softmax of `logits`.
    pub policy : Tensor,
    /// `[B]`, tanh.
    pub value : Tensor,
}

/// Residual trunk shared by a policy head and a value head.
#[derive(Debug)]
pub struct DualNet {
    geom : Geometry,
    init_conv : nn::Conv2D,
    init_bn : nn::BatchNorm,
    tower : Vec<ResBlock>,
    policy_conv : nn::Conv2D,
    policy_bn : nn::BatchNorm,
    policy_fc : nn::Linear,
    value_conv : nn::Conv2D,
    value_bn : nn::BatchNorm,
    value_fc1 : nn::Linear,
    value_fc2 : nn::Linear,
}

impl DualNet {
    pub fn new(vs : &nn::Path, geom : &Geometry, hp : &HyperParams) -> DualNet {
        let k = hp.k;
        let cells = geom.cells();
        let tower = (0..hp.num_shared_layers)
            .map(|i| ResBlock::new(&(vs / format!("res{i}")), k))
            .collect();
        DualNet {
            geom : *geom,
            init_conv : conv3x3(&(vs / "init" / "conv"), geom.planes, k),
            init_bn : batchn(&(vs / "init" / "bn"), k, true),
            tower,
            policy_conv : conv1x1(&(vs / "policy" / "conv"), k, 2),
            policy_bn : batchn(&(vs / "policy" / "bn"), 2, false),
            policy_fc : nn::linear(vs / "policy" / "fc", cells * 2, geom.moves(),
                Default::default()),
            value_conv : conv1x1(&(vs / "value" / "conv"), k, 1),
            value_bn : batchn(&(vs / "value" / "bn"), 1, false),
            value_fc1 : nn::linear(vs / "value" / "fc1", cells, hp.fc_width,
                Default::default()),
            value_fc2 : nn::linear(vs / "value" / "fc2", hp.fc_width, 1,
                Default::default()),
        }
    }

    /// `pos` is `[B, N, N, planes]`; B may be anything.
    pub fn forward(&self, pos : &Tensor, mode : Mode) -> NetOutput {
        let train = mode.is_training();
        let cells = self.geom.cells();

        // dense NCHW, convolutions keep the memory layout of their input
        let xs = pos.to_kind(Kind::Float).permute([0, 3, 1, 2]).contiguous();
        let mut shared = xs.apply(&self.init_conv).apply_t(&self.init_bn, train).relu();
        for block in self.tower.iter() {
            shared = block.forward(&shared, train);
        }

        let policy_conv = shared.apply(&self.policy_conv)
            .apply_t(&self.policy_bn, train)
            .relu();
        let logits = policy_conv.reshape([-1, cells * 2]).apply(&self.policy_fc);
        let policy = logits.softmax(-1, Kind::Float);

        let value_conv = shared.apply(&self.value_conv)
            .apply_t(&self.value_bn, train)
            .relu();
        let value = value_conv.reshape([-1, cells])
            .apply(&self.value_fc1)
            .relu()
            .apply(&self.value_fc2)
            .view([-1])
            .tanh();

        NetOutput { logits, policy, value }
    }
}

#[cfg(test)]
fn tiny() -> (Geometry, HyperParams) {
    let geom = Geometry::new(5);
    let hp = HyperParams { k : 4, fc_width : 8, num_shared_layers : 2,
        l2_strength : 2e-4, momentum : 0.9 };
    (geom, hp)
}

#[test]
fn test_output_shapes() {
    tch::manual_seed(0);
    let (geom, hp) = tiny();
    let vs = nn::VarStore::new(tch::Device::Cpu);
    let net = DualNet::new(&vs.root(), &geom, &hp);
    for b in [1i64, 3, 7] {
        let pos = Tensor::rand([b, 5, 5, geom.planes], (Kind::Float, tch::Device::Cpu));
        for mode in [Mode::Training, Mode::Inference] {
            let out = net.forward(&pos, mode);
            assert_eq!(out.logits.size(), vec![b, 26]);
            assert_eq!(out.policy.size(), vec![b, 26]);
            assert_eq!(out.value.size(), vec![b]);
        }
    }
}

#[test]
fn test_policy_sums_to_one_and_value_in_range() {
    tch::manual_seed(1);
    for n in [5i64, 9] {
        let geom = Geometry::new(n);
        let hp = HyperParams { k : 4, fc_width : 8, num_shared_layers : 1,
            l2_strength : 2e-4, momentum : 0.9 };
        let vs = nn::VarStore::new(tch::Device::Cpu);
        let net = DualNet::new(&vs.root(), &geom, &hp);
        let pos = Tensor::rand([6, n, n, geom.planes], (Kind::Float, tch::Device::Cpu)) * 10.0;
        let out = tch::no_grad(|| net.forward(&pos, Mode::Training));
        assert_eq!(out.policy.size()[1], n * n + 1);
        let sums = Vec::<f32>::try_from(&out.policy.sum_dim_intlist(
            Some([1i64].as_slice()), false, Kind::Float)).unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5, "{s}");
        }
        let values = Vec::<f32>::try_from(&out.value).unwrap();
        for v in values {
            assert!(v > -1.0 && v < 1.0, "{v}");
        }
    }
}

#[test]
fn test_forward_ignores_input_layout() {
    tch::manual_seed(2);
    let (geom, hp) = tiny();
    let vs = nn::VarStore::new(tch::Device::Cpu);
    let net = DualNet::new(&vs.root(), &geom, &hp);
    // the same NHWC values, once dense and once as a view of an NCHW tensor
    let nchw = Tensor::rand([3, geom.planes, 5, 5], (Kind::Float, tch::Device::Cpu));
    let strided = nchw.permute([0, 2, 3, 1]);
    let dense = strided.contiguous();
    assert!(!strided.is_contiguous());
    let a = tch::no_grad(|| net.forward(&strided, Mode::Inference));
    let b = tch::no_grad(|| net.forward(&dense, Mode::Inference));
    assert!(a.policy.allclose(&b.policy, 1e-5, 1e-6, false));
    assert!(a.value.allclose(&b.value, 1e-5, 1e-6, false));
    // channels-last NHWC as produced by from_slice().view()
    let flat = Vec::<f32>::try_from(&dense.flatten(0, -1)).unwrap();
    let viewed = Tensor::from_slice(&flat).view([3, 5, 5, geom.planes]);
    let c = tch::no_grad(|| net.forward(&viewed, Mode::Training));
    assert_eq!(c.logits.size(), vec![3, 26]);
}

#[test]
fn test_head_norms_have_no_affine_params() {
    let (geom, hp) = tiny();
    let vs = nn::VarStore::new(tch::Device::Cpu);
    let _net = DualNet::new(&vs.root(), &geom, &hp);
    let vars = vs.variables();
    assert!(vars.contains_key("init.bn.weight"));
    assert!(vars.contains_key("res1.bn2.bias"));
    assert!(!vars.contains_key("policy.bn.weight"));
    assert!(!vars.contains_key("value.bn.bias"));
    assert!(vars.contains_key("value.bn.running_mean"));
    assert!(!vars["init.bn.running_var"].requires_grad());
}

#[test]
fn test_inference_mode_keeps_running_stats() {
    let (geom, hp) = tiny();
    let vs = nn::VarStore::new(tch::Device::Cpu);
    let net = DualNet::new(&vs.root(), &geom, &hp);
    let pos = Tensor::rand([4, 5, 5, geom.planes], (Kind::Float, tch::Device::Cpu));
    let before = vs.variables()["init.bn.running_mean"].copy();
    let _ = tch::no_grad(|| net.forward(&pos, Mode::Inference));
    assert!(vs.variables()["init.bn.running_mean"].equal(&before));
    let _ = tch::no_grad(|| net.forward(&pos, Mode::Training));
    assert!(!vs.variables()["init.bn.running_mean"].equal(&before));
}
