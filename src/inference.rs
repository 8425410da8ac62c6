use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tch::nn::VarStore;
use tch::{Device, Tensor};

use super::checkpoint;
use super::error::{Error, Result};
use super::features;
use super::go::Position;
use super::hparams::{Geometry, HyperParams};
use super::neuralnet::{DualNet, Mode};
use super::symmetries;

/// Evaluates positions with a network built once in inference mode.
pub struct DualNetwork {
    geom : Geometry,
    hparams : HyperParams,
    vs : VarStore,
    net : DualNet,
    save_file : Option<PathBuf>,
    rng : StdRng,
}

impl DualNetwork {
    /// random weights when `save_file` is `None`.
    pub fn new(save_file : Option<&Path>, geom : Geometry, hparams : HyperParams,
            device : Device) -> Result<DualNetwork> {
        let vs = VarStore::new(device);
        let net = DualNet::new(&vs.root(), &geom, &hparams);
        let mut dn = DualNetwork {
            geom, hparams, vs, net, save_file : None, rng : StdRng::from_entropy() };
        if let Some(path) = save_file {
            dn.initialize_weights(path)?;
        }
        Ok(dn)
    }

    pub fn with_seed(mut self, seed : u64) -> DualNetwork {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// swaps in the weights of another checkpoint with the same shapes.
    /// the network is not rebuilt.
    pub fn initialize_weights(&mut self, save_file : &Path) -> Result<()> {
        checkpoint::restore(&mut self.vs, save_file, &self.geom, &self.hparams)?;
        log::info!("loaded {}", save_file.display());
        self.save_file = Some(save_file.to_path_buf());
        Ok(())
    }

    pub fn save_file(&self) -> Option<&Path> {
        self.save_file.as_deref()
    }

    /// move probabilities (N*N+1 each) and values for `positions`.
    ///
    /// with `use_random_symmetry` every input gets its own random symmetry and
    /// the policies are mapped back before returning. values need no mapping.
    pub fn run_many(&mut self, positions : &[Position], use_random_symmetry : bool)
            -> Result<(Vec<Vec<f32>>, Vec<f32>)> {
        if positions.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        if let Some(p) = positions.iter().find(|p| p.n as i64 != self.geom.board_size) {
            return Err(Error::BoardSize { expected : self.geom.board_size, found : p.n as i64 });
        }
        let n = self.geom.board_size as usize;
        let planes = self.geom.planes as usize;
        let mut processed = positions.par_iter()
            .map(features::extract_features)
            .collect::<Vec<Vec<f32>>>();
        let mut syms = Vec::new();
        if use_random_symmetry {
            (syms, processed) = symmetries::randomize_symmetries_feat(
                &mut self.rng, n, planes, &processed);
        }

        let b = processed.len() as i64;
        let input = Tensor::from_slice(&processed.concat())
            .f_view([b, n as i64, n as i64, self.geom.planes])?
            .to_device(self.vs.device());
        let out = tch::no_grad(|| self.net.forward(&input, Mode::Inference));

        let moves = self.geom.moves() as usize;
        let flat = Vec::<f32>::try_from(&out.policy.to_device(Device::Cpu).flatten(0, -1))?;
        let mut probs = flat.chunks(moves).map(|c| c.to_vec()).collect::<Vec<Vec<f32>>>();
        let values = Vec::<f32>::try_from(&out.value.to_device(Device::Cpu))?;
        if use_random_symmetry {
            probs = symmetries::invert_symmetries_pi(n, &syms, &probs);
        }
        Ok((probs, values))
    }

    pub fn run(&mut self, position : &Position, use_random_symmetry : bool)
            -> Result<(Vec<f32>, f32)> {
        let (mut probs, values) =
            self.run_many(std::slice::from_ref(position), use_random_symmetry)?;
        Ok((probs.swap_remove(0), values[0]))
    }
}

#[cfg(test)]
fn tiny() -> (Geometry, HyperParams) {
    (Geometry::new(5), HyperParams { k : 4, fc_width : 8, num_shared_layers : 1,
        l2_strength : 2e-4, momentum : 0.9 })
}

#[cfg(test)]
fn some_positions() -> Vec<Position> {
    let mut a = Position::new(5);
    a.place(0, 1);
    let mut b = a.clone();
    b.place(3, 4);
    b.place(2, 2);
    vec![Position::new(5), a, b]
}

#[test]
fn test_run_many_shapes() {
    let (geom, hp) = tiny();
    let mut dn = DualNetwork::new(None, geom, hp, Device::Cpu).unwrap().with_seed(5);
    for sym in [false, true] {
        let (probs, values) = dn.run_many(&some_positions(), sym).unwrap();
        assert_eq!(probs.len(), 3);
        assert_eq!(values.len(), 3);
        for (p, v) in probs.iter().zip(values.iter()) {
            assert_eq!(p.len(), 26);
            assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            assert!(*v > -1.0 && *v < 1.0);
        }
    }
    let (p, _v) = dn.run(&Position::new(5), true).unwrap();
    assert_eq!(p.len(), 26);
    assert_eq!(dn.run_many(&[], true).unwrap().0.len(), 0);
}

#[test]
fn test_same_checkpoint_same_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let save_file = dir.path().join("m");
    let (geom, hp) = tiny();
    let vs = VarStore::new(Device::Cpu);
    let _net = DualNet::new(&vs.root(), &geom, &hp);
    checkpoint::save(&vs, &save_file, &checkpoint::CheckpointMeta::new(geom, hp, 0)).unwrap();

    let mut a = DualNetwork::new(Some(&save_file), geom, hp, Device::Cpu).unwrap();
    let mut b = DualNetwork::new(Some(&save_file), geom, hp, Device::Cpu).unwrap();
    assert_eq!(a.save_file(), Some(save_file.as_path()));
    let ra = a.run_many(&some_positions(), false).unwrap();
    let rb = b.run_many(&some_positions(), false).unwrap();
    assert_eq!(ra, rb);
    // and again on the same engine
    assert_eq!(a.run_many(&some_positions(), false).unwrap(), ra);
}

#[test]
fn test_symmetric_value_and_policy() {
    // an empty board looks the same under every symmetry, so the inverted
    // policy and the value must not depend on the chosen symmetry.
    let (geom, hp) = tiny();
    let mut dn = DualNetwork::new(None, geom, hp, Device::Cpu).unwrap().with_seed(11);
    let (p0, v0) = dn.run(&Position::new(5), false).unwrap();
    let mut pos = Position::new(5);
    pos.place(2, 2);
    let (pc, vc) = dn.run(&pos, false).unwrap();
    for _ in 0..8 {
        let (p, v) = dn.run(&Position::new(5), true).unwrap();
        assert!((v - v0).abs() < 1e-5);
        // pass probability is untouched by symmetries
        assert!((p[25] - p0[25]).abs() < 1e-5);
        // center stone is fixed by every symmetry
        let (p, v) = dn.run(&pos, true).unwrap();
        assert!((v - vc).abs() < 1e-5);
        assert!((p[12] - pc[12]).abs() < 1e-5);
    }
}

#[test]
fn test_switch_checkpoint_without_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let (geom, hp) = tiny();
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    for path in [&first, &second] {
        let vs = VarStore::new(Device::Cpu);
        let _net = DualNet::new(&vs.root(), &geom, &hp);
        checkpoint::save(&vs, path, &checkpoint::CheckpointMeta::new(geom, hp, 0)).unwrap();
    }
    let mut dn = DualNetwork::new(Some(&first), geom, hp, Device::Cpu).unwrap();
    let r1 = dn.run_many(&some_positions(), false).unwrap();
    dn.initialize_weights(&second).unwrap();
    let r2 = dn.run_many(&some_positions(), false).unwrap();
    assert_ne!(r1, r2);
    dn.initialize_weights(&first).unwrap();
    assert_eq!(dn.run_many(&some_positions(), false).unwrap(), r1);

    let other = HyperParams { fc_width : 16, ..hp };
    assert!(DualNetwork::new(Some(&first), geom, other, Device::Cpu).is_err());
}

#[test]
fn test_wrong_board_size() {
    let (geom, hp) = tiny();
    let mut dn = DualNetwork::new(None, geom, hp, Device::Cpu).unwrap();
    let mut positions = some_positions();
    positions.push(Position::new(9));
    for sym in [false, true] {
        match dn.run_many(&positions, sym) {
            Err(Error::BoardSize { expected, found }) => {
                assert_eq!((expected, found), (5, 9));
            },
            other => panic!("{other:?}"),
        }
    }
    assert!(dn.run(&Position::new(5), true).is_ok());
}
