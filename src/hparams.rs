use serde::{Deserialize, Serialize};

use super::features;

/// Knobs of the residual tower and the training objective.
///
/// Defaults follow the board size; see [`HyperParams::for_board`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    /// filters of every 3x3 convolution in the trunk.
    pub k : i64,
    /// width of the hidden dense layer of the value head.
    pub fc_width : i64,
    /// number of residual blocks.
    pub num_shared_layers : usize,
    pub l2_strength : f64,
    pub momentum : f64,
}

/// Partial hyperparameters. Present fields replace the board defaults as is.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Overrides {
    pub k : Option<i64>,
    pub fc_width : Option<i64>,
    pub num_shared_layers : Option<usize>,
    pub l2_strength : Option<f64>,
    pub momentum : Option<f64>,
}

/// 2^round(log2(n)), e.g. 84 -> 64, 120 -> 128.
pub fn nearest_power_of_two(n : f64) -> i64 {
    2f64.powi(n.log2().round() as i32) as i64
}

impl HyperParams {
    pub fn for_board(board_size : i64) -> HyperParams {
        let k = nearest_power_of_two((board_size * board_size) as f64 / 3.0);
        HyperParams {
            k,
            fc_width : 2 * k,
            num_shared_layers : board_size as usize,
            l2_strength : 2e-4,
            momentum : 0.9,
        }
    }

    /// board defaults with `overrides` applied. override values are not validated.
    pub fn resolve(board_size : i64, overrides : &Overrides) -> HyperParams {
        let d = HyperParams::for_board(board_size);
        HyperParams {
            k : overrides.k.unwrap_or(d.k),
            fc_width : overrides.fc_width.unwrap_or(d.fc_width),
            num_shared_layers : overrides.num_shared_layers.unwrap_or(d.num_shared_layers),
            l2_strength : overrides.l2_strength.unwrap_or(d.l2_strength),
            momentum : overrides.momentum.unwrap_or(d.momentum),
        }
    }
}

/// Board dimension and input planes; together with [`HyperParams`] these fix
/// every tensor shape of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub board_size : i64,
    pub planes : i64,
}

impl Geometry {
    pub fn new(board_size : i64) -> Geometry {
        Geometry { board_size, planes : features::FEATURE_PLANES as i64 }
    }

    pub fn cells(&self) -> i64 {
        self.board_size * self.board_size
    }

    /// board moves + pass.
    pub fn moves(&self) -> i64 {
        self.cells() + 1
    }

    /// number of floats in one feature tensor.
    pub fn feature_len(&self) -> usize {
        (self.cells() * self.planes) as usize
    }
}

#[test]
fn test_nearest_power_of_two() {
    assert_eq!(nearest_power_of_two(84.0), 64);
    assert_eq!(nearest_power_of_two(120.0), 128);
    assert_eq!(nearest_power_of_two(1.0), 1);

    let mut n = 0.75f64;
    while n < 5000.0 {
        let p = nearest_power_of_two(n);
        assert!(p > 0 && (p & (p - 1)) == 0, "{p} for {n}");
        assert!(((p as f64).log2() - n.log2()).abs() <= 0.5 + 1e-12, "{p} for {n}");
        n *= 1.07;
    }
}

#[test]
fn test_board_defaults() {
    let hp = HyperParams::for_board(19);
    assert_eq!(hp.k, 128);
    assert_eq!(hp.fc_width, 256);
    assert_eq!(hp.num_shared_layers, 19);
    assert_eq!(hp.l2_strength, 2e-4);
    assert_eq!(hp.momentum, 0.9);

    let hp = HyperParams::for_board(9);
    assert_eq!(hp.k, 32);
    assert_eq!(hp.fc_width, 64);
    assert_eq!(hp.num_shared_layers, 9);
}

#[test]
fn test_overrides() {
    let ov = Overrides {
        k : Some(1), fc_width : Some(2), num_shared_layers : Some(1),
        ..Default::default()
    };
    let hp = HyperParams::resolve(9, &ov);
    assert_eq!(hp, HyperParams {
        k : 1, fc_width : 2, num_shared_layers : 1, l2_strength : 2e-4, momentum : 0.9 });

    // not validated
    let ov = Overrides { momentum : Some(-3.0), ..Default::default() };
    assert_eq!(HyperParams::resolve(9, &ov).momentum, -3.0);

    assert_eq!(HyperParams::resolve(19, &Overrides::default()), HyperParams::for_board(19));
}

#[test]
fn test_geometry() {
    let g = Geometry::new(9);
    assert_eq!(g.cells(), 81);
    assert_eq!(g.moves(), 82);
    assert_eq!(g.feature_len(), 81 * features::FEATURE_PLANES);
}
