use rand::Rng;

/// The eight dihedral symmetries of a square board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symmetry {
    Identity,
    Rot90,
    Rot180,
    Rot270,
    FlipVert,
    FlipHorz,
    Transpose,
    AntiTranspose,
}

pub const ALL : [Symmetry ; 8] = [
    Symmetry::Identity, Symmetry::Rot90, Symmetry::Rot180, Symmetry::Rot270,
    Symmetry::FlipVert, Symmetry::FlipHorz, Symmetry::Transpose,
    Symmetry::AntiTranspose,
];

impl Symmetry {
    pub fn random<R : Rng>(rng : &mut R) -> Symmetry {
        ALL[rng.gen_range(0..ALL.len())]
    }

    pub fn inverse(self) -> Symmetry {
        match self {
            Symmetry::Rot90 => Symmetry::Rot270,
            Symmetry::Rot270 => Symmetry::Rot90,
            s => s,
        }
    }

    /// where the point (row, col) lands on an n x n board.
    pub fn map(self, n : usize, row : usize, col : usize) -> (usize, usize) {
        let m = n - 1;
        match self {
            Symmetry::Identity => (row, col),
            Symmetry::Rot90 => (m - col, row),
            Symmetry::Rot180 => (m - row, m - col),
            Symmetry::Rot270 => (col, m - row),
            Symmetry::FlipVert => (m - row, col),
            Symmetry::FlipHorz => (row, m - col),
            Symmetry::Transpose => (col, row),
            Symmetry::AntiTranspose => (m - col, m - row),
        }
    }

    /// transforms an `[n, n, planes]` feature tensor.
    pub fn apply_features(self, n : usize, planes : usize, feat : &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32 ; feat.len()];
        for row in 0..n {
            for col in 0..n {
                let (r, c) = self.map(n, row, col);
                let src = (row * n + col) * planes;
                let dst = (r * n + c) * planes;
                out[dst..dst + planes].copy_from_slice(&feat[src..src + planes]);
            }
        }
        out
    }

    /// transforms a move distribution of n*n + 1 entries. pass stays last.
    pub fn apply_pi(self, n : usize, pi : &[f32]) -> Vec<f32> {
        let mut out = pi.to_vec();
        for row in 0..n {
            for col in 0..n {
                let (r, c) = self.map(n, row, col);
                out[r * n + c] = pi[row * n + col];
            }
        }
        out
    }
}

/// picks one symmetry per example and applies it.
pub fn randomize_symmetries_feat<R : Rng>(rng : &mut R, n : usize, planes : usize,
        feats : &[Vec<f32>]) -> (Vec<Symmetry>, Vec<Vec<f32>>) {
    let syms = feats.iter().map(|_| Symmetry::random(rng)).collect::<Vec<_>>();
    let out = syms.iter().zip(feats.iter())
        .map(|(s, f)| s.apply_features(n, planes, f))
        .collect();
    (syms, out)
}

/// undoes `syms` on the policies predicted for symmetric inputs.
pub fn invert_symmetries_pi(n : usize, syms : &[Symmetry], pis : &[Vec<f32>])
        -> Vec<Vec<f32>> {
    syms.iter().zip(pis.iter())
        .map(|(s, pi)| s.inverse().apply_pi(n, pi))
        .collect()
}

#[test]
fn test_inverse_roundtrip() {
    let n = 5;
    let pi = (0..n * n + 1).map(|i| i as f32).collect::<Vec<f32>>();
    for sym in ALL {
        let there = sym.apply_pi(n, &pi);
        assert_eq!(there[n * n], pi[n * n], "{sym:?} moved pass");
        let back = sym.inverse().apply_pi(n, &there);
        assert_eq!(back, pi, "{sym:?}");
    }
}

#[test]
fn test_all_distinct() {
    let n = 4;
    let pi = (0..n * n + 1).map(|i| i as f32).collect::<Vec<f32>>();
    let images = ALL.iter().map(|s| s.apply_pi(n, &pi)).collect::<Vec<_>>();
    for i in 0..images.len() {
        for j in i + 1..images.len() {
            assert_ne!(images[i], images[j], "{:?} == {:?}", ALL[i], ALL[j]);
        }
    }
}

#[test]
fn test_rot90_corner() {
    // top-right corner goes to top-left for a counter-clockwise turn.
    assert_eq!(Symmetry::Rot90.map(9, 0, 8), (0, 0));
    assert_eq!(Symmetry::Rot90.map(9, 0, 0), (8, 0));
}

#[test]
fn test_features_follow_policy() {
    use rand::SeedableRng;
    let (n, planes) = (3, 2);
    let feats = vec![(0..n * n * planes).map(|i| i as f32).collect::<Vec<f32>>() ; 16];
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let (syms, moved) = randomize_symmetries_feat(&mut rng, n, planes, &feats);
    assert_eq!(syms.len(), 16);
    for ((s, f), orig) in syms.iter().zip(moved.iter()).zip(feats.iter()) {
        // plane values travel together with their point
        for row in 0..n {
            for col in 0..n {
                let (r, c) = s.map(n, row, col);
                for p in 0..planes {
                    assert_eq!(f[(r * n + c) * planes + p], orig[(row * n + col) * planes + p]);
                }
            }
        }
    }
    let pis = syms.iter().map(|s| s.apply_pi(n, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 0.5]))
        .collect::<Vec<_>>();
    for pi in invert_symmetries_pi(n, &syms, &pis) {
        assert_eq!(pi, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 0.5]);
    }
}
