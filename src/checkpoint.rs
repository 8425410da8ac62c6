use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tch::nn::VarStore;
use tch::Tensor;

use super::error::{Error, Result};
use super::hparams::{Geometry, HyperParams};

/// Written next to the weights as `<name>.meta`; its presence marks a
/// checkpoint as existing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub geometry : Geometry,
    pub hparams : HyperParams,
    pub global_step : u64,
    pub timestamp : u64,
}

impl CheckpointMeta {
    pub fn new(geometry : Geometry, hparams : HyperParams, global_step : u64) -> CheckpointMeta {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs()).unwrap_or(0);
        CheckpointMeta { geometry, hparams, global_step, timestamp }
    }

    /// fields that change tensor shapes and differ from the built network.
    fn mismatches(&self, geom : &Geometry, hp : &HyperParams) -> Vec<String> {
        let mut diff = Vec::new();
        let mut cmp = |what : &str, expected : i64, found : i64| {
            if expected != found {
                diff.push(format!("{what}: expected {expected}, found {found}"));
            }
        };
        cmp("board_size", geom.board_size, self.geometry.board_size);
        cmp("planes", geom.planes, self.geometry.planes);
        cmp("k", hp.k, self.hparams.k);
        cmp("fc_width", hp.fc_width, self.hparams.fc_width);
        cmp("num_shared_layers",
            hp.num_shared_layers as i64, self.hparams.num_shared_layers as i64);
        diff
    }
}

fn with_suffix(save_file : &Path, suffix : &str) -> PathBuf {
    let mut s = OsString::from(save_file.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

pub fn weights_path(save_file : &Path) -> PathBuf {
    with_suffix(save_file, ".safetensors")
}

pub fn meta_path(save_file : &Path) -> PathBuf {
    with_suffix(save_file, ".meta")
}

pub fn exists(save_file : &Path) -> bool {
    meta_path(save_file).is_file()
}

/// writes weights then metadata, each to a temporary name renamed into place.
pub fn save(vs : &VarStore, save_file : &Path, meta : &CheckpointMeta) -> Result<()> {
    if let Some(dir) = save_file.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    // VarStore picks the format from the extension
    let tmp = with_suffix(save_file, ".tmp.safetensors");
    vs.save(&tmp)?;
    fs::rename(&tmp, weights_path(save_file))?;

    let tmp = with_suffix(save_file, ".meta.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(meta)?)?;
    fs::rename(&tmp, meta_path(save_file))?;
    log::info!("saved checkpoint {} at step {}", save_file.display(), meta.global_step);
    Ok(())
}

pub fn read_meta(save_file : &Path) -> Result<CheckpointMeta> {
    let path = meta_path(save_file);
    if !path.is_file() {
        return Err(Error::MissingCheckpoint(save_file.to_path_buf()));
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// loads `save_file` into the already built `vs`. the variables keep their
/// identity, only values change.
pub fn restore(vs : &mut VarStore, save_file : &Path, geom : &Geometry, hp : &HyperParams)
        -> Result<CheckpointMeta> {
    let meta = read_meta(save_file)?;
    let diff = meta.mismatches(geom, hp);
    if !diff.is_empty() {
        return Err(Error::ConfigMismatch {
            path : save_file.to_path_buf(), detail : diff.join(", ") });
    }
    let weights = weights_path(save_file);
    fs::metadata(&weights)?;
    let stored = Tensor::read_safetensors(&weights)?
        .into_iter()
        .collect::<HashMap<String, Tensor>>();

    let mut vars = vs.variables();
    let mut diff = Vec::new();
    for (name, var) in vars.iter() {
        match stored.get(name) {
            None => diff.push(format!("{name}: missing")),
            Some(t) if t.size() != var.size() => {
                diff.push(format!("{name}: expected {:?}, found {:?}", var.size(), t.size()));
            },
            Some(_) => {},
        }
    }
    if !diff.is_empty() {
        diff.sort();
        return Err(Error::ConfigMismatch {
            path : save_file.to_path_buf(), detail : diff.join(", ") });
    }
    tch::no_grad(|| -> Result<()> {
        for (name, var) in vars.iter_mut() {
            var.f_copy_(&stored[name].to_device(var.device()))?;
        }
        Ok(())
    })?;
    Ok(meta)
}

#[cfg(test)]
fn tiny() -> (Geometry, HyperParams) {
    (Geometry::new(5), HyperParams { k : 2, fc_width : 4, num_shared_layers : 1,
        l2_strength : 2e-4, momentum : 0.9 })
}

#[test]
fn test_paths() {
    let p = Path::new("models/000000-bootstrap");
    assert_eq!(weights_path(p), PathBuf::from("models/000000-bootstrap.safetensors"));
    assert_eq!(meta_path(p), PathBuf::from("models/000000-bootstrap.meta"));
}

#[test]
fn test_save_restore() {
    use super::neuralnet::DualNet;

    let dir = tempfile::tempdir().unwrap();
    let save_file = dir.path().join("models/000001-first");
    let (geom, hp) = tiny();

    let vs = VarStore::new(tch::Device::Cpu);
    let _net = DualNet::new(&vs.root(), &geom, &hp);
    assert!(!exists(&save_file));
    save(&vs, &save_file, &CheckpointMeta::new(geom, hp, 42)).unwrap();
    assert!(exists(&save_file));
    assert!(weights_path(&save_file).is_file());
    assert!(!with_suffix(&save_file, ".tmp.safetensors").exists());

    let mut vs2 = VarStore::new(tch::Device::Cpu);
    let _net2 = DualNet::new(&vs2.root(), &geom, &hp);
    let meta = restore(&mut vs2, &save_file, &geom, &hp).unwrap();
    assert_eq!(meta.global_step, 42);
    let a = vs.variables();
    let b = vs2.variables();
    assert_eq!(a.len(), b.len());
    for (name, t) in a.iter() {
        assert!(t.equal(&b[name]), "{name}");
    }
}

#[test]
fn test_restore_mismatch() {
    use super::neuralnet::DualNet;

    let dir = tempfile::tempdir().unwrap();
    let save_file = dir.path().join("m");
    let (geom, hp) = tiny();
    let vs = VarStore::new(tch::Device::Cpu);
    let _net = DualNet::new(&vs.root(), &geom, &hp);
    save(&vs, &save_file, &CheckpointMeta::new(geom, hp, 0)).unwrap();

    let wider = HyperParams { k : 4, ..hp };
    let mut vs2 = VarStore::new(tch::Device::Cpu);
    let _net2 = DualNet::new(&vs2.root(), &geom, &wider);
    match restore(&mut vs2, &save_file, &geom, &wider) {
        Err(Error::ConfigMismatch { detail, .. }) => {
            assert_eq!(detail, "k: expected 4, found 2");
        },
        other => panic!("{other:?}"),
    }

    // l2 and momentum do not change shapes
    let softer = HyperParams { l2_strength : 1e-4, momentum : 0.5, ..hp };
    let mut vs3 = VarStore::new(tch::Device::Cpu);
    let _net3 = DualNet::new(&vs3.root(), &geom, &softer);
    assert!(restore(&mut vs3, &save_file, &geom, &softer).is_ok());
}

#[test]
fn test_restore_unreadable_weights() {
    use super::neuralnet::DualNet;

    let dir = tempfile::tempdir().unwrap();
    let save_file = dir.path().join("m");
    let (geom, hp) = tiny();
    let vs = VarStore::new(tch::Device::Cpu);
    let _net = DualNet::new(&vs.root(), &geom, &hp);
    save(&vs, &save_file, &CheckpointMeta::new(geom, hp, 0)).unwrap();

    let mut vs2 = VarStore::new(tch::Device::Cpu);
    let _net2 = DualNet::new(&vs2.root(), &geom, &hp);
    fs::write(weights_path(&save_file), b"not a tensor file").unwrap();
    match restore(&mut vs2, &save_file, &geom, &hp) {
        Err(Error::ConfigMismatch { .. }) | Ok(_) => panic!("truncated weights accepted"),
        Err(_) => {},
    }
    fs::remove_file(weights_path(&save_file)).unwrap();
    assert!(matches!(restore(&mut vs2, &save_file, &geom, &hp), Err(Error::Io(_))));
}

#[test]
fn test_restore_shape_mismatch_behind_meta() {
    use super::neuralnet::DualNet;

    // metadata claims the right shapes but the weights are narrower
    let dir = tempfile::tempdir().unwrap();
    let save_file = dir.path().join("m");
    let (geom, hp) = tiny();
    let wider = HyperParams { k : 4, ..hp };
    let vs = VarStore::new(tch::Device::Cpu);
    let _net = DualNet::new(&vs.root(), &geom, &hp);
    save(&vs, &save_file, &CheckpointMeta::new(geom, wider, 0)).unwrap();

    let mut vs2 = VarStore::new(tch::Device::Cpu);
    let _net2 = DualNet::new(&vs2.root(), &geom, &wider);
    let before = vs2.variables()["init.conv.weight"].copy();
    match restore(&mut vs2, &save_file, &geom, &wider) {
        Err(Error::ConfigMismatch { detail, .. }) => {
            assert!(detail.contains("init.conv.weight: expected [4, 17, 3, 3], found [2, 17, 3, 3]"),
                "{detail}");
        },
        other => panic!("{other:?}"),
    }
    assert!(vs2.variables()["init.conv.weight"].equal(&before));
}

#[test]
fn test_restore_missing() {
    let dir = tempfile::tempdir().unwrap();
    let (geom, hp) = tiny();
    let mut vs = VarStore::new(tch::Device::Cpu);
    let r = restore(&mut vs, &dir.path().join("nothing"), &geom, &hp);
    assert!(matches!(r, Err(Error::MissingCheckpoint(_))));
}
