use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

use super::error::Result;
use super::preprocessing::{self, TrainingExample};

pub const EXAMPLES_PER_CHUNK : usize = 10000;

// every *.jsonl below `dir`
fn findfiles(dir : &Path, out : &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            findfiles(&path, out)?;
        } else if path.extension().is_some_and(|x| x == "jsonl") {
            out.push(path);
        }
    }
    Ok(())
}

/// Collects every self-play example file below `input_dir`, shuffles the
/// examples and writes them to `output_dir` as chunks of `per_chunk`.
/// returns the number of examples written.
pub fn gather<R : Rng>(input_dir : &Path, output_dir : &Path, per_chunk : usize,
        rng : &mut R) -> Result<usize> {
    let mut files = Vec::new();
    findfiles(input_dir, &mut files)?;
    files.sort();
    log::info!("found {} game files in {}", files.len(), input_dir.display());

    let loaded = files.par_iter()
        .map(|f| preprocessing::read_examples(f))
        .collect::<Result<Vec<Vec<TrainingExample>>>>()?;
    let mut examples = loaded.into_iter().flatten().collect::<Vec<TrainingExample>>();
    examples.shuffle(rng);

    fs::create_dir_all(output_dir)?;
    for (i, chunk) in examples.chunks(per_chunk.max(1)).enumerate() {
        let path = output_dir.join(format!("chunk-{i:05}.jsonl"));
        preprocessing::write_examples(&path, chunk)?;
    }
    log::info!("gathered {} examples into {}", examples.len(), output_dir.display());
    Ok(examples.len())
}

#[test]
fn test_gather() {
    use rand::SeedableRng;
    use super::hparams::Geometry;

    let dir = tempfile::tempdir().unwrap();
    let selfplay = dir.path().join("data/selfplay");
    let geom = Geometry::new(5);
    let examples = preprocessing::dummy_examples(&geom, 7);
    preprocessing::write_examples(
        &selfplay.join("000000-bootstrap/worker1/game-a.jsonl"), &examples[..3]).unwrap();
    preprocessing::write_examples(
        &selfplay.join("000000-bootstrap/game-b.jsonl"), &examples[3..]).unwrap();

    let out = dir.path().join("data/training_chunks");
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    assert_eq!(gather(&selfplay, &out, 3, &mut rng).unwrap(), 7);

    let chunks = preprocessing::list_chunks(&out).unwrap();
    assert_eq!(chunks.len(), 3);
    let mut all = chunks.iter()
        .flat_map(|c| preprocessing::read_examples(c).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(all.len(), 7);
    all.sort_by(|a, b| a.pi.partial_cmp(&b.pi).unwrap());
    let mut expect = examples.clone();
    expect.sort_by(|a, b| a.pi.partial_cmp(&b.pi).unwrap());
    assert_eq!(all, expect);
}
