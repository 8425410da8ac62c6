use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tch::{Device, Tensor};

use super::error::{Error, Result};
use super::hparams::Geometry;

pub const SHUFFLE_BUFFER_SIZE : usize = 2000;

/// One position of a finished game with its search policy and outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    /// `[N, N, planes]`
    pub features : Vec<f32>,
    /// N*N + 1, pass last.
    pub pi : Vec<f32>,
    /// game result from the side to move, in [-1, 1].
    pub value : f32,
}

impl TrainingExample {
    pub fn check(&self, geom : &Geometry) -> Result<()> {
        if self.features.len() != geom.feature_len() {
            return Err(Error::BadExample(format!(
                "{} feature values, expected {}", self.features.len(), geom.feature_len())));
        }
        if self.pi.len() != geom.moves() as usize {
            return Err(Error::BadExample(format!(
                "{} policy entries, expected {}", self.pi.len(), geom.moves())));
        }
        if !(-1.0..=1.0).contains(&self.value) {
            return Err(Error::BadExample(format!("value {} out of [-1, 1]", self.value)));
        }
        Ok(())
    }
}

/// one JSON object per line.
pub fn write_examples(path : &Path, examples : &[TrainingExample]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut w = BufWriter::new(fs::File::create(path)?);
    for ex in examples {
        serde_json::to_writer(&mut w, ex)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_examples(path : &Path) -> Result<Vec<TrainingExample>> {
    let r = BufReader::new(fs::File::open(path)?);
    let mut examples = Vec::new();
    for line in r.lines() {
        let line = line?;
        if line.trim().is_empty() {continue;}
        examples.push(serde_json::from_str(&line)?);
    }
    Ok(examples)
}

/// A training batch: `pos` `[B, N, N, planes]`, `pi` `[B, N*N+1]`, `value` `[B]`.
#[derive(Debug)]
pub struct Batch {
    pub pos : Tensor,
    pub pi : Tensor,
    pub value : Tensor,
}

impl Batch {
    pub fn from_examples(examples : &[TrainingExample], geom : &Geometry) -> Result<Batch> {
        let b = examples.len() as i64;
        let mut pos = Vec::with_capacity(examples.len() * geom.feature_len());
        let mut pi = Vec::with_capacity(examples.len() * geom.moves() as usize);
        let mut value = Vec::with_capacity(examples.len());
        for ex in examples {
            ex.check(geom)?;
            pos.extend_from_slice(&ex.features);
            pi.extend_from_slice(&ex.pi);
            value.push(ex.value);
        }
        let n = geom.board_size;
        Ok(Batch {
            pos : Tensor::from_slice(&pos).view([b, n, n, geom.planes]),
            pi : Tensor::from_slice(&pi).view([b, geom.moves()]),
            value : Tensor::from_slice(&value),
        })
    }

    #[cfg(test)]
    pub fn size(&self) -> i64 {
        self.value.size()[0]
    }

    pub fn to_device(self, device : Device) -> Batch {
        Batch {
            pos : self.pos.to_device(device),
            pi : self.pi.to_device(device),
            value : self.value.to_device(device),
        }
    }
}

/// Pull side of the input pipeline. `Ok(None)` means exhausted.
pub trait ExampleSource {
    fn next_batch(&mut self) -> Result<Option<Batch>>;
}

/// Streams examples out of chunk files through a shuffle buffer and hands
/// them out in batches of exactly `batch_size`. A trailing partial batch is
/// dropped.
pub struct ChunkReader {
    files : Vec<PathBuf>,
    next_file : usize,
    pending : std::vec::IntoIter<TrainingExample>,
    buffer : Vec<TrainingExample>,
    geom : Geometry,
    batch_size : usize,
    shuffle_buffer : usize,
    rng : StdRng,
}

impl ChunkReader {
    pub fn new(files : Vec<PathBuf>, geom : Geometry, batch_size : usize,
            shuffle_buffer : usize) -> ChunkReader {
        ChunkReader {
            files,
            next_file : 0,
            pending : Vec::new().into_iter(),
            buffer : Vec::with_capacity(shuffle_buffer.max(1)),
            geom,
            batch_size : batch_size.max(1),
            shuffle_buffer : shuffle_buffer.max(1),
            rng : StdRng::from_entropy(),
        }
    }

    /// every `*.jsonl` file directly under `dir`, sorted.
    pub fn from_dir(dir : &Path, geom : Geometry, batch_size : usize,
            shuffle_buffer : usize) -> Result<ChunkReader> {
        Ok(ChunkReader::new(list_chunks(dir)?, geom, batch_size, shuffle_buffer))
    }

    pub fn with_seed(mut self, seed : u64) -> ChunkReader {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn next_example(&mut self) -> Result<Option<TrainingExample>> {
        loop {
            if let Some(ex) = self.pending.next() {
                return Ok(Some(ex));
            }
            if self.next_file >= self.files.len() {
                return Ok(None);
            }
            let path = &self.files[self.next_file];
            log::debug!("reading {}", path.display());
            self.pending = read_examples(path)?.into_iter();
            self.next_file += 1;
        }
    }

    fn fill(&mut self) -> Result<()> {
        while self.buffer.len() < self.shuffle_buffer {
            match self.next_example()? {
                Some(ex) => self.buffer.push(ex),
                None => break,
            }
        }
        Ok(())
    }
}

impl ExampleSource for ChunkReader {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let mut picked = Vec::with_capacity(self.batch_size);
        while picked.len() < self.batch_size {
            self.fill()?;
            if self.buffer.is_empty() {
                return Ok(None);
            }
            let i = self.rng.gen_range(0..self.buffer.len());
            picked.push(self.buffer.swap_remove(i));
        }
        Batch::from_examples(&picked, &self.geom).map(Some)
    }
}

pub fn list_chunks(dir : &Path) -> Result<Vec<PathBuf>> {
    let mut files = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "jsonl"))
        .collect::<Vec<PathBuf>>();
    files.sort();
    Ok(files)
}

#[cfg(test)]
pub fn dummy_examples(geom : &Geometry, count : usize) -> Vec<TrainingExample> {
    (0..count).map(|i| {
        let mut pi = vec![0.0f32 ; geom.moves() as usize];
        pi[i % geom.moves() as usize] = 1.0;
        let mut features = vec![0.0f32 ; geom.feature_len()];
        features[(i * geom.planes as usize) % geom.feature_len()] = 1.0;
        TrainingExample {
            features,
            pi,
            value : if i % 2 == 0 {1.0} else {-1.0},
        }
    }).collect()
}

#[test]
fn test_write_read_examples() {
    let dir = tempfile::tempdir().unwrap();
    let geom = Geometry::new(5);
    let examples = dummy_examples(&geom, 3);
    let path = dir.path().join("sub/chunk-0.jsonl");
    write_examples(&path, &examples).unwrap();
    assert_eq!(read_examples(&path).unwrap(), examples);
}

#[test]
fn test_batch_shapes() {
    let geom = Geometry::new(5);
    let batch = Batch::from_examples(&dummy_examples(&geom, 4), &geom).unwrap();
    assert_eq!(batch.pos.size(), vec![4, 5, 5, geom.planes]);
    assert_eq!(batch.pi.size(), vec![4, 26]);
    assert_eq!(batch.value.size(), vec![4]);
    assert_eq!(batch.size(), 4);
}

#[test]
fn test_bad_example() {
    let geom = Geometry::new(5);
    let mut examples = dummy_examples(&geom, 2);
    examples[1].pi.pop();
    assert!(matches!(Batch::from_examples(&examples, &geom), Err(Error::BadExample(_))));

    let mut examples = dummy_examples(&geom, 1);
    examples[0].value = 2.0;
    assert!(matches!(Batch::from_examples(&examples, &geom), Err(Error::BadExample(_))));
}

#[test]
fn test_chunk_reader_drops_partial_batch() {
    let dir = tempfile::tempdir().unwrap();
    let geom = Geometry::new(5);
    let examples = dummy_examples(&geom, 10);
    write_examples(&dir.path().join("a.jsonl"), &examples[..6]).unwrap();
    write_examples(&dir.path().join("b.jsonl"), &examples[6..]).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a chunk").unwrap();

    let mut reader = ChunkReader::from_dir(dir.path(), geom, 4, 3).unwrap().with_seed(1);
    let mut batches = 0;
    let mut total = 0.0;
    while let Some(batch) = reader.next_batch().unwrap() {
        assert_eq!(batch.size(), 4);
        total += batch.pi.sum(tch::Kind::Float).double_value(&[]);
        batches += 1;
    }
    assert_eq!(batches, 2);
    assert_eq!(total, 8.0);
    assert!(reader.next_batch().unwrap().is_none());
}
