use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tch::nn::VarStore;
use tch::Tensor;

use super::error::Result;

const NUM_BUCKETS : usize = 30;

/// Distribution of a weight tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub min : f64,
    pub max : f64,
    pub num : u64,
    pub sum : f64,
    pub sum_squares : f64,
    /// upper edge of every bucket.
    pub bucket_limit : Vec<f64>,
    pub bucket : Vec<u64>,
}

impl Histogram {
    pub fn from_values(values : &[f32]) -> Histogram {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        for v in values.iter().map(|v| *v as f64) {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            sum_squares += v * v;
        }
        if values.is_empty() {
            min = 0.0;
            max = 0.0;
        }

        let nbucket = if max > min {NUM_BUCKETS} else {1};
        let width = (max - min) / nbucket as f64;
        let bucket_limit = (1..=nbucket)
            .map(|i| if i == nbucket {max} else {min + width * i as f64})
            .collect::<Vec<f64>>();
        let mut bucket = vec![0u64 ; nbucket];
        for v in values.iter().map(|v| *v as f64) {
            let i = if width > 0.0 {((v - min) / width) as usize} else {0};
            bucket[i.min(nbucket - 1)] += 1;
        }
        Histogram {
            min, max, num : values.len() as u64, sum, sum_squares, bucket_limit, bucket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Scalar(f64),
    Histogram(Histogram),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryValue {
    pub tag : String,
    pub value : Value,
}

/// A set of tagged values meant for one step of the monitoring sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub values : Vec<SummaryValue>,
}

impl Summary {
    pub fn scalar(&mut self, tag : &str, value : f64) {
        self.values.push(SummaryValue { tag : tag.to_string(), value : Value::Scalar(value) });
    }

    pub fn histogram(&mut self, tag : &str, histo : Histogram) {
        self.values.push(SummaryValue { tag : tag.to_string(), value : Value::Histogram(histo) });
    }

    pub fn get(&self, tag : &str) -> Option<&Value> {
        self.values.iter().find(|v| v.tag == tag).map(|v| &v.value)
    }
}

/// one histogram per trainable variable.
pub fn weight_summaries(vs : &VarStore) -> Result<Summary> {
    let mut vars = vs.variables().into_iter()
        .filter(|(_, t)| t.requires_grad())
        .collect::<Vec<(String, Tensor)>>();
    vars.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summary = Summary::default();
    for (name, t) in vars {
        let values = Vec::<f32>::try_from(
            &t.detach().to_device(tch::Device::Cpu).flatten(0, -1))?;
        summary.histogram(&name, Histogram::from_values(&values));
    }
    Ok(summary)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Event {
    pub step : u64,
    pub wall_time : f64,
    #[serde(flatten)]
    pub value : SummaryValue,
}

/// Appends summaries as JSON lines to `<logdir>/events.jsonl`.
pub struct SummaryWriter {
    path : PathBuf,
    out : BufWriter<fs::File>,
}

impl SummaryWriter {
    pub fn new(logdir : &Path) -> Result<SummaryWriter> {
        fs::create_dir_all(logdir)?;
        let path = logdir.join("events.jsonl");
        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(SummaryWriter { path, out : BufWriter::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_summary(&mut self, summary : &Summary, step : u64) -> Result<()> {
        let wall_time = SystemTime::now().duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64()).unwrap_or(0.0);
        for value in summary.values.iter() {
            let ev = Event { step, wall_time, value : value.clone() };
            serde_json::to_writer(&mut self.out, &ev)?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

pub fn read_events(path : &Path) -> Result<Vec<Event>> {
    let content = fs::read_to_string(path)?;
    let mut events = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        events.push(serde_json::from_str(line)?);
    }
    Ok(events)
}

#[test]
fn test_histogram() {
    let h = Histogram::from_values(&[-1.0, 0.0, 0.5, 1.0]);
    assert_eq!(h.min, -1.0);
    assert_eq!(h.max, 1.0);
    assert_eq!(h.num, 4);
    assert_eq!(h.sum, 0.5);
    assert_eq!(h.sum_squares, 2.25);
    assert_eq!(h.bucket.len(), NUM_BUCKETS);
    assert_eq!(h.bucket.iter().sum::<u64>(), 4);
    assert_eq!(*h.bucket.first().unwrap(), 1);
    assert_eq!(*h.bucket.last().unwrap(), 1);
    assert_eq!(*h.bucket_limit.last().unwrap(), 1.0);

    let h = Histogram::from_values(&[0.25 ; 5]);
    assert_eq!(h.bucket, vec![5]);
    assert_eq!(h.bucket_limit, vec![0.25]);

    let h = Histogram::from_values(&[]);
    assert_eq!(h.num, 0);
    assert_eq!(h.bucket, vec![0]);
}

#[test]
fn test_writer_appends_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = Summary::default();
    s.scalar("Policy error", 0.5);
    s.histogram("w", Histogram::from_values(&[1.0, 2.0]));
    {
        let mut w = SummaryWriter::new(dir.path()).unwrap();
        w.add_summary(&s, 0).unwrap();
        w.add_summary(&s, 100).unwrap();
    }
    let events = read_events(&dir.path().join("events.jsonl")).unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].step, 0);
    assert_eq!(events[0].value.tag, "Policy error");
    assert_eq!(events[0].value.value, Value::Scalar(0.5));
    assert_eq!(events[3].step, 100);
    assert!(matches!(events[3].value.value, Value::Histogram(_)));
}

#[test]
fn test_weight_summaries() {
    let vs = VarStore::new(tch::Device::Cpu);
    let root = vs.root();
    let _w = root.ones("weight", &[2, 3]);
    let _r = root.zeros_no_train("running_mean", &[3]);
    let s = weight_summaries(&vs).unwrap();
    assert_eq!(s.values.len(), 1);
    match s.get("weight") {
        Some(Value::Histogram(h)) => {
            assert_eq!(h.num, 6);
            assert_eq!(h.sum, 6.0);
        },
        other => panic!("{other:?}"),
    }
}
