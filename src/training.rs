use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tch::nn::VarStore;
use tch::Device;

use super::checkpoint::{self, CheckpointMeta};
use super::error::{Error, Result};
use super::hparams::{Geometry, HyperParams};
use super::neuralnet::DualNet;
use super::objective::{StepRecord, TrainOps};
use super::preprocessing::{self, ExampleSource};
use super::stats::StatisticsCollector;
use super::summary::{self, SummaryWriter};

pub const EXAMPLES_PER_GENERATION : u64 = 2_000_000;
pub const TRAIN_BATCH_SIZE : usize = 16;
/// steps between two flushes of statistics to the log directory.
pub const LOG_INTERVAL : u64 = 100;

/// "cpu", "cuda" or "mps". falls back to cpu when not available.
pub fn device_from(devtype : &str) -> Device {
    if devtype == "mps" && tch::utils::has_mps() {
        Device::Mps
    } else if devtype == "cuda" && tch::utils::has_cuda() {
        Device::Cuda(0)
    } else {
        Device::Cpu
    }
}

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// checkpoint name without extension, e.g. `models/000001-name`.
    pub save_file : PathBuf,
    pub geometry : Geometry,
    pub hparams : HyperParams,
    pub batch_size : usize,
    pub shuffle_buffer : usize,
    pub device : Device,
    pub show_progress : bool,
}

impl TrainerConfig {
    pub fn new(save_file : &Path, geometry : Geometry, hparams : HyperParams) -> TrainerConfig {
        TrainerConfig {
            save_file : save_file.to_path_buf(),
            geometry,
            hparams,
            batch_size : TRAIN_BATCH_SIZE,
            shuffle_buffer : preprocessing::SHUFFLE_BUFFER_SIZE,
            device : Device::Cpu,
            show_progress : false,
        }
    }

    /// steps of a full generation at this batch size.
    pub fn default_steps(&self) -> u64 {
        EXAMPLES_PER_GENERATION / self.batch_size as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Uninitialized,
    WeightsLoaded,
    Training,
    Checkpointed,
}

/// What a call to [`Trainer::train`] did.
#[derive(Debug, Clone, Default)]
pub struct TrainReport {
    pub steps : u64,
    pub exhausted : bool,
    pub last : Option<StepRecord>,
    /// mean combined cost of every logged interval.
    pub loss_curve : Vec<f64>,
}

/// Owns one VarStore and the network built on it.
pub struct Trainer {
    config : TrainerConfig,
    vs : VarStore,
    net : DualNet,
    global_step : u64,
    state : TrainerState,
}

impl Trainer {
    pub fn new(config : TrainerConfig) -> Trainer {
        let vs = VarStore::new(config.device);
        let net = DualNet::new(&vs.root(), &config.geometry, &config.hparams);
        Trainer { config, vs, net, global_step : 0, state : TrainerState::Uninitialized }
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }

    fn randomize(&mut self) {
        self.vs = VarStore::new(self.config.device);
        self.net = DualNet::new(&self.vs.root(), &self.config.geometry, &self.config.hparams);
        self.global_step = 0;
    }

    fn restore(&mut self, from : &Path) -> Result<()> {
        let meta = checkpoint::restore(
            &mut self.vs, from, &self.config.geometry, &self.config.hparams)?;
        self.global_step = meta.global_step;
        Ok(())
    }

    /// writes a checkpoint of fresh random weights to the save location.
    pub fn bootstrap(&mut self) -> Result<()> {
        if self.state != TrainerState::Uninitialized {
            return Err(Error::InvalidState { op : "bootstrap", state : self.state });
        }
        self.randomize();
        self.save_weights()
    }

    /// own checkpoint first, then `init_from`, then random weights.
    ///
    /// an existing checkpoint at the save location always wins so that an older
    /// model given as `init_from` can never overwrite newer weights.
    pub fn initialize_weights(&mut self, init_from : Option<&Path>) -> Result<()> {
        let own = self.config.save_file.clone();
        if checkpoint::exists(&own) {
            log::info!("Restoring from {}", own.display());
            self.restore(&own)?;
        } else if let Some(from) = init_from {
            log::info!("Initializing from {}", from.display());
            self.restore(from)?;
        } else {
            log::info!("Bootstrapping with random weights");
            self.randomize();
        }
        self.state = TrainerState::WeightsLoaded;
        Ok(())
    }

    pub fn save_weights(&mut self) -> Result<()> {
        let meta = CheckpointMeta::new(
            self.config.geometry, self.config.hparams, self.global_step);
        checkpoint::save(&self.vs, &self.config.save_file, &meta)?;
        self.state = TrainerState::Checkpointed;
        Ok(())
    }

    fn progressbar(&self, len : u64) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::with_template(
                "[{elapsed_precise}]{wide_bar}[{eta_precise}] {pos}/{len} {msg}") {
            pb.set_style(style.progress_chars("📗📖📓"));
        }
        pb
    }

    /// trains on up to `num_steps` batches of `source` and saves a checkpoint,
    /// also when the source runs dry early.
    pub fn train(&mut self, source : &mut dyn ExampleSource, init_from : Option<&Path>,
            logdir : Option<&Path>, num_steps : Option<u64>) -> Result<TrainReport> {
        let num_steps = num_steps.unwrap_or_else(|| self.config.default_steps());
        self.initialize_weights(init_from)?;
        let mut ops = TrainOps::new(&self.vs, &self.config.hparams)?;
        let mut logger = match logdir {
            Some(dir) => {
                let writer = SummaryWriter::new(dir)?;
                log::info!("writing statistics to {}", writer.path().display());
                Some((StatisticsCollector::new(), writer))
            },
            None => None,
        };
        self.state = TrainerState::Training;

        let mut report = TrainReport::default();
        let pb = self.progressbar(num_steps);
        for i in 0..num_steps {
            let Some(batch) = source.next_batch()? else {
                log::info!("example source exhausted after {i} steps");
                report.exhausted = true;
                break;
            };
            let batch = batch.to_device(self.config.device);
            let rec = ops.step(&self.net, &batch, &mut self.global_step)?;
            report.steps += 1;
            report.last = Some(rec);
            pb.set_message(format!("loss: {:.3}", rec.combined_cost));
            pb.inc(1);

            let Some((stats, writer)) = logger.as_mut() else {continue;};
            stats.report(rec.policy_cost, rec.value_cost, rec.l2_cost, rec.combined_cost);
            if i % LOG_INTERVAL == 0 {
                let accuracy = stats.collect()?;
                if let Some(summary::Value::Scalar(c)) = accuracy.get(super::stats::COMBINED_COST) {
                    report.loss_curve.push(*c);
                }
                writer.add_summary(&accuracy, rec.global_step)?;
                writer.add_summary(&summary::weight_summaries(&self.vs)?, rec.global_step)?;
            }
        }
        pb.finish_with_message(format!("done! {} steps", report.steps));

        self.save_weights()?;
        Ok(report)
    }
}

#[cfg(test)]
fn tiny_config(save_file : &Path) -> TrainerConfig {
    let hp = HyperParams::resolve(9, &super::hparams::Overrides {
        k : Some(1), fc_width : Some(2), num_shared_layers : Some(1),
        ..Default::default()
    });
    let mut config = TrainerConfig::new(save_file, Geometry::new(9), hp);
    config.batch_size = 4;
    config
}

/// hands out `limit` batches of dummy examples.
#[cfg(test)]
struct FiniteSource {
    geom : Geometry,
    batch_size : usize,
    limit : usize,
    served : usize,
}

#[cfg(test)]
impl ExampleSource for FiniteSource {
    fn next_batch(&mut self) -> Result<Option<preprocessing::Batch>> {
        if self.served >= self.limit {
            return Ok(None);
        }
        self.served += 1;
        let ex = preprocessing::dummy_examples(&self.geom, self.batch_size);
        preprocessing::Batch::from_examples(&ex, &self.geom).map(Some)
    }
}

#[test]
fn test_default_steps() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainerConfig::new(&dir.path().join("m"), Geometry::new(9),
        HyperParams::for_board(9));
    assert_eq!(config.default_steps(), 125_000);
}

#[test]
fn test_bootstrap_then_restore() {
    let dir = tempfile::tempdir().unwrap();
    let save_file = dir.path().join("models/000000-bootstrap");
    let mut trainer = Trainer::new(tiny_config(&save_file));
    assert_eq!(trainer.state(), TrainerState::Uninitialized);
    trainer.bootstrap().unwrap();
    assert_eq!(trainer.state(), TrainerState::Checkpointed);
    assert!(checkpoint::exists(&save_file));
    assert!(checkpoint::weights_path(&save_file).is_file());

    // only once
    assert!(matches!(trainer.bootstrap(),
        Err(Error::InvalidState { op : "bootstrap", .. })));

    let mut fresh = Trainer::new(tiny_config(&save_file));
    fresh.initialize_weights(None).unwrap();
    assert_eq!(fresh.state(), TrainerState::WeightsLoaded);
    let a = trainer.var_store().variables();
    let b = fresh.var_store().variables();
    for (name, t) in a.iter() {
        assert!(t.equal(&b[name]), "{name}");
    }
}

#[test]
fn test_own_checkpoint_wins_over_init_from() {
    let dir = tempfile::tempdir().unwrap();
    let own = dir.path().join("own");
    let older = dir.path().join("older");

    let mut a = Trainer::new(tiny_config(&own));
    a.bootstrap().unwrap();
    let mut b = Trainer::new(tiny_config(&older));
    b.bootstrap().unwrap();

    let mut t = Trainer::new(tiny_config(&own));
    t.initialize_weights(Some(&older)).unwrap();
    let mine = a.var_store().variables();
    let theirs = b.var_store().variables();
    let got = t.var_store().variables();
    assert!(got["init.conv.weight"].equal(&mine["init.conv.weight"]));
    assert!(!got["init.conv.weight"].equal(&theirs["init.conv.weight"]));
}

#[test]
fn test_init_from_when_no_own_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let older = dir.path().join("older");
    let mut b = Trainer::new(tiny_config(&older));
    b.bootstrap().unwrap();

    let mut t = Trainer::new(tiny_config(&dir.path().join("new")));
    t.initialize_weights(Some(&older)).unwrap();
    let got = t.var_store().variables();
    assert!(got["value.fc2.weight"].equal(&b.var_store().variables()["value.fc2.weight"]));

    // a missing init_from is an error, not a silent fallback
    let mut t = Trainer::new(tiny_config(&dir.path().join("other")));
    assert!(matches!(t.initialize_weights(Some(&dir.path().join("absent"))),
        Err(Error::MissingCheckpoint(_))));
}

#[test]
fn test_train_stops_when_source_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let save_file = dir.path().join("models/000001");
    let logdir = dir.path().join("logs");
    let config = tiny_config(&save_file);
    let mut source = FiniteSource {
        geom : config.geometry, batch_size : config.batch_size, limit : 3, served : 0 };
    let mut trainer = Trainer::new(config);
    let report = trainer.train(&mut source, None, Some(&logdir), Some(10)).unwrap();
    assert_eq!(report.steps, 3);
    assert!(report.exhausted);
    assert_eq!(trainer.global_step(), 3);
    assert_eq!(trainer.state(), TrainerState::Checkpointed);
    assert!(checkpoint::exists(&save_file));
    assert_eq!(checkpoint::read_meta(&save_file).unwrap().global_step, 3);

    // step 0 is logged: 4 scalars + one histogram per trainable variable
    let events = summary::read_events(&logdir.join("events.jsonl")).unwrap();
    let trainable = trainer.var_store().trainable_variables().len();
    assert_eq!(events.len(), 4 + trainable);
    assert!(events.iter().all(|e| e.step == 1));
    assert_eq!(report.loss_curve.len(), 1);
}

#[test]
fn test_train_resumes_step_counter() {
    let dir = tempfile::tempdir().unwrap();
    let save_file = dir.path().join("m");
    let config = tiny_config(&save_file);
    let geom = config.geometry;

    let mut trainer = Trainer::new(config.clone());
    let mut source = FiniteSource { geom, batch_size : 4, limit : 100, served : 0 };
    let report = trainer.train(&mut source, None, None, Some(2)).unwrap();
    assert_eq!(report.steps, 2);
    assert!(!report.exhausted);
    assert!(report.loss_curve.is_empty());

    let mut again = Trainer::new(config);
    again.train(&mut source, None, None, Some(2)).unwrap();
    assert_eq!(again.global_step(), 4);
}

#[test]
fn test_bootstrap_gather_train() {
    use rand::SeedableRng;

    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    let save_file = base.join("models/000000-bootstrap");
    let config = tiny_config(&save_file);
    let geom = config.geometry;
    Trainer::new(config.clone()).bootstrap().unwrap();

    // stand-in for two self-play runs
    let selfplay = base.join("data/selfplay/000000-bootstrap");
    let examples = preprocessing::dummy_examples(&geom, 20);
    preprocessing::write_examples(&selfplay.join("a.jsonl"), &examples[..10]).unwrap();
    preprocessing::write_examples(&selfplay.join("b.jsonl"), &examples[10..]).unwrap();
    let chunks = base.join("data/training_chunks");
    let mut rng = rand::rngs::StdRng::seed_from_u64(2);
    super::gather::gather(&base.join("data/selfplay"), &chunks, 8, &mut rng).unwrap();

    let mut source = preprocessing::ChunkReader::from_dir(
        &chunks, geom, config.batch_size, 10).unwrap().with_seed(3);
    let mut trainer = Trainer::new(config);
    let report = trainer.train(&mut source, None, None, Some(10_000)).unwrap();
    // 20 examples in batches of 4
    assert_eq!(report.steps, 5);
    assert!(report.exhausted);
    assert_eq!(checkpoint::read_meta(&save_file).unwrap().global_step, 5);
}
