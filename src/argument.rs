use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::hparams::Overrides;

#[derive(Debug, Parser)]
#[command(version, author, about)]
pub struct Arg {
    #[command(subcommand)]
    pub command : Command,
    /// board size.
    #[arg(long, global = true, env = "BOARD_SIZE", default_value_t = 19)]
    pub board_size : i64,
    /// device to process. cuda, mps or cpu. default:cpu.
    #[arg(long, global = true)]
    pub device : Option<String>,
    #[command(flatten)]
    pub hparams : HParamArg,
}

/// overrides of the board-size defaults.
#[derive(Debug, Args)]
pub struct HParamArg {
    /// filters per convolution.
    #[arg(long, global = true)]
    pub k : Option<i64>,
    /// width of the value head dense layer.
    #[arg(long, global = true)]
    pub fc_width : Option<i64>,
    /// number of residual blocks.
    #[arg(long, global = true)]
    pub num_shared_layers : Option<usize>,
    /// L2 regularization strength.
    #[arg(long, global = true)]
    pub l2_strength : Option<f64>,
    /// SGD momentum.
    #[arg(long, global = true)]
    pub momentum : Option<f64>,
}

impl From<&HParamArg> for Overrides {
    fn from(a : &HParamArg) -> Overrides {
        Overrides {
            k : a.k,
            fc_width : a.fc_width,
            num_shared_layers : a.num_shared_layers,
            l2_strength : a.l2_strength,
            momentum : a.momentum,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// write a checkpoint with random initial weights.
    Bootstrap {
        /// checkpoint name, e.g. models/000000-bootstrap
        save_file : PathBuf,
    },
    /// train on gathered chunks.
    Train {
        /// directory of training chunks.
        chunk_dir : PathBuf,
        /// checkpoint to write (and to resume from if it exists).
        #[arg(long)]
        save_file : PathBuf,
        /// checkpoint to start from when save_file does not exist yet.
        #[arg(long)]
        init_from : Option<PathBuf>,
        /// # of steps. default: one generation of examples.
        #[arg(long)]
        num_steps : Option<u64>,
        /// directory for statistics.
        #[arg(long)]
        logdir : Option<PathBuf>,
        /// mini batch size
        #[arg(long, default_value_t = 16)]
        batch_size : usize,
        #[arg(long, default_value_t = 2000)]
        shuffle_buffer : usize,
        /// show ascii graph
        #[arg(long, default_value_t = false)]
        graph : bool,
    },
    /// shuffle self-play examples into training chunks.
    Gather {
        input_dir : PathBuf,
        output_dir : PathBuf,
        #[arg(long, default_value_t = 10000)]
        per_chunk : usize,
    },
    /// evaluate an empty board.
    Infer {
        load_file : Option<PathBuf>,
        /// # of moves to show.
        #[arg(long, default_value_t = 5)]
        top : usize,
        #[arg(long, default_value_t = false)]
        symmetry : bool,
    },
}

#[test]
fn test_parse_train() {
    let arg = Arg::try_parse_from([
        "dualgo", "train", "chunks", "--save-file", "models/000001",
        "--num-steps", "10", "--board-size", "9", "--k", "8",
    ]).unwrap();
    assert_eq!(arg.board_size, 9);
    let ov = Overrides::from(&arg.hparams);
    assert_eq!(ov.k, Some(8));
    assert_eq!(ov.fc_width, None);
    match arg.command {
        Command::Train { chunk_dir, save_file, num_steps, batch_size, init_from, .. } => {
            assert_eq!(chunk_dir, PathBuf::from("chunks"));
            assert_eq!(save_file, PathBuf::from("models/000001"));
            assert_eq!(num_steps, Some(10));
            assert_eq!(batch_size, 16);
            assert!(init_from.is_none());
        },
        other => panic!("{other:?}"),
    }
}
