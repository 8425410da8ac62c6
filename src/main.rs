use clap::Parser;

mod argument;
mod checkpoint;
mod error;
mod features;
mod gather;
mod go;
mod hparams;
mod inference;
mod neuralnet;
mod objective;
mod preprocessing;
mod stats;
mod summary;
mod symmetries;
mod training;

use argument::Command;
use hparams::{Geometry, HyperParams};

fn plot_loss(curve : &[f64]) {
    if curve.is_empty() {
        println!("no loss history. (train with --logdir)");
        return;
    }
    println!("{}",
        rasciigraph::plot(
            curve.to_vec(),
            rasciigraph::Config::default()
                .with_height(10)
                .with_width(40)
                .with_caption("loss history".to_string())
            ));
}

fn movename(n : usize, idx : usize) -> String {
    if idx == n * n {
        return "pass".to_string();
    }
    format!("({}, {})", idx / n, idx % n)
}

fn main() -> Result<(), error::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let arg = argument::Arg::parse();
    let geom = Geometry::new(arg.board_size);
    let overrides = hparams::Overrides::from(&arg.hparams);
    let hparams = HyperParams::resolve(arg.board_size, &overrides);
    let device = training::device_from(arg.device.as_deref().unwrap_or("cpu"));
    log::info!("board {}x{}, {hparams:?}, {device:?}", geom.board_size, geom.board_size);

    match arg.command {
        Command::Bootstrap { save_file } => {
            log::info!("Creating random initial weights...");
            let mut config = training::TrainerConfig::new(&save_file, geom, hparams);
            config.device = device;
            training::Trainer::new(config).bootstrap()?;
        },
        Command::Train {
            chunk_dir, save_file, init_from, num_steps, logdir, batch_size,
            shuffle_buffer, graph,
        } => {
            let mut config = training::TrainerConfig::new(&save_file, geom, hparams);
            config.device = device;
            config.batch_size = batch_size;
            config.shuffle_buffer = shuffle_buffer;
            config.show_progress = true;
            let mut source = preprocessing::ChunkReader::from_dir(
                &chunk_dir, geom, config.batch_size, config.shuffle_buffer)?;
            let mut trainer = training::Trainer::new(config);
            let report = trainer.train(
                &mut source, init_from.as_deref(), logdir.as_deref(), num_steps)?;
            if let Some(last) = report.last {
                log::info!("{} steps, global step {}, combined cost {:.4}",
                    report.steps, trainer.global_step(), last.combined_cost);
            }
            if graph {
                plot_loss(&report.loss_curve);
            }
        },
        Command::Gather { input_dir, output_dir, per_chunk } => {
            gather::gather(&input_dir, &output_dir, per_chunk, &mut rand::thread_rng())?;
        },
        Command::Infer { load_file, top, symmetry } => {
            let mut net = inference::DualNetwork::new(
                load_file.as_deref(), geom, hparams, device)?;
            let pos = go::Position::new(geom.board_size as usize);
            let (probs, value) = net.run(&pos, symmetry)?;
            match net.save_file() {
                Some(path) => println!("model: {}", path.display()),
                None => println!("model: random weights"),
            }
            println!("value: {value:.4}");
            let mut order = (0..probs.len()).collect::<Vec<usize>>();
            order.sort_by(|a, b| probs[*b].total_cmp(&probs[*a]));
            for idx in order.into_iter().take(top) {
                println!("{:>10} {:.4}", movename(pos.n, idx), probs[idx]);
            }
        },
    }
    Ok(())
}

#[test]
fn test_movename() {
    assert_eq!(movename(9, 81), "pass");
    assert_eq!(movename(9, 0), "(0, 0)");
    assert_eq!(movename(9, 10), "(1, 1)");
}
