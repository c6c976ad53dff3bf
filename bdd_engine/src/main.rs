//! Merge symbolic call paths into a single decision diagram and dump it.

use anyhow::Result;
use bdd_engine_lib::bdd::Bdd;
use bdd_engine_lib::parser::parse_call_path_file;
use bdd_engine_lib::solver::SolverToolbox;
use bdd_engine_lib::Config;
use clap::Parser;
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Parser)]
#[clap(about, version, author)]
struct Args {
    /// Call-path files produced by the symbolic executor
    #[clap(required = true)]
    call_paths: Vec<PathBuf>,

    /// Directory the dump is written to
    #[clap(short, long, default_value = ".")]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut call_paths = Vec::new();
    for file in &args.call_paths {
        log::info!("loading {}", file.display());
        call_paths.push(Rc::new(parse_call_path_file(file)?));
    }

    let toolbox = SolverToolbox::with_z3()?;
    let config = Config::default();

    let bdd = Bdd::from_call_paths(call_paths, &toolbox, &config);
    let dump = bdd.dump();

    std::fs::create_dir_all(&args.output_dir)?;
    let out = args.output_dir.join("bdd.txt");
    std::fs::write(&out, &dump)?;

    eprintln!("{}", dump);

    Ok(())
}
