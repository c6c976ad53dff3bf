//! Merge symbolic call paths and lower the init phase of the result to C.

use anyhow::Result;
use bdd_engine_lib::bdd::Bdd;
use bdd_engine_lib::codegen::generate_init;
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

    /// Directory the generated source is written to
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
    let unit = generate_init(&bdd, &config)?;

    std::fs::create_dir_all(&args.output_dir)?;
    let out = args.output_dir.join("nf.c");
    std::fs::write(&out, unit.render())?;

    println!("{}", unit.render());

    Ok(())
}
