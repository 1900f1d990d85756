use clap::arg_enum;
use env_logger::Env;
use log::{debug, error, info};
use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use structopt::StructOpt;

mod disasm;
mod emit;
mod error;
mod parser;
mod patch;
mod region;

use crate::disasm::{Disassembler, M68kDasm, NoDisassembly};
use crate::emit::Emitter;
use crate::error::{CreateOutputDir, ReadDocument, Result, SerializeModel, WriteModel};
use crate::patch::PatchModel;

arg_enum! {
    #[derive(Debug)]
    enum DisassemblerKind {
        M68kdasm,
        Off
    }
}

/// Compiles a patch source document into one patch assembly file per patch and build.
#[derive(Debug, StructOpt)]
#[structopt(name = "patchgen")]
struct Options {
    /// Annotate words with m68kdasm, or leave them unannotated
    #[structopt(
        long,
        possible_values = &DisassemblerKind::variants(),
        case_insensitive = true,
        default_value = "M68kdasm"
    )]
    disassembler: DisassemblerKind,
    /// Disassembler executable used to annotate each word
    #[structopt(long, default_value = "m68kdasm", parse(from_os_str))]
    dasm_program: PathBuf,
    /// Number of artifacts emitted in parallel (defaults to the available cores)
    #[structopt(short, long)]
    jobs: Option<usize>,
    /// Also write the parsed model as JSON
    #[structopt(long, parse(from_os_str))]
    dump_model: Option<PathBuf>,
    #[structopt(index = 1, required = true, name = "SOURCE", parse(from_os_str))]
    input: PathBuf,
    #[structopt(index = 2, required = true, name = "OUT_DIR", parse(from_os_str))]
    out_dir: PathBuf,
}

fn read_model(path: &Path) -> Result<PatchModel> {
    let text = fs::read_to_string(path).context(ReadDocument { path })?;
    parser::parse_document(&text)
}

fn dump_model(model: &PatchModel, path: &Path) -> Result<()> {
    let coded = serde_json::to_string_pretty(model).context(SerializeModel)?;
    fs::write(path, coded).context(WriteModel { path })?;
    info!("model written to {}", path.display());
    Ok(())
}

fn run(opt: &Options) -> Result<()> {
    let model = read_model(&opt.input)?;
    info!(
        "{} patch(es) read from {}",
        model.patches.len(),
        opt.input.display()
    );
    if let Some(path) = &opt.dump_model {
        dump_model(&model, path)?;
    }

    fs::create_dir_all(&opt.out_dir).context(CreateOutputDir {
        path: &opt.out_dir,
    })?;

    let m68kdasm;
    let disassembler: &dyn Disassembler = match opt.disassembler {
        DisassemblerKind::M68kdasm => {
            m68kdasm = M68kDasm::new(&opt.dasm_program);
            &m68kdasm
        }
        DisassemblerKind::Off => &NoDisassembly,
    };
    let jobs = opt
        .jobs
        .or_else(|| thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1);

    let report = Emitter::new(&opt.out_dir, disassembler, jobs).emit_all(&model)?;
    info!(
        "{} file(s) written, {} empty pair(s) skipped",
        report.written.len(),
        report.skipped.len()
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let opt = Options::from_args();
    debug!("{:?}", opt);

    process::exit(exit_code(run(&opt)));
}

fn exit_code(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            error!("{}", err);
            1
        }
    }
}
