use crate::disasm::Disassembler;
use crate::error::{Error, Result, WriteArtifact};
use crate::patch::{BuildVariant, Patch, PatchModel, WriteRegion};
use crate::region::compile_regions;
use log::{debug, info};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::thread;

/// `<name without whitespace>.<build>.patch.s`
pub fn artifact_file_name(name: &str, variant: BuildVariant) -> String {
    let stem: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    format!("{}.{}.patch.s", stem, variant)
}

/// Renders the patch assembly for one build, or `None` if there is nothing to write.
pub fn render_artifact(
    display_name: Option<&str>,
    description: Option<&str>,
    regions: &[WriteRegion],
    disassembler: &dyn Disassembler,
) -> Option<String> {
    if regions.is_empty() {
        return None;
    }
    let mut text = String::new();
    write_artifact(&mut text, display_name, description, regions, disassembler).ok()?;
    Some(text)
}

fn write_artifact<W: Write>(
    out: &mut W,
    display_name: Option<&str>,
    description: Option<&str>,
    regions: &[WriteRegion],
    disassembler: &dyn Disassembler,
) -> fmt::Result {
    if let Some(display_name) = display_name {
        writeln!(out, ".meta name=\"{}\"", display_name)?;
    }
    if let Some(description) = description {
        writeln!(out, ".meta description=\"{}\"", description)?;
    }
    writeln!(out)?;
    writeln!(out, "entry_ptr:")?;
    writeln!(out, "reloc0:")?;
    writeln!(out, "  .offsetof start")?;
    writeln!(out, "start:")?;
    writeln!(out, "  .include  WriteCodeBlocksGC")?;
    for region in regions {
        writeln!(
            out,
            "  # region @ {:08X} ({} bytes)",
            region.address,
            region.size()
        )?;
        writeln!(out, "  .data     0x{:08X}  # address", region.address)?;
        writeln!(out, "  .data     0x{:08X}  # size", region.size())?;
        for (address, value) in region.words() {
            let disassembly = disassembler
                .disassemble(value, address)
                .unwrap_or_default();
            writeln!(
                out,
                "  .data     0x{:08X}  # {:08X} => {}",
                value, address, disassembly
            )?;
        }
    }
    writeln!(out, "  # end sentinel")?;
    writeln!(out, "  .data     0x00000000  # address")?;
    writeln!(out, "  .data     0x00000000  # size")?;
    Ok(())
}

#[derive(Debug, Default, PartialEq)]
pub struct EmitReport {
    pub written: Vec<PathBuf>,
    /// Registered (patch, build) pairs that had no writes.
    pub skipped: Vec<(String, BuildVariant)>,
}

struct Job<'m> {
    name: &'m str,
    variant: BuildVariant,
    patch: &'m Patch,
    writes: &'m BTreeMap<u32, u32>,
}

enum Outcome {
    Written(PathBuf),
    Skipped(String, BuildVariant),
}

/// Writes one artifact per (patch, build) pair into `out_dir`.
pub struct Emitter<'d> {
    out_dir: PathBuf,
    disassembler: &'d dyn Disassembler,
    jobs: usize,
}

impl<'d> Emitter<'d> {
    pub fn new<P: Into<PathBuf>>(
        out_dir: P,
        disassembler: &'d dyn Disassembler,
        jobs: usize,
    ) -> Emitter<'d> {
        Emitter {
            out_dir: out_dir.into(),
            disassembler,
            jobs: jobs.max(1),
        }
    }

    pub fn emit_all(&self, model: &PatchModel) -> Result<EmitReport> {
        let jobs: Vec<Job<'_>> = model
            .patches
            .iter()
            .flat_map(|(name, patch)| {
                patch.variants.iter().map(move |(&variant, writes)| Job {
                    name,
                    variant,
                    patch,
                    writes,
                })
            })
            .collect();
        let workers = self.jobs.min(jobs.len());
        debug!("emitting {} artifact(s) on {} worker(s)", jobs.len(), workers);

        let queue = Mutex::new(jobs.into_iter());
        let queue = &queue;
        let joined = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(move |_| {
                    scope.spawn(move || {
                        let mut outcomes = Vec::new();
                        loop {
                            let job = queue
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .next();
                            match job {
                                Some(job) => outcomes.push(self.emit_one(&job)),
                                None => break,
                            }
                        }
                        outcomes
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<Vec<_>>()
        });

        let mut report = EmitReport::default();
        for outcomes in joined {
            let outcomes = outcomes.map_err(|_| Error::WorkerPanicked)?;
            for outcome in outcomes {
                match outcome? {
                    Outcome::Written(path) => report.written.push(path),
                    Outcome::Skipped(name, variant) => report.skipped.push((name, variant)),
                }
            }
        }
        report.written.sort();
        report.skipped.sort();
        Ok(report)
    }

    fn emit_one(&self, job: &Job<'_>) -> Result<Outcome> {
        let path = self
            .out_dir
            .join(artifact_file_name(job.name, job.variant));
        let regions = compile_regions(job.writes);
        let text = render_artifact(
            job.patch.display_name.as_deref(),
            job.patch.description.as_deref(),
            &regions,
            self.disassembler,
        );
        match text {
            Some(text) => {
                fs::write(&path, text).context(WriteArtifact { path: &path })?;
                info!("... {}", path.display());
                Ok(Outcome::Written(path))
            }
            None => {
                info!("*** {} (no data to write)", path.display());
                Ok(Outcome::Skipped(job.name.to_owned(), job.variant))
            }
        }
    }
}
