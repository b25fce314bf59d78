use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use backend::NagaBackend;
use crossbeam_channel::{Receiver, Sender};
use scheduler::{CompileScheduler, DrawSession, JobOwner, Program};
use shaderlib::{ShaderLibrary, Stage, StageSources, FULLSCREEN_VERTEX_GLSL};
use shaderset::{ProgramEntry, ShaderSet};
use tracing_subscriber::EnvFilter;

use crate::cli::{ResolveArgs, RunArgs};
use crate::host::{ChannelHost, HostEvent};
use crate::report::{BakeReport, ProgramReport};

pub fn run(args: RunArgs) -> Result<()> {
    let Some(manifest) = args.manifest.as_deref() else {
        bail!("no manifest given; usage: shaderbake <MANIFEST>");
    };
    let set = load_manifest(manifest)?;
    let library = load_library(&set)?;

    let mut settings = set.compiler.clone();
    if args.sync {
        settings.deferred = false;
    }
    let session = DrawSession {
        owner: Some(JobOwner::new(&args.window, &args.scene)),
        image_render: args.image_render,
    };
    tracing::info!(
        manifest = %manifest.display(),
        programs = set.programs.len(),
        fragments = library.len(),
        deferred = settings.deferred,
        image_render = session.image_render,
        "baking shader programs"
    );

    let backend = NagaBackend::new();
    let main_context = backend.main_context();
    let (host, events) = ChannelHost::new();
    let idle = host.sender();
    let scheduler =
        CompileScheduler::new(backend, main_context, settings.clone()).with_host(Arc::new(host));

    let mut programs = Vec::with_capacity(set.programs.len());
    for entry in &set.programs {
        let program = Program::new(entry.name.clone(), load_program(&set, &library, entry)?);
        let deferred = entry.is_deferred(&settings);
        scheduler
            .submit(&program, &session, deferred)
            .with_context(|| format!("failed to submit program '{}'", entry.name))?;
        programs.push((program, deferred));
    }

    let jobs = std::thread::scope(|scope| {
        scope.spawn(|| {
            scheduler.wait();
            announce_idle(&idle);
        });
        watch_progress(&events)
    });
    drop(scheduler);

    let mut report = BakeReport {
        jobs,
        ..BakeReport::default()
    };
    for (program, deferred) in &programs {
        report.push(ProgramReport::from_program(program, *deferred));
    }

    let mut stdout = io::stdout().lock();
    if args.json {
        report.write_json(&mut stdout)?;
    } else {
        report.write_text(&mut stdout)?;
    }

    if report.has_failures() {
        bail!("{} of {} programs failed to compile", report.failed, report.programs.len());
    }
    Ok(())
}

pub fn resolve(args: ResolveArgs) -> Result<()> {
    let set = load_manifest(&args.manifest)?;
    let entry = set.program(&args.program).with_context(|| {
        format!(
            "program '{}' not found in {}",
            args.program,
            args.manifest.display()
        )
    })?;
    let library = load_library(&set)?;
    let sources = load_program(&set, &library, entry)?;
    let source = sources
        .stage(args.stage)
        .with_context(|| format!("program '{}' has no {} stage", entry.name, args.stage))?;
    print!("{source}");
    Ok(())
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn load_manifest(path: &Path) -> Result<ShaderSet> {
    ShaderSet::load(path).with_context(|| format!("failed to load manifest {}", path.display()))
}

fn load_library(set: &ShaderSet) -> Result<ShaderLibrary> {
    let mut library = ShaderLibrary::new();
    for entry in &set.library {
        let path = set.resolve_path(&entry.path);
        let source = fs::read_to_string(&path).with_context(|| {
            format!(
                "failed to read library fragment '{}' at {}",
                entry.name,
                path.display()
            )
        })?;
        library
            .try_register(entry.name.clone(), source)
            .with_context(|| format!("failed to register library fragment '{}'", entry.name))?;
    }
    tracing::debug!(fragments = library.len(), "loaded shader library");
    Ok(library)
}

/// Reads every stage of `entry` and resolves its library requirements.
fn load_program(
    set: &ShaderSet,
    library: &ShaderLibrary,
    entry: &ProgramEntry,
) -> Result<StageSources> {
    let mut sources = StageSources::new();
    for (stage, path) in stage_paths(entry) {
        let path = set.resolve_path(path);
        let source = fs::read_to_string(&path).with_context(|| {
            format!(
                "failed to read {stage} stage of '{}' at {}",
                entry.name,
                path.display()
            )
        })?;
        for name in library.unresolved(&source) {
            tracing::warn!(program = %entry.name, %stage, dependency = %name, "unknown library fragment");
        }
        sources.set_stage(stage, source);
    }
    if entry.fragment.is_some() && entry.vertex.is_none() {
        sources.set_stage(Stage::Vertex, FULLSCREEN_VERTEX_GLSL);
    }
    for (name, value) in &entry.defines {
        sources = sources.with_define(name.clone(), value.clone());
    }
    Ok(library.assemble(&sources))
}

fn stage_paths(entry: &ProgramEntry) -> Vec<(Stage, &Path)> {
    [
        (Stage::Vertex, &entry.vertex),
        (Stage::Geometry, &entry.geometry),
        (Stage::Fragment, &entry.fragment),
        (Stage::Compute, &entry.compute),
    ]
    .into_iter()
    .filter_map(|(stage, path)| path.as_deref().map(|path| (stage, path)))
    .collect()
}

fn announce_idle(sender: &Sender<HostEvent>) {
    if sender.send(HostEvent::Idle).is_err() {
        tracing::trace!("idle event dropped; receiver gone");
    }
}

/// Logs job events until every worker has exited; returns the number of jobs
/// that ran.
fn watch_progress(events: &Receiver<HostEvent>) -> usize {
    let mut finished = 0;
    for event in events.iter() {
        match event {
            HostEvent::Started(owner) => {
                tracing::debug!(%owner, "compile job started");
            }
            HostEvent::Update(owner, progress) => {
                tracing::info!(
                    %owner,
                    completed = progress.completed,
                    queued = progress.queued,
                    "compiling shaders: {:.0}%",
                    progress.fraction() * 100.0
                );
            }
            HostEvent::Finished(owner, progress) => {
                tracing::debug!(%owner, completed = progress.completed, "compile job finished");
                finished += 1;
            }
            HostEvent::Idle => break,
        }
    }
    finished
}
