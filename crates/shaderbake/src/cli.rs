use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shaderlib::Stage;

#[derive(Parser, Debug)]
#[command(
    name = "shaderbake",
    author,
    version,
    about = "Compile the shader programs of a manifest",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Shader manifest (TOML) listing library fragments and programs.
    #[arg(value_name = "MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Compile every program on the calling thread instead of background workers.
    #[arg(long)]
    pub sync: bool,

    /// Treat the run as a final-frame render; nothing is deferred.
    #[arg(long)]
    pub image_render: bool,

    /// Window name used to key the background compile job.
    #[arg(long, value_name = "NAME", default_value = "main")]
    pub window: String,

    /// Scene name used to key the background compile job.
    #[arg(long, value_name = "NAME", default_value = "Scene")]
    pub scene: String,

    /// Print the bake report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print one stage of a program with its library dependencies resolved.
    Resolve(ResolveArgs),
}

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    #[arg(value_name = "MANIFEST")]
    pub manifest: PathBuf,

    #[arg(value_name = "PROGRAM")]
    pub program: String,

    /// Stage to print: `vertex`, `geometry`, `fragment` or `compute`.
    #[arg(
        long,
        value_name = "STAGE",
        value_parser = parse_stage,
        default_value = "fragment"
    )]
    pub stage: Stage,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_stage(value: &str) -> Result<Stage, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("stage must not be empty".to_string());
    }
    Stage::parse(trimmed).ok_or_else(|| {
        format!("unknown stage '{trimmed}'; expected vertex, geometry, fragment, or compute")
    })
}
