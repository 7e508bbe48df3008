use clap::{Parser, Subcommand};
use std::path::PathBuf;

use skillrt::config;
use skillrt::tools::meta::DEFINE_TOOL;
use skillrt::tools::NativeModules;
use skillrt::SkillRuntime;

#[derive(Parser)]
#[command(name = "skillrt")]
#[command(about = "Skill tool runtime CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Seed the config file and create the skill root, workspace and scratch directories.
    Init {
        /// Config file path (default: SKILLRT_CONFIG_PATH or ~/.skillrt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Scan the skill roots and print the skills found, with load warnings.
    Skills {
        /// Config file path (default: SKILLRT_CONFIG_PATH or ~/.skillrt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the live tool list (name, description, parameters) as JSON.
    Tools {
        /// Config file path (default: SKILLRT_CONFIG_PATH or ~/.skillrt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Call a tool and print `{"result": ...}` or `{"error": ...}`. Exits 1 on error.
    Call {
        /// Tool name.
        name: String,

        /// Arguments as a JSON object.
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,

        /// Working directory passed to the handler as workDir (default: configured workspace).
        #[arg(long, value_name = "DIR")]
        work_dir: Option<PathBuf>,

        /// Config file path (default: SKILLRT_CONFIG_PATH or ~/.skillrt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Define a tool from a handler body file. With --persistent it is written as a skill.
    Define {
        /// Tool name (lowercase letters, digits, underscores).
        name: String,

        #[arg(long)]
        description: String,

        /// File holding the handler body.
        #[arg(long, value_name = "FILE")]
        code_file: PathBuf,

        /// Parameter specs as a JSON object.
        #[arg(long, value_name = "JSON")]
        parameters: Option<String>,

        /// Handler language (file extension), e.g. js, py, sh.
        #[arg(long, default_value = "js")]
        language: String,

        #[arg(long)]
        persistent: bool,

        /// Config file path (default: SKILLRT_CONFIG_PATH or ~/.skillrt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Some(Commands::Version) => {
            println!("skillrt {}", env!("CARGO_PKG_VERSION"));
            Ok(true)
        }
        Some(Commands::Init { config }) => run_init(config).map(|()| true),
        Some(Commands::Skills { config }) => run_skills(config).map(|()| true),
        Some(Commands::Tools { config }) => run_tools(config).map(|()| true),
        Some(Commands::Call {
            name,
            args,
            work_dir,
            config,
        }) => run_call(config, &name, &args, work_dir).await,
        Some(Commands::Define {
            name,
            description,
            code_file,
            parameters,
            language,
            persistent,
            config,
        }) => {
            run_define(
                config,
                name,
                description,
                code_file,
                parameters,
                language,
                persistent,
            )
            .await
        }
        None => {
            println!("Run with --help for usage");
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = skillrt::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Load config, check init, build a runtime and populate it from the skill roots.
fn load_runtime(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(SkillRuntime, skillrt::LoadReport, PathBuf)> {
    let (config, path) = config::load_config(config_path)?;
    skillrt::init::require_initialized(&path, &config)?;
    let workspace = config::resolve_workspace_dir(&config, &path);
    let runtime = SkillRuntime::from_config(&config, &path, NativeModules::new());
    let report = runtime.load();
    Ok((runtime, report, workspace))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_skills(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (_runtime, report, _) = load_runtime(config_path)?;
    print_json(&report)
}

fn run_tools(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (runtime, _, _) = load_runtime(config_path)?;
    print_json(&runtime.list_tools())
}

async fn run_call(
    config_path: Option<PathBuf>,
    name: &str,
    args: &str,
    work_dir: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let args: serde_json::Value = serde_json::from_str(args)
        .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {}", e))?;
    let (runtime, _, workspace) = load_runtime(config_path)?;
    let work_dir = work_dir.unwrap_or(workspace);
    let outcome = runtime.call_tool(name, args, &work_dir).await;
    print_json(&outcome)?;
    Ok(!outcome.is_error())
}

async fn run_define(
    config_path: Option<PathBuf>,
    name: String,
    description: String,
    code_file: PathBuf,
    parameters: Option<String>,
    language: String,
    persistent: bool,
) -> anyhow::Result<bool> {
    let code = std::fs::read_to_string(&code_file)
        .map_err(|e| anyhow::anyhow!("reading {}: {}", code_file.display(), e))?;
    let mut args = serde_json::json!({
        "name": name,
        "description": description,
        "code": code,
        "language": language,
        "persistent": persistent,
    });
    if let Some(p) = parameters {
        args["parameters"] = serde_json::from_str(&p)
            .map_err(|e| anyhow::anyhow!("--parameters is not valid JSON: {}", e))?;
    }
    let (runtime, _, workspace) = load_runtime(config_path)?;
    let outcome = runtime.call_tool(DEFINE_TOOL, args, &workspace).await;
    print_json(&outcome)?;
    Ok(!outcome.is_error())
}
