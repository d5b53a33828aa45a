mod display;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use iacgraph_core::config::{generate_default_config, load_config, ScanConfig};
use iacgraph_core::graph::export;
use iacgraph_core::report::sarif;
use iacgraph_core::{
    all_checks, load_template, plan_units, ScanContext, Scanner, TemplateCompiler, TemplateGraph,
};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "iacgraph.toml";
const TEMPLATE_EXTENSIONS: [&str; 4] = ["yaml", "yml", "json", "template"];

#[derive(Parser)]
#[command(
    name = "iacgraph",
    version,
    about = "iacgraph: static security checks for CloudFormation templates",
    long_about = "Compile CloudFormation templates into a line-tracked graph and check it for insecure resource declarations.\n\nNothing is deployed or executed; every finding points at the template line that causes it."
)]
struct Cli {
    /// Log scan progress to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan templates and report vulnerable resource declarations
    Scan {
        /// Template files or directories to scan
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text", value_parser = ["text", "json", "yaml", "sarif"])]
        format: String,

        /// Run only this check (repeatable)
        #[arg(short, long = "check")]
        checks: Vec<String>,

        /// Configuration file (defaults to ./iacgraph.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Compile all templates into one namespace so cross-template references resolve
        #[arg(long)]
        group: bool,

        /// Per-unit timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Exit with status 1 when any check is OPEN
        #[arg(long)]
        fail_on_open: bool,
    },

    /// List the available checks
    Checks {
        /// Output format
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Export the compiled graph of a template
    Graph {
        /// Template file
        path: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "dot", value_parser = ["dot", "mermaid"])]
        format: String,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// Where to write the configuration
        #[arg(default_value = DEFAULT_CONFIG)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Scan {
            paths,
            format,
            checks,
            config,
            group,
            timeout,
            fail_on_open,
        } => cmd_scan(
            &paths,
            &format,
            checks,
            config.as_deref(),
            group,
            timeout,
            fail_on_open,
        ),
        Commands::Checks { format } => cmd_checks(&format),
        Commands::Graph {
            path,
            format,
            output,
        } => cmd_graph(&path, &format, output.as_deref()),
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "iacgraph", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("iacgraph=info,iacgraph_core=info")
    } else {
        EnvFilter::new("iacgraph=warn,iacgraph_core=warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(
    path: Option<&Path>,
    checks: Vec<String>,
    group: bool,
    timeout: Option<u64>,
) -> Result<ScanConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None if Path::new(DEFAULT_CONFIG).is_file() => load_config(Path::new(DEFAULT_CONFIG))?,
        None => ScanConfig::default(),
    };

    if !checks.is_empty() {
        config.checks.enabled = checks;
    }
    if group {
        config.scan.group_templates = true;
    }
    if let Some(secs) = timeout {
        config.scan.timeout_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

fn is_excluded(path: &Path, exclude: &[glob::Pattern]) -> bool {
    exclude.iter().any(|p| p.matches_path(path))
}

/// Cheap pre-filter so discovery skips unrelated JSON/YAML (package.json, CI configs).
fn looks_like_template(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|content| content.contains("Resources"))
        .unwrap_or(false)
}

fn discover_templates(paths: &[PathBuf], exclude: &[String]) -> Result<Vec<PathBuf>> {
    let exclude = exclude
        .iter()
        .map(|p| glob::Pattern::new(p).with_context(|| format!("Invalid exclude pattern '{}'", p)))
        .collect::<Result<Vec<_>>>()?;

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for ext in TEMPLATE_EXTENSIONS {
                let pattern = format!("{}/**/*.{}", path.display(), ext);
                files.extend(
                    glob::glob(&pattern)
                        .context("Failed to read glob pattern")?
                        .filter_map(|r| r.ok())
                        .filter(|f| !is_excluded(f, &exclude) && looks_like_template(f)),
                );
            }
        } else {
            if !path.exists() {
                // Still scanned so every check reports UNKNOWN for it.
                warn!(path = %path.display(), "template path does not exist");
            }
            files.push(path.clone());
        }
    }
    files.sort();
    files.dedup();
    debug!(count = files.len(), "templates discovered");
    Ok(files)
}

fn cmd_scan(
    paths: &[PathBuf],
    format: &str,
    checks: Vec<String>,
    config: Option<&Path>,
    group: bool,
    timeout: Option<u64>,
    fail_on_open: bool,
) -> Result<()> {
    let config = resolve_config(config, checks, group, timeout)?;
    let files = discover_templates(paths, &config.exclude)?;

    if files.is_empty() {
        anyhow::bail!(
            "No templates found at {}. \
            Point iacgraph at a CloudFormation template or a directory containing templates.",
            paths
                .iter()
                .map(|p| format!("'{}'", p.display()))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let units = plan_units(&files, config.scan.group_templates);
    let ctx = ScanContext::open(config).context("Failed to open scan context")?;
    let scanner = Scanner::new(ctx);
    let mut report = scanner.scan_blocking(units)?;
    report.stats = scanner.close();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "yaml" => print!("{}", serde_yaml::to_string(&report)?),
        "sarif" => println!(
            "{}",
            serde_json::to_string_pretty(&sarif::to_sarif(&report))?
        ),
        _ => display::print_scan_report(&report),
    }

    if fail_on_open && report.has_open() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_checks(format: &str) -> Result<()> {
    let checks = all_checks();
    match format {
        "json" => {
            let rows: Vec<serde_json::Value> = checks
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "service": c.service,
                        "risk": c.risk,
                        "description": c.description,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => display::print_check_catalogue(&checks),
    }
    Ok(())
}

fn cmd_graph(path: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let doc = load_template(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let mut graph = TemplateGraph::new();
    TemplateCompiler::new(&mut graph)
        .compile(&doc)
        .with_context(|| format!("Failed to compile {}", path.display()))?;

    let rendered = match format {
        "mermaid" => export::to_mermaid(&graph),
        _ => export::to_dot(&graph, &path.display().to_string()),
    };

    match output {
        Some(out_path) => {
            std::fs::write(out_path, &rendered)
                .with_context(|| format!("Failed to write {}", out_path.display()))?;
            println!("Graph written to {}", out_path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "'{}' already exists. Use --force to overwrite it.",
            path.display()
        );
    }
    std::fs::write(path, generate_default_config())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_filters_extensions_exclusions_and_non_templates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("stacks")).unwrap();
        std::fs::create_dir_all(root.join("cdk.out")).unwrap();
        std::fs::write(root.join("stacks/app.yaml"), "Resources: {}\n").unwrap();
        std::fs::write(root.join("stacks/db.template"), "{\"Resources\": {}}").unwrap();
        std::fs::write(root.join("package.json"), "{\"name\": \"app\"}").unwrap();
        std::fs::write(root.join("notes.txt"), "Resources").unwrap();
        std::fs::write(root.join("cdk.out/gen.json"), "{\"Resources\": {}}").unwrap();

        let files =
            discover_templates(&[root.to_path_buf()], &["**/cdk.out/**".to_string()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["app.yaml", "db.template"]);
    }

    #[test]
    fn test_missing_file_is_kept_for_unknown_verdicts() {
        let files = discover_templates(&[PathBuf::from("does/not/exist.yaml")], &[]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = resolve_config(
            None,
            vec!["rds.publicly_accessible".to_string()],
            true,
            Some(5),
        )
        .unwrap();
        assert!(config.scan.group_templates);
        assert_eq!(config.scan.timeout_secs, 5);
        assert_eq!(config.selected_checks().len(), 1);

        let err = resolve_config(None, vec!["rds.publicly_acessible".to_string()], false, None)
            .unwrap_err();
        assert!(err.to_string().contains("did you mean"));
    }

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }
}
