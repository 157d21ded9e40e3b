//! dmcheck command-line front end
//!
//! Checks Soar source files against a datamap schema and prints diagnostics.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::info;
use tracing_subscriber::EnvFilter;

use dmcheck::{CheckEngine, Diagnostic, DmResult, EngineConfig, SchemaGraph, Severity};

/// Command-line options
struct Options {
    /// Schema document to check against
    schema: PathBuf,
    /// Soar source files
    sources: Vec<PathBuf>,
    /// Optional engine config (JSON)
    config: Option<PathBuf>,
    /// Print diagnostics as JSON
    json: bool,
    /// Apply quick fixes and save the schema
    fix: bool,
}

fn usage() {
    println!("dmcheck - Datamap consistency checker for Soar productions");
    println!();
    println!("USAGE:");
    println!("    dmcheck [OPTIONS] <SCHEMA.json> <FILE.soar>...");
    println!();
    println!("OPTIONS:");
    println!("        --json              Print diagnostics as JSON");
    println!("        --fix               Add missing attributes to the schema and save it");
    println!("    -c, --config <PATH>     Engine configuration file (JSON)");
    println!("    -h, --help              Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    DMCHECK_LOG             Log filter [default: warn]");
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut positional = Vec::new();
    let mut config = None;
    let mut json = false;
    let mut fix = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => {
                json = true;
                i += 1;
            }
            "--fix" => {
                fix = true;
                i += 1;
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --config requires a value");
                    std::process::exit(2);
                }
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("error: unknown argument: {other}");
                eprintln!("Run with --help for usage information");
                std::process::exit(2);
            }
            other => {
                positional.push(PathBuf::from(other));
                i += 1;
            }
        }
    }

    if positional.len() < 2 {
        eprintln!("error: expected a schema file and at least one source file");
        eprintln!("Run with --help for usage information");
        std::process::exit(2);
    }
    let schema = positional.remove(0);
    Options {
        schema,
        sources: positional,
        config,
        json,
        fix,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("DMCHECK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns true if any error-severity diagnostic was reported.
fn run(options: &Options) -> DmResult<bool> {
    let schema = SchemaGraph::load(&options.schema)?;
    let config = match &options.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let engine = CheckEngine::new(schema, config);

    let mut rules = Vec::new();
    for path in &options.sources {
        let text = std::fs::read_to_string(path)?;
        rules.extend(engine.load_source_file(&path.display().to_string(), &text)?);
    }

    if options.fix {
        let mut applied = 0;
        for rule in &rules {
            applied += engine.complete_rule(rule)?.value.len();
        }
        if applied > 0 {
            engine.schema()?.save(&options.schema)?;
        }
        info!(applied, schema = %options.schema.display(), "quick fixes applied");
        eprintln!("applied {applied} schema fix(es)");
    }

    let diagnostics: Vec<Diagnostic> = engine.all_diagnostics()?.into_values().flatten().collect();
    if options.json {
        let text = serde_json::to_string_pretty(&diagnostics)
            .map_err(|e| dmcheck::DmError::internal(format!("serialize diagnostics: {e}")))?;
        println!("{text}");
    } else {
        for d in &diagnostics {
            println!("{d}");
            if let Some(fix) = &d.quick_fix {
                println!("    fix: {fix}");
            }
        }
    }

    let count = |severity: Severity| diagnostics.iter().filter(|d| d.severity == severity).count();
    let errors = count(Severity::Error);
    eprintln!(
        "{} rule(s): {errors} error(s), {} warning(s), {} advisory",
        rules.len(),
        count(Severity::Warning),
        count(Severity::Advisory)
    );
    Ok(errors > 0)
}

fn main() -> ExitCode {
    let options = parse_args();
    init_logging();

    match run(&options) {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
