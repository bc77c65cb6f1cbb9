//! CLI definition and dispatch.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strategy_graph::serialization::write_record;
use strategy_graph::{
    EngineConfig, FileBackend, StrategyRepository, StrategySession, ValidationResult,
};

#[derive(Parser, Debug)]
#[command(name = "strategy", version, about = "Strategy graph validation and storage tools")]
pub struct Cli {
    /// Engine configuration file (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a strategy file and print its diagnostics
    Validate {
        file: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a strategy file and write it back in canonical form
    Normalize {
        file: PathBuf,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Refuse to write a strategy that fails validation
        #[arg(long)]
        strict: bool,
    },
    /// List strategies stored in a directory
    List {
        #[arg(short, long)]
        store: PathBuf,
    },
}

pub fn run(cli: Cli, out: &mut impl Write) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Validate { file, json } => run_validate(&file, json, config, out),
        Command::Normalize { file, out: target, strict } => {
            run_normalize(&file, target.as_deref(), strict, config, out)
        }
        Command::List { store } => run_list(&store, config, out),
    }
}

fn open_session(file: &Path, config: EngineConfig) -> Result<StrategySession> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("reading strategy {}", file.display()))?;
    let mut session = StrategySession::new(config);
    session
        .import_strategy_from_event(&text)
        .with_context(|| format!("importing strategy {}", file.display()))?;
    Ok(session)
}

fn print_report(report: &ValidationResult, out: &mut impl Write) -> Result<()> {
    for diagnostic in &report.errors {
        writeln!(out, "error[{}]: {}", diagnostic.kind.as_str(), diagnostic.message)?;
    }
    for diagnostic in &report.warnings {
        writeln!(out, "warning[{}]: {}", diagnostic.kind.as_str(), diagnostic.message)?;
    }
    writeln!(
        out,
        "{}: {} error(s), {} warning(s)",
        if report.valid { "valid" } else { "invalid" },
        report.errors.len(),
        report.warnings.len()
    )?;
    Ok(())
}

fn run_validate(
    file: &Path,
    json: bool,
    config: EngineConfig,
    out: &mut impl Write,
) -> Result<ExitCode> {
    let session = open_session(file, config)?;
    let report = session.validate();
    if json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        print_report(&report, out)?;
    }
    Ok(if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_normalize(
    file: &Path,
    target: Option<&Path>,
    strict: bool,
    config: EngineConfig,
    out: &mut impl Write,
) -> Result<ExitCode> {
    let session = open_session(file, config)?;
    let record = if strict {
        match session.export() {
            Ok(record) => record,
            Err(strategy_graph::StrategyError::Invalid(report)) => {
                print_report(&report, out)?;
                return Ok(ExitCode::FAILURE);
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        session.export_unchecked()
    };

    match target {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            write_record(&record, file)?;
            log::info!("Wrote normalized strategy to {}", path.display());
        }
        None => {
            write_record(&record, &mut *out)?;
            writeln!(out)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_list(store: &Path, config: EngineConfig, out: &mut impl Write) -> Result<ExitCode> {
    let repository = StrategyRepository::new(FileBackend::new(store), config);
    let strategies = repository
        .list()
        .with_context(|| format!("listing strategies in {}", store.display()))?;
    for meta in &strategies {
        writeln!(
            out,
            "{}\t{}\t{}",
            meta.id,
            meta.name,
            meta.last_modified.to_rfc3339()
        )?;
    }
    log::info!("{} strategies in {}", strategies.len(), store.display());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strategy_graph::{NodeRole, StrategyBuilder};

    const VALID: &str = r#"{
        "id": "strategy-demo",
        "name": "Demo",
        "nodes": [
            {"id": "start", "type": "startNode", "data": {"symbol": "NIFTY"}},
            {"id": "end", "type": "endNode"}
        ],
        "edges": [{"id": "e1", "source": "start", "target": "end"}]
    }"#;

    const INVALID: &str = r#"{
        "nodes": [{"id": "start", "type": "startNode", "data": {"symbol": "NIFTY"}}],
        "edges": []
    }"#;

    fn write_file(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn run_args(args: &[&str]) -> (Result<ExitCode>, String) {
        let cli = Cli::parse_from(std::iter::once("strategy").chain(args.iter().copied()));
        let mut out = Vec::new();
        let result = run(cli, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_validate_reports_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let valid = write_file(dir.path(), "valid.json", VALID);
        let invalid = write_file(dir.path(), "invalid.json", INVALID);

        let (code, text) = run_args(&["validate", valid.to_str().unwrap()]);
        assert_eq!(code.unwrap(), ExitCode::SUCCESS);
        assert!(text.contains("valid: 0 error(s)"), "{}", text);

        let (code, text) = run_args(&["validate", invalid.to_str().unwrap()]);
        assert_eq!(code.unwrap(), ExitCode::FAILURE);
        assert!(text.contains("error[missing-end-node]"), "{}", text);
    }

    #[test]
    fn test_validate_json_output() {
        let dir = tempfile::tempdir().unwrap();
        let invalid = write_file(dir.path(), "invalid.json", INVALID);
        let (_, text) = run_args(&["validate", "--json", invalid.to_str().unwrap()]);
        let report: ValidationResult = serde_json::from_str(&text).unwrap();
        assert!(!report.valid);
    }

    #[test]
    fn test_import_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let broken = write_file(
            dir.path(),
            "broken.json",
            r#"{"nodes": [], "edges": [{"source": "a", "target": ""}]}"#,
        );
        let (result, _) = run_args(&["validate", broken.to_str().unwrap()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_normalize_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_file(dir.path(), "in.json", VALID);
        let output = dir.path().join("out.json");

        let (code, _) = run_args(&[
            "normalize",
            input.to_str().unwrap(),
            "--out",
            output.to_str().unwrap(),
        ]);
        assert_eq!(code.unwrap(), ExitCode::SUCCESS);

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written["id"], "strategy-demo");
        assert_eq!(written["nodes"].as_array().unwrap().len(), 2);
        assert!(written["lastModified"].is_string());
    }

    #[test]
    fn test_strict_normalize_refuses_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_file(dir.path(), "in.json", INVALID);
        let (code, text) = run_args(&["normalize", "--strict", input.to_str().unwrap()]);
        assert_eq!(code.unwrap(), ExitCode::FAILURE);
        assert!(text.contains("invalid"));
    }

    #[test]
    fn test_list_store() {
        let dir = tempfile::tempdir().unwrap();
        let repository = StrategyRepository::new(FileBackend::new(dir.path()), EngineConfig::default());
        let record = StrategyBuilder::new("s-listed", "Listed")
            .add_node("start", NodeRole::Start)
            .build_record();
        repository.save(&record).unwrap();

        let (code, text) = run_args(&["list", "--store", dir.path().to_str().unwrap()]);
        assert_eq!(code.unwrap(), ExitCode::SUCCESS);
        assert!(text.starts_with("s-listed\tListed\t"), "{}", text);
    }
}
