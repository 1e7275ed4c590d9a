//! funcmerge CLI
//!
//! Command-line tool for merging functional definitions from transaction
//! files into a JSON function bank.

use clap::{Parser, Subcommand};
use funcmerge_core::{
    create_history_entry, parse_transaction_file, plan_merge, run_merge, snapshot_functions,
    write_transaction_file, Conflict, ConflictPolicy, ConflictResolver, Decisions, FunctionStore,
    HistoryFile, MemoryStore, MergeConfig, MergePlan, Resolution, ResolutionFile,
};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "funcmerge")]
#[command(about = "Merge functional definitions from transaction files", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and display a transaction file
    Parse {
        /// Path to the transaction file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show what a merge would add and which functions conflict
    Diff {
        /// Function bank (JSON)
        #[arg(short, long)]
        bank: PathBuf,

        /// Path to the transaction file
        #[arg(short, long)]
        file: PathBuf,

        /// Output format (text, csv or json)
        #[arg(long, default_value = "text")]
        format: String,

        /// Output file path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge a transaction file into a function bank
    Merge {
        /// Function bank (JSON)
        #[arg(short, long)]
        bank: PathBuf,

        /// Path to the transaction file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Conflict policy (raise, preserve, overwrite or edit)
        #[arg(short, long)]
        policy: Option<ConflictPolicy>,

        /// Keep partial changes if the merge fails
        #[arg(long)]
        no_revert: bool,

        /// Merge config file (JSON); flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Resolution file (JSON) used by the edit policy
        #[arg(short, long)]
        resolutions: Option<PathBuf>,

        /// Resolve conflicts on the terminal (edit policy)
        #[arg(short, long)]
        interactive: bool,

        /// History file to record the merge in
        #[arg(long)]
        history: Option<PathBuf>,

        /// Write the merged bank here instead of updating it in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export a function bank as a transaction file
    Export {
        /// Function bank (JSON)
        #[arg(short, long)]
        bank: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Create a resolution file template for the current conflicts
    CreateResolutions {
        /// Function bank (JSON)
        #[arg(short, long)]
        bank: PathBuf,

        /// Path to the transaction file
        #[arg(short, long)]
        file: PathBuf,

        /// Output path for the resolution file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List merges recorded in a history file
    History {
        /// History file (JSON)
        #[arg(long)]
        history: PathBuf,

        /// Only list merges that added or modified this function
        #[arg(long)]
        id: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "funcmerge_core={},funcmerge={}",
            log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> funcmerge_core::Result<()> {
    match command {
        Commands::Parse { file } => cmd_parse(&file),
        Commands::Diff {
            bank,
            file,
            format,
            output,
        } => cmd_diff(&bank, &file, &format, output.as_deref()),
        Commands::Merge {
            bank,
            file,
            policy,
            no_revert,
            config,
            resolutions,
            interactive,
            history,
            output,
        } => {
            let mut merge_config = match config {
                Some(path) => MergeConfig::load(path)?,
                None => MergeConfig::default(),
            };
            if let Some(file) = file {
                merge_config.function_file = Some(file);
            }
            if let Some(policy) = policy {
                merge_config.policy = policy;
            }
            if no_revert {
                merge_config.revert_on_error = false;
            }
            cmd_merge(
                &bank,
                &merge_config,
                resolutions.as_deref(),
                interactive,
                history.as_deref(),
                output.as_deref(),
            )
        }
        Commands::Export { bank, output } => cmd_export(&bank, &output),
        Commands::CreateResolutions { bank, file, output } => {
            cmd_create_resolutions(&bank, &file, &output)
        }
        Commands::History { history, id } => cmd_history(&history, id.as_deref()),
    }
}

fn cmd_parse(file: &Path) -> funcmerge_core::Result<()> {
    let table = parse_transaction_file(file)?;

    println!("File: {}", file.display());
    println!("Functions: {}", table.len());
    println!();

    for function in table.iter() {
        println!("{}\t{}", function.id, function.expression);
    }

    Ok(())
}

fn load_plan(bank: &Path, file: &Path) -> funcmerge_core::Result<MergePlan> {
    let store = MemoryStore::load(bank)?;
    let database = snapshot_functions(&store)?;
    let incoming = parse_transaction_file(file)?;
    Ok(plan_merge(&database, &incoming))
}

/// One line of a CSV diff report
#[derive(Serialize)]
struct DiffRow<'a> {
    change: &'a str,
    id: &'a str,
    database_expression: &'a str,
    file_expression: &'a str,
}

fn cmd_diff(
    bank: &Path,
    file: &Path,
    format: &str,
    output: Option<&Path>,
) -> funcmerge_core::Result<()> {
    let plan = load_plan(bank, file)?;

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };

    match format.to_lowercase().as_str() {
        "text" if plan.is_noop() => {
            writeln!(writer, "Nothing to merge: {} functions unchanged", plan.unchanged.len())?;
        }
        "text" => {
            writeln!(writer, "Additions ({}):", plan.additions.len())?;
            for function in &plan.additions {
                writeln!(writer, "  + {} = {}", function.id, function.expression)?;
            }
            writeln!(writer)?;
            writeln!(writer, "Conflicts ({}):", plan.conflicts.len())?;
            for conflict in &plan.conflicts {
                writeln!(writer, "  ! {}", conflict.id)?;
                writeln!(writer, "      database: {}", conflict.database_expression)?;
                writeln!(writer, "      file:     {}", conflict.file_expression)?;
            }
            writeln!(writer)?;
            writeln!(writer, "Unchanged: {}", plan.unchanged.len())?;
        }
        "csv" => {
            let mut csv_writer = csv::Writer::from_writer(writer);
            for function in &plan.additions {
                csv_writer.serialize(DiffRow {
                    change: "add",
                    id: &function.id,
                    database_expression: "",
                    file_expression: &function.expression,
                })?;
            }
            for conflict in &plan.conflicts {
                csv_writer.serialize(DiffRow {
                    change: "conflict",
                    id: &conflict.id,
                    database_expression: &conflict.database_expression,
                    file_expression: &conflict.file_expression,
                })?;
            }
            csv_writer.flush()?;
            return Ok(());
        }
        "json" => {
            let json = serde_json::to_string_pretty(&plan)?;
            writeln!(writer, "{}", json)?;
        }
        _ => {
            eprintln!("Unknown format: {}. Supported formats: text, csv, json", format);
            std::process::exit(1);
        }
    }

    writer.flush()?;
    Ok(())
}

fn cmd_merge(
    bank: &Path,
    config: &MergeConfig,
    resolutions: Option<&Path>,
    interactive: bool,
    history: Option<&Path>,
    output: Option<&Path>,
) -> funcmerge_core::Result<()> {
    let mut store = MemoryStore::load(bank)?;
    println!("Loaded {} functions from {}", store.len(), bank.display());

    if config.policy != ConflictPolicy::Edit && (interactive || resolutions.is_some()) {
        tracing::warn!(
            policy = %config.policy,
            "conflict resolver is only consulted under the EDIT policy"
        );
    }

    let mut prompt = PromptResolver;
    let mut resolution_file;
    let resolver: Option<&mut dyn ConflictResolver> = if interactive {
        Some(&mut prompt)
    } else if let Some(path) = resolutions {
        resolution_file = ResolutionFile::load(path)?;
        Some(&mut resolution_file)
    } else {
        None
    };

    let target = output.unwrap_or(bank);
    let result = match run_merge(config, &mut store, resolver) {
        Ok(result) => result,
        Err(e) => {
            if !config.revert_on_error {
                match store.save(target) {
                    Ok(()) => tracing::warn!(
                        path = %target.display(),
                        "merge failed, saved partial changes"
                    ),
                    Err(save_error) => tracing::error!(
                        path = %target.display(),
                        error = %save_error,
                        "failed to save partial changes"
                    ),
                }
            }
            return Err(e);
        }
    };

    store.save(target)?;

    if let (Some(history_path), Some(function_file)) = (history, config.function_file.as_deref())
    {
        let mut history_file = HistoryFile::load(history_path)?;
        history_file.add_entry(create_history_entry(function_file, &result));
        history_file.save(history_path)?;
    }

    println!("{}", result.summary());
    for id in &result.added {
        println!("  + {}", id);
    }
    for change in &result.modified {
        println!("  ~ {}: {} -> {}", change.id, change.old_expression, change.new_expression);
    }
    let untouched = result.conflicts.len() - result.modified_count();
    if untouched > 0 {
        println!("  {} conflicting functions kept their database definition", untouched);
    }
    println!("Saved {} functions to {}", store.len(), target.display());

    Ok(())
}

fn cmd_export(bank: &Path, output: &Path) -> funcmerge_core::Result<()> {
    let store = MemoryStore::load(bank)?;
    let functions = store.functions()?;

    write_transaction_file(output, &functions)?;
    println!("Exported {} functions to {}", functions.len(), output.display());

    Ok(())
}

fn cmd_create_resolutions(bank: &Path, file: &Path, output: &Path) -> funcmerge_core::Result<()> {
    let plan = load_plan(bank, file)?;

    let template = ResolutionFile::template(&plan.conflicts);
    template.save(output)?;

    println!("Created resolution file: {}", output.display());
    println!("Conflicts: {}", plan.conflicts.len());
    println!();
    println!("Set each action to keep, file or custom (with an expression), then run:");
    println!(
        "  funcmerge merge --bank {} --file {} --policy edit --resolutions {}",
        bank.display(),
        file.display(),
        output.display()
    );

    Ok(())
}

fn cmd_history(history: &Path, id: Option<&str>) -> funcmerge_core::Result<()> {
    let history_file = HistoryFile::load(history)?;

    let entries = match id {
        Some(id) => history_file.entries_for(id),
        None => history_file.entries.iter().collect(),
    };

    match id {
        Some(id) => println!(
            "Merges touching {} ({} of {}):",
            id,
            entries.len(),
            history_file.total_entries()
        ),
        None => println!("Merges ({}):", history_file.total_entries()),
    }
    for entry in entries {
        println!(
            "  {} {} [{}] {} added, {} modified",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.function_file.display(),
            entry.policy,
            entry.added.len(),
            entry.modified.len()
        );
    }

    Ok(())
}

/// Resolves conflicts by asking on the terminal
struct PromptResolver;

impl ConflictResolver for PromptResolver {
    fn resolve(&mut self, conflicts: &[Conflict]) -> funcmerge_core::Result<Decisions> {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut stderr = io::stderr();
        let mut decisions = Decisions::new();

        writeln!(
            stderr,
            "{} conflicting function(s). Choose [d]atabase, [f]ile or [o]ther for each.",
            conflicts.len()
        )?;

        for conflict in conflicts {
            writeln!(stderr)?;
            writeln!(stderr, "{}", conflict.id.to_uppercase())?;
            writeln!(stderr, "  database: {}", conflict.database_expression)?;
            writeln!(stderr, "  file:     {}", conflict.file_expression)?;

            let resolution = loop {
                write!(stderr, "  keep which? [D/f/o] ")?;
                stderr.flush()?;
                let answer = read_line(&mut input)?;

                match answer.trim().to_lowercase().as_str() {
                    "" | "d" => break Resolution::Keep,
                    "f" => break Resolution::UseFile,
                    "o" => {
                        write!(stderr, "  expression: ")?;
                        stderr.flush()?;
                        let expression = read_line(&mut input)?;
                        if expression.trim().is_empty() {
                            writeln!(stderr, "  empty expression, try again")?;
                            continue;
                        }
                        break Resolution::Custom(expression.trim().to_string());
                    }
                    other => writeln!(stderr, "  unknown choice '{}'", other)?,
                }
            };

            decisions.insert(conflict.id.clone(), resolution);
        }

        Ok(decisions)
    }
}

fn read_line<R: BufRead>(input: &mut R) -> io::Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "input closed while resolving conflicts",
        ));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use funcmerge_core::{Error, Function};

    fn write_bank(dir: &Path, functions: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("bank.json");
        MemoryStore::from_functions(functions.iter().map(|(id, e)| Function::new(*id, *e)))
            .save(&path)
            .unwrap();
        path
    }

    fn write_functions(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("functions.411");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn raise_config(function_file: &Path, revert_on_error: bool) -> MergeConfig {
        MergeConfig {
            policy: ConflictPolicy::Raise,
            revert_on_error,
            ..MergeConfig::new(function_file)
        }
    }

    #[test]
    fn test_merge_without_revert_saves_partial_changes() {
        let dir = tempfile::tempdir().unwrap();
        let bank = write_bank(dir.path(), &[("fd1", "1")]);
        let file = write_functions(dir.path(), "t functions\na fd1 = 2\na fd2 = 3\n");

        let result = cmd_merge(&bank, &raise_config(&file, false), None, false, None, None);

        assert!(matches!(result, Err(Error::Conflict { count: 1, .. })));
        let saved = MemoryStore::load(&bank).unwrap();
        assert_eq!(saved.get("fd2").unwrap().expression, "3");
        assert_eq!(saved.get("fd1").unwrap().expression, "1");
    }

    #[test]
    fn test_merge_with_revert_leaves_bank_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let bank = write_bank(dir.path(), &[("fd1", "1")]);
        let file = write_functions(dir.path(), "t functions\na fd1 = 2\na fd2 = 3\n");

        let result = cmd_merge(&bank, &raise_config(&file, true), None, false, None, None);

        assert!(result.is_err());
        let saved = MemoryStore::load(&bank).unwrap();
        assert!(saved.get("fd2").is_none());
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn test_merge_failure_without_revert_writes_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let bank = write_bank(dir.path(), &[("fd1", "1")]);
        let file = write_functions(dir.path(), "t functions\na fd1 = 2\na fd2 = 3\n");
        let output = dir.path().join("merged.json");

        let result = cmd_merge(
            &bank,
            &raise_config(&file, false),
            None,
            false,
            None,
            Some(output.as_path()),
        );

        assert!(result.is_err());
        assert!(MemoryStore::load(&bank).unwrap().get("fd2").is_none());
        assert!(MemoryStore::load(&output).unwrap().get("fd2").is_some());
    }

    #[test]
    fn test_diff_reports_nothing_to_merge() {
        let dir = tempfile::tempdir().unwrap();
        let bank = write_bank(dir.path(), &[("fd1", "a + b")]);
        let file = write_functions(dir.path(), "t functions\na FD1 = a+b\n");
        let report = dir.path().join("diff.txt");

        cmd_diff(&bank, &file, "text", Some(report.as_path())).unwrap();

        let text = std::fs::read_to_string(&report).unwrap();
        assert_eq!(text, "Nothing to merge: 1 functions unchanged\n");
    }
}
