//! CLI entry point for the wordsynth backend (for dev and scripting).
//!
//! Every command prints JSON on stdout; logs go to stderr (`RUST_LOG` controls the level).

use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use wordsynth_core::{
    app_data_dir, discover_sources, load_config, status, Backend, BatchRequest, Config,
    EmbeddingFormat, ServiceState,
};

#[derive(Parser)]
#[command(name = "wordsynth")]
#[command(about = "wordsynth: mix word embeddings and explore their neighborhoods")]
struct Cli {
    /// Embedding source: a configured source name or a file path.
    #[arg(long, global = true)]
    source: Option<String>,

    /// Treat the source as a word2vec binary file regardless of its extension.
    #[arg(long, global = true)]
    binary: bool,

    /// Similarity backend (defaults to the configured one).
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendArg>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Exact,
    LinearScan,
}

impl From<BackendArg> for Backend {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Exact => Backend::Exact,
            BackendArg::LinearScan => Backend::LinearScan,
        }
    }
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status (for dev).
    Status,
    /// Show where wordsynth stores its config (app data directory).
    DataDir,
    /// List embedding files in a folder (default: the configured embeddings folder)
    /// and configured sources.
    Sources {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Load the source and print model info.
    Info,
    /// Check whether a word (or a spelling variation of it) is in the vocabulary.
    Check { word: String },
    /// Suggest basis words for mixing, starting with WORD.
    Basis {
        word: String,
        #[arg(long)]
        count: Option<usize>,
    },
    /// Mix words with weights and print the nearest neighbors of the result.
    Mix {
        /// Pairs like `king=1 man=-1 woman=1`.
        #[arg(value_name = "WORD=WEIGHT", value_parser = parse_weighted, required = true)]
        pairs: Vec<(String, f32)>,
        #[arg(long)]
        topn: Option<usize>,
        /// Allow the input words themselves in the results.
        #[arg(long)]
        keep_inputs: bool,
    },
    /// Print one page (or all pages) of an anchor word's 3D neighborhood.
    Viz {
        anchor: String,
        /// Words that must appear in the layout.
        #[arg(long = "include", value_name = "WORD")]
        include: Vec<String>,
        #[arg(long, default_value = "0")]
        batch: usize,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Print every page instead of one.
        #[arg(long)]
        all: bool,
    },
    /// Serve JSON-line requests from stdin against one in-memory state.
    Session,
}

fn parse_weighted(s: &str) -> Result<(String, f32), String> {
    let (word, weight) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected WORD=WEIGHT, got {s:?}"))?;
    let weight: f32 = weight
        .parse()
        .map_err(|_| format!("invalid weight in {s:?}"))?;
    if word.is_empty() {
        return Err(format!("missing word in {s:?}"));
    }
    Ok((word.to_string(), weight))
}

fn data_dir_json(dir: &Path) -> Value {
    json!({ "data_dir": dir.display().to_string() })
}

fn print_json(v: &Value) {
    match serde_json::to_string_pretty(v) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Error: {e}"),
    }
}

fn error_json(e: impl std::fmt::Display) -> Value {
    json!({ "error": e.to_string() })
}

/// Name, path and format for `--source`, falling back to the configured default.
fn resolve_source(
    config: &Config,
    source: Option<&str>,
    binary: bool,
) -> Result<(String, PathBuf, EmbeddingFormat), String> {
    let source = source
        .map(str::to_string)
        .or_else(|| config.default_source.clone())
        .ok_or("no embedding source: pass --source or set default_source in config.toml")?;
    if let Some(configured) = config.source(&source) {
        let path = PathBuf::from(&configured.path);
        let format = match configured.format {
            Some(f) if !binary => f,
            _ => EmbeddingFormat::detect(&path, binary),
        };
        return Ok((configured.name.clone(), path, format));
    }
    let path = PathBuf::from(&source);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.clone());
    let format = EmbeddingFormat::detect(&path, binary);
    Ok((name, path, format))
}

fn load_state(cli: &Cli, config: &Config) -> Result<ServiceState, String> {
    let mut config = config.clone();
    if let Some(b) = cli.backend {
        config.backend = b.into();
    }
    let state = ServiceState::from_config(&config);
    let (name, path, format) = resolve_source(&config, cli.source.as_deref(), cli.binary)?;
    state
        .load_model(&name, &path, format)
        .map_err(|e| e.to_string())?;
    Ok(state)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config();

    match cli.command.as_ref().unwrap_or(&Commands::Status) {
        Commands::Status => {
            print_json(&json!({ "core": status() }));
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => print_json(&data_dir_json(&p)),
            None => {
                print_json(&json!({ "error": "could not determine app data directory" }));
                return ExitCode::FAILURE;
            }
        },
        Commands::Sources { dir } => {
            let dir = dir
                .clone()
                .or_else(|| config.embeddings_dir.as_ref().map(PathBuf::from));
            let files = match dir.as_deref().map(discover_sources) {
                Some(Ok(files)) => files,
                Some(Err(e)) => {
                    print_json(&error_json(e));
                    return ExitCode::FAILURE;
                }
                None => Vec::new(),
            };
            print_json(&json!({
                "files": files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                "configured": config.sources,
                "default_source": config.default_source,
            }));
        }
        Commands::Session => {
            let mut config = config.clone();
            if let Some(b) = cli.backend {
                config.backend = b.into();
            }
            let state = ServiceState::from_config(&config);
            if cli.source.is_some() || config.default_source.is_some() {
                match resolve_source(&config, cli.source.as_deref(), cli.binary)
                    .and_then(|(n, p, f)| state.load_model(&n, &p, f).map_err(|e| e.to_string()))
                {
                    Ok(info) => tracing::info!(model = %info.name, "session model loaded"),
                    Err(e) => tracing::warn!(error = %e, "no model loaded at session start"),
                }
            }
            run_session(&state, &config);
        }
        command => {
            let state = match load_state(&cli, &config) {
                Ok(s) => s,
                Err(e) => {
                    print_json(&error_json(e));
                    return ExitCode::FAILURE;
                }
            };
            print_json(&run_query(&state, command));
        }
    }
    ExitCode::SUCCESS
}

fn run_query(state: &ServiceState, command: &Commands) -> Value {
    let settings = *state.settings();
    let result = match command {
        Commands::Info => state.model_info().map(|i| json!(i)),
        Commands::Check { word } => state.check_word(word).map(|c| json!(c)),
        Commands::Basis { word, count } => state
            .basis_words(word, count.unwrap_or(settings.basis_word_count))
            .map(|words| json!({ "base_word": word, "basis_words": words })),
        Commands::Mix {
            pairs,
            topn,
            keep_inputs,
        } => mix_and_search(state, pairs, topn.unwrap_or(settings.topn_default), !keep_inputs),
        Commands::Viz {
            anchor,
            include,
            batch,
            batch_size,
            all,
        } => {
            let req = BatchRequest {
                anchor: anchor.clone(),
                must_include: include.clone(),
                mix: None,
                batch_index: *batch,
                batch_size: *batch_size,
            };
            if *all {
                all_pages(state, req)
            } else {
                state.visualization_batch(&req).map(|p| json!(p))
            }
        }
        Commands::Status | Commands::DataDir | Commands::Sources { .. } | Commands::Session => {
            return json!({ "error": "not a query command" });
        }
    };
    result.unwrap_or_else(error_json)
}

fn mix_and_search(
    state: &ServiceState,
    pairs: &[(String, f32)],
    topn: usize,
    exclude_inputs: bool,
) -> Result<Value, wordsynth_core::ServiceError> {
    let Some(mixed) = state.mix(pairs)? else {
        return Ok(json!({
            "neighbors": [],
            "count": 0,
            "message": "No valid words with non-zero weights",
        }));
    };
    let exclude: HashSet<String> = if exclude_inputs {
        pairs.iter().map(|(w, _)| w.clone()).collect()
    } else {
        HashSet::new()
    };
    let neighbors = state.neighbors(&mixed, topn, &exclude)?;
    Ok(json!({ "count": neighbors.len(), "neighbors": neighbors }))
}

fn all_pages(
    state: &ServiceState,
    req: BatchRequest,
) -> Result<Value, wordsynth_core::ServiceError> {
    let mut pages = Vec::new();
    let mut index = 0;
    loop {
        let page = state.visualization_batch(&BatchRequest {
            batch_index: index,
            ..req.clone()
        })?;
        let done = page.is_complete;
        pages.push(page);
        if done {
            break;
        }
        index += 1;
    }
    Ok(json!(pages))
}

#[derive(Deserialize)]
struct WeightedWord {
    word: String,
    weight: f32,
}

/// One line of `wordsynth session` input.
#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SessionRequest {
    Load {
        source: String,
        #[serde(default)]
        binary: bool,
    },
    Info,
    Check {
        word: String,
    },
    Basis {
        word: String,
        count: Option<usize>,
    },
    Mix {
        weights: Vec<WeightedWord>,
    },
    Neighbors {
        vector: Vec<f32>,
        topn: Option<usize>,
        #[serde(default)]
        exclude: Vec<String>,
    },
    Viz(BatchRequest),
    CacheInfo,
    ClearCache,
    ClearAnchor {
        anchor: String,
    },
}

fn run_session(state: &ServiceState, config: &Config) {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<SessionRequest>(&line) {
            Ok(req) => handle(state, config, req),
            Err(e) => error_json(format!("bad request: {e}")),
        };
        if writeln!(stdout, "{response}").and_then(|_| stdout.flush()).is_err() {
            break;
        }
    }
}

fn handle(state: &ServiceState, config: &Config, req: SessionRequest) -> Value {
    let settings = *state.settings();
    let result = match req {
        SessionRequest::Load { source, binary } => {
            match resolve_source(config, Some(&source), binary) {
                Ok((name, path, format)) => load(state, &name, &path, format),
                Err(e) => return error_json(e),
            }
        }
        SessionRequest::Info => state.model_info().map(|i| json!(i)),
        SessionRequest::Check { word } => state.check_word(&word).map(|c| json!(c)),
        SessionRequest::Basis { word, count } => state
            .basis_words(&word, count.unwrap_or(settings.basis_word_count))
            .map(|words| json!({ "base_word": word, "basis_words": words })),
        SessionRequest::Mix { weights } => {
            let pairs: Vec<(String, f32)> = weights
                .into_iter()
                .map(|w| (w.word, w.weight))
                .collect();
            state.mix(&pairs).map(|m| json!({ "mixed_vector": m }))
        }
        SessionRequest::Neighbors { vector, topn, exclude } => {
            let exclude: HashSet<String> = exclude.into_iter().collect();
            state
                .neighbors(&vector, topn.unwrap_or(settings.topn_default), &exclude)
                .map(|n| json!({ "count": n.len(), "neighbors": n }))
        }
        SessionRequest::Viz(req) => state.visualization_batch(&req).map(|p| json!(p)),
        SessionRequest::CacheInfo => Ok(json!(state.cache_info())),
        SessionRequest::ClearCache => Ok(json!({ "removed": state.clear_cache() })),
        SessionRequest::ClearAnchor { anchor } => {
            let removed = state.clear_anchor(&anchor);
            Ok(json!({ "anchor": anchor, "removed": removed }))
        }
    };
    result.unwrap_or_else(error_json)
}

fn load(
    state: &ServiceState,
    name: &str,
    path: &Path,
    format: EmbeddingFormat,
) -> Result<Value, wordsynth_core::ServiceError> {
    state
        .load_model(name, path, format)
        .map(|info| json!({ "success": true, "model_info": info }))
}

#[cfg(test)]
mod tests {
    use wordsynth_core::{EmbeddingStore, SourceConfig};

    use super::*;

    #[test]
    fn parse_weighted_pairs() {
        assert_eq!(parse_weighted("king=1").unwrap(), ("king".to_string(), 1.0));
        assert_eq!(parse_weighted("man=-0.5").unwrap(), ("man".to_string(), -0.5));
        assert_eq!(parse_weighted("a=b=2").unwrap(), ("a=b".to_string(), 2.0));
        assert!(parse_weighted("king").is_err());
        assert!(parse_weighted("=1").is_err());
        assert!(parse_weighted("king=x").is_err());
    }

    #[test]
    fn resolve_configured_and_path_sources() {
        let config = Config {
            default_source: Some("GloVe".into()),
            sources: vec![SourceConfig {
                name: "GloVe".into(),
                path: "/e/glove.6B.300d.txt".into(),
                format: None,
            }],
            ..Config::default()
        };
        let (name, path, format) = resolve_source(&config, None, false).unwrap();
        assert_eq!(name, "GloVe");
        assert_eq!(path, PathBuf::from("/e/glove.6B.300d.txt"));
        assert_eq!(format, EmbeddingFormat::GloveText);

        let (name, _, format) = resolve_source(&config, Some("/e/news.bin"), false).unwrap();
        assert_eq!(name, "news.bin");
        assert_eq!(format, EmbeddingFormat::Word2VecBinary);

        assert!(resolve_source(&Config::default(), None, false).is_err());
    }

    #[test]
    fn session_requests_parse() {
        let r: SessionRequest =
            serde_json::from_str(r#"{"op":"viz","anchor":"cat","must_include":["dog"]}"#).unwrap();
        assert!(matches!(
            r,
            SessionRequest::Viz(BatchRequest { ref anchor, .. }) if anchor == "cat"
        ));
        let r: SessionRequest =
            serde_json::from_str(r#"{"op":"mix","weights":[{"word":"king","weight":1.0}]}"#)
                .unwrap();
        assert!(matches!(r, SessionRequest::Mix { .. }));
        let r: SessionRequest = serde_json::from_str(r#"{"op":"clear_cache"}"#).unwrap();
        assert!(matches!(r, SessionRequest::ClearCache));
    }

    #[test]
    fn handle_without_model_reports_error() {
        let state = ServiceState::from_config(&Config::default());
        let v = handle(&state, &Config::default(), SessionRequest::Info);
        assert_eq!(v["error"], "no model loaded");
        let v = handle(&state, &Config::default(), SessionRequest::CacheInfo);
        assert_eq!(v["entries"], 0);
    }

    #[test]
    fn huge_counts_return_whole_vocabulary() {
        let config = Config::default();
        let state = ServiceState::from_config(&config);
        let store = EmbeddingStore::from_pairs(vec![
            ("hot", vec![1.0, 0.0]),
            ("warm", vec![0.8, 0.2]),
            ("cold", vec![-1.0, 0.0]),
        ])
        .unwrap();
        state.install_store("temps", PathBuf::from("temps.txt"), store);

        let v = handle(
            &state,
            &config,
            SessionRequest::Neighbors {
                vector: vec![1.0, 0.0],
                topn: Some(usize::MAX),
                exclude: vec!["hot".into()],
            },
        );
        assert_eq!(v["count"], 2);

        let v = handle(
            &state,
            &config,
            SessionRequest::Basis {
                word: "hot".into(),
                count: Some(usize::MAX / 2),
            },
        );
        assert_eq!(v["basis_words"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn data_dir_is_json() {
        let v = data_dir_json(Path::new("/tmp/wordsynth"));
        assert_eq!(v["data_dir"], "/tmp/wordsynth");
    }
}
