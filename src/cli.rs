//! `medexpand` command line: read a note, expand its abbreviations, print the
//! result.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use crate::annotate::{self, ExpansionRow};
use crate::config::{self, ConfigError, EngineSettings};
use crate::detection::DetectorKind;
use crate::disambiguation::ollama::{DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};
use crate::disambiguation::{
    CandidateText, DisambiguationError, EmbeddingDisambiguator, EmbeddingError, EmbeddingModel,
    HashingEmbedder, OllamaEmbedder,
};
use crate::engine::{ExpansionEngine, ExpansionReport};
use crate::evaluation::{self, Evaluation, EvaluationError};
use crate::lexicon::{self, LexiconError, LexiconStore};

/// Exit status when there is no text to process.
pub const EXIT_EMPTY_INPUT: u8 = 2;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lexicon(#[from] LexiconError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("Input not readable ({0}): {1}")]
    Input(String, std::io::Error),

    #[error("Output failed: {0}")]
    Output(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ONNX embeddings require building with the `onnx-embeddings` feature")]
    OnnxNotBuilt,
}

/// Which embedding model backs contextual disambiguation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EmbeddingBackend {
    /// Lexicon-only resolution.
    #[default]
    None,
    /// Offline bag-of-words hashing.
    Hashing,
    /// Local Ollama server.
    Ollama,
    /// Local all-MiniLM-L6-v2 ONNX model.
    Onnx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Inline,
    Html,
}

#[derive(Parser, Debug)]
#[command(name = "medexpand", version)]
#[command(about = "Expand medical abbreviations in clinical text")]
pub struct Args {
    /// Abbreviation lexicon (JSON). Defaults to ~/MedExpand/abbreviations.json,
    /// then the bundled lexicon
    #[arg(short = 'l', long)]
    pub lexicon: Option<PathBuf>,

    /// Engine settings file. Defaults to ~/MedExpand/settings.json
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Embedding backend for ambiguous abbreviations
    #[arg(short = 'e', long, value_enum, default_value_t = EmbeddingBackend::None)]
    pub embeddings: EmbeddingBackend,

    #[arg(long, default_value = DEFAULT_OLLAMA_URL)]
    pub ollama_url: String,

    #[arg(long, default_value = DEFAULT_OLLAMA_MODEL)]
    pub ollama_model: String,

    /// ONNX model directory. Defaults to ~/MedExpand/models/all-MiniLM-L6-v2
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Per-call embedding timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long, value_enum)]
    pub candidate_text: Option<CandidateText>,

    #[arg(long, value_enum)]
    pub detector: Option<DetectorKind>,

    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Score the result against a ground-truth JSON file
    #[arg(short = 'g', long)]
    pub ground_truth: Option<PathBuf>,

    /// Input file; stdin when absent
    pub file: Option<PathBuf>,
}

/// Settings file plus command-line overrides.
fn resolve_settings(args: &Args) -> Result<EngineSettings, CliError> {
    let path = args
        .settings
        .clone()
        .unwrap_or_else(config::default_settings_path);
    let mut settings = EngineSettings::load_or_default(&path)?;

    if let Some(ms) = args.timeout_ms {
        settings.embedding_timeout_ms = ms;
    }
    if let Some(mode) = args.candidate_text {
        settings.candidate_text = mode;
    }
    if let Some(detector) = args.detector {
        settings.detector = detector;
    }
    settings.validate()?;

    Ok(settings)
}

/// Explicit lexicon, else the user lexicon, else the bundled one.
fn resolve_lexicon(explicit: Option<&Path>) -> Result<LexiconStore, CliError> {
    if let Some(path) = explicit {
        return Ok(lexicon::load_lexicon(path)?);
    }
    let user = config::default_lexicon_path();
    if user.exists() {
        return Ok(lexicon::load_lexicon(&user)?);
    }
    tracing::debug!("Using bundled lexicon");
    Ok(LexiconStore::bundled()?)
}

/// `Ok(None)` when no backend was requested. The inner error is a model that
/// could not be constructed, which is not fatal.
fn load_model(
    args: &Args,
    settings: &EngineSettings,
) -> Result<Option<Result<Arc<dyn EmbeddingModel>, EmbeddingError>>, CliError> {
    let model = match args.embeddings {
        EmbeddingBackend::None => return Ok(None),
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::default()) as Arc<dyn EmbeddingModel>),
        EmbeddingBackend::Ollama => {
            let timeout_secs = settings.embedding_timeout().as_secs().max(1);
            OllamaEmbedder::connect(&args.ollama_url, &args.ollama_model, timeout_secs)
                .map(|m| Arc::new(m) as Arc<dyn EmbeddingModel>)
        }
        EmbeddingBackend::Onnx => load_onnx(args.model_dir.clone())?,
    };
    Ok(Some(model))
}

#[cfg(feature = "onnx-embeddings")]
fn load_onnx(
    model_dir: Option<PathBuf>,
) -> Result<Result<Arc<dyn EmbeddingModel>, EmbeddingError>, CliError> {
    let dir = model_dir.unwrap_or_else(config::embedding_model_dir);
    Ok(crate::disambiguation::OnnxEmbedder::load(&dir).map(|m| Arc::new(m) as Arc<dyn EmbeddingModel>))
}

#[cfg(not(feature = "onnx-embeddings"))]
fn load_onnx(
    _model_dir: Option<PathBuf>,
) -> Result<Result<Arc<dyn EmbeddingModel>, EmbeddingError>, CliError> {
    Err(CliError::OnnxNotBuilt)
}

/// Build the engine described by `args`. A model that fails to load leaves
/// the engine on lexicon-only resolution with a warning.
pub fn build_engine(args: &Args) -> Result<ExpansionEngine, CliError> {
    let settings = resolve_settings(args)?;
    let lexicon = resolve_lexicon(args.lexicon.as_deref())?;

    tracing::info!(
        entries = lexicon.len(),
        ambiguous = lexicon.ambiguous_count(),
        detector = ?settings.detector,
        embeddings = ?args.embeddings,
        "Engine configured"
    );

    let engine = ExpansionEngine::new(lexicon, &settings);
    let Some(model) = load_model(args, &settings)? else {
        return Ok(engine);
    };

    let loaded = model.map_err(DisambiguationError::from).and_then(|model| {
        EmbeddingDisambiguator::load(model, settings.embedding_timeout(), settings.candidate_text)
    });
    match loaded {
        Ok(disambiguator) => Ok(engine.with_disambiguator(disambiguator)),
        Err(e) => {
            tracing::warn!(error = %e, "Embedding model unavailable, using lexicon-only resolution");
            Ok(engine.with_unavailable_embeddings(format!(
                "{e}; ambiguous abbreviations use the first listed expansion"
            )))
        }
    }
}

fn read_input(file: Option<&Path>) -> Result<String, CliError> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| CliError::Input(path.display().to_string(), e)),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| CliError::Input("stdin".into(), e))?;
            Ok(text)
        }
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    rows: Vec<ExpansionRow>,
    report: &'a ExpansionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    evaluation: Option<&'a Evaluation>,
}

/// Fixed-width table of rows.
pub fn render_table(rows: &[ExpansionRow]) -> String {
    let abbr_width = rows.iter().map(|r| r.abbr.len()).max().unwrap_or(0).max(4);
    let exp_width = rows.iter().map(|r| r.expansion.len()).max().unwrap_or(0).max(9);

    let mut out = format!(
        "{:<abbr_width$}  {:<exp_width$}  {:>10}  SOURCE\n",
        "ABBR", "EXPANSION", "CONFIDENCE"
    );
    for row in rows {
        let source = serde_json::to_value(row.source)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        out.push_str(&format!(
            "{:<abbr_width$}  {:<exp_width$}  {:>10.3}  {source}\n",
            row.abbr, row.expansion, row.confidence
        ));
    }
    out
}

pub fn render_evaluation(eval: &Evaluation) -> String {
    format!(
        "Evaluated {} abbreviations: {} correct, {} unresolved, precision {:.3}, accuracy {:.3}\n",
        eval.matched, eval.correct, eval.unresolved, eval.precision, eval.accuracy
    )
}

/// Process `text` with `engine` and write the chosen format to `out`.
/// Returns the process exit status.
pub fn process<W: Write>(
    engine: &ExpansionEngine,
    text: &str,
    format: OutputFormat,
    ground_truth: Option<&Path>,
    out: &mut W,
) -> Result<u8, CliError> {
    if text.trim().is_empty() {
        tracing::warn!("Please provide text");
        eprintln!("Please provide text");
        return Ok(EXIT_EMPTY_INPUT);
    }

    let report = engine.expand(text);
    let rows = report.rows();
    let evaluation = match ground_truth {
        Some(path) => Some(evaluation::evaluate(&rows, &evaluation::load_ground_truth(path)?)),
        None => None,
    };

    if format != OutputFormat::Json {
        for warning in &report.warnings {
            eprintln!("warning: {warning}");
        }
    }

    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                writeln!(out, "No abbreviations found")?;
            } else {
                write!(out, "{}", render_table(&rows))?;
            }
        }
        OutputFormat::Json => {
            let payload = JsonOutput {
                rows,
                report: &report,
                evaluation: evaluation.as_ref(),
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;
            return Ok(0);
        }
        OutputFormat::Inline => writeln!(out, "{}", annotate::expand_inline(text, &report))?,
        OutputFormat::Html => writeln!(out, "{}", annotate::highlight(text, &report))?,
    }

    if let Some(eval) = &evaluation {
        write!(out, "{}", render_evaluation(eval))?;
    }

    Ok(0)
}

/// Entry point behind `main`: build, read, process.
pub fn execute(args: &Args) -> Result<u8, CliError> {
    let engine = build_engine(args)?;
    let text = read_input(args.file.as_deref())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    process(&engine, &text, args.format, args.ground_truth.as_deref(), &mut out)
}
