//! Purpose: `strata` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, reads result streams, emits JSONL on stdout.
//! Invariants: Records are printed one JSON object per line, in stream order.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Diagnostics (tracing, summaries) go to stderr only.
#![allow(clippy::result_large_err)]
use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use strata::api::{
    Entity, Error, ErrorKind, ExportOptions, Format, FormatSets, Record, ResultStream, Service,
    StreamConfig, to_exit_code,
};
use tracing_subscriber::EnvFilter;

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(exit_code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `strata --help`."));
            }
        },
    };

    init_tracing(cli.verbose);

    match cli.command {
        Command::Read {
            file,
            format,
            max_record_bytes,
        } => {
            let config = stream_config(max_record_bytes);
            let stream = match file.as_deref() {
                None => ResultStream::new(io::stdin()),
                Some(path) if path == Path::new("-") => ResultStream::new(io::stdin()),
                Some(path) => ResultStream::new(open_input(path)?),
            };
            let format = Format::from(format);
            let mut sets = FormatSets::new(stream.with_config(config), format.factory())
                .map_err(|err| with_input_path(err, file.as_deref()))?;
            let summary =
                print_sets(&mut sets).map_err(|err| with_input_path(err, file.as_deref()))?;
            if cli.verbose > 0 {
                eprintln!(
                    "read {} records in {} result sets ({} bytes)",
                    summary.records, summary.sets, summary.bytes
                );
            }
            Ok(0)
        }
        Command::Export {
            remote,
            format,
            earliest,
            latest,
            max_count,
            query,
        } => {
            let service = remote.service()?;
            let options = ExportOptions {
                format: Format::from(format),
                earliest_time: earliest,
                latest_time: latest,
                max_count,
            };
            let mut sets = service.export(&query, &options)?;
            let summary = print_sets(&mut sets)?;
            if cli.verbose > 0 {
                eprintln!(
                    "exported {} records in {} result sets",
                    summary.records, summary.sets
                );
            }
            Ok(0)
        }
        Command::Entity { remote, path } => {
            let service = remote.service()?;
            for entity in service.entities(&path)? {
                emit_json(entity_json(&entity));
            }
            Ok(0)
        }
    }
}

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Read multi-batch search result streams",
    long_about = None,
    after_help = r#"EXAMPLES
  $ strata read results.json
  $ curl -s "$URL" | strata read --format export
  $ strata export --url https://localhost:8089 --token "$TOKEN" 'index=main | head 5'
  $ strata entity --url https://localhost:8089 licenser/pools

Set RUST_LOG=debug to trace batch boundaries on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Print a summary to stderr; repeat for debug logging"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Auto,
    Export,
    Seq,
}

impl From<FormatArg> for Format {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Auto => Format::Auto,
            FormatArg::Export => Format::Export,
            FormatArg::Seq => Format::Seq,
        }
    }
}

#[derive(clap::Args)]
struct RemoteArgs {
    #[arg(long, help = "Service base URL, e.g. https://localhost:8089", value_hint = ValueHint::Url)]
    url: String,
    #[arg(long, help = "Bearer token", conflicts_with = "username")]
    token: Option<String>,
    #[arg(long, requires = "password", help = "Basic auth user")]
    username: Option<String>,
    #[arg(long, requires = "username", help = "Basic auth password")]
    password: Option<String>,
    #[arg(long, help = "Namespace owner (servicesNS scope)")]
    owner: Option<String>,
    #[arg(long, help = "Namespace app (servicesNS scope)")]
    app: Option<String>,
}

impl RemoteArgs {
    fn service(&self) -> Result<Service, Error> {
        let mut service = Service::new(self.url.clone())?;
        if let Some(token) = &self.token {
            service = service.with_token(token.clone());
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            service = service.with_basic_auth(username, password);
        }
        if self.owner.is_some() || self.app.is_some() {
            service = service.with_namespace(self.owner.as_deref(), self.app.as_deref())?;
        }
        Ok(service)
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Read a result stream from a file or stdin and print records as JSONL")]
    Read {
        #[arg(help = "Input file (default: stdin; `-` also means stdin)", value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "auto", help = "Result encoding")]
        format: FormatArg,
        #[arg(long, help = "Reject any single row or frame larger than this many bytes")]
        max_record_bytes: Option<usize>,
    },
    #[command(about = "Run a streaming export search and print records as JSONL")]
    Export {
        #[command(flatten)]
        remote: RemoteArgs,
        #[arg(long, value_enum, default_value = "export", help = "Requested output encoding")]
        format: FormatArg,
        #[arg(long, help = "Earliest time bound, e.g. -24h")]
        earliest: Option<String>,
        #[arg(long, help = "Latest time bound, e.g. now")]
        latest: Option<String>,
        #[arg(long, help = "Maximum number of results")]
        max_count: Option<u64>,
        #[arg(help = "Search query; a leading `search` is added when missing")]
        query: String,
    },
    #[command(about = "Fetch entities at a service path and print them as JSON")]
    Entity {
        #[command(flatten)]
        remote: RemoteArgs,
        #[arg(help = "Entity collection path, e.g. licenser/pools")]
        path: String,
    },
}

#[derive(Debug, Default)]
struct Summary {
    sets: usize,
    records: u64,
    bytes: u64,
}

#[derive(Serialize)]
struct RecordLine<'a> {
    batch: usize,
    preview: bool,
    record: &'a Record,
}

fn print_sets(sets: &mut FormatSets) -> Result<Summary, Error> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let result = write_sets(sets, &mut out);
    let flushed = out.flush().map_err(write_error);
    let summary = result?;
    flushed?;
    Ok(summary)
}

fn write_sets(sets: &mut FormatSets, out: &mut impl Write) -> Result<Summary, Error> {
    let mut summary = Summary::default();
    while let Some(set) = sets.next_set()? {
        summary.sets += 1;
        let batch = set.info().index;
        let preview = set.is_preview();
        while let Some(record) = set.next_record()? {
            let line = RecordLine {
                batch,
                preview,
                record: &record,
            };
            serde_json::to_writer(&mut *out, &line).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to write record")
                    .with_source(err)
            })?;
            out.write_all(b"\n").map_err(write_error)?;
            summary.records += 1;
        }
        summary.bytes = set.bytes_consumed();
    }
    Ok(summary)
}

fn stream_config(max_record_bytes: Option<usize>) -> StreamConfig {
    let mut config = StreamConfig::default();
    if let Some(max) = max_record_bytes {
        config.max_record_bytes = max;
    }
    config
}

fn open_input(path: &Path) -> Result<Box<dyn Read + Send>, Error> {
    let file = File::open(path).map_err(|err| {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            _ => ErrorKind::Io,
        };
        Error::new(kind)
            .with_message("failed to open input file")
            .with_path(path)
            .with_source(err)
    })?;
    Ok(Box::new(file))
}

fn with_input_path(err: Error, path: Option<&Path>) -> Error {
    match path {
        Some(path) if err.path().is_none() && path != Path::new("-") => err.with_path(path),
        _ => err,
    }
}

fn write_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}

fn init_tracing(verbose: u8) {
    let default = if verbose > 1 { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn entity_json(entity: &Entity) -> Value {
    json!({
        "name": entity.name(),
        "path": entity.path(),
        "content": Value::Object(entity.content().clone()),
    })
}

fn emit_json(value: Value) {
    let pretty = io::stdout().is_terminal();
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, true));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Format => "malformed result stream".to_string(),
        ErrorKind::Truncated => "result stream ended early".to_string(),
        ErrorKind::Closed => "result reader is closed".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(batch) = err.batch() {
        inner.insert("batch".to_string(), json!(batch));
    }
    if let Some(record) = err.record() {
        inner.insert("record".to_string(), json!(record));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];
    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    let position = [
        err.batch().map(|batch| format!("batch {batch}")),
        err.record().map(|record| format!("record {record}")),
        err.offset().map(|offset| format!("byte {offset}")),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();
    if !position.is_empty() {
        lines.push(format!(
            "{} {}",
            colorize_label("at:", use_color, AnsiColor::Yellow),
            position.join(", ")
        ));
    }
    for cause in error_causes(err) {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
