//! Binary entry point: arguments, configuration, logging, then the command

use crate::app::cli::{parse_args, Args, Command};
use crate::app::config::{ConfigError, EngineConfig};
use crate::app::demo::builtin_registry;
use crate::core::error_handling::{log_error_with_context, ContextualError};
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::styles::StyleRole;
use crate::pipeline::{Pipeline, PipelineError, PipelineRegistry, RegistryError};
use crate::queue::api::{open_store, StoreError};
use prettytable::{format, Cell, Row, Table};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const EXIT_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Could not open the queue store: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload {index} is not valid JSON: {source}")]
    Payload {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not encode result: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Interrupted after {received} of {expected} results")]
    Interrupted { received: usize, expected: usize },
}

impl ContextualError for AppError {
    fn is_user_actionable(&self) -> bool {
        match self {
            AppError::Config(e) => e.is_user_actionable(),
            AppError::Registry(e) => e.is_user_actionable(),
            AppError::Pipeline(e) => e.is_user_actionable(),
            AppError::Payload { .. } | AppError::Interrupted { .. } => true,
            AppError::Store(_) | AppError::Io(_) | AppError::Json(_) => false,
        }
    }

    fn user_message(&self) -> Option<String> {
        self.is_user_actionable().then(|| self.to_string())
    }
}

/// Run the binary; returns the process exit code
pub async fn startup() -> i32 {
    let args = parse_args();
    let use_color = args.use_color();

    let loaded = EngineConfig::load(args.config.as_deref()).await;
    let config = match &loaded {
        Ok((config, _)) => config.clone(),
        Err(_) => EngineConfig::default(),
    };

    let level = args.log_level.as_deref().or(config.logging.level.as_deref());
    let format = args.log_format.as_deref().or(config.logging.format.as_deref());
    let log_file = args
        .log_file
        .clone()
        .or_else(|| config.logging.file.clone())
        .map(|p| p.to_string_lossy().into_owned());
    if let Err(e) = init_logging(level, format, log_file.as_deref(), use_color) {
        eprintln!("Failed to initialise logging: {}", e);
        return EXIT_FAILURE;
    }

    match loaded {
        Ok((_, Some(path))) => log::debug!("Loaded configuration from {}", path.display()),
        Ok((_, None)) => log::debug!("No configuration file; using defaults"),
        Err(e) => {
            log_error_with_context(&e, "Loading configuration");
            return EXIT_FAILURE;
        }
    }

    match execute(&args, &config, use_color).await {
        Ok(()) => 0,
        Err(e @ AppError::Interrupted { .. }) => {
            log::warn!("{}", e);
            EXIT_INTERRUPTED
        }
        Err(e) => {
            log_error_with_context(&e, &format!("Running '{}'", command_name(&args.command)));
            EXIT_FAILURE
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::List => "list",
        Command::Run { .. } => "run",
    }
}

async fn execute(args: &Args, config: &EngineConfig, use_color: bool) -> Result<(), AppError> {
    let registry = builtin_registry()?;
    match &args.command {
        Command::List => {
            pipeline_table(&registry, use_color).printstd();
            Ok(())
        }
        Command::Run { name, payloads } => run(config, &registry, name, payloads).await,
    }
}

/// Name, steps and description of every registered pipeline
pub fn pipeline_table(registry: &PipelineRegistry, use_color: bool) -> Table {
    let styled = |text: &str, role: StyleRole| match role.table_spec() {
        Some(spec) if use_color => Cell::new(text).style_spec(spec),
        _ => Cell::new(text),
    };

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_CLEAN);
    table.set_titles(Row::new(
        ["Name", "Steps", "Description"]
            .into_iter()
            .map(|title| styled(title, StyleRole::Header))
            .collect(),
    ));
    for definition in registry.definitions() {
        table.add_row(Row::new(vec![
            styled(definition.name(), StyleRole::Name),
            Cell::new(&definition.step_identities().join(" -> ")),
            styled(definition.description(), StyleRole::Dim),
        ]));
    }
    table
}

async fn run(
    config: &EngineConfig,
    registry: &PipelineRegistry,
    name: &str,
    payloads: &[String],
) -> Result<(), AppError> {
    let definition = registry.lookup(name)?;
    let payloads = if payloads.is_empty() {
        read_stdin_payloads().await?
    } else {
        parse_payloads(payloads)?
    };
    if payloads.is_empty() {
        log::warn!("No payloads given for pipeline '{}'", name);
        return Ok(());
    }

    let store = open_store(&config.store_options()?)?;
    let pipeline = Arc::new(definition.build(store, config.pipeline_options()?).await?);

    ShutdownCoordinator::guard(|shutdown| drive(pipeline, payloads, shutdown)).await
}

/// Feed every payload, print one result per payload, then shut down
async fn drive(
    pipeline: Arc<Pipeline>,
    payloads: Vec<Value>,
    shutdown: ShutdownCoordinator,
) -> Result<(), AppError> {
    let watcher = {
        let pipeline = Arc::clone(&pipeline);
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            if rx.recv().await.is_ok() {
                pipeline.stop();
            }
        })
    };

    let expected = payloads.len();
    let collected = collect(&pipeline, payloads, &shutdown).await;
    watcher.abort();
    let stopped = pipeline.shutdown().await;

    for failure in pipeline.failures() {
        log::warn!(
            "{} reported a {} failure: {}",
            failure.step,
            failure.kind,
            failure.traceback
        );
    }

    let received = collected?;
    stopped?;
    if received < expected && shutdown.is_shutdown_requested() {
        return Err(AppError::Interrupted { received, expected });
    }
    Ok(())
}

async fn collect(
    pipeline: &Pipeline,
    payloads: Vec<Value>,
    shutdown: &ShutdownCoordinator,
) -> Result<usize, AppError> {
    let expected = payloads.len();
    for payload in payloads {
        let id = pipeline.feed(payload).await?;
        log::debug!("Fed item {} into '{}'", id, pipeline.name());
    }

    let mut rx = shutdown.subscribe();
    let mut stdout = tokio::io::stdout();
    let mut received = 0;
    while received < expected && !shutdown.is_shutdown_requested() {
        let next = tokio::select! {
            result = pipeline.get_result(true) => result?,
            _ = rx.recv() => break,
        };
        let Some(value) = next else {
            log::warn!(
                "Pipeline '{}' produced {} of {} results before timing out",
                pipeline.name(),
                received,
                expected
            );
            break;
        };
        let mut line = serde_json::to_vec(&value)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        received += 1;
    }
    stdout.flush().await?;
    Ok(received)
}

async fn read_stdin_payloads() -> Result<Vec<Value>, AppError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut raw = Vec::new();
    while let Some(line) = lines.next_line().await? {
        raw.push(line);
    }
    parse_payloads(&raw)
}

/// Parse JSON payloads, skipping blank lines; `index` in errors is 1-based
pub fn parse_payloads(raw: &[String]) -> Result<Vec<Value>, AppError> {
    raw.iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| {
            serde_json::from_str(text).map_err(|source| AppError::Payload {
                index: i + 1,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_payloads_skips_blank_lines() {
        let raw = vec![
            r#"{"a": 1}"#.to_string(),
            "   ".to_string(),
            "[1, 2]".to_string(),
        ];
        assert_eq!(
            parse_payloads(&raw).unwrap(),
            vec![json!({"a": 1}), json!([1, 2])]
        );
    }

    #[test]
    fn test_parse_payloads_reports_position() {
        let raw = vec!["1".to_string(), "{oops".to_string()];
        let err = parse_payloads(&raw).unwrap_err();
        assert!(matches!(err, AppError::Payload { index: 2, .. }));
        assert!(err.is_user_actionable());
        assert!(err.user_message().unwrap().starts_with("Payload 2"));
    }

    #[test]
    fn test_system_errors_are_not_user_actionable() {
        let err = AppError::Io(std::io::Error::other("disk gone"));
        assert!(!err.is_user_actionable());
        assert_eq!(err.user_message(), None);

        let err = AppError::from(RegistryError::NotFound {
            name: "nightly".to_string(),
        });
        assert_eq!(
            err.user_message().as_deref(),
            Some("pipeline 'nightly' is not registered")
        );
    }

    #[test]
    fn test_pipeline_table_lists_builtins() {
        let registry = builtin_registry().unwrap();
        let rendered = pipeline_table(&registry, false).to_string();
        assert!(rendered.contains("Name"));
        assert!(rendered.contains("annotate"));
        assert!(rendered.contains("stamp -> checksum"));
        assert!(!rendered.contains("\x1b["));
    }

    #[tokio::test]
    async fn test_run_unknown_pipeline() {
        let registry = builtin_registry().unwrap();
        let err = run(
            &EngineConfig::default(),
            &registry,
            "missing",
            &["{}".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Registry(RegistryError::NotFound { .. })));
    }
}
