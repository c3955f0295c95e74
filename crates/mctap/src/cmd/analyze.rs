use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;

use mctap_pipeline::{AnalysisReport, AnalyzerConfig, CaptureSource};
use mctap_proto::KeyBounds;
use tokio::sync::mpsc;

use crate::cmd::AnalyzeArgs;
use crate::exit::{io_error, pipeline_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_report, record_line, OutputFormat, RECORD_HEADER};

pub fn run(args: AnalyzeArgs, format: OutputFormat) -> CliResult<i32> {
    let cfg = build_config(&args)?;

    let source = CaptureSource::open(&args.capture)
        .map_err(|err| pipeline_error("open capture", err))?;

    let mut sink: Box<dyn Write + Send> = match &args.report_file {
        Some(path) => {
            let file =
                File::create(path).map_err(|err| io_error("create report file", err))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout()),
    };
    writeln!(sink, "{RECORD_HEADER}")
        .map_err(|err| io_error("write report header", err))?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| CliError::new(INTERNAL, format!("start runtime: {err}")))?;
    let report = runtime.block_on(analyze(cfg, source, sink))?;

    print_report(&report, format, args.dump_vbuckets);
    Ok(SUCCESS)
}

fn build_config(args: &AnalyzeArgs) -> CliResult<AnalyzerConfig> {
    if args.min_key == 0 || args.min_key > args.max_key {
        return Err(CliError::new(
            USAGE,
            format!(
                "key bounds {}..{} are not a valid range",
                args.min_key, args.max_key
            ),
        ));
    }
    if let Some(scale) = args.time_scale {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(CliError::new(
                USAGE,
                format!("time scale must be a positive number, got {scale}"),
            ));
        }
    }
    Ok(AnalyzerConfig {
        recover: !args.no_recover,
        key_bounds: KeyBounds {
            min: args.min_key,
            max: args.max_key,
        },
        max_body_len: args.max_body,
        threshold: parse_duration(&args.threshold)?,
        server_port: args.server_port,
        verbose: args.verbose,
        time_scale: args.time_scale,
        ..AnalyzerConfig::default()
    })
}

async fn analyze(
    cfg: AnalyzerConfig,
    source: CaptureSource<impl std::io::Read>,
    mut sink: Box<dyn Write + Send>,
) -> CliResult<AnalysisReport> {
    let (record_tx, mut record_rx) = mpsc::channel(cfg.event_queue_capacity);

    // The writer owns the sink until the pipeline drops the last
    // record sender.
    let writer = tokio::spawn(async move {
        while let Some(record) = record_rx.recv().await {
            if writeln!(sink, "{}", record_line(&record)).is_err() {
                break;
            }
        }
        sink
    });

    let report = mctap_pipeline::run(Arc::new(cfg), source, record_tx)
        .await
        .map_err(|err| pipeline_error("analysis failed", err))?;

    let mut sink = writer
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("record writer failed: {err}")))?;
    sink.flush()
        .map_err(|err| io_error("flush report", err))?;

    Ok(report)
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "threshold must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix("us") {
        (num, "us")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "ms")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid threshold value: {input}")))?;

    match unit {
        "us" => Ok(Duration::from_micros(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported threshold unit: {unit}"),
        )),
    }
}
