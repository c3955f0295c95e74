use std::io::IsTerminal;
use std::time::UNIX_EPOCH;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mctap_pipeline::{AnalysisReport, LatencyRecord};
use mctap_proto::opcode_name;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub const RECORD_HEADER: &str =
    "ts,flow,opcode,req_key_len,req_body_len,resp_key_len,resp_body_len,duration_us";

/// One CSV line per above-threshold match, no trailing newline.
pub fn record_line(record: &LatencyRecord) -> String {
    let ts = record
        .ts
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    format!(
        "{:.6},{},{},{},{},{},{},{}",
        ts,
        record.flow,
        opcode_label(record.opcode),
        record.req_key_len,
        record.req_body_len,
        record.resp_key_len,
        record.resp_body_len,
        record.duration.as_micros()
    )
}

pub fn opcode_label(op: u8) -> String {
    match opcode_name(op) {
        Some(name) => name.to_string(),
        None => format!("0x{op:02x}"),
    }
}

#[derive(Serialize)]
struct OpcodeOutput {
    opcode: String,
    count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    vbuckets: Option<Vec<u16>>,
}

#[derive(Serialize)]
struct ReportOutput {
    segments: u64,
    flows_opened: u64,
    decode_errors: u64,
    messages: u64,
    unparsed_bytes: u64,
    slow_matches: u64,
    fast_matches: u64,
    opcodes: Vec<OpcodeOutput>,
}

fn report_output(report: &AnalysisReport, dump_vbuckets: bool) -> ReportOutput {
    let opcodes = report
        .summary
        .opcode_counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(op, count)| OpcodeOutput {
            opcode: opcode_label(op as u8),
            count: *count,
            vbuckets: if dump_vbuckets {
                report.summary.vbuckets.get(&(op as u8)).cloned()
            } else {
                None
            },
        })
        .collect();

    ReportOutput {
        segments: report.router.segments,
        flows_opened: report.router.flows_opened,
        decode_errors: report.router.decode_errors,
        messages: report.summary.messages,
        unparsed_bytes: report.summary.unparsed_bytes,
        slow_matches: report.correlator.above,
        fast_matches: report.correlator.below,
        opcodes,
    }
}

pub fn print_report(report: &AnalysisReport, format: OutputFormat, dump_vbuckets: bool) {
    let out = report_output(report, dump_vbuckets);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OPCODE", "COUNT", "VBUCKETS"]);
            for op in &out.opcodes {
                let vbuckets = match &op.vbuckets {
                    Some(list) => list
                        .iter()
                        .map(u16::to_string)
                        .collect::<Vec<_>>()
                        .join(" "),
                    None => String::new(),
                };
                table.add_row(vec![op.opcode.clone(), op.count.to_string(), vbuckets]);
            }
            println!("{table}");
            print_totals(&out);
        }
        OutputFormat::Pretty => {
            for op in &out.opcodes {
                match &op.vbuckets {
                    Some(list) => println!("{:<10} {:>8}  vbuckets={list:?}", op.opcode, op.count),
                    None => println!("{:<10} {:>8}", op.opcode, op.count),
                }
            }
            print_totals(&out);
        }
    }
}

fn print_totals(out: &ReportOutput) {
    println!("segments routed:   {}", out.segments);
    println!("flows opened:      {}", out.flows_opened);
    println!("decode errors:     {}", out.decode_errors);
    println!("messages:          {}", out.messages);
    println!("unparsed bytes:    {}", out.unparsed_bytes);
    println!(
        "matches:           {} slow, {} fast",
        out.slow_matches, out.fast_matches
    );
}
