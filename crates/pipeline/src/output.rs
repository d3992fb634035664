//! Output formats and the printer that drains the shared event channel.

use std::io::{self, Write};

use kwatch_core::ChangeEvent;
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rendering strategy, chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `[timestamp] key` followed by the diff.
    #[default]
    Default,
    /// Chrome trace-event JSON array, one instant event per change.
    Trace,
}

#[derive(Serialize)]
struct TraceRecord<'a> {
    ts: f64,
    name: &'a str,
    ph: &'static str,
    pid: u32,
    tid: u32,
    s: &'static str,
    args: [&'a str; 1],
}

impl OutputFormat {
    pub fn preamble(self) -> &'static str {
        match self {
            OutputFormat::Default => "",
            OutputFormat::Trace => "[\n",
        }
    }

    pub fn epilogue(self) -> &'static str {
        match self {
            OutputFormat::Default => "",
            OutputFormat::Trace => "]\n",
        }
    }

    /// Trace output is machine-read; ANSI colours would corrupt it.
    pub fn supports_color(self) -> bool {
        matches!(self, OutputFormat::Default)
    }

    pub fn format(self, event: &ChangeEvent) -> String {
        match self {
            OutputFormat::Default => format!(
                "[{}] {}\n{}\n",
                event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                event.key,
                event.diff
            ),
            OutputFormat::Trace => {
                let micros = event.timestamp.timestamp_nanos_opt().unwrap_or_default() as f64 / 1000.0;
                let record = TraceRecord {
                    ts: micros,
                    name: &event.key,
                    ph: "i",
                    pid: 1,
                    tid: 1,
                    s: "t",
                    args: [&event.diff],
                };
                let mut line = serde_json::to_string(&record).unwrap_or_default();
                line.push_str(",\n");
                line
            }
        }
    }
}

fn write_event<W: Write>(out: &mut W, format: OutputFormat, event: &ChangeEvent) -> io::Result<()> {
    out.write_all(format.format(event).as_bytes())?;
    out.flush()?;
    counter!("kwatch_printed_total", 1u64);
    Ok(())
}

/// Print events until `cancel` fires, then flush whatever is already buffered
/// without waiting for more. The preamble and epilogue always bracket the output.
///
/// An event a producer is sending at the instant of cancellation may or may not be
/// captured by the final drain.
pub async fn print_events<W: Write>(
    mut rx: mpsc::Receiver<ChangeEvent>,
    format: OutputFormat,
    out: &mut W,
    cancel: &CancellationToken,
) -> io::Result<usize> {
    out.write_all(format.preamble().as_bytes())?;
    out.flush()?;

    let mut printed = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(event) => {
                    write_event(out, format, &event)?;
                    printed += 1;
                }
                None => {
                    debug!("no producers left; waiting for shutdown");
                    cancel.cancelled().await;
                    break;
                }
            }
        }
    }

    let mut drained = 0usize;
    while let Ok(event) = rx.try_recv() {
        write_event(out, format, &event)?;
        drained += 1;
    }
    debug!(printed, drained, "printer drained");

    out.write_all(format.epilogue().as_bytes())?;
    out.flush()?;
    Ok(printed + drained)
}
