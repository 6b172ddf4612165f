//! Edge runtime - feeds input lines to the loop and writes its streams out
//!
//! ```text
//! input lines ──▶ Inbound ──▶ LoopCoordinator ──┬─ actions ─┐
//!                                              ├─ sync ────┼─▶ Outbound lines
//!                                              └─ ops ─────┘
//! ```

use crate::envelope::{Inbound, Outbound};
use crate::error::Result;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use signal_core::types::now;
use signal_core::{LoopConfig, LoopCoordinator, LoopStats, LoopStreams};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// Longest accepted input line, in bytes
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Outbound lines buffered ahead of the writer
const OUTBOUND_BUFFER: usize = 1024;

/// What a run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Input lines read
    pub lines: u64,
    /// Lines that could not be handled
    pub rejected: u64,
    /// Loop counters at shutdown
    pub stats: LoopStats,
}

/// Host for one loop instance
#[derive(Debug)]
pub struct EdgeRuntime {
    coordinator: LoopCoordinator,
    streams: LoopStreams,
}

impl EdgeRuntime {
    /// Build the loop from `config`
    pub fn new(config: LoopConfig) -> Result<Self> {
        let (coordinator, streams) = LoopCoordinator::new(config)?;
        Ok(Self {
            coordinator,
            streams,
        })
    }

    /// The underlying loop
    pub fn coordinator(&self) -> &LoopCoordinator {
        &self.coordinator
    }

    /// Process `input` until end of stream, writing every output record to
    /// `output`. Returns once all in-flight cycles have finished and every
    /// record has been written.
    pub async fn run<R, W>(self, input: R, output: W) -> Result<RunSummary>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let EdgeRuntime {
            coordinator,
            streams,
        } = self;

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let writer = tokio::spawn(write_lines(out_rx, output));
        let forwarders = spawn_forwarders(streams, &out_tx);

        let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut cycles = JoinSet::new();
        let mut summary = RunSummary::default();

        loop {
            tokio::select! {
                next = lines.next() => {
                    let Some(next) = next else { break };
                    summary.lines += 1;
                    let rejected = match next {
                        Ok(line) if line.trim().is_empty() => None,
                        Ok(line) => handle_line(&coordinator, &line, &mut cycles).await.err(),
                        Err(e) => Some(crate::error::EdgeError::from(e)),
                    };
                    if let Some(err) = rejected {
                        summary.rejected += 1;
                        tracing::warn!("Rejected input line {}: {}", summary.lines, err);
                        let _ = out_tx
                            .send(Outbound::Rejected { line: summary.lines, reason: err.to_string() })
                            .await;
                    }
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    log_cycle(joined);
                }
            }
        }

        tracing::info!("Input closed after {} lines, draining in-flight cycles", summary.lines);
        while let Some(joined) = cycles.join_next().await {
            log_cycle(joined);
        }

        summary.stats = coordinator.stats();

        // Dropping the loop closes its streams, which ends the forwarders
        drop(coordinator);
        for forwarder in forwarders {
            let _ = forwarder.await;
        }
        drop(out_tx);
        writer
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))??;

        tracing::info!(
            "Run complete: {} lines, {} rejected, {} cycles",
            summary.lines,
            summary.rejected,
            summary.stats.cycles
        );
        Ok(summary)
    }
}

async fn handle_line(
    coordinator: &LoopCoordinator,
    line: &str,
    cycles: &mut JoinSet<signal_core::Result<signal_core::CycleReport>>,
) -> Result<()> {
    let inbound = Inbound::parse(line)?;
    tracing::debug!("Inbound {}", inbound.kind());

    match inbound {
        Inbound::Event(event) => {
            let ticket = coordinator.submit(event)?;
            cycles.spawn(ticket.report());
        }
        Inbound::Telemetry(reading) => {
            coordinator.observe_telemetry(
                reading.source,
                &reading.channel,
                reading.value,
                reading.timestamp.unwrap_or_else(now),
            );
        }
        Inbound::Override(request) => {
            coordinator
                .manual_override(request.source, request.action, request.justification)
                .await?;
        }
        Inbound::ReloadCorpus { path } => {
            coordinator.reload_corpus_from_file(&path)?;
        }
        Inbound::ReloadModel {
            spec_path,
            artifact_path,
        } => {
            coordinator.load_model_from_files(&spec_path, &artifact_path)?;
        }
    }
    Ok(())
}

fn log_cycle(joined: std::result::Result<signal_core::Result<signal_core::CycleReport>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(report)) => tracing::debug!("Cycle {} finished in {}ms", report.event_id, report.elapsed_ms),
        Ok(Err(e)) => tracing::debug!("Cycle did not run: {}", e),
        Err(e) => tracing::error!("Cycle task failed: {}", e),
    }
}

fn spawn_forwarders(streams: LoopStreams, out: &mpsc::Sender<Outbound>) -> Vec<tokio::task::JoinHandle<()>> {
    let LoopStreams {
        actions,
        mut sync,
        mut ops,
    } = streams;
    let mut handles = Vec::with_capacity(3);

    if let Some(mut actions) = actions {
        let out = out.clone();
        handles.push(tokio::spawn(async move {
            while let Some(disposition) = actions.recv().await {
                if out.send(Outbound::Action(disposition)).await.is_err() {
                    break;
                }
            }
        }));
    }

    let sync_out = out.clone();
    handles.push(tokio::spawn(async move {
        while let Some(record) = sync.recv().await {
            if sync_out.send(Outbound::Sync(record)).await.is_err() {
                break;
            }
        }
    }));

    let ops_out = out.clone();
    handles.push(tokio::spawn(async move {
        loop {
            match ops.recv().await {
                Ok(record) => {
                    if ops_out.send(Outbound::Ops(record)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Ops output lagged, {} records skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }));

    handles
}

async fn write_lines<W>(mut rx: mpsc::Receiver<Outbound>, output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(output, LinesCodec::new());
    while let Some(record) = rx.recv().await {
        sink.send(record.to_line()?).await?;
    }
    SinkExt::<String>::close(&mut sink).await?;
    Ok(())
}
