//! Newline-delimited JSON event loop.
//!
//! Each input line is either a change event or outcome feedback. Change
//! events are submitted to the [`PipelineCoordinator`] and their results are
//! written as they finish, so output order follows completion, not input.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use mergeguard_core::{
    ChangeEvent, OutcomeFeedback, PipelineCoordinator, PipelineOutcome, Submission,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// One input line. Feedback is tried first because every change-event field
/// is optional.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Outcome(OutcomeFeedback),
    Change(ChangeEvent),
}

/// One output line.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Decision(PipelineOutcome),
    Dropped {
        revision_id: String,
        superseded_by: Option<String>,
    },
    Outcome {
        revision_id: String,
        outcome: String,
    },
    Error {
        revision_id: Option<String>,
        error: String,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeStats {
    pub lines: u64,
    pub decisions: u64,
    pub dropped: u64,
    pub outcomes: u64,
    pub errors: u64,
}

struct Writer<W> {
    out: W,
    stats: ServeStats,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    async fn emit(&mut self, line: &Outbound) -> Result<()> {
        match line {
            Outbound::Decision(_) => self.stats.decisions += 1,
            Outbound::Dropped { .. } => self.stats.dropped += 1,
            Outbound::Outcome { .. } => self.stats.outcomes += 1,
            Outbound::Error { .. } => self.stats.errors += 1,
        }
        let mut bytes = serde_json::to_vec(line).context("serialize output line")?;
        bytes.push(b'\n');
        self.out.write_all(&bytes).await.context("write output")?;
        self.out.flush().await.context("flush output")?;
        Ok(())
    }
}

/// Read `input` to the end, then wait for every started pipeline.
pub async fn serve<R, W>(coordinator: Arc<PipelineCoordinator>, input: R, output: W) -> Result<ServeStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut writer = Writer {
        out: output,
        stats: ServeStats::default(),
    };
    let mut running = FuturesUnordered::new();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("read input")? {
                    Some(line) => {
                        writer.stats.lines += 1;
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Inbound>(line) {
                            Ok(Inbound::Change(event)) => {
                                let revision_id = event.revision_id.clone();
                                match coordinator.submit(&event).await {
                                    Ok(Submission::Started(handle)) => {
                                        running.push(handle.map(move |joined| (revision_id, joined)));
                                    }
                                    Ok(Submission::Dropped { revision_id, superseded_by }) => {
                                        writer
                                            .emit(&Outbound::Dropped { revision_id, superseded_by })
                                            .await?;
                                    }
                                    Err(e) => {
                                        writer
                                            .emit(&Outbound::Error { revision_id, error: e.to_string() })
                                            .await?;
                                    }
                                }
                            }
                            Ok(Inbound::Outcome(feedback)) => {
                                let line = match coordinator.engine().record_outcome(&feedback).await {
                                    Ok(record) => Outbound::Outcome {
                                        revision_id: record.revision_id().to_string(),
                                        outcome: record.outcome.to_string(),
                                    },
                                    Err(e) => Outbound::Error {
                                        revision_id: Some(feedback.revision_id.clone()),
                                        error: e.to_string(),
                                    },
                                };
                                writer.emit(&line).await?;
                            }
                            Err(e) => {
                                warn!(error = %e, "unparseable input line");
                                writer
                                    .emit(&Outbound::Error { revision_id: None, error: format!("invalid input: {e}") })
                                    .await?;
                            }
                        }
                    }
                    None => {
                        debug!("input closed; draining pipelines");
                        input_open = false;
                    }
                }
            }
            Some((revision_id, joined)) = running.next(), if !running.is_empty() => {
                let line = match joined {
                    Ok(Ok(outcome)) => Outbound::Decision(outcome),
                    Ok(Err(e)) => Outbound::Error { revision_id, error: e.to_string() },
                    Err(e) => Outbound::Error { revision_id, error: format!("pipeline task failed: {e}") },
                };
                writer.emit(&line).await?;
            }
            else => break,
        }
    }

    Ok(writer.stats)
}
