//! Replay a JSON-lines feed through a live monitor
//!
//! Each line is one [`FeedItem`]. State changes and issues go to the
//! in-memory collaborators exactly as a host server would publish them;
//! attempts and mistakes go through the monitor handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tablewatch_core::collab::{
    DependencyGraph, InMemoryIssueRegistry, InMemoryStateStore, IssueRegistry, StateStore,
};
use tablewatch_core::knowledge::AttemptRequest;
use tablewatch_core::learning::{Mistake, MistakeKind};
use tablewatch_core::store::{JsonFileStore, KnowledgeStore};
use tablewatch_core::{
    Collaborators, FixResult, IssueDetails, IssueDraft, IssueId, Monitor, MonitorHandle,
    MonitorLoopResult, Severity, WatchEvent, start_monitor,
};

use crate::config::ConfigLoader;

#[derive(Args)]
pub struct RunArgs {
    /// JSON-lines feed to replay (default: stdin)
    #[arg(long)]
    pub feed: Option<PathBuf>,

    /// Override the data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// One line of the feed
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedItem {
    StateChange {
        path: String,
        value: Value,
        #[serde(default = "default_trigger")]
        trigger: String,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Issue {
        id: String,
        #[serde(rename = "type")]
        issue_type: String,
        severity: Severity,
        #[serde(default)]
        details: IssueDetails,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Attempt {
        issue_id: String,
        method: String,
        result: FixResult,
        #[serde(default)]
        details: Value,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    Resolve {
        issue_id: String,
    },
    Mistake {
        mistake_type: String,
        #[serde(default)]
        details: String,
    },
}

fn default_trigger() -> String {
    "feed".to_string()
}

/// Where feed items are delivered
struct FeedTarget {
    state: Arc<InMemoryStateStore>,
    registry: Arc<InMemoryIssueRegistry>,
    handle: MonitorHandle,
}

impl FeedTarget {
    async fn apply(&self, item: FeedItem) -> Result<()> {
        match item {
            FeedItem::StateChange {
                path,
                value,
                trigger,
                at,
            } => match at {
                Some(at) => self.state.set_at(&path, value, &trigger, at),
                None => self.state.set(&path, value, &trigger),
            },
            FeedItem::Issue {
                id,
                issue_type,
                severity,
                details,
                at,
            } => {
                let draft = IssueDraft {
                    id: id.into(),
                    issue_type,
                    severity,
                    details,
                };
                self.registry.detect_issue(draft, at.unwrap_or_else(Utc::now));
            }
            FeedItem::Attempt {
                issue_id,
                method,
                result,
                details,
                duration_ms,
            } => {
                let mut request = AttemptRequest::new(issue_id, method, result).with_details(details);
                if let Some(ms) = duration_ms {
                    request = request.with_duration_ms(ms);
                }
                let attempt = self.handle.record_attempt(request).await?;
                debug!(attempt_id = %attempt.id, "Attempt recorded");
            }
            FeedItem::Resolve { issue_id } => {
                let id = IssueId::from(issue_id);
                if self.registry.resolve(&id).is_none() {
                    warn!(issue_id = %id, "Resolve for unknown issue");
                }
            }
            FeedItem::Mistake {
                mistake_type,
                details,
            } => {
                let kind = mistake_type
                    .parse::<MistakeKind>()
                    .unwrap_or_else(|never| match never {});
                let confidence = self
                    .handle
                    .learn_from_mistake(Mistake { kind, details })
                    .await?;
                info!(confidence, "Mistake recorded");
            }
        }
        Ok(())
    }
}

/// Apply every line of `reader`, skipping blank and malformed lines.
/// Returns the number of items applied.
async fn replay<R>(reader: R, target: &FeedTarget) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut applied = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<FeedItem>(line) {
            Ok(item) => {
                target.apply(item).await?;
                applied += 1;
            }
            Err(e) => warn!(error = %e, "Skipping malformed feed line"),
        }
    }
    Ok(applied)
}

async fn replay_source(feed: Option<&Path>, target: &FeedTarget) -> Result<usize> {
    match feed {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open feed {}", path.display()))?;
            replay(BufReader::new(file), target).await
        }
        None => replay(BufReader::new(tokio::io::stdin()), target).await,
    }
}

async fn print_events(mut events: broadcast::Receiver<WatchEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(error = %e, event = event.name(), "Failed to serialize event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = ConfigLoader::load()?;
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = Some(dir);
    }

    let data_dir = config.storage.resolved_dir();
    info!(data_dir = %data_dir.display(), "Using data directory");
    let store: Arc<dyn KnowledgeStore> = Arc::new(JsonFileStore::new(data_dir));

    let state = Arc::new(InMemoryStateStore::new());
    let registry = Arc::new(InMemoryIssueRegistry::new());
    let dependencies = config
        .dependency_graph()
        .map(|graph| Arc::new(graph) as Arc<dyn DependencyGraph>);
    let collaborators = Collaborators {
        state: state.clone(),
        registry: registry.clone(),
        dependencies,
    };

    let monitor = Monitor::init(&config, store, collaborators).await?;
    let (handle, task) = start_monitor(monitor, CancellationToken::new());
    let printer = tokio::spawn(print_events(handle.subscribe()));

    let target = FeedTarget {
        state,
        registry,
        handle: handle.clone(),
    };

    tokio::select! {
        result = replay_source(args.feed.as_deref(), &target) => {
            let applied = result?;
            info!(applied, "Feed finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    // Round-trip through the loop so queued notifications are handled first
    handle.save().await?;
    handle.stop();
    let outcome = task.await?;

    // The printer drains what is buffered once the last bus sender is gone
    drop(target);
    drop(handle);
    let _ = printer.await;

    match outcome {
        MonitorLoopResult::Shutdown => Ok(()),
        MonitorLoopResult::Error(e) => bail!("monitor stopped with error: {e}"),
    }
}
