use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use tablewatch_core::collab::{InMemoryIssueRegistry, InMemoryStateStore};
use tablewatch_core::learning::ConfidenceReport;
use tablewatch_core::store::{JsonFileStore, KnowledgeStore};
use tablewatch_core::{Collaborators, Monitor};

use crate::config::ConfigLoader;

#[derive(Args)]
pub struct ConfidenceArgs {
    /// Override the data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ConfidenceArgs) -> Result<()> {
    let mut config = ConfigLoader::load()?;
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = Some(dir);
    }

    let store: Arc<dyn KnowledgeStore> = Arc::new(JsonFileStore::new(config.storage.resolved_dir()));
    let collaborators = Collaborators {
        state: Arc::new(InMemoryStateStore::new()),
        registry: Arc::new(InMemoryIssueRegistry::new()),
        dependencies: None,
    };
    let mut monitor = Monitor::init(&config, store, collaborators).await?;
    let report = monitor.confidence();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let stats = monitor.fixes().fix_statistics();
    println!(
        "Attempts: {} ({} successful), methods: {}, working fixes: {}",
        stats.total_attempts, stats.successful_attempts, stats.distinct_methods, stats.working_fixes
    );
    println!("{}", render_report(&report));
    Ok(())
}

fn score_color(score: f64) -> Color {
    if score >= 70.0 {
        Color::Green
    } else if score >= 50.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}

fn render_report(report: &ConfidenceReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Metric").fg(Color::Cyan),
        Cell::new("Score").fg(Color::Cyan),
    ]);

    for (name, score) in report.metrics.named() {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(format!("{score:.1}")).fg(score_color(score)),
        ]);
    }
    table.add_row(vec![
        Cell::new("overall"),
        Cell::new(format!("{:.1}", report.confidence)).fg(score_color(report.confidence)),
    ]);

    let mut out = table.to_string();
    if let Some(trend) = report.trend {
        out.push_str(&format!("\nTrend: {trend:+.1}"));
    }
    if report.masking_detected() {
        out.push_str("\nMasking flags:");
        for flag in &report.masking_flags {
            out.push_str(&format!("\n  [{}] {}: {}", flag.kind.as_str(), flag.subject, flag.message));
        }
    }
    for directive in &report.adjustments {
        out.push_str(&format!(
            "\nAdjust {} ({:.1}): {}",
            directive.metric, directive.score, directive.action
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tablewatch_core::learning::{ConfidenceMetrics, MaskingFlag, MaskingKind};

    fn report(confidence: f64, flags: Vec<MaskingFlag>) -> ConfidenceReport {
        ConfidenceReport {
            timestamp: Utc::now(),
            confidence,
            metrics: ConfidenceMetrics::uniform(confidence),
            masking_flags: flags,
            adjustments: Vec::new(),
            trend: Some(-4.0),
        }
    }

    #[test]
    fn test_render_lists_metrics_and_overall() {
        let out = render_report(&report(72.5, Vec::new()));
        assert!(out.contains("patternRecognition"));
        assert!(out.contains("dataQuality"));
        assert!(out.contains("overall"));
        assert!(out.contains("72.5"));
        assert!(out.contains("Trend: -4.0"));
        assert!(!out.contains("Masking flags"));
    }

    #[test]
    fn test_render_shows_masking_flags() {
        let flag = MaskingFlag::new(
            MaskingKind::PerfectRate,
            "fixMethod:resetPot",
            "perfect success rate on 3 samples",
        );
        let out = render_report(&report(40.0, vec![flag]));
        assert!(out.contains("Masking flags"));
        assert!(out.contains("[perfect_rate] fixMethod:resetPot"));
    }

    #[test]
    fn test_score_color_bands() {
        assert_eq!(score_color(90.0), Color::Green);
        assert_eq!(score_color(55.0), Color::Yellow);
        assert_eq!(score_color(10.0), Color::Red);
    }
}
