use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use tablewatch_core::learning::{MaskingSeverity, TestMaskingReport, detect_test_masking};

#[derive(Args)]
pub struct MaskingArgs {
    /// Test file before the change
    #[arg(long)]
    pub old: PathBuf,

    /// Test file after the change
    #[arg(long)]
    pub new: PathBuf,

    /// Stated reason for the change
    #[arg(long)]
    pub reason: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: MaskingArgs) -> Result<()> {
    let old = std::fs::read_to_string(&args.old)
        .with_context(|| format!("Failed to read {}", args.old.display()))?;
    let new = std::fs::read_to_string(&args.new)
        .with_context(|| format!("Failed to read {}", args.new.display()))?;

    let report = detect_test_masking(&old, &new, args.reason.as_deref());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_report(&report));
    }

    if report.is_masking {
        std::process::exit(1);
    }
    Ok(())
}

fn render_report(report: &TestMaskingReport) -> String {
    if report.severity == MaskingSeverity::None {
        return "No masking indicators found".to_string();
    }
    let mut out = format!("Masking suspected (severity: {})", report.severity.as_str());
    for indicator in &report.indicators {
        out.push_str("\n  - ");
        out.push_str(indicator);
    }
    out
}
