use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use household_allocator::{
    DataLoader, OutputWriter, PayloadMode, ProfileLibrary, RunConfig, RunReport, SectionAllocator,
    WrittenOutputs,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use serde::Serialize;
use std::path::PathBuf;

pub const RUN_REPORT_JSON: &str = "run_report.json";

#[derive(Debug, Serialize)]
struct RunManifest<'a> {
    generated_at: DateTime<Utc>,
    config: &'a RunConfig,
    report: &'a RunReport,
    outputs: Vec<PathBuf>,
}

pub struct AssignProcessor {
    config: RunConfig,
}

impl AssignProcessor {
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Load inputs, allocate every section and write all outputs.
    pub fn run(&self) -> Result<RunReport> {
        let allocation = &self.config.allocation;
        println!("🏘️  Household Assignment");
        println!("{}", "=".repeat(60));

        // Every input is read before anything is written.
        let loader = DataLoader::new(allocation);
        let sections = loader.load_census_sections(&self.config.census_path)?;
        let catalog = loader.load_buildings(&self.config.buildings_path)?;
        println!(
            "📥 {} census sections, {} residential buildings",
            sections.len(),
            catalog.len()
        );

        let profiles = match (&self.config.profiles_dir, allocation.profile_payload) {
            (Some(dir), mode) if mode != PayloadMode::None => Some(
                ProfileLibrary::load(dir, allocation)
                    .with_context(|| format!("Failed to load profiles from {}", dir.display()))?,
            ),
            _ => None,
        };

        let allocator = SectionAllocator::new(allocation.clone(), profiles)?;

        let pb = ProgressBar::new(sections.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")?,
        );
        let run = allocator.allocate_all_with_progress(&sections, &catalog, self.config.seed, |section| {
            pb.set_message(format!("section {}", section.id));
            pb.inc(1);
        })?;
        pb.finish_with_message("Sections allocated");

        let writer = OutputWriter::new(&self.config.output_dir, allocation)?;
        let written = writer.write_all(&run.sections)?;
        let manifest = RunManifest {
            generated_at: Utc::now(),
            config: &self.config,
            report: &run.report,
            outputs: output_paths(&written),
        };
        writer.write_json(RUN_REPORT_JSON, &manifest)?;
        info!("Run report written to {}", self.config.output_dir.join(RUN_REPORT_JSON).display());

        print_summary(&run.report, &written);
        Ok(run.report)
    }
}

fn output_paths(written: &WrittenOutputs) -> Vec<PathBuf> {
    vec![
        written.summary_json.clone(),
        written.residents_json.clone(),
        written.assignment_csv.clone(),
    ]
}

fn print_summary(report: &RunReport, written: &WrittenOutputs) {
    println!("\n📊 Run Summary (seed {})", report.seed);
    println!("{}", "-".repeat(60));
    println!(
        "  Sections: {} processed, {} skipped",
        report.sections_processed, report.sections_skipped
    );
    println!("  Buildings: {}", report.buildings_processed);
    println!("  Residents assigned: {}", report.residents_assigned);
    println!(
        "  Households: {} assigned of {} synthesized ({} unused)",
        report.households_assigned, report.households_synthesized, report.unused_slots
    );
    if report.pool_underflows > 0 {
        println!(
            "  ⚠️  {} pool underflows, {} households short",
            report.pool_underflows, report.cumulative_household_shortfall
        );
    }
    let other_warnings = report.warnings.len() - report.pool_underflows - report.sections_skipped;
    if other_warnings > 0 {
        println!("  ⚠️  {} other warnings, see {}", other_warnings, RUN_REPORT_JSON);
    }
    println!("  📁 {} per-building files", written.building_files.len());
    println!("\n✅ Saved household summary to {}", written.summary_json.display());
    println!("✅ Saved residents to {}", written.residents_json.display());
    println!("✅ Saved assignment table to {}", written.assignment_csv.display());
}
