use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use household_allocator::output_writer::{ASSIGNMENT_CSV, RESIDENTS_JSON, SUMMARY_JSON};
use household_allocator::{AllocationConfig, DataLoader, RunConfig};
use log::info;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

mod assign_processor;
mod schedule_processor;

use assign_processor::AssignProcessor;
use schedule_processor::{merge_into_cea, ScheduleExporter};

#[derive(Parser)]
#[command(name = "rec_households")]
#[command(about = "Assign census households to residential buildings and build occupancy schedules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Estimate residents and assign households for every census section
    Assign(AssignArgs),
    /// Build CEA schedules from per-building profile files
    Schedules(ScheduleArgs),
    /// Copy profile columns of exported schedules into existing CEA schedules
    Merge(MergeArgs),
    /// Check emitted outputs against the census
    Verify(VerifyArgs),
}

#[derive(Args)]
struct AssignArgs {
    /// Run configuration JSON; the flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allocation preset used without a configuration file
    #[arg(short, long, value_enum, default_value = "base", conflicts_with = "config")]
    preset: Preset,

    /// Census sections GeoJSON
    #[arg(long)]
    census: Option<PathBuf>,

    /// Buildings GeoJSON
    #[arg(long)]
    buildings: Option<PathBuf>,

    /// Directory of `<kind>/<sheet>.csv` profile tables
    #[arg(long)]
    profiles: Option<PathBuf>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Random seed
    #[arg(short, long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct ScheduleArgs {
    /// Directory holding `<id>_<kind>.csv` files
    #[arg(long)]
    input: PathBuf,

    #[arg(short, long)]
    output: PathBuf,

    /// Replace missing or misshapen profiles with zeros instead of failing
    #[arg(long)]
    zero_fill: bool,
}

#[derive(Args)]
struct MergeArgs {
    /// Directory of exported `B<id>.csv` schedules
    #[arg(long)]
    schedules: PathBuf,

    /// CEA `building-properties/schedules` directory
    #[arg(long)]
    cea: PathBuf,
}

#[derive(Args)]
struct VerifyArgs {
    #[arg(long)]
    census: PathBuf,

    /// Output directory of an assign run
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    Base,
    Extended,
    Balanced,
}

impl Preset {
    fn allocation(self) -> AllocationConfig {
        match self {
            Preset::Base => AllocationConfig::new_base(),
            Preset::Extended => AllocationConfig::new_extended(),
            Preset::Balanced => AllocationConfig::new_balanced(),
        }
    }
}

fn run_config(args: &AssignArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => {
            let (Some(census), Some(buildings), Some(output)) = (&args.census, &args.buildings, &args.output) else {
                bail!("Without --config, --census, --buildings and --output are required");
            };
            RunConfig::new(census, buildings, output, args.preset.allocation())
        }
    };

    if let Some(census) = &args.census {
        config.census_path = census.clone();
    }
    if let Some(buildings) = &args.buildings {
        config.buildings_path = buildings.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(profiles) = &args.profiles {
        config.profiles_dir = Some(profiles.clone());
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResidentsRecord {
    Count(u32),
    Detailed {
        estimated_residents: u32,
        education: BTreeMap<String, u32>,
        household_types: BTreeMap<String, BTreeMap<String, u32>>,
    },
}

impl ResidentsRecord {
    fn residents(&self) -> u32 {
        match self {
            ResidentsRecord::Count(n) => *n,
            ResidentsRecord::Detailed {
                estimated_residents,
                ..
            } => *estimated_residents,
        }
    }
}

/// Households of one summary entry, tiered or flat.
fn summary_households(entry: &serde_json::Value) -> u64 {
    entry
        .as_object()
        .map(|groups| {
            groups
                .values()
                .map(|group| match group {
                    serde_json::Value::Object(tiers) => tiers.values().filter_map(|v| v.as_u64()).sum(),
                    other => other.as_u64().unwrap_or(0),
                })
                .sum()
        })
        .unwrap_or(0)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Re-read the outputs of an assign run and check them against the census.
/// Returns the number of issues found.
fn verify_outputs(census_path: &Path, output_dir: &Path) -> Result<usize> {
    println!("\n🔍 Output Verification");
    println!("{}", "=".repeat(60));

    let sections = DataLoader::new(&AllocationConfig::new_base()).load_census_sections(census_path)?;
    let residents: BTreeMap<String, ResidentsRecord> = read_json(&output_dir.join(RESIDENTS_JSON))?;
    let summary: BTreeMap<String, serde_json::Value> = read_json(&output_dir.join(SUMMARY_JSON))?;

    // Section membership and household counts come from the assignment table.
    let mut section_buildings: HashMap<String, Vec<String>> = HashMap::new();
    let mut pivot_households: HashMap<String, u64> = HashMap::new();
    let mut reader = csv::Reader::from_path(output_dir.join(ASSIGNMENT_CSV))
        .with_context(|| format!("Failed to read {}", output_dir.join(ASSIGNMENT_CSV).display()))?;
    for record in reader.records() {
        let record = record?;
        let section = record.get(0).unwrap_or_default().to_string();
        let building = record.get(1).unwrap_or_default().to_string();
        let households = record
            .iter()
            .skip(2)
            .map(|cell| cell.parse::<u64>().with_context(|| format!("Bad count \"{}\"", cell)))
            .sum::<Result<u64>>()?;
        pivot_households.insert(building.clone(), households);
        section_buildings.entry(section).or_default().push(building);
    }

    let mut total_issues = 0;

    println!("\n🏠 Checking {} buildings", residents.len());
    for (building_id, record) in &residents {
        if record.residents() < 1 {
            println!("    ❌ Building {} has no residents", building_id);
            total_issues += 1;
        }
        if let ResidentsRecord::Detailed {
            estimated_residents,
            education,
            household_types,
        } = record
        {
            let education_total: u32 = education.values().sum();
            let household_total: u32 = household_types.values().flat_map(|l| l.values()).sum();
            if education_total != *estimated_residents || household_total != *estimated_residents {
                println!(
                    "    ❌ Building {}: education {} / household types {} vs {} residents",
                    building_id, education_total, household_total, estimated_residents
                );
                total_issues += 1;
            }
        }
        let summarized = summary.get(building_id).map(summary_households).unwrap_or(0);
        let tabulated = pivot_households.get(building_id).copied().unwrap_or(0);
        if summarized != tabulated {
            println!(
                "    ❌ Building {}: summary has {} households, table has {}",
                building_id, summarized, tabulated
            );
            total_issues += 1;
        }
    }

    println!("\n📁 Checking {} census sections", sections.len());
    let mut checked = 0;
    let mut household_shortfall = 0u64;
    for section in &sections {
        let Some(buildings) = section_buildings.get(&section.id) else {
            continue;
        };
        checked += 1;
        let assigned: i64 = buildings
            .iter()
            .filter_map(|id| residents.get(id))
            .map(|r| r.residents() as i64)
            .sum();
        if assigned != section.population {
            println!(
                "    ❌ Section {}: {} residents assigned, census reports {}",
                section.id, assigned, section.population
            );
            total_issues += 1;
        }
        let households: u64 = buildings.iter().filter_map(|id| pivot_households.get(id)).sum();
        if households as i64 > section.total_households {
            println!(
                "    ❌ Section {}: {} households assigned, census reports {}",
                section.id, households, section.total_households
            );
            total_issues += 1;
        } else {
            household_shortfall += (section.total_households - households as i64) as u64;
        }
    }
    println!("    📊 Sections with buildings: {}", checked);
    println!("    📊 Households short of census totals: {}", household_shortfall);

    println!("\n{}", "=".repeat(60));
    if total_issues == 0 {
        println!("✅ Output verification passed! No issues found.");
    } else {
        println!("⚠️  Output verification found {} issues", total_issues);
    }
    Ok(total_issues)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Assign(args) => {
            let config = run_config(&args)?;
            info!("Starting household assignment (seed {})", config.seed);
            AssignProcessor::new(config)?.run()?;
        }
        Command::Schedules(args) => {
            let summary = ScheduleExporter::new(&args.input, &args.output, args.zero_fill).export_all()?;
            println!("\n✅ {} schedules written to {}", summary.written, args.output.display());
            if summary.zero_filled > 0 {
                println!("⚠️  {} profiles replaced with zeros", summary.zero_filled);
            }
        }
        Command::Merge(args) => {
            let summary = merge_into_cea(&args.schedules, &args.cea)?;
            println!(
                "\n✅ Merge complete: {} updated, {} not found",
                summary.updated, summary.missing
            );
        }
        Command::Verify(args) => {
            let issues = verify_outputs(&args.census, &args.output)?;
            if issues > 0 {
                bail!("{} verification issues", issues);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_census(dir: &Path) -> PathBuf {
        let feature = json!({
            "type": "Feature",
            "geometry": null,
            "properties": {
                "SEZ21": 1001,
                "total resident population": 100,
                "total households": 40,
                "HH_1 comp": 10, "HH_2 comp": 15, "HH_3 comp": 10,
                "HH_4 comp": 3, "HH_5 comp": 1, "HH_6 comp or more": 1,
                "Italian occupied_IT10": 50, "Foreign occupied_ST31": 10
            }
        });
        let path = dir.join("census.geojson");
        fs::write(&path, json!({"type": "FeatureCollection", "features": [feature]}).to_string()).unwrap();
        path
    }

    fn write_outputs(dir: &Path, residents_b: u32) {
        fs::write(
            dir.join(RESIDENTS_JSON),
            json!({"A": 60, "B": residents_b}).to_string(),
        )
        .unwrap();
        fs::write(
            dir.join(SUMMARY_JSON),
            json!({"A": {"families": {"Wasteful": 0, "Average": 24, "Saver": 0}}, "B": {"families": 16}})
                .to_string(),
        )
        .unwrap();
        fs::write(
            dir.join(ASSIGNMENT_CSV),
            "Census_Section,Building_ID,1_comp_work,1_comp_ret,2_comp_work,2_comp_ret,3_comp,4_comp_more\n\
             1001,A,0,0,0,0,20,4\n\
             1001,B,0,0,0,0,16,0\n",
        )
        .unwrap();
    }

    #[test]
    fn test_verify_accepts_consistent_outputs() {
        let dir = TempDir::new().unwrap();
        let census = write_census(dir.path());
        write_outputs(dir.path(), 40);
        assert_eq!(verify_outputs(&census, dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_verify_flags_population_mismatch() {
        let dir = TempDir::new().unwrap();
        let census = write_census(dir.path());
        write_outputs(dir.path(), 39);
        assert_eq!(verify_outputs(&census, dir.path()).unwrap(), 1);
    }

    #[test]
    fn test_cli_paths_override_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("run.json");
        fs::write(
            &config_path,
            json!({
                "census_path": "a.geojson",
                "buildings_path": "b.geojson",
                "output_dir": "out",
                "seed": 3
            })
            .to_string(),
        )
        .unwrap();

        let args = AssignArgs {
            config: Some(config_path),
            preset: Preset::Base,
            census: None,
            buildings: None,
            profiles: None,
            output: Some(PathBuf::from("elsewhere")),
            seed: Some(11),
        };
        let config = run_config(&args).unwrap();
        assert_eq!(config.census_path, PathBuf::from("a.geojson"));
        assert_eq!(config.output_dir, PathBuf::from("elsewhere"));
        assert_eq!(config.seed, 11);
    }

    #[test]
    fn test_preset_needs_paths() {
        let args = AssignArgs {
            config: None,
            preset: Preset::Extended,
            census: Some(PathBuf::from("c.geojson")),
            buildings: None,
            profiles: None,
            output: None,
            seed: None,
        };
        assert!(run_config(&args).is_err());
    }

    #[test]
    fn test_preset_conflicts_with_config_file() {
        let both = Cli::try_parse_from([
            "rec_households",
            "assign",
            "--config",
            "run.json",
            "--preset",
            "extended",
        ]);
        assert!(both.is_err());

        let config_only = Cli::try_parse_from(["rec_households", "assign", "--config", "run.json"]);
        assert!(config_only.is_ok());
    }
}
