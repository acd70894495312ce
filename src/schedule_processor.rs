use anyhow::{bail, Context, Result};
use glob::glob;
use household_allocator::AllocatorError;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Weekday, Saturday and Sunday, 24 hours each.
pub const SCHEDULE_HOURS: usize = 72;

const MONTHLY_MULTIPLIER: [f64; 12] = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.8, 1.0, 1.0, 1.0, 1.0];
const HEADER: [&str; 11] = [
    "OCCUPANCY",
    "APPLIANCES",
    "LIGHTING",
    "SERVERS",
    "WATER",
    "HEATING",
    "COOLING",
    "PROCESSES",
    "ELECTROMOBILITY",
    "DAY",
    "HOUR",
];
/// Columns a merge copies into an existing schedule.
const PROFILE_COLUMNS: [&str; 4] = ["OCCUPANCY", "APPLIANCES", "LIGHTING", "WATER"];

/// Profile kind -> schedule column.
const KIND_COLUMNS: [(&str, &str); 4] = [
    ("occupancy", "OCCUPANCY"),
    ("appliances", "APPLIANCES"),
    ("lighting", "LIGHTING"),
    ("DHW", "WATER"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct BuildingSchedule {
    pub building_id: String,
    pub occupancy: Vec<f64>,
    pub appliances: Vec<f64>,
    pub lighting: Vec<f64>,
    pub water: Vec<f64>,
}

impl BuildingSchedule {
    fn setpoint(hour: usize) -> &'static str {
        if hour <= 6 || hour >= 22 {
            "SETPOINT"
        } else {
            "SETBACK"
        }
    }

    fn day(slot: usize) -> &'static str {
        match slot / 24 {
            0 => "WEEKDAY",
            1 => "SATURDAY",
            _ => "SUNDAY",
        }
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::WriterBuilder::new().flexible(true).from_writer(writer);

        let mut metadata = vec!["METADATA", "CH-SIA-2014", "SINGLE_RES"];
        metadata.extend([""; 8]);
        csv_writer.write_record(&metadata)?;

        let mut multiplier = vec!["MONTHLY_MULTIPLIER".to_string()];
        multiplier.extend(MONTHLY_MULTIPLIER.iter().map(|m| m.to_string()));
        csv_writer.write_record(&multiplier)?;

        csv_writer.write_record(HEADER)?;
        for slot in 0..SCHEDULE_HOURS {
            let hour = slot % 24 + 1;
            let setpoint = Self::setpoint(hour);
            csv_writer.write_record([
                format!("{:.1}", self.occupancy[slot]),
                format!("{:.1}", self.appliances[slot]),
                format!("{:.1}", self.lighting[slot]),
                "0".to_string(),
                format!("{:.1}", self.water[slot]),
                setpoint.to_string(),
                setpoint.to_string(),
                "0".to_string(),
                "0".to_string(),
                Self::day(slot).to_string(),
                hour.to_string(),
            ])?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub written: usize,
    /// Profiles replaced by zeros because they were missing or misshapen.
    pub zero_filled: usize,
}

/// Turns per-building `<id>_<kind>.csv` profile files into CEA schedules.
pub struct ScheduleExporter {
    input_dir: PathBuf,
    output_dir: PathBuf,
    zero_fill: bool,
}

impl ScheduleExporter {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, zero_fill: bool) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            zero_fill,
        }
    }

    /// Ids of buildings with at least one profile file, sorted.
    pub fn building_ids(&self) -> Result<Vec<String>> {
        let mut ids = BTreeSet::new();
        for (kind, _) in KIND_COLUMNS {
            let suffix = format!("_{}.csv", kind);
            let pattern = self.input_dir.join(format!("*{}", suffix));
            for path in glob(&pattern.to_string_lossy())?.filter_map(Result::ok) {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                if let Some(id) = name.strip_suffix(&suffix) {
                    ids.insert(id.to_string());
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Values of the `Average` row, or `None` when the file or the row is missing.
    pub fn average_row(path: &Path) -> Result<Option<Vec<f64>>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        for record in reader.records() {
            let record = record?;
            if record.get(0) == Some("Average") {
                let cells: Vec<&str> = record.iter().skip(1).collect();
                let width = cells.iter().rposition(|cell| !cell.is_empty()).map_or(0, |i| i + 1);
                let values = cells[..width]
                    .iter()
                    .map(|cell| {
                        cell.parse::<f64>()
                            .with_context(|| format!("Non-numeric average \"{}\" in {}", cell, path.display()))
                    })
                    .collect::<Result<Vec<f64>>>()?;
                return Ok(Some(values));
            }
        }
        Ok(None)
    }

    fn profile(&self, building_id: &str, kind: &str, zero_filled: &mut usize) -> Result<Vec<f64>> {
        let path = self.input_dir.join(format!("{}_{}.csv", building_id, kind));
        let values = Self::average_row(&path)?.unwrap_or_default();
        if values.len() == SCHEDULE_HOURS {
            return Ok(values);
        }

        let mismatch = AllocatorError::ShapeMismatch {
            building_id: building_id.to_string(),
            kind: kind.to_string(),
            expected: SCHEDULE_HOURS,
            found: values.len(),
        };
        if !self.zero_fill {
            return Err(mismatch.into());
        }
        warn!("{}; using zeros", mismatch);
        *zero_filled += 1;
        Ok(vec![0.0; SCHEDULE_HOURS])
    }

    pub fn schedule_for(&self, building_id: &str, zero_filled: &mut usize) -> Result<BuildingSchedule> {
        Ok(BuildingSchedule {
            building_id: building_id.to_string(),
            occupancy: self.profile(building_id, "occupancy", zero_filled)?,
            appliances: self.profile(building_id, "appliances", zero_filled)?,
            lighting: self.profile(building_id, "lighting", zero_filled)?,
            water: self.profile(building_id, "DHW", zero_filled)?,
        })
    }

    pub fn schedule_path(&self, building_id: &str) -> PathBuf {
        self.output_dir.join(format!("B{}.csv", building_id))
    }

    pub fn export_all(&self) -> Result<ExportSummary> {
        let ids = self.building_ids()?;
        if ids.is_empty() {
            bail!("No building profile files found in {}", self.input_dir.display());
        }
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        println!("📅 Exporting CEA schedules for {} buildings", ids.len());

        let pb = ProgressBar::new(ids.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")?,
        );

        let mut summary = ExportSummary::default();
        for id in &ids {
            pb.set_message(id.clone());
            let schedule = self.schedule_for(id, &mut summary.zero_filled)?;
            let path = self.schedule_path(id);
            let file = fs::File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
            schedule.write_to(file)?;
            summary.written += 1;
            pb.inc(1);
        }
        pb.finish_with_message("Schedules written");

        info!(
            "Wrote {} schedules to {} ({} profiles zero-filled)",
            summary.written,
            self.output_dir.display(),
            summary.zero_filled
        );
        Ok(summary)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub updated: usize,
    pub missing: usize,
}

/// Copy the profile columns of every exported schedule into the schedule of
/// the same name in `cea_dir`, keeping that file's first two lines and its
/// other columns. Targets that do not exist are skipped.
pub fn merge_into_cea(schedules_dir: &Path, cea_dir: &Path) -> Result<MergeSummary> {
    if !cea_dir.is_dir() {
        bail!("CEA schedules directory {} does not exist", cea_dir.display());
    }
    let pattern = schedules_dir.join("B*.csv");
    let mut summary = MergeSummary::default();
    for source in glob(&pattern.to_string_lossy())?.filter_map(Result::ok) {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = cea_dir.join(name);
        if !target.exists() {
            println!("  ⚠️  {} not found, skipped", target.display());
            summary.missing += 1;
            continue;
        }
        merge_schedule(&source, &target)?;
        println!("  🔄 Updated {}", target.display());
        summary.updated += 1;
    }
    Ok(summary)
}

/// Header line and rows of a schedule after its two preamble lines.
fn read_schedule_body(text: &str, path: &Path) -> Result<(csv::StringRecord, Vec<csv::StringRecord>)> {
    let body: String = text.lines().skip(2).map(|line| format!("{}\n", line)).collect();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());
    let header = reader
        .headers()
        .with_context(|| format!("Missing schedule header in {}", path.display()))?
        .clone();
    let rows = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Malformed schedule {}", path.display()))?;
    Ok((header, rows))
}

fn merge_schedule(source: &Path, target: &Path) -> Result<()> {
    let source_text = fs::read_to_string(source).with_context(|| format!("Failed to read {}", source.display()))?;
    let target_text = fs::read_to_string(target).with_context(|| format!("Failed to read {}", target.display()))?;
    let (source_header, source_rows) = read_schedule_body(&source_text, source)?;
    let (target_header, mut target_rows) = read_schedule_body(&target_text, target)?;

    if source_rows.len() != target_rows.len() {
        warn!(
            "{}: {} rows, {} has {}; rows beyond the shorter file are left untouched",
            target.display(),
            target_rows.len(),
            source.display(),
            source_rows.len()
        );
    }

    let columns: Vec<(usize, usize)> = PROFILE_COLUMNS
        .iter()
        .filter_map(|column| {
            let from = source_header.iter().position(|h| h == *column)?;
            let to = target_header.iter().position(|h| h == *column)?;
            Some((from, to))
        })
        .collect();

    for (target_row, source_row) in target_rows.iter_mut().zip(&source_rows) {
        let mut cells: Vec<String> = target_row.iter().map(str::to_string).collect();
        for &(from, to) in &columns {
            if let (Some(value), Some(cell)) = (source_row.get(from), cells.get_mut(to)) {
                *cell = value.to_string();
            }
        }
        *target_row = csv::StringRecord::from(cells);
    }

    let mut out: Vec<u8> = Vec::new();
    for line in target_text.lines().take(2) {
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }
    {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(&mut out);
        writer.write_record(&target_header)?;
        for row in &target_rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
    }
    fs::write(target, out).with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(())
}
