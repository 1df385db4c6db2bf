//! Training table assembly.
//!
//! Source records carry one row per (project, segment) with the project's
//! historical cost per category. Assembly restates every cost to present
//! value, computes each segment's share of its project's physical
//! quantities and spreads project costs over segments by length share.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};
use vialcost_core::{canonical_name, Attribute, FeatureSource, IncrementTable, PhaseCatalog, SegmentAttributes};

/// One persisted (project, segment) record with its project's costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub project_code: String,
    pub start_year: i32,
    #[serde(default)]
    pub segment: Option<String>,
    pub scope_type: String,
    #[serde(flatten)]
    pub attributes: SegmentAttributes,
    /// Category label → historical cost in start-year money
    #[serde(default)]
    pub costs: BTreeMap<String, f64>,
}

/// Load source rows from a JSON array.
pub fn load_source_rows<P: AsRef<Path>>(path: P) -> Result<Vec<SourceRow>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file {}", path.display()))?;
    let rows: Vec<SourceRow> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records file {}", path.display()))?;
    if rows.is_empty() {
        anyhow::bail!("Records file {} is empty", path.display());
    }
    Ok(rows)
}

/// Load yearly increments from a `year,rate` CSV file.
///
/// Blank lines, `#` comments and a leading header are skipped. Rates may be
/// fractions or percentages; normalization happens in [`IncrementTable`].
pub fn load_increments<P: AsRef<Path>>(path: P) -> Result<IncrementTable> {
    let content = std::fs::read_to_string(path.as_ref()).context("Failed to read increments file")?;
    let mut rates = Vec::new();

    for (line_idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if parts.len() != 2 {
            anyhow::bail!("Line {}: expected 2 columns, got {}", line_idx + 1, parts.len());
        }
        if rates.is_empty() && parts[0].parse::<i32>().is_err() {
            continue;
        }
        let year = parts[0]
            .parse::<i32>()
            .with_context(|| format!("Line {}: invalid year", line_idx + 1))?;
        let rate = parts[1]
            .parse::<f64>()
            .with_context(|| format!("Line {}: invalid rate", line_idx + 1))?;
        if !rate.is_finite() {
            anyhow::bail!("Line {}: rate must be finite", line_idx + 1);
        }
        rates.push((year, rate));
    }

    Ok(IncrementTable::from_rates(rates))
}

/// One segment of the training table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub project_code: String,
    pub segment: Option<String>,
    pub scope_type: String,
    pub attributes: SegmentAttributes,
    /// Segment share of its project's total per attribute, 0 when the total is 0
    pub weights: SegmentAttributes,
    /// Catalog category name → present-valued, length-weighted cost
    pub costs: BTreeMap<String, f64>,
}

impl TrainingRow {
    /// Cost of `category`; categories without a record count as zero.
    pub fn cost(&self, category: &str) -> f64 {
        self.costs.get(category).copied().unwrap_or(0.0)
    }

    /// Value of a predictor for this row.
    pub fn feature(&self, source: &FeatureSource) -> f64 {
        match source {
            FeatureSource::Attribute(attribute) => self.attributes.get(*attribute),
            FeatureSource::Category(name) => self.cost(name),
        }
    }

    pub fn features(&self, sources: &[FeatureSource]) -> Vec<f64> {
        sources.iter().map(|s| self.feature(s)).collect()
    }
}

/// Per-project sums of segment rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectAggregate {
    pub project_code: String,
    /// Scope type of the first segment seen
    pub scope_type: String,
    pub attributes: SegmentAttributes,
    pub costs: BTreeMap<String, f64>,
}

impl ProjectAggregate {
    pub fn cost(&self, category: &str) -> f64 {
        self.costs.get(category).copied().unwrap_or(0.0)
    }

    pub fn feature(&self, source: &FeatureSource) -> f64 {
        match source {
            FeatureSource::Attribute(attribute) => self.attributes.get(*attribute),
            FeatureSource::Category(name) => self.cost(name),
        }
    }

    pub fn features(&self, sources: &[FeatureSource]) -> Vec<f64> {
        sources.iter().map(|s| self.feature(s)).collect()
    }
}

/// Segment-granularity training rows for one phase.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainingTable {
    pub rows: Vec<TrainingRow>,
}

impl TrainingTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows grouped by canonical scope type, keyed by the first spelling seen.
    pub fn by_scope(&self) -> Vec<(String, Vec<&TrainingRow>)> {
        let mut groups: Vec<(String, String, Vec<&TrainingRow>)> = Vec::new();
        for row in &self.rows {
            let key = canonical_name(&row.scope_type);
            match groups.iter_mut().find(|(k, _, _)| *k == key) {
                Some((_, _, rows)) => rows.push(row),
                None => groups.push((key, row.scope_type.clone(), vec![row])),
            }
        }
        groups.into_iter().map(|(_, label, rows)| (label, rows)).collect()
    }

    /// Segment rows summed per project code, in first-seen order.
    pub fn by_project(&self) -> Vec<ProjectAggregate> {
        let mut projects: Vec<ProjectAggregate> = Vec::new();
        for row in &self.rows {
            let index = match projects.iter().position(|p| p.project_code == row.project_code) {
                Some(index) => index,
                None => {
                    projects.push(ProjectAggregate {
                        project_code: row.project_code.clone(),
                        scope_type: row.scope_type.clone(),
                        attributes: SegmentAttributes::default(),
                        costs: BTreeMap::new(),
                    });
                    projects.len() - 1
                }
            };
            let project = &mut projects[index];
            project.attributes.accumulate(&row.attributes);
            for (category, cost) in &row.costs {
                *project.costs.entry(category.clone()).or_insert(0.0) += cost;
            }
        }
        projects
    }
}

/// Builds a [`TrainingTable`] from source rows.
#[derive(Debug, Clone)]
pub struct DatasetAssembler {
    catalog: PhaseCatalog,
    increments: IncrementTable,
    present_year: i32,
}

impl DatasetAssembler {
    pub fn new(catalog: PhaseCatalog, increments: IncrementTable, present_year: i32) -> Self {
        Self {
            catalog,
            increments,
            present_year,
        }
    }

    pub fn assemble(&self, source: &[SourceRow]) -> Result<TrainingTable> {
        let mut totals: BTreeMap<&str, SegmentAttributes> = BTreeMap::new();
        for (idx, row) in source.iter().enumerate() {
            row.attributes
                .validate()
                .with_context(|| format!("Row {} (project {})", idx + 1, row.project_code))?;
            if row.scope_type.trim().is_empty() {
                anyhow::bail!("Row {} (project {}): missing scope type", idx + 1, row.project_code);
            }
            totals
                .entry(row.project_code.as_str())
                .or_default()
                .accumulate(&row.attributes);
        }

        let mut unknown: BTreeSet<String> = BTreeSet::new();
        let mut rows = Vec::with_capacity(source.len());
        for row in source {
            let total = totals.get(row.project_code.as_str()).copied().unwrap_or_default();
            let weights = share_of(&row.attributes, &total);
            let length_weight = weights.get(Attribute::LengthKm);

            let mut costs = BTreeMap::new();
            for (label, value) in &row.costs {
                let Some(spec) = self.catalog.get(label) else {
                    unknown.insert(label.clone());
                    continue;
                };
                if !value.is_finite() {
                    anyhow::bail!(
                        "Project {}: cost of {} is not a finite number",
                        row.project_code,
                        label
                    );
                }
                let present = self
                    .increments
                    .present_value(*value, row.start_year, self.present_year);
                *costs.entry(spec.name.clone()).or_insert(0.0) += present * length_weight;
            }

            rows.push(TrainingRow {
                project_code: row.project_code.clone(),
                segment: row.segment.clone(),
                scope_type: row.scope_type.trim().to_string(),
                attributes: row.attributes,
                weights,
                costs,
            });
        }

        for label in &unknown {
            warn!(phase = %self.catalog.phase, category = %label, "cost column is not part of the phase catalog; ignored");
        }
        info!(
            phase = %self.catalog.phase,
            rows = rows.len(),
            projects = totals.len(),
            present_year = self.present_year,
            "training table assembled"
        );
        debug!(increments = self.increments.len(), "increment table in use");
        Ok(TrainingTable { rows })
    }
}

fn share_of(segment: &SegmentAttributes, total: &SegmentAttributes) -> SegmentAttributes {
    let mut weights = SegmentAttributes::default();
    for attribute in Attribute::ALL {
        let sum = total.get(attribute);
        if sum > 0.0 {
            weights.set(attribute, segment.get(attribute) / sum);
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use vialcost_core::Phase;

    fn row(project: &str, year: i32, length_km: f64, cost: f64) -> SourceRow {
        let mut costs = BTreeMap::new();
        costs.insert("1 - Transporte".to_string(), cost);
        SourceRow {
            project_code: project.to_string(),
            start_year: year,
            segment: None,
            scope_type: "Nuevo".to_string(),
            attributes: SegmentAttributes {
                length_km,
                ..SegmentAttributes::default()
            },
            costs,
        }
    }

    #[test]
    fn test_project_cost_is_split_by_length_share() -> Result<()> {
        let increments = IncrementTable::from_rates([(2024, 10.0), (2025, 10.0)]);
        let assembler = DatasetAssembler::new(Phase::III.catalog(), increments, 2025);
        let table = assembler.assemble(&[row("P1", 2023, 1.0, 1000.0), row("P1", 2023, 3.0, 1000.0)])?;

        assert_eq!(table.len(), 2);
        let restated = 1000.0 * 1.1 * 1.1;
        assert!((table.rows[0].cost("1 - TRANSPORTE") - restated * 0.25).abs() < 1e-9);
        assert!((table.rows[1].cost("1 - TRANSPORTE") - restated * 0.75).abs() < 1e-9);
        assert_eq!(table.rows[0].weights.vehicular_bridge_count, 0.0);
        Ok(())
    }

    #[test]
    fn test_historical_labels_map_to_catalog_names() -> Result<()> {
        let mut source = row("P1", 2025, 2.0, 100.0);
        source.costs.insert("2 - TRAZADO Y TOPOGRAFIA (incluye subcomponentes)".to_string(), 40.0);
        source.costs.insert("3 - GEOLOGÍA (incluye subcomponentes)".to_string(), 30.0);
        source.costs.insert("12 - SOCIOECONÓMICA".to_string(), 10.0);

        let assembler = DatasetAssembler::new(Phase::II.catalog(), IncrementTable::default(), 2025);
        let table = assembler.assemble(&[source])?;
        let costs = &table.rows[0].costs;
        assert_eq!(costs.len(), 4);
        assert_eq!(costs.get("2 - TOPOGRAFÍA"), Some(&40.0));
        assert_eq!(costs.get("3 - GEOLOGÍA"), Some(&30.0));
        assert_eq!(costs.get("12 - SOCIOECONÓMICA"), Some(&10.0));
        Ok(())
    }

    #[test]
    fn test_projects_aggregate_segments() -> Result<()> {
        let assembler = DatasetAssembler::new(Phase::III.catalog(), IncrementTable::default(), 2025);
        let table = assembler.assemble(&[
            row("P1", 2025, 1.0, 100.0),
            row("P2", 2025, 2.0, 50.0),
            row("P1", 2025, 1.0, 100.0),
        ])?;
        let projects = table.by_project();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].project_code, "P1");
        assert!((projects[0].attributes.length_km - 2.0).abs() < 1e-12);
        assert!((projects[0].cost("1 - TRANSPORTE") - 100.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_negative_quantities_are_rejected() {
        let assembler = DatasetAssembler::new(Phase::I.catalog(), IncrementTable::default(), 2025);
        assert!(assembler.assemble(&[row("P1", 2020, -1.0, 10.0)]).is_err());
    }

    #[test]
    fn test_load_increments_csv() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "year,rate")?;
        writeln!(file, "# historical series")?;
        writeln!(file, "2023,5.0")?;
        writeln!(file, "2024,4.0")?;
        file.flush()?;

        let table = load_increments(file.path())?;
        assert_eq!(table.len(), 2);
        assert!((table.rate(2023) - 0.05).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_load_increments_reports_bad_lines() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "2023,5.0")?;
        writeln!(file, "2024,abc")?;
        file.flush()?;

        let err = load_increments(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Line 2"));
        Ok(())
    }
}
