//! Integration tests for the phase training pipeline
//!
//! Records and increments are written to temporary files, trained into a
//! phase artifact, stored and applied through the inference orchestrator.

use anyhow::Result;
use std::collections::BTreeMap;
use std::io::Write;
use tempfile::NamedTempFile;
use vialcost_core::{
    CategoryArtifact, CostConfig, IncrementTable, Phase, PredictionStatus, SegmentAttributes, SegmentInput,
};
use vialcost_store::{MemoryArtifactStore, ModelArtifactStore};
use vialcost_trainer::{load_increments, load_source_rows, train_and_store, train_phase, SourceRow};

const PHASE_III_LENGTH_CATEGORIES: [(&str, f64); 11] = [
    ("1 - TRANSPORTE", 12_000.0),
    ("2.1 - INFORMACIÓN GEOGRÁFICA", 3_000.0),
    ("2.2 - TRAZADO Y DISEÑO GEOMÉTRICO", 20_000.0),
    ("2.3 - SEGURIDAD VIAL", 2_500.0),
    ("2.4 - SISTEMAS INTELIGENTES", 1_800.0),
    ("3.2 - HIDROGEOLOGÍA", 4_000.0),
    ("5 - TALUDES", 9_000.0),
    ("6 - PAVIMENTO", 15_000.0),
    ("7 - SOCAVACIÓN", 6_000.0),
    ("11 - PREDIAL", 7_500.0),
    ("12 - IMPACTO AMBIENTAL", 5_000.0),
];

/// Segment lengths and quantities of one synthetic project.
struct Project {
    code: &'static str,
    lengths: [f64; 2],
    vehicular_bridges: f64,
    bridge_area: f64,
    pedestrian_bridges: f64,
    tunnels: f64,
    tunnel_km: f64,
    /// Per-project cost variation
    factor: f64,
}

fn projects() -> Vec<Project> {
    vec![
        Project { code: "0101", lengths: [2.0, 3.0], vehicular_bridges: 2.0, bridge_area: 300.0, pedestrian_bridges: 1.0, tunnels: 1.0, tunnel_km: 0.8, factor: 1.00 },
        Project { code: "0102", lengths: [4.0, 4.0], vehicular_bridges: 3.0, bridge_area: 520.0, pedestrian_bridges: 2.0, tunnels: 2.0, tunnel_km: 1.6, factor: 0.95 },
        Project { code: "0103", lengths: [1.5, 2.5], vehicular_bridges: 1.0, bridge_area: 150.0, pedestrian_bridges: 1.0, tunnels: 1.0, tunnel_km: 0.5, factor: 1.08 },
        Project { code: "0104", lengths: [6.0, 5.0], vehicular_bridges: 5.0, bridge_area: 900.0, pedestrian_bridges: 3.0, tunnels: 3.0, tunnel_km: 2.9, factor: 0.97 },
        Project { code: "0105", lengths: [3.0, 2.0], vehicular_bridges: 2.0, bridge_area: 410.0, pedestrian_bridges: 2.0, tunnels: 1.0, tunnel_km: 1.1, factor: 1.04 },
    ]
}

/// Phase III records for projects with the given scope type.
fn create_records(scope: &str) -> Vec<SourceRow> {
    let mut rows = Vec::new();
    for (p_idx, project) in projects().iter().enumerate() {
        let total_km: f64 = project.lengths.iter().sum();
        let mut costs = BTreeMap::new();
        for (c_idx, (category, per_km)) in PHASE_III_LENGTH_CATEGORIES.iter().enumerate() {
            let wobble = 1.0 + 0.01 * (((p_idx * 7 + c_idx * 3) % 5) as f64 - 2.0);
            costs.insert(category.to_string(), per_km * total_km * project.factor * wobble);
        }
        let alignment = costs["2.2 - TRAZADO Y DISEÑO GEOMÉTRICO"];
        let slopes = costs["5 - TALUDES"];
        let scour = costs["7 - SOCAVACIÓN"];
        costs.insert("3.1 - GEOLOGÍA".to_string(), 0.2 * alignment + 0.3 * slopes + 0.1 * scour);
        costs.insert("16 - DIRECCIÓN Y COORDINACIÓN".to_string(), 0.12 * (alignment + slopes + scour));
        costs.insert("4 - SUELOS".to_string(), 90.0 * project.bridge_area * project.factor);
        costs.insert("8 - ESTRUCTURAS".to_string(), 25_000.0 * project.vehicular_bridges + 4_000.0);
        costs.insert("9 - TÚNELES".to_string(), 40_000.0 * project.tunnel_km + 5_000.0 * project.tunnels);
        costs.insert("10 - URBANISMO Y PAISAJISMO".to_string(), 8_000.0 * project.pedestrian_bridges + 1_000.0);
        costs.insert(
            "13 - CANTIDADES".to_string(),
            3_000.0 * project.vehicular_bridges + 12.0 * project.bridge_area + 1_500.0 * project.pedestrian_bridges,
        );
        costs.insert("99 - SIN CLASIFICAR".to_string(), 1.0);

        for (s_idx, length_km) in project.lengths.iter().enumerate() {
            let share = length_km / total_km;
            rows.push(SourceRow {
                project_code: project.code.to_string(),
                start_year: 2022,
                segment: Some(format!("UF{}", s_idx + 1)),
                scope_type: scope.to_string(),
                attributes: SegmentAttributes {
                    length_km: *length_km,
                    vehicular_bridge_count: project.vehicular_bridges * share,
                    vehicular_bridge_area_m2: project.bridge_area * share,
                    pedestrian_bridge_count: project.pedestrian_bridges * share,
                    pedestrian_bridge_area_m2: 0.0,
                    tunnel_count: project.tunnels * share,
                    tunnel_km: project.tunnel_km * share,
                },
                costs: costs.clone(),
            });
        }
    }
    rows
}

fn increments() -> IncrementTable {
    IncrementTable::from_rates([(2023, 9.3), (2024, 5.2), (2025, 4.1)])
}

fn segment(scope: &str, length_km: f64, tunnel_km: f64) -> SegmentInput {
    SegmentInput {
        name: Some("UF-new".to_string()),
        scope_type: scope.to_string(),
        attributes: SegmentAttributes {
            length_km,
            vehicular_bridge_count: 2.0,
            vehicular_bridge_area_m2: 350.0,
            pedestrian_bridge_count: 1.0,
            pedestrian_bridge_area_m2: 0.0,
            tunnel_count: if tunnel_km > 0.0 { 1.0 } else { 0.0 },
            tunnel_km,
        },
    }
}

#[test]
fn test_phase_three_end_to_end() -> Result<()> {
    let config = CostConfig::default();
    let store = ModelArtifactStore::new(MemoryArtifactStore::new());
    let (artifact, locator) = train_and_store(&store, Phase::III, &create_records("Nuevo"), increments(), &config)?;

    assert_eq!(locator, "memory://fase_III_models.json");
    assert_eq!(artifact.metadata.sample_count, 10);
    for (category, _) in PHASE_III_LENGTH_CATEGORIES {
        match artifact.model(category) {
            Some(CategoryArtifact::Segmented(bundle)) => assert!(bundle.get("NUEVO").is_some(), "{}", category),
            other => panic!("{} should be scope segmented, got {:?}", category, other.map(|_| "single")),
        }
    }
    for category in ["16 - DIRECCIÓN Y COORDINACIÓN", "9 - TÚNELES", "8 - ESTRUCTURAS", "13 - CANTIDADES"] {
        assert!(
            matches!(artifact.model(category), Some(CategoryArtifact::Single(_))),
            "{} missing",
            category
        );
    }
    assert!(artifact.model("14 - EVALUACIÓN SOCIOECONÓMICA").is_none());
    assert!(artifact.model("2 - TRAZADO Y DISEÑO GEOMÉTRICO").is_none());
    assert!(artifact.summary.len() >= PHASE_III_LENGTH_CATEGORIES.len());

    let orchestrator = store.orchestrator("Fase III - Diseño Detallado")?;
    let prediction = orchestrator.predict(&segment("Nuevo", 3.0, 0.0))?;

    let transport = prediction.value("1 - TRANSPORTE").expect("transport");
    assert!(transport > 0.0);
    assert_eq!(
        prediction.get("9 - TÚNELES").map(|c| c.status.clone()),
        Some(PredictionStatus::NotApplicable)
    );
    assert_eq!(
        prediction.get("14 - EVALUACIÓN SOCIOECONÓMICA").map(|c| c.status.clone()),
        Some(PredictionStatus::NotModeled)
    );
    let geometry = prediction.get("2 - TRAZADO Y DISEÑO GEOMÉTRICO").expect("rollup");
    let children: f64 = ["2.1", "2.2", "2.3", "2.4"]
        .iter()
        .filter_map(|code| {
            prediction
                .categories
                .iter()
                .find(|c| c.category.starts_with(&format!("{} -", code)))
                .and_then(|c| c.value)
        })
        .sum();
    assert!((geometry.value.expect("rollup value") - children).abs() < 1e-6);
    assert!(prediction.value("16 - DIRECCIÓN Y COORDINACIÓN").is_some());

    let with_tunnel = orchestrator.predict(&segment("Nuevo", 3.0, 1.2))?;
    assert!(with_tunnel.value("9 - TÚNELES").expect("tunnel value") > 0.0);
    Ok(())
}

#[test]
fn test_unseen_scope_type_yields_no_prediction() -> Result<()> {
    let artifact = train_phase(Phase::III, &create_records("Nuevo"), increments(), &CostConfig::default())?;
    let orchestrator = vialcost_core::InferenceOrchestrator::new(artifact);

    let prediction = orchestrator.predict(&segment("Rehabilitación", 3.0, 0.0))?;
    assert_eq!(prediction.value("1 - TRANSPORTE"), None);
    assert_eq!(
        prediction.get("1 - TRANSPORTE").map(|c| c.status.clone()),
        Some(PredictionStatus::NoModelForScope)
    );
    assert!(matches!(
        prediction.get("16 - DIRECCIÓN Y COORDINACIÓN").map(|c| &c.status),
        Some(PredictionStatus::MissingUpstream { .. })
    ));
    Ok(())
}

#[test]
fn test_chained_category_skipped_without_upstream() -> Result<()> {
    let mut records = create_records("Nuevo");
    for row in &mut records {
        row.costs.remove("5 - TALUDES");
    }
    let artifact = train_phase(Phase::III, &records, increments(), &CostConfig::default())?;
    assert!(!artifact.contains("5 - TALUDES"));
    assert!(!artifact.contains("16 - DIRECCIÓN Y COORDINACIÓN"));
    assert!(!artifact.contains("3.1 - GEOLOGÍA"));
    assert!(artifact.contains("1 - TRANSPORTE"));
    Ok(())
}

#[test]
fn test_training_is_deterministic() -> Result<()> {
    let records: Vec<SourceRow> = create_records("Nuevo")
        .into_iter()
        .map(|mut row| {
            row.costs.retain(|k, _| k.starts_with("1 -") || k.starts_with("9 -"));
            row
        })
        .collect();
    let config = CostConfig::default();
    let first = train_phase(Phase::III, &records, increments(), &config)?;
    let second = train_phase(Phase::III, &records, increments(), &config)?;

    assert_eq!(first.models, second.models, "models should be identical");
    assert_eq!(first.summary, second.summary, "summaries should be identical");
    Ok(())
}

#[test]
fn test_training_from_files() -> Result<()> {
    let mut records = NamedTempFile::new()?;
    serde_json::to_writer(&mut records, &create_records("Nuevo"))?;
    records.flush()?;

    let mut rates = NamedTempFile::new()?;
    writeln!(rates, "year,rate")?;
    writeln!(rates, "2023,0.093")?;
    writeln!(rates, "2024,0.052")?;
    rates.flush()?;

    let rows = load_source_rows(records.path())?;
    assert_eq!(rows.len(), 10);
    let increments = load_increments(rates.path())?;
    assert!((increments.rate(2024) - 0.052).abs() < 1e-12);

    let artifact = train_phase(Phase::I, &rows, increments, &CostConfig::default())?;
    // phase I names differ from the phase III records except transport
    assert!(artifact.contains("1 - TRANSPORTE"));
    assert_eq!(artifact.models.len(), 1);
    Ok(())
}

/// Phase II records labelled the way the historical cost sheets name them.
fn phase_two_records() -> Vec<SourceRow> {
    let labels = [
        ("1 - TRANSPORTE", 9_000.0),
        ("2 - TRAZADO Y TOPOGRAFIA (incluye subcomponentes)", 14_000.0),
        ("3 - GEOLOGÍA (incluye subcomponentes)", 6_500.0),
        ("8 - PAVIMENTO", 11_000.0),
    ];
    [2.0, 3.5, 5.0, 6.5, 8.0, 10.0]
        .iter()
        .enumerate()
        .map(|(idx, length_km)| {
            let wobble = 1.0 + 0.02 * ((idx % 3) as f64 - 1.0);
            SourceRow {
                project_code: format!("02{:02}", idx + 1),
                start_year: 2024,
                segment: None,
                scope_type: "Nuevo".to_string(),
                attributes: SegmentAttributes {
                    length_km: *length_km,
                    ..SegmentAttributes::default()
                },
                costs: labels
                    .iter()
                    .map(|(label, per_km)| (label.to_string(), per_km * length_km * wobble))
                    .collect(),
            }
        })
        .collect()
}

#[test]
fn test_phase_two_trains_on_historical_labels() -> Result<()> {
    let artifact = train_phase(Phase::II, &phase_two_records(), increments(), &CostConfig::default())?;

    for category in ["1 - TRANSPORTE", "2 - TOPOGRAFÍA", "3 - GEOLOGÍA", "8 - PAVIMENTO"] {
        assert!(artifact.contains(category), "{} was not trained", category);
    }
    assert_eq!(artifact.models.len(), 4);

    let orchestrator = vialcost_core::InferenceOrchestrator::new(artifact);
    let prediction = orchestrator.predict(&segment("Nuevo", 4.0, 0.0))?;
    assert!(prediction.value("2 - TOPOGRAFÍA").expect("topography value") > 0.0);
    Ok(())
}

#[test]
fn test_empty_records_are_a_dataset_error() {
    let err = train_phase(Phase::II, &[], increments(), &CostConfig::default()).unwrap_err();
    assert!(matches!(err, vialcost_trainer::TrainerError::Dataset(_)));
}
