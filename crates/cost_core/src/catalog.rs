//! Phases, cost categories and the strategy each category is trained with.
//!
//! Every phase has a fixed catalog. Modeled categories declare their
//! predictors explicitly; predictors that name another category make that
//! category an upstream dependency, and the resolution order used for both
//! training and inference is derived from those declarations.

use crate::errors::{CostError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Project lifecycle stage with its own catalog and artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Pre-feasibility
    I,
    /// Feasibility
    II,
    /// Detailed design
    III,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::I, Phase::II, Phase::III];

    pub fn code(self) -> &'static str {
        match self {
            Phase::I => "I",
            Phase::II => "II",
            Phase::III => "III",
        }
    }

    /// Map a phase code (`"II"`, `"fase_ii"`) or a phase name
    /// (`"Fase III - Diseño Detallado"`) to a phase.
    pub fn from_identifier(identifier: &str) -> Result<Phase> {
        let canonical = canonical_name(identifier);
        let code = canonical.strip_prefix("FASE ").unwrap_or(&canonical).trim();
        match code {
            "I" => return Ok(Phase::I),
            "II" => return Ok(Phase::II),
            "III" => return Ok(Phase::III),
            _ => {}
        }
        // PREFACTIBILIDAD contains FACTIBILIDAD, so order matters
        if canonical.contains("PREFACTIBILIDAD") {
            Ok(Phase::I)
        } else if canonical.contains("FACTIBILIDAD") {
            Ok(Phase::II)
        } else if canonical.contains("DISENO DETALLADO") {
            Ok(Phase::III)
        } else {
            Err(CostError::UnsupportedScopeOrPhase(format!(
                "unknown phase identifier '{}'",
                identifier
            )))
        }
    }

    /// Storage key of the phase artifact.
    pub fn storage_key(self) -> String {
        format!("fase_{}_models.json", self.code())
    }

    pub fn catalog(self) -> PhaseCatalog {
        match self {
            Phase::I => phase_one(),
            Phase::II => phase_two(),
            Phase::III => phase_three(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Uppercase, strip Spanish diacritics and collapse separators so that
/// differently typed labels of one category compare equal.
pub fn canonical_name(name: &str) -> String {
    let folded: String = name
        .chars()
        .flat_map(|c| c.to_uppercase())
        .map(|c| match c {
            'Á' | 'À' | 'Ä' => 'A',
            'É' | 'È' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ö' => 'O',
            'Ú' | 'Ù' | 'Ü' => 'U',
            'Ñ' => 'N',
            '-' | '_' => ' ',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sort key from the leading item number: `"2.3 - X"` → `[2, 3]`.
/// Names without a number sort last.
pub fn item_order(name: &str) -> Vec<u32> {
    let head = name.trim_start().split(|c: char| c.is_whitespace() || c == '-').next().unwrap_or("");
    let parts: Option<Vec<u32>> = head
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u32>().ok())
        .collect();
    match parts {
        Some(parts) if !parts.is_empty() => parts,
        _ => vec![9999],
    }
}

/// Physical quantities recorded for each segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    LengthKm,
    VehicularBridgeCount,
    VehicularBridgeAreaM2,
    PedestrianBridgeCount,
    PedestrianBridgeAreaM2,
    TunnelCount,
    TunnelKm,
}

impl Attribute {
    pub const ALL: [Attribute; 7] = [
        Attribute::LengthKm,
        Attribute::VehicularBridgeCount,
        Attribute::VehicularBridgeAreaM2,
        Attribute::PedestrianBridgeCount,
        Attribute::PedestrianBridgeAreaM2,
        Attribute::TunnelCount,
        Attribute::TunnelKm,
    ];

    /// Column label used in reports and source tables.
    pub fn column_name(self) -> &'static str {
        match self {
            Attribute::LengthKm => "LONGITUD KM",
            Attribute::VehicularBridgeCount => "PUENTES VEHICULARES UND",
            Attribute::VehicularBridgeAreaM2 => "PUENTES VEHICULARES M2",
            Attribute::PedestrianBridgeCount => "PUENTES PEATONALES UND",
            Attribute::PedestrianBridgeAreaM2 => "PUENTES PEATONALES M2",
            Attribute::TunnelCount => "TUNELES UND",
            Attribute::TunnelKm => "TUNELES KM",
        }
    }
}

/// Physical attributes of one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentAttributes {
    pub length_km: f64,
    pub vehicular_bridge_count: f64,
    pub vehicular_bridge_area_m2: f64,
    pub pedestrian_bridge_count: f64,
    pub pedestrian_bridge_area_m2: f64,
    pub tunnel_count: f64,
    pub tunnel_km: f64,
}

impl SegmentAttributes {
    pub fn get(&self, attribute: Attribute) -> f64 {
        match attribute {
            Attribute::LengthKm => self.length_km,
            Attribute::VehicularBridgeCount => self.vehicular_bridge_count,
            Attribute::VehicularBridgeAreaM2 => self.vehicular_bridge_area_m2,
            Attribute::PedestrianBridgeCount => self.pedestrian_bridge_count,
            Attribute::PedestrianBridgeAreaM2 => self.pedestrian_bridge_area_m2,
            Attribute::TunnelCount => self.tunnel_count,
            Attribute::TunnelKm => self.tunnel_km,
        }
    }

    pub fn set(&mut self, attribute: Attribute, value: f64) {
        let slot = match attribute {
            Attribute::LengthKm => &mut self.length_km,
            Attribute::VehicularBridgeCount => &mut self.vehicular_bridge_count,
            Attribute::VehicularBridgeAreaM2 => &mut self.vehicular_bridge_area_m2,
            Attribute::PedestrianBridgeCount => &mut self.pedestrian_bridge_count,
            Attribute::PedestrianBridgeAreaM2 => &mut self.pedestrian_bridge_area_m2,
            Attribute::TunnelCount => &mut self.tunnel_count,
            Attribute::TunnelKm => &mut self.tunnel_km,
        };
        *slot = value;
    }

    /// Component-wise sum, used when collapsing segments into a project.
    pub fn accumulate(&mut self, other: &SegmentAttributes) {
        for attribute in Attribute::ALL {
            self.set(attribute, self.get(attribute) + other.get(attribute));
        }
    }

    pub fn validate(&self) -> Result<()> {
        for attribute in Attribute::ALL {
            let value = self.get(attribute);
            if !value.is_finite() || value < 0.0 {
                return Err(CostError::InvalidInput(format!(
                    "{} must be a non-negative number, got {}",
                    attribute.column_name(),
                    value
                )));
            }
        }
        Ok(())
    }
}

/// Where a predictor value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    /// A raw physical attribute of the segment
    Attribute(Attribute),
    /// Another category's cost: historical at training time, predicted at inference
    Category(String),
}

impl FeatureSource {
    pub fn label(&self) -> &str {
        match self {
            FeatureSource::Attribute(a) => a.column_name(),
            FeatureSource::Category(name) => name,
        }
    }
}

/// Estimator used by chained categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainedEstimator {
    /// RBF SVR on raw and `log1p` predictors, log target, repeated K-fold grid search
    Svr,
    /// Scaled least squares, log target, leave-one-out evaluation
    Linear,
}

/// How a modeled category is trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CategoryStrategy {
    /// One candidate search per scope type, under every log transform
    ScopeSegmented { predictors: Vec<FeatureSource> },
    /// Rows summed per project before a least-squares fit
    GroupedByProject {
        predictors: Vec<FeatureSource>,
        log_target: bool,
        scaled: bool,
        require_positive: Option<Attribute>,
        excluded_projects: Vec<String>,
    },
    /// Sparse category fitted on real rows plus interpolated synthetic rows
    SyntheticAugmented {
        predictors: [Attribute; 2],
        /// Only predicted for segments where this attribute is positive
        gate: Attribute,
    },
    /// Predictors are other categories' costs
    Chained {
        predictors: Vec<FeatureSource>,
        estimator: ChainedEstimator,
        grouped_by_project: bool,
        require_positive: Option<Attribute>,
    },
    /// Joint ridge regression over several raw predictors, no segmentation
    MultiPredictor {
        predictors: Vec<FeatureSource>,
        log_target: bool,
    },
}

impl CategoryStrategy {
    pub fn predictors(&self) -> Vec<FeatureSource> {
        match self {
            CategoryStrategy::ScopeSegmented { predictors }
            | CategoryStrategy::GroupedByProject { predictors, .. }
            | CategoryStrategy::Chained { predictors, .. }
            | CategoryStrategy::MultiPredictor { predictors, .. } => predictors.clone(),
            CategoryStrategy::SyntheticAugmented { predictors, .. } => {
                predictors.iter().map(|a| FeatureSource::Attribute(*a)).collect()
            }
        }
    }

    /// Categories whose values must exist before this one can run.
    pub fn upstream(&self) -> Vec<String> {
        self.predictors()
            .into_iter()
            .filter_map(|source| match source {
                FeatureSource::Category(name) => Some(name),
                FeatureSource::Attribute(_) => None,
            })
            .collect()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CategoryStrategy::ScopeSegmented { .. } => "scope_segmented",
            CategoryStrategy::GroupedByProject { .. } => "grouped_by_project",
            CategoryStrategy::SyntheticAugmented { .. } => "synthetic_augmented",
            CategoryStrategy::Chained { .. } => "chained",
            CategoryStrategy::MultiPredictor { .. } => "multi_predictor",
        }
    }
}

/// Role of a category within its phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum CategoryRole {
    Modeled(CategoryStrategy),
    /// Always the sum of its children, never modeled
    Rollup { children: Vec<String> },
    /// Tracked in cost records but without a predictive model
    Unmodeled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub role: CategoryRole,
    /// Other labels the same cost line carries in historical records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl CategorySpec {
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// True when `key` (already canonical) names this category.
    pub fn answers_to(&self, key: &str) -> bool {
        canonical_name(&self.name) == key || self.aliases.iter().any(|a| canonical_name(a) == key)
    }

    pub fn strategy(&self) -> Option<&CategoryStrategy> {
        match &self.role {
            CategoryRole::Modeled(strategy) => Some(strategy),
            _ => None,
        }
    }

    pub fn is_rollup(&self) -> bool {
        matches!(self.role, CategoryRole::Rollup { .. })
    }
}

/// All categories of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseCatalog {
    pub phase: Phase,
    categories: Vec<CategorySpec>,
}

impl PhaseCatalog {
    /// Build a catalog, checking that every referenced category exists.
    pub fn new(phase: Phase, categories: Vec<CategorySpec>) -> Result<Self> {
        let catalog = Self { phase, categories };
        let known: BTreeSet<String> = catalog.categories.iter().map(|c| canonical_name(&c.name)).collect();
        let mut labels = BTreeSet::new();
        for spec in &catalog.categories {
            for label in std::iter::once(&spec.name).chain(&spec.aliases) {
                if !labels.insert(canonical_name(label)) {
                    return Err(CostError::InvalidInput(format!(
                        "label '{}' of {} is already used by another category",
                        label, spec.name
                    )));
                }
            }
        }
        for spec in &catalog.categories {
            let referenced = match &spec.role {
                CategoryRole::Modeled(strategy) => strategy.upstream(),
                CategoryRole::Rollup { children } => children.clone(),
                CategoryRole::Unmodeled => Vec::new(),
            };
            for name in referenced {
                if !known.contains(&canonical_name(&name)) {
                    return Err(CostError::InvalidInput(format!(
                        "{} references unknown category '{}'",
                        spec.name, name
                    )));
                }
            }
        }
        catalog.resolution_order()?;
        Ok(catalog)
    }

    pub fn categories(&self) -> &[CategorySpec] {
        &self.categories
    }

    /// Look a category up by any spelling that normalizes to its name or
    /// to one of its aliases.
    pub fn get(&self, name: &str) -> Option<&CategorySpec> {
        let key = canonical_name(name);
        self.categories.iter().find(|c| c.answers_to(&key))
    }

    /// Exact catalog name for a caller-supplied label.
    pub fn resolve_name(&self, name: &str) -> Result<&str> {
        self.get(name).map(|c| c.name.as_str()).ok_or_else(|| {
            CostError::UnsupportedScopeOrPhase(format!(
                "category '{}' is not part of phase {}",
                name, self.phase
            ))
        })
    }

    /// Categories that carry their own value (everything except rollups).
    pub fn leaf_categories(&self) -> impl Iterator<Item = &CategorySpec> {
        self.categories.iter().filter(|c| !c.is_rollup())
    }

    /// Parent name for a child category, if any.
    pub fn parent_of(&self, name: &str) -> Option<&str> {
        let key = canonical_name(name);
        self.categories.iter().find_map(|c| match &c.role {
            CategoryRole::Rollup { children } if children.iter().any(|ch| canonical_name(ch) == key) => {
                Some(c.name.as_str())
            }
            _ => None,
        })
    }

    /// Dependency-respecting order: upstream categories before chained ones,
    /// children before their rollup. Ties keep item-number order.
    pub fn resolution_order(&self) -> Result<Vec<&CategorySpec>> {
        let index: BTreeMap<String, usize> = self
            .categories
            .iter()
            .enumerate()
            .map(|(i, c)| (canonical_name(&c.name), i))
            .collect();

        let n = self.categories.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, spec) in self.categories.iter().enumerate() {
            let deps = match &spec.role {
                CategoryRole::Modeled(strategy) => strategy.upstream(),
                CategoryRole::Rollup { children } => children.clone(),
                CategoryRole::Unmodeled => Vec::new(),
            };
            for dep in deps {
                if let Some(&j) = index.get(&canonical_name(&dep)) {
                    dependents[j].push(i);
                    indegree[i] += 1;
                }
            }
        }

        let key = |i: usize| (item_order(&self.categories[i].name), i);
        let mut ready: BTreeSet<(Vec<u32>, usize)> = (0..n).filter(|&i| indegree[i] == 0).map(key).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            let i = next.1;
            order.push(&self.categories[i]);
            for &d in &dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    ready.insert(key(d));
                }
            }
        }

        if order.len() != n {
            return Err(CostError::InvalidInput(format!(
                "category dependencies of phase {} contain a cycle",
                self.phase
            )));
        }
        Ok(order)
    }
}

fn length_segmented(name: &str) -> CategorySpec {
    CategorySpec {
        name: name.to_string(),
        role: CategoryRole::Modeled(CategoryStrategy::ScopeSegmented {
            predictors: vec![FeatureSource::Attribute(Attribute::LengthKm)],
        }),
        aliases: Vec::new(),
    }
}

fn unmodeled(name: &str) -> CategorySpec {
    CategorySpec {
        name: name.to_string(),
        role: CategoryRole::Unmodeled,
        aliases: Vec::new(),
    }
}

fn modeled(name: &str, strategy: CategoryStrategy) -> CategorySpec {
    CategorySpec {
        name: name.to_string(),
        role: CategoryRole::Modeled(strategy),
        aliases: Vec::new(),
    }
}

fn rollup(name: &str, children: &[&str]) -> CategorySpec {
    CategorySpec {
        name: name.to_string(),
        role: CategoryRole::Rollup {
            children: children.iter().map(|c| c.to_string()).collect(),
        },
        aliases: Vec::new(),
    }
}

fn built(phase: Phase, categories: Vec<CategorySpec>) -> PhaseCatalog {
    PhaseCatalog { phase, categories }
}

fn phase_one() -> PhaseCatalog {
    let names: [(&str, &[&str]); 13] = [
        ("1 - TRANSPORTE", &[]),
        ("2 - DISEÑO GEOMÉTRICO", &[]),
        ("3 - PREFACTIBILIDAD TÚNELES", &[]),
        ("4 - GEOLOGÍA", &[]),
        ("5 - GEOTECNIA", &[]),
        ("6 - HIDROLOGÍA E HIDRÁULICA", &[]),
        ("7 - AMBIENTAL Y SOCIAL", &[]),
        ("8 - PREDIAL", &[]),
        ("9 - RIESGOS Y SOSTENIBILIDAD", &[]),
        ("10 - EVALUACIÓN ECONÓMICA", &[]),
        ("11 - SOCIOECONÓMICA Y FINANCIERA", &["11 - SOCIO ECONÓMICA, FINANCIERA"]),
        ("12 - ESTRUCTURAS", &[]),
        ("13 - DIRECCIÓN Y COORDINACIÓN", &[]),
    ];
    built(
        Phase::I,
        names
            .iter()
            .map(|(name, aliases)| length_segmented(name).with_aliases(aliases))
            .collect(),
    )
}

fn phase_two() -> PhaseCatalog {
    built(
        Phase::II,
        vec![
            length_segmented("1 - TRANSPORTE"),
            length_segmented("2 - TOPOGRAFÍA").with_aliases(&[
                "2 - TRAZADO Y TOPOGRAFIA",
                "2 - TRAZADO Y TOPOGRAFIA (incluye subcomponentes)",
            ]),
            length_segmented("3 - GEOLOGÍA").with_aliases(&["3 - GEOLOGÍA (incluye subcomponentes)"]),
            unmodeled("4 - TALUDES"),
            unmodeled("5 - HIDROLOGÍA E HIDRÁULICA"),
            unmodeled("6 - ESTRUCTURAS"),
            unmodeled("7 - TÚNELES"),
            length_segmented("8 - PAVIMENTO"),
            length_segmented("9 - PREDIAL"),
            length_segmented("10 - AMBIENTAL Y SOCIAL"),
            length_segmented("11 - COSTOS Y PRESUPUESTOS"),
            length_segmented("12 - SOCIOECONÓMICA"),
            length_segmented("13 - DIRECCIÓN Y COORDINACIÓN"),
        ],
    )
}

pub const ALIGNMENT: &str = "2.2 - TRAZADO Y DISEÑO GEOMÉTRICO";
pub const SLOPES: &str = "5 - TALUDES";
pub const SCOUR: &str = "7 - SOCAVACIÓN";

fn alignment_slopes_scour() -> Vec<FeatureSource> {
    [ALIGNMENT, SLOPES, SCOUR]
        .iter()
        .map(|n| FeatureSource::Category(n.to_string()))
        .collect()
}

fn phase_three() -> PhaseCatalog {
    let bridge_projects = |predictor: Attribute, log_target: bool| CategoryStrategy::GroupedByProject {
        predictors: vec![FeatureSource::Attribute(predictor)],
        log_target,
        scaled: true,
        require_positive: None,
        excluded_projects: vec!["0654801".to_string()],
    };

    built(
        Phase::III,
        vec![
            length_segmented("1 - TRANSPORTE"),
            rollup(
                "2 - TRAZADO Y DISEÑO GEOMÉTRICO",
                &[
                    "2.1 - INFORMACIÓN GEOGRÁFICA",
                    ALIGNMENT,
                    "2.3 - SEGURIDAD VIAL",
                    "2.4 - SISTEMAS INTELIGENTES",
                ],
            ),
            length_segmented("2.1 - INFORMACIÓN GEOGRÁFICA"),
            length_segmented(ALIGNMENT),
            length_segmented("2.3 - SEGURIDAD VIAL"),
            length_segmented("2.4 - SISTEMAS INTELIGENTES"),
            rollup("3 - GEOLOGÍA", &["3.1 - GEOLOGÍA", "3.2 - HIDROGEOLOGÍA"]),
            modeled(
                "3.1 - GEOLOGÍA",
                CategoryStrategy::Chained {
                    predictors: alignment_slopes_scour(),
                    estimator: ChainedEstimator::Linear,
                    grouped_by_project: true,
                    require_positive: Some(Attribute::VehicularBridgeAreaM2),
                },
            ),
            length_segmented("3.2 - HIDROGEOLOGÍA"),
            modeled("4 - SUELOS", bridge_projects(Attribute::VehicularBridgeAreaM2, true)),
            length_segmented(SLOPES),
            length_segmented("6 - PAVIMENTO"),
            length_segmented(SCOUR),
            modeled("8 - ESTRUCTURAS", bridge_projects(Attribute::VehicularBridgeCount, false)),
            modeled(
                "9 - TÚNELES",
                CategoryStrategy::SyntheticAugmented {
                    predictors: [Attribute::TunnelCount, Attribute::TunnelKm],
                    gate: Attribute::TunnelKm,
                },
            ),
            modeled(
                "10 - URBANISMO Y PAISAJISMO",
                CategoryStrategy::GroupedByProject {
                    predictors: vec![FeatureSource::Attribute(Attribute::PedestrianBridgeCount)],
                    log_target: false,
                    scaled: false,
                    require_positive: Some(Attribute::PedestrianBridgeCount),
                    excluded_projects: Vec::new(),
                },
            ),
            length_segmented("11 - PREDIAL"),
            length_segmented("12 - IMPACTO AMBIENTAL"),
            modeled(
                "13 - CANTIDADES",
                CategoryStrategy::MultiPredictor {
                    predictors: vec![
                        FeatureSource::Attribute(Attribute::VehicularBridgeCount),
                        FeatureSource::Attribute(Attribute::VehicularBridgeAreaM2),
                        FeatureSource::Attribute(Attribute::PedestrianBridgeCount),
                    ],
                    log_target: false,
                },
            ),
            unmodeled("14 - EVALUACIÓN SOCIOECONÓMICA"),
            length_segmented("15 - OTROS - MANEJO DE REDES"),
            modeled(
                "16 - DIRECCIÓN Y COORDINACIÓN",
                CategoryStrategy::Chained {
                    predictors: alignment_slopes_scour(),
                    estimator: ChainedEstimator::Svr,
                    grouped_by_project: false,
                    require_positive: None,
                },
            ),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_catalogs_are_consistent() {
        for phase in Phase::ALL {
            let catalog = phase.catalog();
            let rebuilt = PhaseCatalog::new(phase, catalog.categories().to_vec()).unwrap();
            assert_eq!(rebuilt, catalog);
        }
        assert_eq!(Phase::I.catalog().categories().len(), 13);
        assert_eq!(Phase::II.catalog().categories().len(), 13);
        assert_eq!(Phase::III.catalog().categories().len(), 22);
    }

    #[test]
    fn phase_identifiers() {
        assert_eq!(Phase::from_identifier("Fase I - Prefactibilidad").unwrap(), Phase::I);
        assert_eq!(Phase::from_identifier("Fase II - Factibilidad").unwrap(), Phase::II);
        assert_eq!(Phase::from_identifier("Fase III - Diseño Detallado").unwrap(), Phase::III);
        assert_eq!(Phase::from_identifier("fase_ii").unwrap(), Phase::II);
        assert_eq!(Phase::from_identifier("III").unwrap(), Phase::III);
        assert!(matches!(
            Phase::from_identifier("Operación"),
            Err(CostError::UnsupportedScopeOrPhase(_))
        ));
        assert_eq!(Phase::III.storage_key(), "fase_III_models.json");
    }

    #[test]
    fn canonical_names_ignore_accents_case_and_separators() {
        assert_eq!(
            canonical_name("2.2 - Trazado y diseño  geométrico"),
            canonical_name("2.2 TRAZADO Y DISEÑO GEOMÉTRICO")
        );
        let catalog = Phase::III.catalog();
        assert_eq!(catalog.resolve_name("15 otros manejo de redes").unwrap(), "15 - OTROS - MANEJO DE REDES");
        assert!(catalog.resolve_name("99 - NADA").is_err());
    }

    #[test]
    fn historical_labels_resolve_through_aliases() {
        let two = Phase::II.catalog();
        assert_eq!(
            two.resolve_name("2 - TRAZADO Y TOPOGRAFIA (incluye subcomponentes)").unwrap(),
            "2 - TOPOGRAFÍA"
        );
        assert_eq!(two.resolve_name("3 - GEOLOGÍA (incluye subcomponentes)").unwrap(), "3 - GEOLOGÍA");
        assert_eq!(two.resolve_name("2 - Trazado y topografía").unwrap(), "2 - TOPOGRAFÍA");

        let one = Phase::I.catalog();
        assert_eq!(
            one.resolve_name("11 - SOCIO ECONÓMICA, FINANCIERA").unwrap(),
            "11 - SOCIOECONÓMICA Y FINANCIERA"
        );
        assert_eq!(one.resolve_name("4 - GEOLOGIA").unwrap(), "4 - GEOLOGÍA");

        let clash = vec![
            length_segmented("1 - A"),
            length_segmented("2 - B").with_aliases(&["1 - a"]),
        ];
        assert!(PhaseCatalog::new(Phase::I, clash).is_err());
    }

    #[test]
    fn item_order_parses_leading_number() {
        assert_eq!(item_order("2.3 - SEGURIDAD VIAL"), vec![2, 3]);
        assert_eq!(item_order("16 - DIRECCIÓN"), vec![16]);
        assert_eq!(item_order("OTROS"), vec![9999]);
        assert!(item_order("2.10 - X") > item_order("2.2 - Y"));
    }

    #[test]
    fn resolution_order_puts_dependencies_first() {
        let catalog = Phase::III.catalog();
        let order: Vec<&str> = catalog.resolution_order().unwrap().iter().map(|c| c.name.as_str()).collect();
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();

        for upstream in [ALIGNMENT, SLOPES, SCOUR] {
            assert!(pos(upstream) < pos("16 - DIRECCIÓN Y COORDINACIÓN"));
            assert!(pos(upstream) < pos("3.1 - GEOLOGÍA"));
        }
        assert!(pos("2.4 - SISTEMAS INTELIGENTES") < pos("2 - TRAZADO Y DISEÑO GEOMÉTRICO"));
        assert!(pos("3.2 - HIDROGEOLOGÍA") < pos("3 - GEOLOGÍA"));
        assert_eq!(order[0], "1 - TRANSPORTE");
    }

    #[test]
    fn cycles_and_dangling_references_are_rejected() {
        let a = CategorySpec {
            name: "1 - A".to_string(),
            role: CategoryRole::Modeled(CategoryStrategy::Chained {
                predictors: vec![FeatureSource::Category("2 - B".to_string())],
                estimator: ChainedEstimator::Linear,
                grouped_by_project: false,
                require_positive: None,
            }),
            aliases: Vec::new(),
        };
        let b = CategorySpec {
            name: "2 - B".to_string(),
            role: CategoryRole::Modeled(CategoryStrategy::Chained {
                predictors: vec![FeatureSource::Category("1 - A".to_string())],
                estimator: ChainedEstimator::Linear,
                grouped_by_project: false,
                require_positive: None,
            }),
            aliases: Vec::new(),
        };
        assert!(PhaseCatalog::new(Phase::I, vec![a.clone(), b]).is_err());
        assert!(PhaseCatalog::new(Phase::I, vec![a]).is_err());
    }

    #[test]
    fn strategies_declare_upstream() {
        let catalog = Phase::III.catalog();
        let coord = catalog.get("16 - DIRECCION Y COORDINACION").unwrap();
        assert_eq!(coord.strategy().unwrap().upstream().len(), 3);
        assert!(catalog.get("9 - TÚNELES").unwrap().strategy().unwrap().upstream().is_empty());
        assert_eq!(catalog.parent_of("2.3 - SEGURIDAD VIAL"), Some("2 - TRAZADO Y DISEÑO GEOMÉTRICO"));
    }

    #[test]
    fn attributes_accumulate() {
        let mut total = SegmentAttributes::default();
        let seg = SegmentAttributes {
            length_km: 2.0,
            tunnel_km: 0.5,
            ..Default::default()
        };
        total.accumulate(&seg);
        total.accumulate(&seg);
        assert_eq!(total.length_km, 4.0);
        assert_eq!(total.tunnel_km, 1.0);
        assert!(SegmentAttributes { length_km: -1.0, ..Default::default() }.validate().is_err());
    }
}
