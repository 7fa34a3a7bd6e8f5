//! Mapping des attributs sources vers les champs canoniques
//!
//! Chaque champ canonique a une liste ordonnée de clés candidates (variantes
//! de casse, translittérations). La première clé présente avec une valeur non
//! nulle l'emporte.

use geo::Geometry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use survey::Attributes;

use crate::config::{AgronomyFields, ClassificationRules, MappingConfig};
use crate::hash::generated_id;
use crate::model::AgronomyMeasurements;

/// Liste ordonnée de clés candidates
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Candidates(Vec<String>);

impl Candidates {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    /// Première clé présente dont la valeur n'est ni nulle ni vide
    pub fn first_match<'a>(&'a self, attributes: &'a Attributes) -> Option<(&'a str, &'a Value)> {
        self.0.iter().find_map(|key| {
            attributes
                .get(key)
                .filter(|v| is_present(v))
                .map(|v| (key.as_str(), v))
        })
    }

    /// Première valeur présente, en texte
    pub fn first_string(&self, attributes: &Attributes) -> Option<String> {
        self.first_match(attributes)
            .and_then(|(_, v)| value_to_string(v))
    }

    /// Première valeur présente, en nombre ; une valeur non numérique
    /// ne laisse pas la place aux clés suivantes
    pub fn first_number(&self, attributes: &Attributes) -> Option<f64> {
        self.first_match(attributes)
            .and_then(|(_, v)| parse_number(v))
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Texte d'une valeur : les nombres entiers stockés en flottant perdent le `.0`
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Some(n.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < 9.0e15 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Nombre depuis une valeur JSON ; les séparateurs de milliers sont ignorés
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
            if cleaned.is_empty() {
                return None;
            }
            fast_float::parse::<f64, _>(cleaned.as_bytes())
                .ok()
                .filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Nature d'une feature, décidée une seule fois à l'ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Zone,
    Parcel,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::Parcel => "parcel",
        }
    }
}

/// Classe une feature d'après le nom de sa table et ses attributs
///
/// Sans indice de zone, la feature est une parcelle.
pub fn classify(rules: &ClassificationRules, table_name: &str, attributes: &Attributes) -> FeatureKind {
    let table = table_name.to_lowercase();
    let table_hit = rules
        .table_keywords
        .iter()
        .any(|k| table.contains(&k.to_lowercase()));

    if table_hit || rules.attribute_keys.first_match(attributes).is_some() {
        FeatureKind::Zone
    } else {
        FeatureKind::Parcel
    }
}

/// Champs de parcelle issus du mapping
#[derive(Debug, Clone, PartialEq)]
pub struct MappedParcel {
    pub code: String,
    pub zone_code: String,
    pub owner_name: Option<String>,
    pub owner_id: Option<String>,
    pub crop_type: Option<String>,
    pub agronomy: AgronomyMeasurements,
    /// Attributs restants
    pub extended: Attributes,
}

/// Champs de zone issus du mapping
#[derive(Debug, Clone, PartialEq)]
pub struct MappedZone {
    pub code: String,
    pub name: Option<String>,
    pub classification: Option<String>,
    pub status: Option<String>,
    pub extended: Attributes,
}

/// Applique la configuration de mapping aux attributs d'une feature
pub struct AttributeMapper<'a> {
    config: &'a MappingConfig,
}

impl<'a> AttributeMapper<'a> {
    pub fn new(config: &'a MappingConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, table_name: &str, attributes: &Attributes) -> FeatureKind {
        classify(&self.config.classification, table_name, attributes)
    }

    pub fn map_parcel(&self, attributes: &Attributes, geometry: &Geometry) -> MappedParcel {
        let fields = &self.config.parcel;
        let mut consumed = Vec::new();
        let mut take = |candidates: &Candidates| {
            let found = candidates.first_match(attributes)?;
            consumed.push(found.0.to_string());
            value_to_string(found.1)
        };

        let code = take(&fields.code).unwrap_or_else(|| generated_id(geometry));
        let zone_code = take(&fields.zone).unwrap_or_else(|| self.config.default_zone.clone());
        let owner_name = take(&fields.owner_name);
        let owner_id = take(&fields.owner_id);
        let crop_type = take(&fields.crop_type);

        let agronomy = extract_agronomy(&self.config.agronomy, attributes);

        MappedParcel {
            code,
            zone_code,
            owner_name,
            owner_id,
            crop_type,
            agronomy,
            extended: remaining(attributes, &consumed),
        }
    }

    pub fn map_zone(&self, attributes: &Attributes, geometry: &Geometry) -> MappedZone {
        let fields = &self.config.zone;
        let mut consumed = Vec::new();
        let mut take = |candidates: &Candidates| {
            let found = candidates.first_match(attributes)?;
            consumed.push(found.0.to_string());
            value_to_string(found.1)
        };

        let code = take(&fields.code).unwrap_or_else(|| generated_id(geometry));
        let name = take(&fields.name);
        let classification = take(&fields.classification);
        let status = take(&fields.status);

        MappedZone {
            code,
            name,
            classification,
            status,
            extended: remaining(attributes, &consumed),
        }
    }
}

/// Mesures agronomiques, chacune avec sa propre liste de candidats
pub fn extract_agronomy(fields: &AgronomyFields, attributes: &Attributes) -> AgronomyMeasurements {
    AgronomyMeasurements {
        irrigation_volume_per_rai: fields.irrigation_volume_per_rai.first_number(attributes),
        season_length_days: fields.season_length_days.first_number(attributes),
        crop_age_days: fields.crop_age_days.first_number(attributes),
        yield_estimate: fields.yield_estimate.first_number(attributes),
        planting_date: fields.planting_date.first_string(attributes),
        harvest_date: fields.harvest_date.first_string(attributes),
        water_source: fields.water_source.first_string(attributes),
        soil_type: fields.soil_type.first_string(attributes),
    }
}

fn remaining(attributes: &Attributes, consumed: &[String]) -> Attributes {
    attributes
        .iter()
        .filter(|(k, _)| !consumed.iter().any(|c| c == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
