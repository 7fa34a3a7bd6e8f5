//! Configuration du système
//!
//! - [`MappingConfig`] : listes de clés candidates pour chaque champ canonique
//!   (JSON, preset embarqué ou fichier)
//! - [`Settings`] : paramètres d'exécution lus dans l'environnement

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mapping::Candidates;

/// Configuration du mapping des attributs sources
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MappingConfig {
    pub parcel: ParcelFields,
    pub zone: ZoneFields,
    pub agronomy: AgronomyFields,
    pub classification: ClassificationRules,

    /// Zone d'appartenance quand aucune clé de jointure n'est trouvée
    #[serde(default = "default_zone")]
    pub default_zone: String,
}

/// Clés candidates des champs de parcelle
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParcelFields {
    pub code: Candidates,
    pub zone: Candidates,
    pub owner_name: Candidates,
    pub owner_id: Candidates,
    pub crop_type: Candidates,
}

/// Clés candidates des champs de zone
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZoneFields {
    pub code: Candidates,
    pub name: Candidates,
    pub classification: Candidates,
    #[serde(default)]
    pub status: Candidates,
}

/// Mesures agronomiques (extraites indépendamment du reste)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgronomyFields {
    pub irrigation_volume_per_rai: Candidates,
    pub season_length_days: Candidates,
    pub crop_age_days: Candidates,
    pub yield_estimate: Candidates,
    pub planting_date: Candidates,
    pub harvest_date: Candidates,
    pub water_source: Candidates,
    pub soil_type: Candidates,
}

/// Règles de classification zone / parcelle
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassificationRules {
    /// Mots-clés cherchés dans le nom de la table source (insensible à la casse)
    pub table_keywords: Vec<String>,

    /// Présence d'une de ces clés (non nulle) => zone
    pub attribute_keys: Candidates,
}

fn default_zone() -> String {
    "1".to_string()
}

impl MappingConfig {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read mapping config: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse mapping config JSON")
    }

    /// Charge une configuration depuis un preset embarqué
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "default" => Self::load_embedded(include_str!("presets/default.json")),
            _ => anyhow::bail!("Unknown preset: {}. Use: default", preset),
        }
    }

    /// Nom de preset ou chemin vers un JSON
    pub fn resolve(spec: &str) -> Result<Self> {
        match spec {
            "default" => Self::from_preset(spec),
            _ => Self::load(Path::new(spec)),
        }
    }

    fn load_embedded(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse embedded mapping config")
    }
}

/// Paramètres des tuiles vectorielles
#[derive(Debug, Clone)]
pub struct TileSettings {
    /// Durée de vie d'une tuile en cache
    pub cache_ttl: Duration,
    /// Étendue MVT (résolution de la grille)
    pub extent: u32,
    /// Marge de découpe, en unités de l'étendue
    pub buffer: u32,
    /// Nombre de niveaux remontés pour la requête (métatuile)
    pub metatile_shift: u8,
}

impl Default for TileSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            extent: 4096,
            buffer: 64,
            metatile_shift: 2,
        }
    }
}

/// Paramètres d'exécution
#[derive(Debug, Clone)]
pub struct Settings {
    /// Schéma PostgreSQL des tables zones/parcelles
    pub schema: String,
    pub tiles: TileSettings,
    /// Racine des répertoires d'extraction (temp système si absent)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema: "agrozone".into(),
            tiles: TileSettings::default(),
            scratch_dir: None,
        }
    }
}

impl Settings {
    /// Charge les paramètres depuis les variables d'environnement
    pub fn from_env() -> Self {
        let defaults = TileSettings::default();
        Self {
            schema: std::env::var("AGROZONE_SCHEMA").unwrap_or_else(|_| "agrozone".into()),
            tiles: TileSettings {
                cache_ttl: env_parse("TILE_CACHE_TTL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.cache_ttl),
                extent: env_parse("TILE_EXTENT").unwrap_or(defaults.extent),
                buffer: env_parse("TILE_BUFFER").unwrap_or(defaults.buffer),
                metatile_shift: env_parse("TILE_METATILE_SHIFT").unwrap_or(defaults.metatile_shift),
            },
            scratch_dir: std::env::var("SCRATCH_DIR").ok().map(PathBuf::from),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
