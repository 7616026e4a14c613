// src/config/catalog.rs
//! Species catalog: the fixed, ordered list of species the service tracks.
//!
//! The catalog is an explicit value handed to the engine at startup. It can be
//! embedded in the settings file as `[[species]]` tables or loaded on its own
//! from TOML or JSON.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Static catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct SpeciesDescriptor {
    /// Stable identifier used in routes and maps.
    pub id: String,
    /// Query key against the occurrence service.
    pub scientific_name: String,
    pub display_name: String,
    /// Free-text hint about where the species is a problem.
    #[serde(default)]
    pub region_hint: String,
}

impl SpeciesDescriptor {
    pub fn new(id: &str, scientific_name: &str, display_name: &str, region_hint: &str) -> Self {
        Self {
            id: id.to_string(),
            scientific_name: scientific_name.to_string(),
            display_name: display_name.to_string(),
            region_hint: region_hint.to_string(),
        }
    }
}

/// Ordered, validated set of species. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SpeciesCatalog {
    entries: Vec<SpeciesDescriptor>,
}

impl SpeciesCatalog {
    /// Build a catalog, trimming fields and rejecting blank or duplicate ids.
    pub fn new(entries: Vec<SpeciesDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(entries.len());
        for mut e in entries {
            e.id = e.id.trim().to_string();
            e.scientific_name = e.scientific_name.trim().to_string();
            e.display_name = e.display_name.trim().to_string();
            if e.id.is_empty() {
                bail!("species entry with empty id");
            }
            if e.scientific_name.is_empty() {
                bail!("species '{}' has an empty scientific name", e.id);
            }
            if e.display_name.is_empty() {
                e.display_name = e.scientific_name.clone();
            }
            if !seen.insert(e.id.clone()) {
                bail!("duplicate species id '{}'", e.id);
            }
            out.push(e);
        }
        Ok(Self { entries: out })
    }

    pub fn get(&self, id: &str) -> Option<&SpeciesDescriptor> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeciesDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Built-in seed: edible invasive species with a broad occurrence record.
    pub fn default_seed() -> Self {
        Self {
            entries: vec![
                SpeciesDescriptor::new(
                    "lionfish",
                    "Pterois volitans",
                    "Red Lionfish",
                    "Western Atlantic, Caribbean, Gulf of Mexico",
                ),
                SpeciesDescriptor::new(
                    "green-crab",
                    "Carcinus maenas",
                    "European Green Crab",
                    "North American Atlantic and Pacific coasts",
                ),
                SpeciesDescriptor::new(
                    "silver-carp",
                    "Hypophthalmichthys molitrix",
                    "Silver Carp",
                    "Mississippi and Illinois river basins",
                ),
                SpeciesDescriptor::new(
                    "garlic-mustard",
                    "Alliaria petiolata",
                    "Garlic Mustard",
                    "Eastern and Midwestern North American forests",
                ),
                SpeciesDescriptor::new(
                    "wild-boar",
                    "Sus scrofa",
                    "Wild Boar",
                    "Southern United States, Australia",
                ),
            ],
        }
    }
}

impl Default for SpeciesCatalog {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl<'de> Deserialize<'de> for SpeciesCatalog {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let entries = Vec::<SpeciesDescriptor>::deserialize(deserializer)?;
        SpeciesCatalog::new(entries).map_err(serde::de::Error::custom)
    }
}

/// Load a standalone catalog file. TOML expects `[[species]]` tables, JSON a
/// bare array of entries.
pub fn load_catalog_from(path: &Path) -> Result<SpeciesCatalog> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading species catalog from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_catalog(&content, ext.as_str())
}

fn parse_catalog(s: &str, hint_ext: &str) -> Result<SpeciesCatalog> {
    if hint_ext == "json" {
        return parse_json(s);
    }
    if let Ok(c) = parse_toml(s) {
        return Ok(c);
    }
    parse_json(s).map_err(|_| anyhow!("unsupported species catalog format"))
}

fn parse_toml(s: &str) -> Result<SpeciesCatalog> {
    #[derive(Deserialize)]
    struct TomlCatalog {
        species: Vec<SpeciesDescriptor>,
    }
    let v: TomlCatalog = toml::from_str(s)?;
    SpeciesCatalog::new(v.species)
}

fn parse_json(s: &str) -> Result<SpeciesCatalog> {
    let v: Vec<SpeciesDescriptor> = serde_json::from_str(s)?;
    SpeciesCatalog::new(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_ids_are_unique_and_ordered() {
        let c = SpeciesCatalog::default_seed();
        let rebuilt = SpeciesCatalog::new(c.iter().cloned().collect()).unwrap();
        assert_eq!(rebuilt, c);
        assert_eq!(c.iter().next().map(|e| e.id.as_str()), Some("lionfish"));
    }

    #[test]
    fn rejects_duplicates_and_blank_names() {
        let dup = vec![
            SpeciesDescriptor::new("a", "Genus one", "One", ""),
            SpeciesDescriptor::new(" a ", "Genus two", "Two", ""),
        ];
        assert!(SpeciesCatalog::new(dup).is_err());

        let blank = vec![SpeciesDescriptor::new("a", "  ", "One", "")];
        assert!(SpeciesCatalog::new(blank).is_err());
    }

    #[test]
    fn toml_and_json_formats_parse() {
        let toml = r#"
[[species]]
id = "lionfish"
scientific_name = "Pterois volitans"
display_name = "Red Lionfish"
region_hint = "Caribbean"

[[species]]
id = "boar"
scientific_name = "Sus scrofa"
display_name = ""
"#;
        let c = parse_catalog(toml, "toml").unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.get("boar").map(|e| e.display_name.as_str()), Some("Sus scrofa"));

        let json = r#"[{"id":"x","scientific_name":"Alliaria petiolata","display_name":"Garlic Mustard"}]"#;
        let j = parse_catalog(json, "json").unwrap();
        assert_eq!(j.get("x").map(|e| e.region_hint.as_str()), Some(""));
    }
}
