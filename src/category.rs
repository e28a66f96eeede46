//! Alert categories and the detector class table.
//!
//! The detector is trained on a fixed label set. Only a handful of its class
//! ids are reportable; this module is the single place that says which id
//! belongs to which category and what the default gate policy is.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigurationError;

/// Default minimum interval between two reports of the same category.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Class ids that never reach the reporter or the per-frame summary.
///
/// Ids 1, 2 and 6 are drawn by the detector but have no alert meaning here.
pub const ANNOTATION_EXCLUDED_CLASS_IDS: [u32; 3] = [1, 2, 6];

/// Class ids per category, as shipped with the `best.pt` weights.
pub const DEFAULT_CLASS_TABLE: [(Category, &[u32]); 3] = [
    (Category::Violence, &[7]),
    (Category::Weapon, &[5, 8]),
    (Category::Fire, &[0, 4]),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Violence,
    Weapon,
    Fire,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Violence, Category::Weapon, Category::Fire];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Violence => "violence",
            Category::Weapon => "weapon",
            Category::Fire => "fire",
        }
    }

    /// Remote folder / log key holding this category's snapshots.
    pub fn image_key(self) -> String {
        format!("{}_img", self.as_str())
    }

    /// Root-level counter key in the realtime database.
    pub fn counter_key(self) -> String {
        format!("{}_count", self.as_str())
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Category::Violence => 0,
            Category::Weapon => 1,
            Category::Fire => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "violence" => Ok(Category::Violence),
            "weapon" => Ok(Category::Weapon),
            "fire" => Ok(Category::Fire),
            other => Err(ConfigurationError::new(format!(
                "unknown category '{}'; expected violence, weapon or fire",
                other
            ))),
        }
    }
}

/// Gate parameters for one category.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CategoryPolicy {
    pub cooldown: Duration,
    pub min_confidence: f32,
}

impl CategoryPolicy {
    pub fn default_for(category: Category) -> Self {
        let min_confidence = match category {
            Category::Violence => 0.55,
            Category::Weapon | Category::Fire => 0.50,
        };
        Self {
            cooldown: DEFAULT_COOLDOWN,
            min_confidence,
        }
    }

    pub fn validate(&self, category: Category) -> Result<(), ConfigurationError> {
        if !self.min_confidence.is_finite() || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigurationError::new(format!(
                "{} min_confidence must be within 0.0..=1.0 (got {})",
                category, self.min_confidence
            )));
        }
        Ok(())
    }
}

/// Lookup from detector class id to alert category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassMap {
    by_id: BTreeMap<u32, Category>,
}

impl ClassMap {
    /// Build a map from `(category, ids)` rows.
    ///
    /// Every category needs at least one id and no id may appear twice.
    pub fn from_table<'a, I>(rows: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (Category, &'a [u32])>,
    {
        let mut by_id = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for (category, ids) in rows {
            if !seen.insert(category) {
                return Err(ConfigurationError::new(format!(
                    "category {} listed more than once in class table",
                    category
                )));
            }
            if ids.is_empty() {
                return Err(ConfigurationError::new(format!(
                    "category {} has no class ids",
                    category
                )));
            }
            for &id in ids {
                if let Some(existing) = by_id.insert(id, category) {
                    return Err(ConfigurationError::new(format!(
                        "class id {} mapped to both {} and {}",
                        id, existing, category
                    )));
                }
            }
        }
        for category in Category::ALL {
            if !seen.contains(&category) {
                return Err(ConfigurationError::new(format!(
                    "class table is missing category {}",
                    category
                )));
            }
        }
        Ok(Self { by_id })
    }

    pub fn category_for(&self, class_id: u32) -> Option<Category> {
        self.by_id.get(&class_id).copied()
    }

    pub fn class_ids(&self, category: Category) -> Vec<u32> {
        self.by_id
            .iter()
            .filter(|(_, c)| **c == category)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Default for ClassMap {
    fn default() -> Self {
        let by_id = DEFAULT_CLASS_TABLE
            .iter()
            .flat_map(|(category, ids)| ids.iter().map(move |id| (*id, *category)))
            .collect();
        Self { by_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_maps_known_ids() {
        let map = ClassMap::default();
        assert_eq!(map.category_for(7), Some(Category::Violence));
        assert_eq!(map.category_for(5), Some(Category::Weapon));
        assert_eq!(map.category_for(8), Some(Category::Weapon));
        assert_eq!(map.category_for(0), Some(Category::Fire));
        assert_eq!(map.category_for(4), Some(Category::Fire));
        for ignored in [1, 2, 3, 6, 9, 42] {
            assert_eq!(map.category_for(ignored), None);
        }
    }

    #[test]
    fn default_table_round_trips_through_from_table() {
        let built = ClassMap::from_table(DEFAULT_CLASS_TABLE).unwrap();
        assert_eq!(built, ClassMap::default());
        assert_eq!(built.class_ids(Category::Fire), vec![0, 4]);
    }

    #[test]
    fn overlapping_ids_are_rejected() {
        let err = ClassMap::from_table([
            (Category::Violence, &[7u32][..]),
            (Category::Weapon, &[5, 7][..]),
            (Category::Fire, &[0][..]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("class id 7"));
    }

    #[test]
    fn empty_and_missing_categories_are_rejected() {
        assert!(ClassMap::from_table([
            (Category::Violence, &[7u32][..]),
            (Category::Weapon, &[] as &[u32]),
            (Category::Fire, &[0][..]),
        ])
        .is_err());
        assert!(ClassMap::from_table([(Category::Violence, &[7u32][..])]).is_err());
    }

    #[test]
    fn policy_defaults_follow_category() {
        assert_eq!(CategoryPolicy::default_for(Category::Violence).min_confidence, 0.55);
        assert_eq!(CategoryPolicy::default_for(Category::Weapon).min_confidence, 0.50);
        assert_eq!(CategoryPolicy::default_for(Category::Fire).cooldown, DEFAULT_COOLDOWN);
        let bad = CategoryPolicy {
            cooldown: DEFAULT_COOLDOWN,
            min_confidence: 1.5,
        };
        assert!(bad.validate(Category::Fire).is_err());
    }

    #[test]
    fn keys_and_parsing() {
        assert_eq!(Category::Weapon.image_key(), "weapon_img");
        assert_eq!(Category::Fire.counter_key(), "fire_count");
        assert_eq!("Violence".parse::<Category>().unwrap(), Category::Violence);
        assert!("smoke".parse::<Category>().is_err());
    }
}
