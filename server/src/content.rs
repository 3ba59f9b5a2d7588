//! Read-only content: template registries and map layouts.
//!
//! Rooms query a `MapSource` exactly once when they start and look templates
//! up by type string afterwards. Nothing in here is mutated at runtime.

use log::warn;
use serde::Deserialize;
use shared::geometry::{Bounds, Vector2};
use shared::PlacedObjectView;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("unknown map `{0}`")]
    UnknownMap(String),
    #[error("invalid map key `{0}`")]
    InvalidKey(String),
    #[error("map `{0}` has invalid bounds")]
    InvalidBounds(String),
    #[error("failed to read content: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse content: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EnemyTemplate {
    pub name: String,
    pub max_health: i32,
    pub damage: i32,
    pub speed: f32,
    pub aggro_range: f32,
    pub attack_range: f32,
    pub attack_cooldown_ms: u64,
    pub xp_reward: u64,
    pub gold_reward: u64,
    #[serde(default)]
    pub coin_drop_chance: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WeaponTemplate {
    pub name: String,
    pub damage: i32,
    /// Zero means the weapon cannot be bought.
    pub price: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ObjectTemplate {
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub solid: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub enemies: HashMap<String, EnemyTemplate>,
    #[serde(default)]
    pub weapons: HashMap<String, WeaponTemplate>,
    #[serde(default)]
    pub objects: HashMap<String, ObjectTemplate>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self, ContentError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn builtin() -> Self {
        let enemy = |name: &str,
                     max_health,
                     damage,
                     speed,
                     aggro_range,
                     attack_range,
                     attack_cooldown_ms,
                     xp_reward,
                     gold_reward,
                     coin_drop_chance| EnemyTemplate {
            name: name.to_string(),
            max_health,
            damage,
            speed,
            aggro_range,
            attack_range,
            attack_cooldown_ms,
            xp_reward,
            gold_reward,
            coin_drop_chance,
        };
        let weapon = |name: &str, damage, price| WeaponTemplate {
            name: name.to_string(),
            damage,
            price,
        };

        let enemies = HashMap::from([
            (
                "slime".to_string(),
                enemy("Slime", 30, 5, 60.0, 256.0, 40.0, 800, 20, 5, 0.35),
            ),
            (
                "goblin".to_string(),
                enemy("Goblin", 60, 10, 90.0, 320.0, 48.0, 300, 50, 12, 0.4),
            ),
            (
                "orc".to_string(),
                enemy("Orc", 150, 20, 70.0, 320.0, 48.0, 1000, 120, 30, 0.5),
            ),
        ]);
        let weapons = HashMap::from([
            ("wooden_sword".to_string(), weapon("Wooden Sword", 10, 0)),
            ("iron_sword".to_string(), weapon("Iron Sword", 18, 100)),
            ("steel_axe".to_string(), weapon("Steel Axe", 28, 250)),
            ("flame_blade".to_string(), weapon("Flame Blade", 40, 600)),
        ]);
        let objects = HashMap::from([
            (
                "tree".to_string(),
                ObjectTemplate {
                    width: 32.0,
                    height: 48.0,
                    solid: true,
                },
            ),
            (
                "rock".to_string(),
                ObjectTemplate {
                    width: 24.0,
                    height: 24.0,
                    solid: true,
                },
            ),
            (
                "fountain".to_string(),
                ObjectTemplate {
                    width: 64.0,
                    height: 64.0,
                    solid: false,
                },
            ),
        ]);

        Self {
            enemies,
            weapons,
            objects,
        }
    }

    pub fn enemy(&self, key: &str) -> Option<&EnemyTemplate> {
        self.enemies.get(key)
    }

    pub fn weapon(&self, key: &str) -> Option<&WeaponTemplate> {
        self.weapons.get(key)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SpawnDefinition {
    pub id: u32,
    pub enemy_type: String,
    pub x: f32,
    pub y: f32,
    pub respawn_ms: u64,
}

/// Used only when a map has no spawn definitions.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RandomSpawns {
    pub enemy_types: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlacedObject {
    pub object_type: String,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapData {
    #[serde(default)]
    pub key: String,
    pub bounds: Bounds,
    pub spawn_point: Vector2,
    #[serde(default)]
    pub neutral_zones: Vec<Vec<Vector2>>,
    #[serde(default)]
    pub enemy_spawns: Vec<SpawnDefinition>,
    #[serde(default)]
    pub random_spawns: RandomSpawns,
    #[serde(default)]
    pub objects: Vec<PlacedObject>,
}

impl MapData {
    /// Rejects geometry that would break clamping and random placement.
    pub fn validate(&self) -> Result<(), ContentError> {
        let Bounds { width, height } = self.bounds;
        let finite = [width, height, self.spawn_point.x, self.spawn_point.y]
            .iter()
            .all(|v| v.is_finite());
        if !finite || width < 0.0 || height < 0.0 {
            return Err(ContentError::InvalidBounds(self.key.clone()));
        }
        Ok(())
    }

    /// Placed objects resolved against the registry. Unknown types are skipped.
    pub fn object_views(&self, registry: &Registry) -> Vec<PlacedObjectView> {
        self.objects
            .iter()
            .filter_map(|placed| match registry.objects.get(&placed.object_type) {
                Some(template) => Some(PlacedObjectView {
                    object_type: placed.object_type.clone(),
                    x: placed.x,
                    y: placed.y,
                    width: template.width,
                    height: template.height,
                }),
                None => {
                    warn!(
                        "Map {}: unknown object type `{}`, skipping",
                        self.key, placed.object_type
                    );
                    None
                }
            })
            .collect()
    }
}

/// Source of map layouts. Queried once per room start.
pub trait MapSource: Send + Sync {
    fn load_map(&self, key: &str) -> Result<MapData, ContentError>;
}

/// Maps compiled into the binary, used when no content directory is given.
pub struct BuiltinMapSource;

impl MapSource for BuiltinMapSource {
    fn load_map(&self, key: &str) -> Result<MapData, ContentError> {
        let square = |x1: f32, y1: f32, x2: f32, y2: f32| {
            vec![
                Vector2::new(x1, y1),
                Vector2::new(x2, y1),
                Vector2::new(x2, y2),
                Vector2::new(x1, y2),
            ]
        };
        let spawn = |id, enemy_type: &str, x, y, respawn_ms| SpawnDefinition {
            id,
            enemy_type: enemy_type.to_string(),
            x,
            y,
            respawn_ms,
        };
        let object = |object_type: &str, x, y| PlacedObject {
            object_type: object_type.to_string(),
            x,
            y,
        };

        match key {
            "meadow" => Ok(MapData {
                key: key.to_string(),
                bounds: Bounds {
                    width: 1600.0,
                    height: 1200.0,
                },
                spawn_point: Vector2::new(800.0, 600.0),
                neutral_zones: vec![square(700.0, 500.0, 900.0, 700.0)],
                enemy_spawns: vec![
                    spawn(1, "slime", 300.0, 300.0, 5_000),
                    spawn(2, "slime", 1300.0, 300.0, 5_000),
                    spawn(3, "goblin", 300.0, 900.0, 8_000),
                    spawn(4, "goblin", 1300.0, 900.0, 8_000),
                    spawn(5, "orc", 1450.0, 1100.0, 20_000),
                ],
                random_spawns: RandomSpawns::default(),
                objects: vec![
                    object("fountain", 800.0, 600.0),
                    object("tree", 200.0, 150.0),
                    object("tree", 1400.0, 150.0),
                    object("rock", 600.0, 1000.0),
                ],
            }),
            "wilds" => Ok(MapData {
                key: key.to_string(),
                bounds: Bounds {
                    width: 2000.0,
                    height: 2000.0,
                },
                spawn_point: Vector2::new(1000.0, 1000.0),
                neutral_zones: vec![square(950.0, 950.0, 1050.0, 1050.0)],
                enemy_spawns: Vec::new(),
                random_spawns: RandomSpawns {
                    enemy_types: vec!["slime".to_string(), "goblin".to_string()],
                    count: 12,
                },
                objects: Vec::new(),
            }),
            _ => Err(ContentError::UnknownMap(key.to_string())),
        }
    }
}

/// Reads `<dir>/<key>.json`.
pub struct JsonMapSource {
    dir: PathBuf,
}

impl JsonMapSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MapSource for JsonMapSource {
    fn load_map(&self, key: &str) -> Result<MapData, ContentError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ContentError::InvalidKey(key.to_string()));
        }

        let path = self.dir.join(format!("{}.json", key));
        if !path.exists() {
            return Err(ContentError::UnknownMap(key.to_string()));
        }
        let mut map: MapData = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        map.key = key.to_string();
        map.validate()?;
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_lookups() {
        let registry = Registry::builtin();
        let goblin = registry.enemy("goblin").unwrap();
        assert_eq!(goblin.attack_range, 48.0);
        assert_eq!(goblin.attack_cooldown_ms, 300);
        assert_eq!(registry.weapon("wooden_sword").unwrap().price, 0);
        assert!(registry.enemy("dragon").is_none());
    }

    #[test]
    fn test_builtin_maps() {
        let source = BuiltinMapSource;
        let meadow = source.load_map("meadow").unwrap();
        assert_eq!(meadow.enemy_spawns.len(), 5);
        let wilds = source.load_map("wilds").unwrap();
        assert!(wilds.enemy_spawns.is_empty());
        assert_eq!(wilds.random_spawns.count, 12);
        assert!(matches!(
            source.load_map("nowhere"),
            Err(ContentError::UnknownMap(_))
        ));
    }

    #[test]
    fn test_object_views_skip_unknown_types() {
        let registry = Registry::builtin();
        let mut map = BuiltinMapSource.load_map("meadow").unwrap();
        let known = map.objects.len();
        map.objects.push(PlacedObject {
            object_type: "statue".to_string(),
            x: 1.0,
            y: 1.0,
        });
        assert_eq!(map.object_views(&registry).len(), known);
    }

    #[test]
    fn test_map_json_defaults() {
        let map: MapData = serde_json::from_str(
            r#"{ "bounds": { "width": 100.0, "height": 50.0 },
                 "spawn_point": { "x": 5.0, "y": 5.0 } }"#,
        )
        .unwrap();
        assert!(map.enemy_spawns.is_empty());
        assert!(map.neutral_zones.is_empty());
        assert_eq!(map.random_spawns.count, 0);
    }

    #[test]
    fn test_json_source_rejects_negative_bounds() {
        let dir = std::env::temp_dir().join(format!("realm-content-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("inverted.json"),
            r#"{ "bounds": { "width": -10.0, "height": 50.0 },
                 "spawn_point": { "x": 5.0, "y": 5.0 } }"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("plain.json"),
            r#"{ "bounds": { "width": 100.0, "height": 50.0 },
                 "spawn_point": { "x": 5.0, "y": 5.0 } }"#,
        )
        .unwrap();

        let source = JsonMapSource::new(&dir);
        let inverted = source.load_map("inverted");
        let plain = source.load_map("plain");
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(matches!(inverted, Err(ContentError::InvalidBounds(key)) if key == "inverted"));
        assert_eq!(plain.unwrap().key, "plain");
    }

    #[test]
    fn test_validate_rejects_non_finite_geometry() {
        let mut map = BuiltinMapSource.load_map("meadow").unwrap();
        assert!(map.validate().is_ok());
        map.bounds.height = f32::NAN;
        assert!(matches!(map.validate(), Err(ContentError::InvalidBounds(_))));
    }

    #[test]
    fn test_json_source_rejects_path_keys() {
        let source = JsonMapSource::new("/tmp");
        assert!(matches!(
            source.load_map("../etc/passwd"),
            Err(ContentError::InvalidKey(_))
        ));
    }
}
