//! TOML-based node configuration and the built-in demo preset.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;

use crate::actuation::{ActuationConfig, ActuationManager, StrategyConfig};
use crate::asset::{DEFAULT_TEMPERATURE_FORECAST, ModelFrameAsset};
use crate::devices::{
    LightingConfig, ModelConfig, ModelEntry, ThermostatConfig, UncontrolledConfig,
};
use crate::frame::{DEFAULT_CURVE_POINTS, ModelFrame};
use crate::information::InformationLookup;
use crate::occupancy::{DayEntryConfig, OccupancyConfig, OccupancyManager};
use crate::transport::Transport;

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"assets[0].demand_curve_points"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Re-roots the field path under `prefix`.
    pub fn within(self, prefix: &str) -> Self {
        Self {
            field: format!("{prefix}.{}", self.field),
            message: self.message,
        }
    }
}

/// Top-level node configuration parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    /// Demo harness parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

/// Identity of the node hosting the assets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
    pub name: String,
    /// IANA timezone used for schedules and model hours.
    pub timezone: String,
    /// Topic receiving per-market delivery records.
    pub record_topic: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: "transactive-node".to_string(),
            timezone: "UTC".to_string(),
            record_topic: "record/delivery".to_string(),
        }
    }
}

/// Parameters of the synthetic market replay.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Master random seed.
    pub seed: u64,
    /// Start of the first delivery interval (RFC 3339).
    pub start: String,
    /// Number of markets to replay, one per interval.
    pub intervals: usize,
    pub interval_minutes: u32,
    /// Time between market clearing and delivery.
    pub delivery_lead_minutes: u32,
    /// Intervals covered by each market.
    pub market_intervals: usize,
    /// Mean outdoor air temperature (°C).
    pub oat_mean: f64,
    /// Daily swing around the mean (°C).
    pub oat_amplitude: f64,
    pub oat_noise_std: f64,
    /// Mean price ($/kWh).
    pub price_mean: f64,
    pub price_amplitude: f64,
    /// Forecast price standard deviation handed to assets.
    pub price_std_dev: f64,
    /// Noise between forecast and cleared price.
    pub price_noise_std: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            start: "2024-06-03T07:00:00Z".to_string(),
            intervals: 24,
            interval_minutes: 60,
            delivery_lead_minutes: 10,
            market_intervals: 3,
            oat_mean: 24.0,
            oat_amplitude: 6.0,
            oat_noise_std: 0.5,
            price_mean: 0.10,
            price_amplitude: 0.04,
            price_std_dev: 0.02,
            price_noise_std: 0.01,
        }
    }
}

impl SimulationConfig {
    /// Parses [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the timestamp is not RFC 3339.
    pub fn start_time(&self) -> Result<DateTime<Utc>, ConfigError> {
        DateTime::parse_from_rfc3339(&self.start)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ConfigError::new("simulation.start", format!("\"{}\": {e}", self.start)))
    }
}

fn default_temperature_forecast() -> String {
    DEFAULT_TEMPERATURE_FORECAST.to_string()
}

fn default_curve_points() -> usize {
    DEFAULT_CURVE_POINTS
}

fn default_price_multiplier() -> f64 {
    1.0
}

/// One controllable asset.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetConfig {
    pub name: String,
    /// Power (kW) scheduled when no model can predict.
    #[serde(default)]
    pub default_power: f64,
    /// Name of the outdoor-temperature forecast series.
    #[serde(default = "default_temperature_forecast")]
    pub temperature_forecast: String,
    /// Points per flexibility curve (>= 2).
    #[serde(default = "default_curve_points")]
    pub demand_curve_points: usize,
    /// Bid price range half-width, in price standard deviations.
    #[serde(default = "default_price_multiplier")]
    pub price_multiplier: f64,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub actuation: ActuationConfig,
    /// Weekly schedule. Without one the asset never actuates; an empty
    /// table means always occupied.
    #[serde(default)]
    pub occupancy: Option<OccupancyConfig>,
}

impl AssetConfig {
    fn occupancy_manager(&self, tz: Tz, field: &str) -> Result<Option<OccupancyManager>, ConfigError> {
        self.occupancy
            .as_ref()
            .map(|cfg| OccupancyManager::from_config(cfg, tz))
            .transpose()
            .map_err(|e| e.within(field))
    }

    fn model_frame(&self, field: &str) -> Result<ModelFrame, ConfigError> {
        let mut frame = ModelFrame::new(self.demand_curve_points).map_err(|e| e.within(field))?;
        for (j, entry) in self.models.iter().enumerate() {
            let model_field = format!("{field}.models[{j}]");
            let model = entry.model.build(self.demand_curve_points, &model_field)?;
            frame.insert(entry.topic.clone(), model);
        }
        Ok(frame)
    }

    fn check(&self, tz: Tz, field: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(ConfigError::new(format!("{field}.name"), "must not be empty"));
        }
        if !self.default_power.is_finite() {
            errors.push(ConfigError::new(format!("{field}.default_power"), "must be finite"));
        }
        if !(self.price_multiplier.is_finite() && self.price_multiplier >= 0.0) {
            errors.push(ConfigError::new(
                format!("{field}.price_multiplier"),
                "must be a finite value >= 0",
            ));
        }

        let mut topics = HashSet::new();
        for (j, entry) in self.models.iter().enumerate() {
            if !topics.insert(entry.topic.as_str()) {
                errors.push(ConfigError::new(
                    format!("{field}.models[{j}].topic"),
                    format!("duplicate topic \"{}\"", entry.topic),
                ));
            }
        }
        if let Err(e) = self.model_frame(field) {
            errors.push(e);
        }
        if let Err(e) = self.occupancy_manager(tz, field) {
            errors.push(e);
        }
        errors.extend(self.actuation.validate(&format!("{field}.actuation")));
        errors
    }

    /// Builds the asset, its model frame and its actuation manager.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] hit while building.
    pub fn build(
        &self,
        tz: Tz,
        transport: &Transport,
        information: Option<Arc<dyn InformationLookup>>,
        field: &str,
    ) -> Result<ModelFrameAsset, ConfigError> {
        let frame = self.model_frame(field)?;
        let occupancy = self.occupancy_manager(tz, field)?.map(Arc::new);
        let strategy =
            self.actuation
                .build_strategy(&self.name, transport, &format!("{field}.actuation"))?;
        let manager = ActuationManager::new(&self.name, &self.actuation, occupancy, strategy);

        let asset = ModelFrameAsset::new(&self.name, tz, frame, manager)
            .with_default_power(self.default_power)
            .with_price_multiplier(self.price_multiplier);
        Ok(match information {
            Some(info) => asset.with_information(&self.temperature_forecast, info),
            None => asset,
        })
    }
}

impl NodeConfig {
    /// Names accepted by [`from_preset`](Self::from_preset).
    pub const PRESETS: &[&str] = &["demo"];

    /// Two office buildings: one driving thermostats directly, one handing
    /// targets to a load-control coordinator.
    pub fn demo() -> Self {
        let tz = "America/Los_Angeles".to_string();
        Self {
            node: NodeSection {
                name: "campus".to_string(),
                timezone: tz,
                ..NodeSection::default()
            },
            simulation: SimulationConfig::default(),
            assets: vec![
                AssetConfig {
                    name: "building1".to_string(),
                    default_power: -5.0,
                    temperature_forecast: default_temperature_forecast(),
                    demand_curve_points: 3,
                    price_multiplier: 1.0,
                    models: vec![
                        ModelEntry {
                            topic: "devices/building1/rtu1".to_string(),
                            model: ModelConfig::Thermostat(demo_thermostat(
                                "building1/rtu1/ZoneCoolingTemperatureSetPoint",
                            )),
                        },
                        ModelEntry {
                            topic: "devices/building1/rtu2".to_string(),
                            model: ModelConfig::Thermostat(demo_thermostat(
                                "building1/rtu2/ZoneCoolingTemperatureSetPoint",
                            )),
                        },
                        ModelEntry {
                            topic: "devices/building1/lights".to_string(),
                            model: ModelConfig::Lighting(LightingConfig {
                                rated_power: 6.0,
                                default_lighting_schedule: Some(
                                    (0..24)
                                        .map(|h| if (7..19).contains(&h) { 0.9 } else { 0.1 })
                                        .collect(),
                                ),
                                max_set_point_offset: 0.1,
                                actuation_topic: Some("building1/lights/DimmingLevel".to_string()),
                            }),
                        },
                        ModelEntry {
                            topic: "devices/building1/plug_loads".to_string(),
                            model: ModelConfig::UncontrolledLoad(UncontrolledConfig {
                                uncontrolled_load_schedule: (0..24)
                                    .map(|h| if (7..19).contains(&h) { 3.0 } else { 1.2 })
                                    .collect(),
                            }),
                        },
                    ],
                    actuation: ActuationConfig {
                        strategy: StrategyConfig::TnsDirectRatio {
                            actuator_identity: "platform.actuator".to_string(),
                            write_timeout_secs: 15,
                            read_timeout_secs: 10,
                        },
                        ..ActuationConfig::default()
                    },
                    occupancy: Some(office_hours()),
                },
                AssetConfig {
                    name: "building2".to_string(),
                    default_power: -4.0,
                    temperature_forecast: default_temperature_forecast(),
                    demand_curve_points: DEFAULT_CURVE_POINTS,
                    price_multiplier: 1.5,
                    models: vec![ModelEntry {
                        topic: "devices/building2/rtu1".to_string(),
                        model: ModelConfig::Thermostat(demo_thermostat(
                            "building2/rtu1/ZoneCoolingTemperatureSetPoint",
                        )),
                    }],
                    actuation: ActuationConfig {
                        strategy: StrategyConfig::Ilc {
                            ilc_target_topic: "ilc/building2/target".to_string(),
                            publish_timeout_secs: 10,
                        },
                        ..ActuationConfig::default()
                    },
                    occupancy: Some(office_hours()),
                },
            ],
        }
    }

    /// Returns a built-in preset by name.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "demo" => Ok(Self::demo()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a node configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a node configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Parses the node timezone.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for names unknown to the IANA database.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.node.timezone.parse::<Tz>().map_err(|_| {
            ConfigError::new(
                "node.timezone",
                format!("unknown timezone \"{}\"", self.node.timezone),
            )
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let tz = match self.timezone() {
            Ok(tz) => tz,
            Err(e) => {
                errors.push(e);
                Tz::UTC
            }
        };

        let s = &self.simulation;
        if let Err(e) = s.start_time() {
            errors.push(e);
        }
        if s.intervals == 0 {
            errors.push(ConfigError::new("simulation.intervals", "must be > 0"));
        }
        if s.interval_minutes == 0 {
            errors.push(ConfigError::new("simulation.interval_minutes", "must be > 0"));
        }
        if s.market_intervals == 0 {
            errors.push(ConfigError::new("simulation.market_intervals", "must be > 0"));
        }
        if s.delivery_lead_minutes >= s.interval_minutes.max(1) {
            errors.push(ConfigError::new(
                "simulation.delivery_lead_minutes",
                "must be < simulation.interval_minutes",
            ));
        }
        for (name, value) in [
            ("simulation.oat_noise_std", s.oat_noise_std),
            ("simulation.price_std_dev", s.price_std_dev),
            ("simulation.price_noise_std", s.price_noise_std),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                errors.push(ConfigError::new(name, "must be a finite value >= 0"));
            }
        }

        let mut names = HashSet::new();
        for (i, asset) in self.assets.iter().enumerate() {
            let field = format!("assets[{i}]");
            if !names.insert(asset.name.as_str()) {
                errors.push(ConfigError::new(
                    format!("{field}.name"),
                    format!("duplicate asset \"{}\"", asset.name),
                ));
            }
            errors.extend(asset.check(tz, &field));
        }

        errors
    }

    /// Builds every configured asset.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn build_assets(
        &self,
        transport: &Transport,
        information: Option<Arc<dyn InformationLookup>>,
    ) -> Result<Vec<ModelFrameAsset>, ConfigError> {
        let tz = self.timezone()?;
        self.assets
            .iter()
            .enumerate()
            .map(|(i, asset)| asset.build(tz, transport, information.clone(), &format!("assets[{i}]")))
            .collect()
    }
}

fn office_hours() -> OccupancyConfig {
    let mut schedule = OccupancyConfig::new();
    for day in ["monday", "tuesday", "wednesday", "thursday", "friday"] {
        schedule.insert(
            day.to_string(),
            DayEntryConfig::Window {
                start: "06:00".to_string(),
                end: "18:00".to_string(),
            },
        );
    }
    for day in ["saturday", "sunday"] {
        schedule.insert(day.to_string(), DayEntryConfig::Keyword("always_off".to_string()));
    }
    schedule
}

fn demo_thermostat(actuation_topic: &str) -> ThermostatConfig {
    ThermostatConfig {
        c1: vec![-0.12; 24],
        c2: vec![0.08; 24],
        c3: vec![0.03; 24],
        c4: (0..24)
            .map(|h| if (8..18).contains(&h) { 0.6 } else { 0.45 })
            .collect(),
        rated_power: 3.0,
        nominal_set_point: 22.8,
        max_set_point_offset: 2.0,
        oat: 20.0,
        csp: 22.8,
        room_temp: 23.0,
        actuation_topic: Some(actuation_topic.to_string()),
    }
}
