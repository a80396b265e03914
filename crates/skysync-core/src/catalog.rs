//! Variable and event descriptor catalog
//!
//! The catalog is an explicitly constructed lookup table describing which
//! paths are backed by simulator variables and which map to discrete
//! trigger events. It is built once at startup from the builtin table plus
//! an optional RON extension catalog, then wrapped in an `Arc` and treated
//! as read-only for the process lifetime.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Data kind of a simulator-backed variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataKind {
    /// Continuous numeric value
    Float,
    /// Two-state switch
    Bool,
    /// Discrete index (detents, transponder codes)
    Int,
    /// Free-form text
    String,
}

/// Describes one simulator-backed path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDescriptor {
    /// Stable dotted path, e.g. `Controls.Flaps`
    pub path: String,
    /// Measurement unit as the simulator reports it
    pub unit: String,
    /// Data kind
    pub kind: DataKind,
    /// Whether the variable accepts writes
    pub writable: bool,
    /// Suppress jitter below this magnitude; overrides the diff epsilon
    #[serde(default)]
    pub min_delta: Option<f64>,
    /// Bound discrete event for write-only controls
    #[serde(default)]
    pub event: Option<String>,
}

/// Maps a path to an underlying discrete trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Dotted path the trigger is exposed as
    pub path: String,
    /// Underlying trigger name, e.g. `LANDING_LIGHTS_SET`
    pub event: String,
    /// Grouping for diagnostics ("lights", "electrical", ...)
    pub category: String,
}

/// Extension catalog shape as loaded from RON
///
/// ```ron
/// (
///     vars: [
///         (path: "Controls.SpoilerHandle", unit: "position", kind: Float,
///          writable: true, min_delta: Some(0.01), event: None),
///     ],
///     events: [
///         (path: "Systems.CabinLight", event: "CABIN_LIGHTS_SET", category: "lights"),
///     ],
/// )
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogExtension {
    /// Additional variable descriptors
    #[serde(default)]
    pub vars: Vec<VarDescriptor>,
    /// Additional event descriptors
    #[serde(default)]
    pub events: Vec<EventDescriptor>,
}

impl CatalogExtension {
    /// Parse an extension catalog from RON text
    ///
    /// Descriptors with an empty path would be unreachable through the
    /// case-insensitive lookups and are rejected.
    pub fn from_ron(text: &str) -> Result<Self> {
        let extension: Self = ron::from_str(text)?;
        for path in extension
            .vars
            .iter()
            .map(|v| &v.path)
            .chain(extension.events.iter().map(|e| &e.path))
        {
            if path.trim().is_empty() {
                return Err(Error::InvalidPath(path.clone()));
            }
        }
        Ok(extension)
    }
}

/// Immutable lookup table of variable and event descriptors
///
/// Lookups are case-insensitive; descriptors keep their declared casing.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    vars: IndexMap<String, VarDescriptor>,
    events: IndexMap<String, EventDescriptor>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// The builtin aircraft-state catalog
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        let vars = [
            ("Controls.Throttle", "percent over 100", DataKind::Float, Some(0.02), None),
            ("Controls.Flaps", "position", DataKind::Float, None, None),
            ("Controls.GearDown", "bool", DataKind::Bool, None, Some("GEAR_HANDLE_SET")),
            ("Controls.ParkingBrake", "bool", DataKind::Bool, None, Some("PARKING_BRAKE_SET")),
            ("Controls.Aileron", "position", DataKind::Float, Some(0.02), None),
            ("Controls.Elevator", "position", DataKind::Float, Some(0.02), None),
            ("Controls.Rudder", "position", DataKind::Float, Some(0.02), None),
            ("Systems.LightsOn", "bool", DataKind::Bool, None, Some("LANDING_LIGHTS_SET")),
            ("Systems.DoorOpen", "bool", DataKind::Bool, None, Some("TOGGLE_AIRCRAFT_EXIT")),
            ("Systems.AvionicsOn", "bool", DataKind::Bool, None, Some("AVIONICS_MASTER_SET")),
            ("Systems.EngineOn", "bool", DataKind::Bool, None, None),
        ];
        for (path, unit, kind, min_delta, event) in vars {
            catalog.insert_var(VarDescriptor {
                path: path.to_string(),
                unit: unit.to_string(),
                kind,
                writable: true,
                min_delta,
                event: event.map(str::to_string),
            });
        }

        let events = [
            ("Systems.BeaconLight", "BEACON_LIGHTS_SET", "lights"),
            ("Systems.NavLight", "NAV_LIGHTS_SET", "lights"),
            ("Systems.StrobeLight", "STROBES_SET", "lights"),
            ("Systems.TaxiLight", "TAXI_LIGHTS_SET", "lights"),
            ("Systems.BatteryMaster", "MASTER_BATTERY_SET", "electrical"),
            ("Systems.Alternator", "MASTER_ALTERNATOR_SET", "electrical"),
            ("Systems.FuelPump", "FUEL_PUMP_SET", "fuel"),
            ("Systems.PitotHeat", "PITOT_HEAT_SET", "anti-ice"),
            ("Systems.AntiIce", "ANTI_ICE_SET", "anti-ice"),
            ("Cabin.AutopilotMaster", "AP_MASTER", "autopilot"),
            ("Avionics.AutopilotNavHold", "AP_NAV1_HOLD", "autopilot"),
        ];
        for (path, event, category) in events {
            catalog.insert_event(EventDescriptor {
                path: path.to_string(),
                event: event.to_string(),
                category: category.to_string(),
            });
        }

        catalog
    }

    /// Add one variable descriptor (construction time only)
    pub fn insert_var(&mut self, descriptor: VarDescriptor) {
        self.vars
            .insert(descriptor.path.to_ascii_lowercase(), descriptor);
    }

    /// Add one event descriptor (construction time only)
    pub fn insert_event(&mut self, descriptor: EventDescriptor) {
        self.events
            .insert(descriptor.path.to_ascii_lowercase(), descriptor);
    }

    /// Merge a parsed extension catalog (construction time only)
    ///
    /// Extension entries shadow builtin entries with the same path.
    pub fn extend(&mut self, extension: CatalogExtension) {
        for var in extension.vars {
            self.insert_var(var);
        }
        for event in extension.events {
            self.insert_event(event);
        }
    }

    /// Look up a variable descriptor by path (case-insensitive)
    pub fn var(&self, path: &str) -> Option<&VarDescriptor> {
        self.vars.get(&path.to_ascii_lowercase())
    }

    /// Look up an event descriptor by path (case-insensitive)
    pub fn event(&self, path: &str) -> Option<&EventDescriptor> {
        self.events.get(&path.to_ascii_lowercase())
    }

    /// Jitter tolerance for a path, when one is declared
    pub fn min_delta(&self, path: &str) -> Option<f64> {
        self.var(path).and_then(|d| d.min_delta)
    }

    /// Iterate over all variable descriptors
    pub fn vars(&self) -> impl Iterator<Item = &VarDescriptor> {
        self.vars.values()
    }

    /// Iterate over all event descriptors
    pub fn events(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.events.values()
    }

    /// Paths every peer should report by default
    pub fn default_paths(&self) -> Vec<String> {
        self.vars.values().map(|d| d.path.clone()).collect()
    }
}
