//! Known parameter identifiers and their presentation metadata.
//!
//! The table is configuration data: it is built once and never mutated.
//! Hosts with a different firmware can load their own from JSON.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const SYSTEM_MODE: &str = "CAPPL:LOCAL.anlage_betriebsart";
pub const OUTSIDE_TEMPERATURE: &str = "CAPPL:LOCAL.L_aussentemperatur_ist";

pub fn heating_circuit_mode(circuit: usize) -> String {
    format!("CAPPL:LOCAL.hk[{circuit}].betriebsart[0]")
}

pub fn hot_water_mode(tank: usize) -> String {
    format!("CAPPL:LOCAL.ww[{tank}].betriebsart[0]")
}

pub fn boiler_mode(boiler: usize) -> String {
    format!("CAPPL:FA[{boiler}].betriebsart_fa")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Mode,
    General,
    Boiler,
    HeatingCircuit,
    HotWater,
    SupplyPump,
    Buffer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub key: String,
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub category: Category,
    /// Part of the reduced set polled every cycle.
    #[serde(default)]
    pub core: bool,
    #[serde(default)]
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<ParameterSpec>,
}

type Row = (
    &'static str,
    &'static str,
    &'static str,
    Option<&'static str>,
    Category,
    bool,
    bool,
);

const C: Option<&str> = Some("°C");

#[rustfmt::skip]
const BUILTIN: &[Row] = &[
    // key, identifier, name, unit, category, core, writable
    ("system_mode", SYSTEM_MODE, "System Operating Mode", None, Category::Mode, true, true),
    ("hk1_mode", "CAPPL:LOCAL.hk[0].betriebsart[0]", "HK1 Operating Mode", None, Category::Mode, true, true),
    ("ww1_mode", "CAPPL:LOCAL.ww[0].betriebsart[0]", "Hot Water Operating Mode", None, Category::Mode, true, true),
    ("pellematic_mode", "CAPPL:FA[0].betriebsart_fa", "Pellematic Operating Mode", None, Category::Mode, false, true),
    ("outside_temperature", OUTSIDE_TEMPERATURE, "Outside Temperature", C, Category::General, true, false),
    ("software_version", "CAPPL:LOCAL.touch[0].version", "Software Version", None, Category::General, false, false),
    ("controller_clock", "CAPPL:LOCAL.L_fernwartung_datum_zeit_sek", "Controller Clock", None, Category::General, false, false),
    ("error_count", "CAPPL:LOCAL.L_zaehler_fehler", "Error Count", None, Category::General, true, false),
    ("boiler_status", "CAPPL:FA[0].L_kesselstatus", "Boiler Status", None, Category::Boiler, true, false),
    ("boiler_temperature", "CAPPL:FA[0].L_kesseltemperatur", "Boiler Temperature", C, Category::Boiler, true, false),
    ("boiler_target_temperature", "CAPPL:FA[0].L_kesseltemperatur_soll_anzeige", "Boiler Target Temperature", C, Category::Boiler, true, false),
    ("exhaust_temperature", "CAPPL:FA[0].L_abgastemperatur", "Exhaust Temperature", C, Category::Boiler, false, false),
    ("firebox_temperature", "CAPPL:FA[0].L_feuerraumtemperatur", "Firebox Temperature", C, Category::Boiler, false, false),
    ("fan_speed", "CAPPL:FA[0].L_luefterdrehzahl", "Fan Speed", Some("%"), Category::Boiler, false, false),
    ("exhaust_fan_speed", "CAPPL:FA[0].L_saugzugdrehzahl", "Exhaust Fan Speed", Some("%"), Category::Boiler, false, false),
    ("underpressure", "CAPPL:FA[0].L_unterdruck", "Underpressure", Some("Pa"), Category::Boiler, false, false),
    ("pellet_fill_level", "CAPPL:FA[0].L_fuellstand_aktuell", "Pellet Fill Level", Some("kg"), Category::Boiler, false, false),
    ("burner_starts", "CAPPL:FA[0].L_brennerstarts", "Burner Starts", None, Category::Boiler, false, false),
    ("burner_runtime", "CAPPL:FA[0].L_brennerlaufzeit_anzeige", "Burner Runtime", Some("h"), Category::Boiler, false, false),
    ("hk1_flow_temperature", "CAPPL:LOCAL.L_hk[0].vorlauftemp_ist", "HK1 Flow Temperature", C, Category::HeatingCircuit, true, false),
    ("hk1_flow_target_temperature", "CAPPL:LOCAL.L_hk[0].vorlauftemp_soll", "HK1 Flow Target Temperature", C, Category::HeatingCircuit, false, false),
    ("hk1_room_temperature", "CAPPL:LOCAL.L_hk[0].raumtemp_ist", "HK1 Room Temperature", C, Category::HeatingCircuit, true, false),
    ("hk1_room_target_temperature", "CAPPL:LOCAL.L_hk[0].raumtemp_soll", "HK1 Room Target Temperature", C, Category::HeatingCircuit, false, false),
    ("hk1_pump", "CAPPL:LOCAL.L_hk[0].pumpe", "HK1 Pump", None, Category::HeatingCircuit, false, false),
    ("hk1_room_temp_heating", "CAPPL:LOCAL.hk[0].raumtemp_heizen", "HK1 Room Temp Heating", C, Category::HeatingCircuit, false, true),
    ("hk1_room_temp_lowering", "CAPPL:LOCAL.hk[0].raumtemp_absenken", "HK1 Room Temp Lowering", C, Category::HeatingCircuit, false, true),
    ("ww1_temperature", "CAPPL:LOCAL.L_ww[0].einschaltfuehler_ist", "Hot Water Temperature", C, Category::HotWater, true, false),
    ("ww1_target_temperature", "CAPPL:LOCAL.L_ww[0].temp_soll", "Hot Water Target Temperature", C, Category::HotWater, false, false),
    ("ww1_pump", "CAPPL:LOCAL.L_ww[0].pumpe", "Hot Water Pump", None, Category::HotWater, false, false),
    ("ww1_temp_heating", "CAPPL:LOCAL.ww[0].temp_heizen", "Hot Water Temp Heating", C, Category::HotWater, false, true),
    ("ww1_temp_lowering", "CAPPL:LOCAL.ww[0].temp_absenken", "Hot Water Temp Lowering", C, Category::HotWater, false, true),
    ("supply_pump", "CAPPL:LOCAL.L_zubrp[0].pumpe", "Supply Pump", None, Category::SupplyPump, false, false),
    ("buffer_top_temperature", "CAPPL:LOCAL.L_pu[0].einschaltfuehler_ist", "Buffer Top Temperature", C, Category::Buffer, true, false),
    ("buffer_bottom_temperature", "CAPPL:LOCAL.L_pu[0].ausschaltfuehler_ist", "Buffer Bottom Temperature", C, Category::Buffer, false, false),
    ("buffer_pump", "CAPPL:LOCAL.L_pu[0].pumpe", "Buffer Pump", None, Category::Buffer, true, false),
];

impl Catalog {
    /// The built-in table, constructed on first use.
    pub fn builtin() -> &'static Catalog {
        static BUILTIN_CATALOG: OnceLock<Catalog> = OnceLock::new();
        BUILTIN_CATALOG.get_or_init(|| Catalog {
            entries: BUILTIN
                .iter()
                .map(|&(key, identifier, name, unit, category, core, writable)| ParameterSpec {
                    key: key.to_string(),
                    identifier: identifier.to_string(),
                    name: name.to_string(),
                    unit: unit.map(str::to_string),
                    category,
                    core,
                    writable,
                })
                .collect(),
        })
    }

    /// Load a catalog from a JSON array of parameter entries.
    pub fn from_json(text: &str) -> Result<Catalog> {
        let entries: Vec<ParameterSpec> =
            serde_json::from_str(text).map_err(|e| Error::Config(format!("catalog: {e}")))?;
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.key == entry.key) {
                return Err(Error::Config(format!("catalog: duplicate key {}", entry.key)));
            }
        }
        Ok(Catalog { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, identifier: &str) -> Option<&ParameterSpec> {
        self.entries.iter().find(|e| e.identifier == identifier)
    }

    pub fn find_key(&self, key: &str) -> Option<&ParameterSpec> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &ParameterSpec> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    pub fn core_identifiers(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.core)
            .map(|e| e.identifier.as_str())
            .collect()
    }

    pub fn all_identifiers(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.identifier.as_str()).collect()
    }
}
