use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::PluginKind;

/// How a plugin treats NaN values after its warmup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NanPolicy {
    /// Post-warmup NaNs are tolerated (logged as a warning).
    Propagate,
    /// Plugin resolves missing values itself; NaN after warmup is a violation.
    Fill,
    /// NaN after warmup is a violation.
    Error,
}

impl NanPolicy {
    pub const ALL: [NanPolicy; 3] = [NanPolicy::Propagate, NanPolicy::Fill, NanPolicy::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            NanPolicy::Propagate => "propagate",
            NanPolicy::Fill => "fill",
            NanPolicy::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

/// Closed set of strategy output intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Hold,
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::Hold,
        Intent::EnterLong,
        Intent::EnterShort,
        Intent::ExitLong,
        Intent::ExitShort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Hold => "HOLD",
            Intent::EnterLong => "ENTER_LONG",
            Intent::EnterShort => "ENTER_SHORT",
            Intent::ExitLong => "EXIT_LONG",
            Intent::ExitShort => "EXIT_SHORT",
        }
    }

    /// Exact, case-sensitive match against the wire names.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.as_str() == s)
    }

    /// Everything except HOLD changes position.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Intent::Hold)
    }
}

/// Bar fields an indicator may declare as inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl InputField {
    pub const ALL: [InputField; 5] = [
        InputField::Open,
        InputField::High,
        InputField::Low,
        InputField::Close,
        InputField::Volume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputField::Open => "open",
            InputField::High => "high",
            InputField::Low => "low",
            InputField::Close => "close",
            InputField::Volume => "volume",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

/// Closed set of parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    Bool,
    String,
    Enum,
}

impl ParamType {
    pub const ALL: [ParamType; 5] = [
        ParamType::Int,
        ParamType::Float,
        ParamType::Bool,
        ParamType::String,
        ParamType::Enum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::String => "string",
            ParamType::Enum => "enum",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ParamType::Int | ParamType::Float)
    }
}

/// A concrete parameter value (defaults and bounds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// Normalized parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub default: ParamValue,
    pub min: Option<ParamValue>,
    pub max: Option<ParamValue>,
    /// Enum members (enum params only; empty otherwise).
    pub values: Vec<String>,
}

/// Kind-specific part of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KindContract {
    Indicator {
        inputs: Vec<InputField>,
        outputs: Vec<String>,
    },
    Strategy {
        /// Indicator ids this strategy depends on.
        requires: Vec<String>,
        intents: BTreeSet<Intent>,
    },
}

/// Manifest after closed-world validation. Only `mqk-manifest` builds these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub name: Option<String>,
    pub version: String,
    pub description: Option<String>,
    pub params: Vec<ParamSpec>,
    pub warmup_bars: u32,
    pub nan_policy: NanPolicy,
    pub contract: KindContract,
}

impl Manifest {
    pub fn kind(&self) -> PluginKind {
        match self.contract {
            KindContract::Indicator { .. } => PluginKind::Indicator,
            KindContract::Strategy { .. } => PluginKind::Strategy,
        }
    }

    /// Parameter defaults keyed by name, as handed to the plugin at runtime.
    pub fn default_params(&self) -> BTreeMap<String, ParamValue> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect()
    }

    /// Indicator ids required by a strategy (empty for indicators).
    pub fn required_indicators(&self) -> &[String] {
        match &self.contract {
            KindContract::Strategy { requires, .. } => requires,
            KindContract::Indicator { .. } => &[],
        }
    }
}
