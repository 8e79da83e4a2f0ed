use std::collections::HashMap;

use vole_core::{Error, Result};
use vole_losses::{loss_from_name, AdaptivePowerConfig, LossFn, LossOptions};

// Hyperparameters — a string-keyed configuration store
//
// Losses and their parameters are often chosen from experiment
// configuration rather than code. `Params` holds typed values under string
// keys; `loss_from_params` reads the conventional keys below and builds the
// configured loss, tagging errors with the offending key.

/// Key selecting the loss by name. Defaults to `"mae"`.
pub const PARAM_LOSS: &str = "loss";

/// Key for the Huber loss delta. Defaults to 1.0.
pub const PARAM_HUBER_DELTA: &str = "huber_loss_delta";

/// Keys for the adaptive power loss shape. Defaults: near 2.0, far 1.0,
/// middle 1.0, sharpness 1.0.
pub const PARAM_ADAPTIVE_NEAR: &str = "adaptive_loss_near";
pub const PARAM_ADAPTIVE_FAR: &str = "adaptive_loss_far";
pub const PARAM_ADAPTIVE_MIDDLE: &str = "adaptive_loss_middle";
pub const PARAM_ADAPTIVE_SHARPNESS: &str = "adaptive_loss_sharpness";

/// A typed hyperparameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

/// String-keyed hyperparameter store with typed, defaulted reads.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Read a float, accepting an integer value too. Missing keys yield
    /// `default`; a value of another type is an error.
    pub fn float_or(&self, name: &str, default: f64) -> Result<f64> {
        match self.values.get(name) {
            None => Ok(default),
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(Error::Configuration(format!(
                "hyperparameter {:?} should be a number, got {:?}",
                name, other
            ))),
        }
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str> {
        match self.values.get(name) {
            None => Ok(default),
            Some(ParamValue::Str(v)) => Ok(v),
            Some(other) => Err(Error::Configuration(format!(
                "hyperparameter {:?} should be a string, got {:?}",
                name, other
            ))),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.values.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(v)) => Ok(*v),
            Some(other) => Err(Error::Configuration(format!(
                "hyperparameter {:?} should be a bool, got {:?}",
                name, other
            ))),
        }
    }
}

/// Build the loss configured under [`PARAM_LOSS`] (default `"mae"`),
/// reading the loss-specific keys for Huber and the adaptive power loss.
pub fn loss_from_params(params: &Params) -> Result<LossFn> {
    let name = params.str_or(PARAM_LOSS, "mae")?;
    let opts = LossOptions {
        huber_delta: params.float_or(PARAM_HUBER_DELTA, 1.0)?,
        adaptive: AdaptivePowerConfig {
            power_near: params.float_or(PARAM_ADAPTIVE_NEAR, 2.0)?,
            power_far: params.float_or(PARAM_ADAPTIVE_FAR, 1.0)?,
            middle_delta: params.float_or(PARAM_ADAPTIVE_MIDDLE, 1.0)?,
            sharpness: params.float_or(PARAM_ADAPTIVE_SHARPNESS, 1.0)?,
        },
    };
    loss_from_name(name, &opts).map_err(|err| {
        Error::Configuration(format!(
            "invalid value {:?} for hyperparameter {:?}: {}",
            name, PARAM_LOSS, err
        ))
    })
}
