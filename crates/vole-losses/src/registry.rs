use std::fmt;
use std::str::FromStr;

use vole_core::{Error, Result};

use crate::losses::{
    adaptive_power_loss, binary_crossentropy, binary_crossentropy_logits,
    categorical_cross_entropy, categorical_cross_entropy_logits, huber_loss, mean_absolute_error,
    mean_squared_error, sparse_categorical_cross_entropy_logits, AdaptivePowerConfig,
};
use crate::LossFn;

/// The losses constructible by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossKind {
    Mae,
    Mse,
    Huber,
    Apl,
    BinCross,
    BinCrossLogits,
    CategoricalCross,
    CategoricalCrossLogits,
    SparseCrossLogits,
}

impl LossKind {
    pub const ALL: [LossKind; 9] = [
        LossKind::Mae,
        LossKind::Mse,
        LossKind::Huber,
        LossKind::Apl,
        LossKind::BinCross,
        LossKind::BinCrossLogits,
        LossKind::CategoricalCross,
        LossKind::CategoricalCrossLogits,
        LossKind::SparseCrossLogits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::Mae => "mae",
            LossKind::Mse => "mse",
            LossKind::Huber => "huber",
            LossKind::Apl => "apl",
            LossKind::BinCross => "bin_cross",
            LossKind::BinCrossLogits => "bin_cross_logits",
            LossKind::CategoricalCross => "categorical_cross",
            LossKind::CategoricalCrossLogits => "categorical_cross_logits",
            LossKind::SparseCrossLogits => "sparse_cross_logits",
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.to_ascii_lowercase();
        LossKind::ALL
            .iter()
            .find(|k| k.as_str() == lowered)
            .copied()
            .ok_or_else(|| {
                let known: Vec<&str> = LossKind::ALL.iter().map(|k| k.as_str()).collect();
                Error::Configuration(format!(
                    "unknown loss {:?}, known losses are \"{}\"",
                    s,
                    known.join("\", \"")
                ))
            })
    }
}

/// Parameters for the configurable losses; the fixed losses ignore it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossOptions {
    /// Delta for [`LossKind::Huber`].
    pub huber_delta: f64,
    /// Shape of [`LossKind::Apl`].
    pub adaptive: AdaptivePowerConfig,
}

impl Default for LossOptions {
    fn default() -> Self {
        LossOptions {
            huber_delta: 1.0,
            adaptive: AdaptivePowerConfig::default(),
        }
    }
}

/// Construct the loss function for `kind` with `opts`.
pub fn make_loss(kind: LossKind, opts: &LossOptions) -> Result<LossFn> {
    Ok(match kind {
        LossKind::Mae => Box::new(mean_absolute_error),
        LossKind::Mse => Box::new(mean_squared_error),
        LossKind::Huber => huber_loss(opts.huber_delta)?,
        LossKind::Apl => adaptive_power_loss(opts.adaptive)?,
        LossKind::BinCross => Box::new(binary_crossentropy),
        LossKind::BinCrossLogits => Box::new(binary_crossentropy_logits),
        LossKind::CategoricalCross => Box::new(categorical_cross_entropy),
        LossKind::CategoricalCrossLogits => Box::new(categorical_cross_entropy_logits),
        LossKind::SparseCrossLogits => Box::new(sparse_categorical_cross_entropy_logits),
    })
}

/// Parse `name` and construct the corresponding loss.
pub fn loss_from_name(name: &str, opts: &LossOptions) -> Result<LossFn> {
    make_loss(name.parse()?, opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for kind in LossKind::ALL {
            assert_eq!(kind.as_str().parse::<LossKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("MAE".parse::<LossKind>().unwrap(), LossKind::Mae);
        assert_eq!(
            "Bin_Cross_Logits".parse::<LossKind>().unwrap(),
            LossKind::BinCrossLogits
        );
    }

    #[test]
    fn test_unknown_name_lists_known_losses() {
        let err = "nope".parse::<LossKind>().unwrap_err();
        let msg = err.to_string();
        for kind in LossKind::ALL {
            assert!(msg.contains(kind.as_str()), "missing {} in {}", kind, msg);
        }
    }

    #[test]
    fn test_make_loss_validates_options() {
        let opts = LossOptions {
            huber_delta: 0.0,
            ..Default::default()
        };
        assert!(make_loss(LossKind::Huber, &opts).is_err());
        assert!(make_loss(LossKind::Mse, &opts).is_ok());
    }
}
