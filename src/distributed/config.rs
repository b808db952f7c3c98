//! Distributed coordinator configuration.

use crate::completion::SubCompletion;

/// Configuration for [`DistributedAnnealer`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistributedConfig {
    /// Budget of one round on every rank.
    pub sub_completion: SubCompletion,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            sub_completion: SubCompletion::Iterations(100_000),
        }
    }
}

impl DistributedConfig {
    pub fn with_sub_completion(mut self, sub: SubCompletion) -> Self {
        self.sub_completion = sub;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.sub_completion {
            SubCompletion::Iterations(0) => Err("sub-completion iterations must be positive".into()),
            SubCompletion::VariableTime { max, min } if max < min => {
                Err("variable sub-completion max must be at least min".into())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(DistributedConfig::default().validate().is_ok());
        let bad = DistributedConfig::default().with_sub_completion(SubCompletion::Iterations(0));
        assert!(bad.validate().is_err());
    }
}
