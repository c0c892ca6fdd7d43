use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::Frequency;

/// Engine configuration, layered as defaults < `recurra.toml` < `RECURRA_*` env vars.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default)]
    pub horizon: HorizonConfig,
    #[serde(default)]
    pub pattern_change: PatternChangeStrategy,
    /// Check the `latest_instance_date` invariant before every mutation
    #[serde(default = "default_verify_bookkeeping")]
    pub verify_bookkeeping: bool,
}

fn default_verify_bookkeeping() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon: HorizonConfig::default(),
            pattern_change: PatternChangeStrategy::default(),
            verify_bookkeeping: default_verify_bookkeeping(),
        }
    }
}

/// Look-ahead, in years past the query bound, for eager materialization.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HorizonConfig {
    pub daily_years: u32,
    pub weekly_years: u32,
    pub monthly_years: u32,
    pub yearly_years: u32,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            daily_years: 1,
            weekly_years: 2,
            monthly_years: 5,
            yearly_years: 10,
        }
    }
}

impl HorizonConfig {
    pub fn years_for(&self, frequency: Frequency) -> u32 {
        match frequency {
            Frequency::Daily => self.daily_years,
            Frequency::Weekly => self.weekly_years,
            Frequency::Monthly => self.monthly_years,
            Frequency::Yearly => self.yearly_years,
        }
    }
}

/// What a "this and following" update does when the new recurrence pattern
/// differs from the current one.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PatternChangeStrategy {
    /// End the current epoch before the target date and start a new epoch there.
    #[default]
    SplitSeries,
    /// Keep the current pattern and only apply the field changes.
    ApplyFieldsOnly,
}

impl EngineConfig {
    pub fn new() -> Result<Self, CoreError> {
        Self::from_figment(Self::figment())
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("recurra.toml"))
            .merge(Env::prefixed("RECURRA_").split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, CoreError> {
        let config: EngineConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        let h = &self.horizon;
        if h.daily_years == 0 || h.weekly_years == 0 || h.monthly_years == 0 || h.yearly_years == 0 {
            return Err(CoreError::InvalidInput(
                "horizon years must be at least 1 for every frequency".to_string(),
            ));
        }
        if !(h.daily_years <= h.weekly_years
            && h.weekly_years <= h.monthly_years
            && h.monthly_years <= h.yearly_years)
        {
            return Err(CoreError::InvalidInput(
                "horizon years must not shrink as the frequency period grows".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config =
            EngineConfig::from_figment(Figment::from(Serialized::defaults(EngineConfig::default())))
                .unwrap();
        assert_eq!(config.horizon.years_for(Frequency::Daily), 1);
        assert_eq!(config.horizon.years_for(Frequency::Weekly), 2);
        assert_eq!(config.horizon.years_for(Frequency::Monthly), 5);
        assert_eq!(config.horizon.years_for(Frequency::Yearly), 10);
        assert_eq!(config.pattern_change, PatternChangeStrategy::SplitSeries);
        assert!(config.verify_bookkeeping);
    }

    #[test]
    fn test_toml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "recurra.toml",
                r#"
                pattern_change = "apply_fields_only"

                [horizon]
                daily_years = 2
                weekly_years = 3
                monthly_years = 5
                yearly_years = 10
                "#,
            )?;
            jail.set_env("RECURRA_HORIZON__YEARLY_YEARS", "20");

            let config = EngineConfig::new().map_err(|e| e.to_string())?;
            assert_eq!(config.horizon.daily_years, 2);
            assert_eq!(config.horizon.weekly_years, 3);
            assert_eq!(config.horizon.yearly_years, 20);
            assert_eq!(config.pattern_change, PatternChangeStrategy::ApplyFieldsOnly);
            Ok(())
        });
    }

    #[test]
    fn test_rejects_shrinking_horizons() {
        Jail::expect_with(|jail| {
            jail.set_env("RECURRA_HORIZON__DAILY_YEARS", "7");
            let result = EngineConfig::new();
            assert!(matches!(result, Err(CoreError::InvalidInput(_))));
            Ok(())
        });
    }
}
