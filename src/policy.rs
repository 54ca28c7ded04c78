//! Reward schedule and difficulty retargeting
//!
//! Both policies are pure functions of configuration and committed block
//! data, so the ledger and chain validation can replay them from genesis.

use crate::{Address, Amount, Difficulty, Error, Result};
use serde::Serialize;
use std::time::Duration;

/// Halving reward schedule bounded by a total supply cap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardPolicy {
    pub base_reward: Amount,
    pub min_reward: Amount,
    pub halving_interval: u64,
    pub total_supply: Amount,
}

impl RewardPolicy {
    /// `max(base / 2^floor(height / interval), min)`
    pub fn current_reward(&self, height: u64) -> Amount {
        let halvings = height / self.halving_interval.max(1);
        self.base_reward.halved(halvings).max(self.min_reward)
    }

    /// Reward a block at `height` must carry given what is already minted;
    /// tapers to the remaining headroom under the cap
    pub fn expected_reward(&self, height: u64, minted: Amount) -> Amount {
        self.current_reward(height)
            .min(self.total_supply.saturating_sub(minted))
    }
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            base_reward: Amount::from_coins(100),
            min_reward: Amount::from_units(625_000_000),
            halving_interval: 210_000,
            total_supply: Amount::from_coins(500_000_000),
        }
    }
}

/// One-step retarget towards a target block time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifficultyPolicy {
    pub initial: Difficulty,
    pub min: Difficulty,
    pub max: Difficulty,
    #[serde(with = "duration_millis")]
    pub target_block_time: Duration,
}

impl DifficultyPolicy {
    /// Bound a difficulty to `[min, max]`
    pub fn clamp(&self, difficulty: Difficulty) -> Difficulty {
        difficulty.clamp(self.min, self.max)
    }

    /// Difficulty for the next job after a block landed `timestamp - previous`
    /// milliseconds after its parent
    pub fn retarget(&self, current: Difficulty, previous: i64, timestamp: i64) -> Difficulty {
        let interval = timestamp.saturating_sub(previous);
        let target = self.target_block_time.as_millis() as i64;
        let value = current.value();

        let next = if interval < target {
            value.saturating_add(1)
        } else if interval > target.saturating_mul(2) {
            value.saturating_sub(1)
        } else {
            value
        };

        self.clamp(Difficulty::saturating(next))
    }
}

impl Default for DifficultyPolicy {
    fn default() -> Self {
        Self {
            initial: Difficulty::saturating(2),
            min: Difficulty::saturating(1),
            max: Difficulty::saturating(6),
            target_block_time: Duration::from_secs(120),
        }
    }
}

/// Economic and consensus parameters the ledger is opened with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainParams {
    pub reward: RewardPolicy,
    pub difficulty: DifficultyPolicy,
    /// Share of the total supply minted in genesis
    pub premine_ratio: f64,
    /// Recipient of the premine; no premine is minted without one
    pub premine_address: Option<Address>,
}

impl ChainParams {
    /// Amount minted to the premine address in genesis
    pub fn premine_amount(&self) -> Amount {
        match self.premine_address {
            Some(_) => self.reward.total_supply.whole_fraction(self.premine_ratio),
            None => Amount::ZERO,
        }
    }

    /// Reject inconsistent economics
    pub fn validate(&self) -> Result<()> {
        if self.reward.halving_interval == 0 {
            return Err(Error::config("Halving interval must be greater than 0"));
        }
        if self.reward.min_reward > self.reward.base_reward {
            return Err(Error::config(format!(
                "Minimum reward {} exceeds base reward {}",
                self.reward.min_reward, self.reward.base_reward
            )));
        }
        if !(0.0..=1.0).contains(&self.premine_ratio) {
            return Err(Error::config(format!(
                "Premine ratio must be within [0, 1], got {}",
                self.premine_ratio
            )));
        }
        if self.difficulty.min > self.difficulty.max {
            return Err(Error::config(format!(
                "Minimum difficulty {} exceeds maximum {}",
                self.difficulty.min, self.difficulty.max
            )));
        }
        if self.difficulty.initial < self.difficulty.min || self.difficulty.initial > self.difficulty.max {
            return Err(Error::config(format!(
                "Initial difficulty {} is outside [{}, {}]",
                self.difficulty.initial, self.difficulty.min, self.difficulty.max
            )));
        }
        if self.difficulty.target_block_time.is_zero() {
            return Err(Error::config("Target block time must be greater than 0"));
        }
        if self.premine_amount() > self.reward.total_supply {
            return Err(Error::config("Premine exceeds total supply"));
        }
        Ok(())
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            reward: RewardPolicy::default(),
            difficulty: DifficultyPolicy::default(),
            premine_ratio: 0.05,
            premine_address: None,
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn difficulty(d: u8) -> Difficulty {
        Difficulty::new(d).unwrap()
    }

    #[test]
    fn test_reward_halves_on_interval_boundaries() {
        let policy = RewardPolicy {
            base_reward: Amount::from_coins(100),
            min_reward: Amount::from_units(625_000_000),
            halving_interval: 10,
            total_supply: Amount::from_coins(1_000_000),
        };

        assert_eq!(policy.current_reward(0), Amount::from_coins(100));
        assert_eq!(policy.current_reward(9), Amount::from_coins(100));
        assert_eq!(policy.current_reward(10), Amount::from_coins(50));
        assert_eq!(policy.current_reward(20), Amount::from_coins(25));
        assert_eq!(policy.current_reward(40).to_string(), "6.25");
        assert_eq!(policy.current_reward(50).to_string(), "6.25");
        assert_eq!(policy.current_reward(u64::MAX).to_string(), "6.25");
    }

    #[test]
    fn test_expected_reward_tapers_at_cap() {
        let policy = RewardPolicy {
            base_reward: Amount::from_coins(10),
            min_reward: Amount::from_coins(1),
            halving_interval: 100,
            total_supply: Amount::from_coins(105),
        };
        assert_eq!(policy.expected_reward(1, Amount::from_coins(90)), Amount::from_coins(10));
        assert_eq!(policy.expected_reward(2, Amount::from_coins(100)), Amount::from_coins(5));
        assert_eq!(policy.expected_reward(3, Amount::from_coins(105)), Amount::ZERO);
    }

    #[test]
    fn test_retarget_steps() {
        let policy = DifficultyPolicy {
            initial: difficulty(2),
            min: difficulty(1),
            max: difficulty(6),
            target_block_time: Duration::from_secs(10),
        };

        // Fast block raises difficulty
        assert_eq!(policy.retarget(difficulty(2), 0, 5_000), difficulty(3));
        // Within [target, 2 * target] holds
        assert_eq!(policy.retarget(difficulty(2), 0, 10_000), difficulty(2));
        assert_eq!(policy.retarget(difficulty(2), 0, 20_000), difficulty(2));
        // Slow block lowers difficulty
        assert_eq!(policy.retarget(difficulty(2), 0, 20_001), difficulty(1));
        // Bounds hold
        assert_eq!(policy.retarget(difficulty(6), 0, 1), difficulty(6));
        assert_eq!(policy.retarget(difficulty(1), 0, 60_000), difficulty(1));
    }

    #[test]
    fn test_premine_amount() {
        let mut params = ChainParams {
            reward: RewardPolicy {
                total_supply: Amount::from_coins(2000),
                ..RewardPolicy::default()
            },
            ..ChainParams::default()
        };
        assert_eq!(params.premine_amount(), Amount::ZERO);

        params.premine_address = Some(Address::new("a".repeat(64)).unwrap());
        assert_eq!(params.premine_amount(), Amount::from_coins(100));
    }

    #[test]
    fn test_validate_rejects_inconsistent_economics() {
        assert!(ChainParams::default().validate().is_ok());

        let mut params = ChainParams::default();
        params.reward.min_reward = Amount::from_coins(1_000);
        assert!(params.validate().is_err());

        let mut params = ChainParams::default();
        params.premine_ratio = 1.5;
        assert!(params.validate().is_err());

        let mut params = ChainParams::default();
        params.difficulty.min = difficulty(7);
        assert!(params.validate().is_err());

        let mut params = ChainParams::default();
        params.reward.halving_interval = 0;
        assert!(params.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_reward_never_below_min(height in any::<u64>(), interval in 1u64..1_000_000) {
            let policy = RewardPolicy { halving_interval: interval, ..RewardPolicy::default() };
            prop_assert!(policy.current_reward(height) >= policy.min_reward);
        }

        #[test]
        fn prop_reward_halves_exactly(k in 0u64..4, interval in 1u64..10_000) {
            let policy = RewardPolicy {
                base_reward: Amount::from_coins(100),
                min_reward: Amount::from_units(1),
                halving_interval: interval,
                total_supply: Amount::from_coins(500_000_000),
            };
            let before = policy.current_reward(k * interval);
            let after = policy.current_reward((k + 1) * interval);
            prop_assert_eq!(policy.current_reward((k + 1) * interval - 1), before);
            prop_assert_eq!(after.units() * 2, before.units());
        }
    }
}
