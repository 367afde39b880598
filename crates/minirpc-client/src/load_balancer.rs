use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use minirpc_common::protocol::error::{MinirpcError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Endpoint selection policy, as named in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadBalancePolicy {
    #[default]
    RoundRobin,
    Random,
    /// One weight per endpoint position
    WeightedRoundRobin(Vec<u32>),
}

impl FromStr for LoadBalancePolicy {
    type Err = MinirpcError;

    /// Accepts `round-robin`, `random` and `weighted:<w1>,<w2>,...`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "round-robin" | "rr" => Ok(LoadBalancePolicy::RoundRobin),
            "random" => Ok(LoadBalancePolicy::Random),
            _ => {
                let weights = s.strip_prefix("weighted:").ok_or_else(|| {
                    MinirpcError::Config(format!("Unknown load balancing policy '{}'", s))
                })?;
                let weights = weights
                    .split(',')
                    .map(|w| w.trim().parse::<u32>())
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(LoadBalancePolicy::WeightedRoundRobin(weights))
            }
        }
    }
}

impl fmt::Display for LoadBalancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalancePolicy::RoundRobin => write!(f, "round-robin"),
            LoadBalancePolicy::Random => write!(f, "random"),
            LoadBalancePolicy::WeightedRoundRobin(weights) => {
                let weights: Vec<String> = weights.iter().map(u32::to_string).collect();
                write!(f, "weighted:{}", weights.join(","))
            }
        }
    }
}

/// Picks one endpoint from a candidate list.
///
/// All variants are safe to share between concurrent callers; their cursor
/// or generator sits behind a mutex held only for the selection itself.
///
/// - **Round robin** advances its cursor before indexing, so a fresh balancer
///   over `[A, B, C]` yields `B, C, A, B, ...`.
/// - **Random** draws uniformly from one generator seeded once.
/// - **Weighted round robin** walks a fixed cycle of length `sum(weights)`;
///   weights `[3, 1]` over `[A, B]` repeat `A, A, B, A`.
///
/// # Example
///
/// ```
/// use minirpc_client::LoadBalancer;
///
/// let lb = LoadBalancer::round_robin();
/// let endpoints = vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()];
///
/// assert_eq!(lb.select(&endpoints).unwrap(), "b:2");
/// assert_eq!(lb.select(&endpoints).unwrap(), "c:3");
/// assert_eq!(lb.select(&endpoints).unwrap(), "a:1");
/// ```
#[derive(Debug)]
pub enum LoadBalancer {
    RoundRobin {
        cursor: Mutex<usize>,
    },
    Random {
        rng: Mutex<StdRng>,
    },
    WeightedRoundRobin {
        weights: Vec<u32>,
        total_weight: u64,
        cursor: Mutex<u64>,
    },
}

impl LoadBalancer {
    pub fn round_robin() -> Self {
        LoadBalancer::RoundRobin {
            cursor: Mutex::new(0),
        }
    }

    /// Random selection seeded from the operating system.
    pub fn random() -> Self {
        LoadBalancer::Random {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Random selection with a reproducible sequence.
    pub fn random_seeded(seed: u64) -> Self {
        LoadBalancer::Random {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Weighted round robin. Fails if `weights` is empty or sums to zero.
    pub fn weighted_round_robin(weights: Vec<u32>) -> Result<Self> {
        let total_weight: u64 = weights.iter().map(|&w| u64::from(w)).sum();
        if total_weight == 0 {
            return Err(MinirpcError::Config(
                "Weighted round robin needs at least one positive weight".to_string(),
            ));
        }

        Ok(LoadBalancer::WeightedRoundRobin {
            weights,
            total_weight,
            cursor: Mutex::new(0),
        })
    }

    pub fn from_policy(policy: &LoadBalancePolicy) -> Result<Self> {
        match policy {
            LoadBalancePolicy::RoundRobin => Ok(Self::round_robin()),
            LoadBalancePolicy::Random => Ok(Self::random()),
            LoadBalancePolicy::WeightedRoundRobin(weights) => Self::weighted_round_robin(weights.clone()),
        }
    }

    pub fn policy(&self) -> LoadBalancePolicy {
        match self {
            LoadBalancer::RoundRobin { .. } => LoadBalancePolicy::RoundRobin,
            LoadBalancer::Random { .. } => LoadBalancePolicy::Random,
            LoadBalancer::WeightedRoundRobin { weights, .. } => {
                LoadBalancePolicy::WeightedRoundRobin(weights.clone())
            }
        }
    }

    /// Choose one of `endpoints`.
    pub fn select<'a>(&self, endpoints: &'a [String]) -> Result<&'a str> {
        let index = self.select_index(endpoints.len())?;
        Ok(endpoints[index].as_str())
    }

    /// Choose an index in `0..len`.
    pub fn select_index(&self, len: usize) -> Result<usize> {
        if len == 0 {
            return Err(MinirpcError::NoAvailableEndpoints);
        }

        let index = match self {
            LoadBalancer::RoundRobin { cursor } => {
                let mut cursor = lock(cursor);
                *cursor = (*cursor + 1) % len;
                *cursor
            }
            LoadBalancer::Random { rng } => lock(rng).random_range(0..len),
            LoadBalancer::WeightedRoundRobin {
                weights,
                total_weight,
                cursor,
            } => {
                let position = {
                    let mut cursor = lock(cursor);
                    *cursor = (*cursor + 1) % total_weight;
                    *cursor
                };
                let slot = weighted_slot(weights, position);
                // Weights longer than the endpoint list fall back to the first
                if slot < len {
                    slot
                } else {
                    0
                }
            }
        };

        Ok(index)
    }
}

/// Slot whose cumulative weight range contains `position`.
fn weighted_slot(weights: &[u32], position: u64) -> usize {
    let mut remaining = position;
    for (slot, &weight) in weights.iter().enumerate() {
        let weight = u64::from(weight);
        if weight > remaining {
            return slot;
        }
        remaining -= weight;
    }
    0
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded values are plain counters and generators, valid at any
    // point a panic could interrupt them.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
