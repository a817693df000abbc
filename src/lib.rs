//! EFX fair division of indivisible goods under restricted valuation structures.
//!
//! Two polynomial time solvers, both guaranteeing envy-freeness up to any good:
//!
//! * [`match_freeze::MatchFreezeSolver`] for 2-value instances, where every
//!   agent values every good at one of two fixed constants `high > low >= 0`.
//!   Alternates maximum bipartite matching with a freeze discipline that keeps
//!   envy from compounding.
//! * [`round_robin::ModifiedRoundRobinSolver`] for interval instances, where
//!   all values lie within `[x, 2x]`. A greedy pass with reversed order on the
//!   final partial round.
//!
//! # Example
//!
//! ```
//! use efx_fair_division::match_freeze::MatchFreezeSolver;
//! use efx_fair_division::AllocationSolver;
//!
//! # fn main() -> Result<(), anyhow::Error> {
//! let (mut solver, mut allocation) = MatchFreezeSolver::<u32>::new(2, 3);
//! solver.init(2, 3)?;
//! solver.extend_from_values(0, &[2., 2., 1.])?;
//! solver.extend_from_values(1, &[1., 2., 2.])?;
//! solver.solve(&mut allocation, 2., 1.)?;
//! assert_eq!(allocation.bundles, [vec![0], vec![1, 2]]);
//! assert!(solver.efx_satisfied(&allocation));
//! # Ok(())
//! # }
//! ```
pub mod allocation;
pub mod matching;
pub mod solver;

#[cfg(feature = "match-freeze")]
pub mod match_freeze;
#[cfg(feature = "round-robin")]
pub mod round_robin;

pub use crate::allocation::{Allocation, UnsignedInt};
pub use crate::matching::BipartiteMatcher;
pub use crate::solver::AllocationSolver;
