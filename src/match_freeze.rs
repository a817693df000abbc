use crate::allocation::{Allocation, UnsignedInt};
use crate::matching::BipartiteMatcher;
use crate::solver::AllocationSolver;
use anyhow;
use anyhow::{ensure, Result};
use num_iter;
use tracing::trace;

/// Lifecycle tag of an agent during one solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FreezeState {
    Active,
    Frozen(u32),
    /// never times out - assigned when the low value is zero
    FrozenIndefinitely,
}

/// Freeze duration assigned to every newly frozen agent, `floor(high/low) - 1` rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FreezeQuota {
    Rounds(u32),
    Indefinite,
}

/// Match&Freeze solver for EFX allocation of indivisible goods
/// under 2-value instances, where every agent values every good at one of
/// two fixed constants `high > low >= 0`.
///
/// Each round, active agents are matched to unallocated goods they value at
/// `high` via maximum bipartite matching; unmatched agents receive an arbitrary
/// leftover good. An agent whose round good is envied by another active agent
/// stuck with a low-valued good is frozen out of the following rounds so the
/// envy cannot compound.
#[derive(Clone)]
pub struct MatchFreezeSolver<I: UnsignedInt> {
    num_agents: I,
    num_goods: I,
    // row-major valuation table
    values: Vec<f64>,

    high: f64,
    low: f64,
    freeze_quota: FreezeQuota,

    matcher: BipartiteMatcher<I>,

    // Priority permutation of all agents. Freezing moves an agent to the tail;
    // unfreezing flips its tag and leaves the list order unchanged.
    ordered_agents: Vec<I>,
    freeze_state: Vec<FreezeState>,
    good_unallocated: Vec<bool>,
    num_unallocated: I,

    // per-round scratch
    round_agents: Vec<I>,
    round_goods: Vec<I>,
    round_received: Vec<I>,
    assignment: Vec<I>,
    round_freezes: Vec<I>,
    newly_frozen: Vec<bool>,

    pub nrounds: u32,
}

impl<I: UnsignedInt> AllocationSolver<I> for MatchFreezeSolver<I> {
    fn num_agents(&self) -> I {
        self.num_agents
    }
    fn num_goods(&self) -> I {
        self.num_goods
    }
    fn num_agents_mut(&mut self) -> &mut I {
        &mut self.num_agents
    }
    fn num_goods_mut(&mut self) -> &mut I {
        &mut self.num_goods
    }
    fn values(&self) -> &Vec<f64> {
        &self.values
    }
    fn values_mut(&mut self) -> &mut Vec<f64> {
        &mut self.values
    }
}

impl<I: UnsignedInt> MatchFreezeSolver<I> {
    pub fn new(agent_capacity: usize, good_capacity: usize) -> (Self, Allocation<I>) {
        (
            Self {
                num_agents: I::zero(),
                num_goods: I::zero(),
                values: Vec::with_capacity(agent_capacity * good_capacity),

                high: 0.,
                low: 0.,
                freeze_quota: FreezeQuota::Rounds(0),

                matcher: BipartiteMatcher::new(agent_capacity, good_capacity),

                ordered_agents: Vec::with_capacity(agent_capacity),
                freeze_state: Vec::with_capacity(agent_capacity),
                good_unallocated: Vec::with_capacity(good_capacity),
                num_unallocated: I::zero(),

                round_agents: Vec::with_capacity(agent_capacity),
                round_goods: Vec::with_capacity(good_capacity),
                round_received: Vec::with_capacity(agent_capacity),
                assignment: Vec::with_capacity(good_capacity),
                round_freezes: Vec::with_capacity(agent_capacity),
                newly_frozen: Vec::with_capacity(agent_capacity),

                nrounds: 0,
            },
            Allocation::new(agent_capacity),
        )
    }

    #[inline]
    pub fn init(&mut self, num_agents: I, num_goods: I) -> Result<(), anyhow::Error> {
        self.init_table_storage(num_agents, num_goods)
    }

    /// Computes an EFX allocation of every good.
    ///
    /// Terminates once the unallocated set is empty, or as soon as goods run
    /// out mid round with unmatched agents still pending - that early return is
    /// the expected terminal case for instances with fewer goods than agents,
    /// not an error.
    pub fn solve(
        &mut self,
        solution: &mut Allocation<I>,
        high: f64,
        low: f64,
    ) -> Result<(), anyhow::Error> {
        self.validate_two_value_input(high, low)?;
        self.init_solve(solution, high, low);
        trace!("freeze quota: {:?}", self.freeze_quota);

        while self.num_unallocated > I::zero() {
            self.build_round_graph();
            self.matcher.solve(&mut self.assignment);
            let goods_exhausted = self.assign_round(solution);
            self.nrounds += 1;
            trace!("round {} bundles: {:?}", self.nrounds, solution.bundles);

            if goods_exhausted {
                trace!("goods ran out with unmatched agents still pending");
                return Ok(());
            }

            self.decrement_freeze_timers();
            self.construct_freeze_set();
            self.unfreeze_elapsed();
            trace!(
                "ordered agents: {:?}, freeze state: {:?}",
                self.ordered_agents,
                self.freeze_state
            );
        }
        Ok(())
    }

    fn validate_two_value_input(&self, high: f64, low: f64) -> Result<(), anyhow::Error> {
        self.validate_shape()?;
        ensure!(high.is_finite() && low.is_finite());
        ensure!(high > low && low >= 0., "expecting high > low >= 0");
        for value_ref in self.values.iter() {
            ensure!(
                *value_ref == high || *value_ref == low,
                "valuation table entries must equal one of the two declared values"
            );
        }
        Ok(())
    }

    fn init_solve(&mut self, solution: &mut Allocation<I>, high: f64, low: f64) {
        self.high = high;
        self.low = low;
        self.freeze_quota = if low > 0. {
            // saturating cast covers extreme ratios; only low == 0 is sentinel-worthy
            FreezeQuota::Rounds((high / low).floor() as u32 - 1)
        } else {
            FreezeQuota::Indefinite
        };

        let num_agents_usize: usize = self.num_agents.as_();
        let num_goods_usize: usize = self.num_goods.as_();

        self.ordered_agents.clear();
        self.ordered_agents
            .extend(num_iter::range(I::zero(), self.num_agents));
        self.freeze_state.clear();
        self.freeze_state.resize(num_agents_usize, FreezeState::Active);
        self.newly_frozen.clear();
        self.newly_frozen.resize(num_agents_usize, false);
        self.good_unallocated.clear();
        self.good_unallocated.resize(num_goods_usize, true);
        self.num_unallocated = self.num_goods;
        self.nrounds = 0;

        solution.bundles.iter_mut().for_each(|bundle| bundle.clear());
        solution.bundles.resize_with(num_agents_usize, Vec::new);
        solution.num_allocated = I::zero();
    }

    /// Builds the round's eligibility graph: active agents in priority order
    /// against unallocated goods in increasing index order. An agent is
    /// eligible for a good iff it values it at `high` - never at `low`.
    fn build_round_graph(&mut self) {
        self.round_agents.clear();
        for agent_ref in self.ordered_agents.iter() {
            let agent_usize: usize = (*agent_ref).as_();
            if self.freeze_state[agent_usize] == FreezeState::Active {
                self.round_agents.push(*agent_ref);
            }
        }
        // a round always has an active agent: freezing requires an active,
        // unmatched envier, which the freeze rule never selects
        debug_assert!(!self.round_agents.is_empty());

        self.round_goods.clear();
        for good in num_iter::range(I::zero(), self.num_goods) {
            let good_usize: usize = good.as_();
            if self.good_unallocated[good_usize] {
                self.round_goods.push(good);
            }
        }

        let num_rows = I::from_usize(self.round_agents.len()).unwrap();
        let num_cols = I::from_usize(self.round_goods.len()).unwrap();
        self.matcher.init(num_rows, num_cols);

        let num_goods_usize: usize = self.num_goods.as_();
        let values = &self.values;
        let high = self.high;
        for (row, agent_ref) in self.round_agents.iter().enumerate() {
            let agent_usize: usize = (*agent_ref).as_();
            for (col, good_ref) in self.round_goods.iter().enumerate() {
                let good_usize: usize = (*good_ref).as_();
                if values[agent_usize * num_goods_usize + good_usize] == high {
                    self.matcher
                        .set_eligible(I::from_usize(row).unwrap(), I::from_usize(col).unwrap());
                }
            }
        }
    }

    /// Finalizes the round's matched pairs, then hands every unmatched active
    /// agent one leftover good, lowest index first, in priority order.
    ///
    /// Returns true if goods ran out before every active agent received one.
    fn assign_round(&mut self, solution: &mut Allocation<I>) -> bool {
        let none = I::max_value();
        self.round_received.clear();
        self.round_received.resize(self.round_agents.len(), none);

        // matched case: a matched agent receives exactly the good it was matched to
        for (col, slot_ref) in self.assignment.iter().enumerate() {
            if *slot_ref == none {
                continue;
            }
            let slot: usize = (*slot_ref).as_();
            let agent = self.round_agents[slot];
            let good = self.round_goods[col];
            let agent_usize: usize = agent.as_();
            let good_usize: usize = good.as_();
            solution.bundles[agent_usize].push(good);
            solution.num_allocated += I::one();
            self.good_unallocated[good_usize] = false;
            self.num_unallocated -= I::one();
            self.round_received[slot] = good;
        }

        // unmatched case: arbitrary fallback over the goods the matching left behind
        let mut cursor = 0;
        for slot in 0..self.round_agents.len() {
            if self.round_received[slot] != none {
                continue;
            }
            while cursor < self.round_goods.len() {
                let good_usize: usize = self.round_goods[cursor].as_();
                if self.good_unallocated[good_usize] {
                    break;
                }
                cursor += 1;
            }
            if cursor == self.round_goods.len() {
                return true;
            }
            let good = self.round_goods[cursor];
            let agent = self.round_agents[slot];
            let agent_usize: usize = agent.as_();
            let good_usize: usize = good.as_();
            solution.bundles[agent_usize].push(good);
            solution.num_allocated += I::one();
            self.good_unallocated[good_usize] = false;
            self.num_unallocated -= I::one();
            self.round_received[slot] = good;
            cursor += 1;
        }
        false
    }

    fn decrement_freeze_timers(&mut self) {
        for state_ref in self.freeze_state.iter_mut() {
            if let FreezeState::Frozen(remaining) = state_ref {
                if *remaining > 0 {
                    *remaining -= 1;
                }
            }
        }
    }

    /// Freezes every active agent whose round good is envied: agent i is frozen
    /// iff some other active agent j values i's round good at `high` while
    /// valuing its own round good at `low`. The batch moves to the tail of the
    /// priority order in discovery order.
    fn construct_freeze_set(&mut self) {
        self.round_freezes.clear();
        let num_slots = self.round_agents.len();
        for i in 0..num_slots {
            let agent_i = self.round_agents[i];
            let good_i = self.round_received[i];
            debug_assert!(good_i != I::max_value());
            let mut freeze = false;
            for j in 0..num_slots {
                if i == j {
                    continue;
                }
                let agent_j = self.round_agents[j];
                let good_j = self.round_received[j];
                if self.value(agent_j, good_i) == self.high
                    && self.value(agent_j, good_j) == self.low
                {
                    freeze = true;
                    break;
                }
            }
            if freeze {
                self.round_freezes.push(agent_i);
            }
        }
        if self.round_freezes.is_empty() {
            return;
        }

        let frozen_state = match self.freeze_quota {
            FreezeQuota::Rounds(quota) => FreezeState::Frozen(quota),
            FreezeQuota::Indefinite => FreezeState::FrozenIndefinitely,
        };
        for agent_ref in self.round_freezes.iter() {
            let agent_usize: usize = (*agent_ref).as_();
            self.freeze_state[agent_usize] = frozen_state;
            self.newly_frozen[agent_usize] = true;
        }
        let newly_frozen = &self.newly_frozen;
        self.ordered_agents.retain(|agent_ref| {
            let agent_usize: usize = (*agent_ref).as_();
            !newly_frozen[agent_usize]
        });
        self.ordered_agents.extend_from_slice(&self.round_freezes);
        for agent_ref in self.round_freezes.iter() {
            let agent_usize: usize = (*agent_ref).as_();
            self.newly_frozen[agent_usize] = false;
        }
        trace!("froze {:?} for {:?}", self.round_freezes, self.freeze_quota);
    }

    fn unfreeze_elapsed(&mut self) {
        for state_ref in self.freeze_state.iter_mut() {
            if *state_ref == FreezeState::Frozen(0) {
                *state_ref = FreezeState::Active;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FreezeState, MatchFreezeSolver};
    use crate::allocation::{Allocation, UnsignedInt};
    use crate::solver::AllocationSolver;
    use rand::distributions::{Bernoulli, Distribution};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn init() {
        let _ = tracing_subscriber::fmt().try_init();
    }

    fn solver_from_table(table: &[&[f64]]) -> (MatchFreezeSolver<u16>, Allocation<u16>) {
        let num_agents = table.len();
        let num_goods = table[0].len();
        let (mut solver, allocation) = MatchFreezeSolver::new(num_agents, num_goods);
        solver.init(num_agents as u16, num_goods as u16).unwrap();
        for (agent, row) in table.iter().enumerate() {
            solver.extend_from_values(agent as u16, row).unwrap();
        }
        (solver, allocation)
    }

    fn assert_covers_every_good_once(allocation: &Allocation<u16>, num_goods: usize) {
        let mut owners = vec![0u32; num_goods];
        for bundle in allocation.bundles.iter() {
            for good in bundle.iter() {
                owners[*good as usize] += 1;
            }
        }
        assert!(owners.iter().all(|count| *count == 1), "owners: {:?}", owners);
        assert_eq!(allocation.num_allocated as usize, num_goods);
    }

    #[test]
    fn test_two_agents_three_goods() {
        init();
        // agent 0 values goods {0, 1} high, agent 1 values goods {1, 2} high
        let (mut solver, mut allocation) = solver_from_table(&[&[2., 2., 1.], &[1., 2., 2.]]);
        solver.solve(&mut allocation, 2., 1.).unwrap();

        // round 1 matches agent 0 -> good 0 and agent 1 -> good 1 (lowest index
        // tie-break); round 2 matches agent 1 -> good 2 and returns early once
        // agent 0 finds no leftover good
        assert_eq!(allocation.bundles, [vec![0], vec![1, 2]]);
        assert_covers_every_good_once(&allocation, 3);
        assert!(allocation.is_exhaustive(3));
        assert_eq!(solver.nrounds, 2);
        assert!(solver.efx_satisfied(&allocation));
    }

    #[test]
    fn test_freeze_excludes_envied_agent() {
        init();
        // both agents want only good 0; whoever wins it is envied by the other,
        // which is stuck with a low good, so the winner freezes for
        // floor(4/1) - 1 = 3 rounds and the loser collects the rest
        let (mut solver, mut allocation) =
            solver_from_table(&[&[4., 1., 1., 1.], &[4., 1., 1., 1.]]);
        solver.solve(&mut allocation, 4., 1.).unwrap();

        assert_eq!(allocation.bundles, [vec![0], vec![1, 2, 3]]);
        assert_covers_every_good_once(&allocation, 4);
        assert_eq!(solver.nrounds, 3);
        // the timer ticked down once per completed round while frozen
        assert_eq!(
            solver.freeze_state,
            [FreezeState::Frozen(1), FreezeState::Active]
        );
        assert!(solver.efx_satisfied(&allocation));
    }

    #[test]
    fn test_freeze_duration_matches_quota() {
        init();
        // agent 0 wins good 0 in round 1 and freezes for 3 rounds; it sits out
        // rounds 2-4 exactly, then re-enters at the tail of the priority order
        let (mut solver, mut allocation) = solver_from_table(&[
            &[4., 1., 1., 1., 1., 1., 1., 1.],
            &[4., 1., 1., 1., 1., 1., 1., 1.],
        ]);
        solver.solve(&mut allocation, 4., 1.).unwrap();

        assert_eq!(allocation.bundles, [vec![0, 6], vec![1, 2, 3, 4, 5, 7]]);
        assert_covers_every_good_once(&allocation, 8);
        assert!(solver.efx_satisfied(&allocation));
    }

    #[test]
    fn test_unfrozen_agent_reenters_at_tail() {
        init();
        // quota is floor(2/1) - 1 = 1 round; after thawing, agent 0 keeps the
        // tail position it was demoted to, so agent 1 wins every later tie
        let (mut solver, mut allocation) = solver_from_table(&[
            &[2., 1., 1., 1., 1., 1.],
            &[2., 1., 1., 1., 1., 1.],
        ]);
        solver.solve(&mut allocation, 2., 1.).unwrap();

        assert_eq!(allocation.bundles, [vec![0, 4], vec![1, 2, 3, 5]]);
        assert_covers_every_good_once(&allocation, 6);
        assert!(solver.efx_satisfied(&allocation));
    }

    #[test]
    fn test_zero_low_value_freezes_indefinitely() {
        init();
        // low value of zero never times out: agent 0 wins the only valuable
        // good and stays frozen for the rest of the solve
        let (mut solver, mut allocation) = solver_from_table(&[
            &[1., 0., 0., 0., 0., 0.],
            &[1., 0., 0., 0., 0., 0.],
        ]);
        solver.solve(&mut allocation, 1., 0.).unwrap();

        assert_eq!(allocation.bundles, [vec![0], vec![1, 2, 3, 4, 5]]);
        assert_covers_every_good_once(&allocation, 6);
        assert_eq!(solver.nrounds, 5);
        assert_eq!(
            solver.freeze_state,
            [FreezeState::FrozenIndefinitely, FreezeState::Active]
        );
        assert!(solver.efx_satisfied(&allocation));
    }

    #[test]
    fn test_goods_exhausted_before_agents() {
        init();
        let (mut solver, mut allocation) = solver_from_table(&[&[2., 1.], &[1., 2.], &[1., 1.]]);
        solver.solve(&mut allocation, 2., 1.).unwrap();

        // agent 2 is left without a good; the return is still every good allocated
        assert_eq!(allocation.bundles, [vec![0], vec![1], vec![]]);
        assert!(allocation.is_exhaustive(2));
        assert_eq!(solver.nrounds, 1);
        assert!(solver.efx_satisfied(&allocation));
    }

    #[test]
    fn test_single_agent_takes_everything() {
        init();
        let (mut solver, mut allocation) = solver_from_table(&[&[3., 1., 3., 1.]]);
        solver.solve(&mut allocation, 3., 1.).unwrap();
        // the two high goods arrive through matching first, the low ones by fallback
        assert_eq!(allocation.bundles, [vec![0, 2, 1, 3]]);
        assert!(solver.efx_satisfied(&allocation));
    }

    fn random_two_value_table(
        seed: u64,
        num_agents: usize,
        num_goods: usize,
        high: f64,
        low: f64,
    ) -> Vec<Vec<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let whether_high = Bernoulli::new(0.4).expect("unexpected error");
        (0..num_agents)
            .map(|_| {
                (0..num_goods)
                    .map(|_| {
                        if whether_high.sample(&mut rng) {
                            high
                        } else {
                            low
                        }
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_completeness_and_efx_on_random_instances() {
        init();
        for seed in 0..20 {
            let table = random_two_value_table(seed, 6, 18, 3., 1.);
            let rows: Vec<&[f64]> = table.iter().map(|row| row.as_slice()).collect();
            let (mut solver, mut allocation) = solver_from_table(&rows);
            solver.solve(&mut allocation, 3., 1.).unwrap();

            assert_covers_every_good_once(&allocation, 18);
            assert!(
                solver.efx_satisfied(&allocation),
                "seed {} produced envy: {:?}",
                seed,
                allocation.bundles
            );
        }
    }

    #[test]
    fn test_solve_is_deterministic() {
        init();
        let table = random_two_value_table(42, 8, 24, 5., 2.);
        let rows: Vec<&[f64]> = table.iter().map(|row| row.as_slice()).collect();
        let (mut solver, mut allocation) = solver_from_table(&rows);
        solver.solve(&mut allocation, 5., 2.).unwrap();

        let mut rerun = allocation.clone();
        solver.solve(&mut rerun, 5., 2.).unwrap();
        assert_eq!(allocation, rerun);
    }

    #[test]
    fn test_rejects_off_value_entry() {
        let (mut solver, mut allocation) = solver_from_table(&[&[2., 1.5], &[1., 2.]]);
        assert!(solver.solve(&mut allocation, 2., 1.).is_err());
    }

    #[test]
    fn test_rejects_inverted_value_pair() {
        let (mut solver, mut allocation) = solver_from_table(&[&[2., 1.], &[1., 2.]]);
        assert!(solver.solve(&mut allocation, 1., 2.).is_err());
        assert!(solver.solve(&mut allocation, 2., 2.).is_err());
    }

    #[test]
    fn test_rejects_incomplete_table() {
        let (mut solver, mut allocation) = MatchFreezeSolver::<u16>::new(2, 2);
        solver.init(2, 2).unwrap();
        solver.extend_from_values(0, &[2., 1.]).unwrap();
        assert!(solver.solve(&mut allocation, 2., 1.).is_err());
    }

    #[test]
    fn test_rejects_empty_shape() {
        let (mut solver, _) = MatchFreezeSolver::<u16>::new(2, 2);
        assert!(solver.init(0, 3).is_err());
        assert!(solver.init(3, 0).is_err());
    }

    #[test]
    fn test_rejects_out_of_order_ingestion() {
        let (mut solver, _) = MatchFreezeSolver::<u16>::new(2, 2);
        solver.init(2, 2).unwrap();
        assert!(solver.add_valuation(0, 1, 2.).is_err());
        solver.add_valuation(0, 0, 2.).unwrap();
        solver.add_valuation(0, 1, 1.).unwrap();
        assert!(solver.extend_from_values(0, &[1., 2.]).is_err());
        assert!(solver.extend_from_values(1, &[1.]).is_err());
        solver.extend_from_values(1, &[1., 2.]).unwrap();
    }
}
