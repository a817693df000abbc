use crate::allocation::{Allocation, UnsignedInt};
use crate::solver::AllocationSolver;
use anyhow;
use anyhow::{ensure, Result};
use num_iter;
use tracing::trace;

/// Modified round-robin solver for EFX allocation under interval instances,
/// where every value of an agent lies within `[x, 2x]` for some `x > 0`.
///
/// Agents pick their highest-valued remaining good in forward order for the
/// `floor(goods / agents)` full rounds; the `goods mod agents` leftover picks
/// run in reverse agent order. No matching, no freezing, always exhaustive.
#[derive(Clone)]
pub struct ModifiedRoundRobinSolver<I: UnsignedInt> {
    num_agents: I,
    num_goods: I,
    // row-major valuation table
    values: Vec<f64>,

    good_unallocated: Vec<bool>,

    pub nrounds: u32,
}

impl<I: UnsignedInt> AllocationSolver<I> for ModifiedRoundRobinSolver<I> {
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

impl<I: UnsignedInt> ModifiedRoundRobinSolver<I> {
    pub fn new(agent_capacity: usize, good_capacity: usize) -> (Self, Allocation<I>) {
        (
            Self {
                num_agents: I::zero(),
                num_goods: I::zero(),
                values: Vec::with_capacity(agent_capacity * good_capacity),
                good_unallocated: Vec::with_capacity(good_capacity),
                nrounds: 0,
            },
            Allocation::new(agent_capacity),
        )
    }

    #[inline]
    pub fn init(&mut self, num_agents: I, num_goods: I) -> Result<(), anyhow::Error> {
        self.init_table_storage(num_agents, num_goods)
    }

    pub fn solve(&mut self, solution: &mut Allocation<I>, x: f64) -> Result<(), anyhow::Error> {
        self.validate_interval_input(x)?;
        self.init_solve(solution);

        let num_agents_usize: usize = self.num_agents.as_();
        let num_goods_usize: usize = self.num_goods.as_();
        let full_rounds = num_goods_usize / num_agents_usize;
        let remainder = num_goods_usize % num_agents_usize;

        for _ in 0..full_rounds {
            for agent in num_iter::range(I::zero(), self.num_agents) {
                self.allocate_preferred_good(agent, solution);
            }
            self.nrounds += 1;
        }

        // leftover picks run in reverse agent order
        for nth in 0..remainder {
            let agent = self.num_agents - I::one() - I::from_usize(nth).unwrap();
            self.allocate_preferred_good(agent, solution);
        }
        if remainder > 0 {
            self.nrounds += 1;
        }

        trace!("round robin bundles: {:?}", solution.bundles);
        debug_assert!(solution.num_allocated == self.num_goods);
        Ok(())
    }

    fn validate_interval_input(&self, x: f64) -> Result<(), anyhow::Error> {
        self.validate_shape()?;
        ensure!(x.is_finite() && x > 0., "expecting x > 0");
        for value_ref in self.values.iter() {
            ensure!(
                *value_ref >= x && *value_ref <= 2. * x,
                "valuation table entries must lie within [x, 2x]"
            );
        }
        Ok(())
    }

    fn init_solve(&mut self, solution: &mut Allocation<I>) {
        let num_agents_usize: usize = self.num_agents.as_();
        let num_goods_usize: usize = self.num_goods.as_();

        self.good_unallocated.clear();
        self.good_unallocated.resize(num_goods_usize, true);
        self.nrounds = 0;

        solution.bundles.iter_mut().for_each(|bundle| bundle.clear());
        solution.bundles.resize_with(num_agents_usize, Vec::new);
        solution.num_allocated = I::zero();
    }

    /// Gives the agent its highest-valued remaining good, lowest index on ties
    fn allocate_preferred_good(&mut self, agent: I, solution: &mut Allocation<I>) {
        let mut preferred = I::max_value();
        let mut preferred_value = f64::NEG_INFINITY;
        for good in num_iter::range(I::zero(), self.num_goods) {
            let good_usize: usize = good.as_();
            if !self.good_unallocated[good_usize] {
                continue;
            }
            let value = self.value(agent, good);
            if value > preferred_value {
                preferred_value = value;
                preferred = good;
            }
        }
        // callers never request more picks than there are goods
        debug_assert!(preferred != I::max_value());

        let agent_usize: usize = agent.as_();
        let preferred_usize: usize = preferred.as_();
        solution.bundles[agent_usize].push(preferred);
        solution.num_allocated += I::one();
        self.good_unallocated[preferred_usize] = false;
    }
}
