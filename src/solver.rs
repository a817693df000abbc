use crate::allocation::{Allocation, UnsignedInt};
use anyhow;
use anyhow::{anyhow as anyhow_error, ensure, Result};
use num_iter;
use tracing::trace;

/// Common storage of fair division solvers: a dense row-major valuation table
/// of `num_agents x num_goods` non-negative values, filled one agent row at a time.
pub trait AllocationSolver<I: UnsignedInt> {
    fn num_agents(&self) -> I;
    fn num_goods(&self) -> I;
    fn num_agents_mut(&mut self) -> &mut I;
    fn num_goods_mut(&mut self) -> &mut I;
    fn values(&self) -> &Vec<f64>;
    fn values_mut(&mut self) -> &mut Vec<f64>;

    /// tolerance to deal with floating point precision when auditing bundle sums
    const TOLERANCE: f64 = 1e-9;

    fn init_table_storage(&mut self, num_agents: I, num_goods: I) -> Result<(), anyhow::Error> {
        ensure!(num_agents > I::zero() && num_goods > I::zero());
        ensure!(num_agents < I::max_value() && num_goods < I::max_value());
        let num_agents_usize: usize = num_agents.as_();
        let num_goods_usize: usize = num_goods.as_();
        num_agents_usize
            .checked_mul(num_goods_usize)
            .ok_or_else(|| anyhow_error!("valuation table is longer than max value of type"))?;
        *self.num_agents_mut() = num_agents;
        *self.num_goods_mut() = num_goods;
        self.values_mut().clear();
        Ok(())
    }

    #[inline]
    fn add_valuation(&mut self, agent: I, good: I, value: f64) -> Result<(), anyhow::Error> {
        ensure!(self.num_goods() > I::zero(), "table storage is not initialized");
        let num_goods: usize = self.num_goods().as_();
        let cursor = self.values().len();
        let agent_usize: usize = agent.as_();
        let good_usize: usize = good.as_();
        ensure!(
            agent_usize == cursor / num_goods && good_usize == cursor % num_goods,
            "valuations must be added in row-major order"
        );
        ensure!(value.is_finite() && value >= 0.);
        self.values_mut().push(value);
        Ok(())
    }

    #[inline]
    fn extend_from_values(&mut self, agent: I, values: &[f64]) -> Result<(), anyhow::Error> {
        ensure!(self.num_goods() > I::zero(), "table storage is not initialized");
        let num_goods: usize = self.num_goods().as_();
        ensure!(values.len() == num_goods, "expecting one value per good");
        let cursor = self.values().len();
        let agent_usize: usize = agent.as_();
        ensure!(
            agent_usize == cursor / num_goods,
            "valuations must be added one agent row at a time"
        );
        ensure!(values.iter().all(|v| v.is_finite() && *v >= 0.));
        self.values_mut().extend_from_slice(values);
        Ok(())
    }

    #[inline]
    fn value(&self, agent: I, good: I) -> f64 {
        let num_goods: usize = self.num_goods().as_();
        let agent_usize: usize = agent.as_();
        let good_usize: usize = good.as_();
        self.values()[agent_usize * num_goods + good_usize]
    }

    fn validate_shape(&self) -> Result<(), anyhow::Error> {
        ensure!(self.num_agents() > I::zero() && self.num_goods() > I::zero());
        let num_agents_usize: usize = self.num_agents().as_();
        let num_goods_usize: usize = self.num_goods().as_();
        ensure!(
            self.values().len() == num_agents_usize * num_goods_usize,
            "valuation table is incomplete"
        );
        Ok(())
    }

    /// Value of a bundle of goods under one agent's valuations
    fn bundle_value(&self, agent: I, bundle: &[I]) -> f64 {
        bundle.iter().map(|good| self.value(agent, *good)).sum()
    }

    /// Checks that an allocation is envy-free up to any good.
    ///
    /// For every pair of agents (i, j), removing any single good from agent j's
    /// bundle must leave agent i valuing its own bundle at least as much as the
    /// reduced bundle. Intended as a post-hoc audit of solver output.
    fn efx_satisfied(&self, allocation: &Allocation<I>) -> bool {
        for i in num_iter::range(I::zero(), self.num_agents()) {
            let i_usize: usize = i.as_();
            let own_value = self.bundle_value(i, &allocation.bundles[i_usize]);
            for j in num_iter::range(I::zero(), self.num_agents()) {
                if i == j {
                    continue;
                }
                let j_usize: usize = j.as_();
                let other = &allocation.bundles[j_usize];
                let other_value = self.bundle_value(i, other);
                // lhs of the inequality, with tolerance for accumulated rounding
                let lhs = own_value + Self::TOLERANCE;
                for good_ref in other.iter() {
                    if lhs < other_value - self.value(i, *good_ref) {
                        trace!("EFX CONDITION is not met: {} envies {} up to {}", i, j, good_ref);
                        return false;
                    }
                }
            }
        }
        trace!("EFX CONDITION met");
        true
    }
}
