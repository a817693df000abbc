use num_traits::{AsPrimitive, FromPrimitive, NumAssign, PrimInt, Unsigned};
use std::fmt::{Debug, Display};

pub trait UnsignedInt:
    PrimInt
    + Unsigned
    + Display
    + Debug
    + AsPrimitive<usize>
    + AsPrimitive<f64>
    + FromPrimitive
    + NumAssign
{
}

impl<I> UnsignedInt for I where
    I: PrimInt
        + Unsigned
        + Display
        + Debug
        + AsPrimitive<usize>
        + AsPrimitive<f64>
        + FromPrimitive
        + NumAssign
{
}

///
/// Allocation of goods to agents
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation<I>
where
    I: UnsignedInt,
{
    /// index i gives the bundle of agent i - the ordered sequence of good indices it owns.
    ///
    /// Goods are appended in allocation order and never move between agents.
    pub bundles: Vec<Vec<I>>,
    /// number of goods allocated across all bundles
    ///
    /// Smaller than the number of goods when goods ran out mid round with
    /// unmatched agents still pending. Callers distinguish that expected
    /// terminal case from a full allocation by comparing against the good count.
    pub num_allocated: I,
}

impl<I> Allocation<I>
where
    I: UnsignedInt,
{
    pub fn new(agent_capacity: usize) -> Allocation<I> {
        Allocation::<I> {
            bundles: Vec::with_capacity(agent_capacity),
            num_allocated: I::zero(),
        }
    }

    /// Whether every good ended up in some bundle
    pub fn is_exhaustive(&self, num_goods: I) -> bool {
        self.num_allocated == num_goods
    }
}
