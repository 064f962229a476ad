//! Pure domain types shared across the gateway.

mod filter;
mod order;
mod tick;
mod universe;

pub use filter::{
    passes, CandidateSource, FilterCondition, FilterOp, FilterSpec, SortDirection, SortKey,
};
pub use order::{Order, OrderSide, OrderType};
pub use tick::{parse_timestamp, Tick};
pub use universe::UniverseUpdate;
