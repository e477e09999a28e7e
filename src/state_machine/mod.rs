// State machine module for aggregation groups
//
// OPEN -> RELEASED | EXPIRED, both terminal. Transitions are applied by the
// aggregator under the owning group's lock.

pub mod states;

pub use states::GroupState;
