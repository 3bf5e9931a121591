//! Integration tests exercising the full hub: feeds in, aggregate state,
//! fan-out and snapshots out.

mod pipeline;
