//! Assertion utilities for process and flow node instance states.

pub mod flow_state;

pub use flow_state::{
    assert_instance_state, assert_no_live_nodes, assert_node_states, AssertionError,
};
