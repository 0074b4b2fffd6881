// Conflux Tests
//
// Scenario tests for the engine live under `integration/`, one binary per
// area. This crate holds no code of its own.

pub use conflux_test_utils as test_utils;

#[cfg(test)]
mod test {
    use conflux_test_utils::fixtures;

    #[test]
    fn fixtures_are_available() {
        assert_eq!(fixtures::fork_join(2).container.nodes.len(), 6);
    }
}
