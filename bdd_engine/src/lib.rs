//! Merging engine for symbolic call paths: groups the per-path traces of a
//! symbolic executor into a single decision diagram and lowers its symbolic
//! operands to C expressions.

pub mod bdd;
pub mod codegen;
pub mod group;
pub mod parser;
pub mod solver;
pub mod symbols;
pub mod transpile;

/// Knobs of the merge that depend on the traced ABI rather than on the
/// algorithm: which library functions are elided, which ones mark a
/// procedure boundary in the generated code, and which argument names are
/// never compared across paths.
pub struct Config {
    pub skip_functions: Vec<String>,
    pub commit_functions: Vec<String>,
    /// Arguments that differ on every path by construction (the packet
    /// pointer under the default ABI).
    pub ignored_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let own = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        Config {
            skip_functions: own(&[
                "start_time",
                "loop_invariant_consume",
                "loop_invariant_produce",
                "current_time",
                "packet_receive",
                "packet_state_total_length",
                "packet_send",
            ]),
            commit_functions: own(&["start_time"]),
            ignored_args: own(&["p"]),
        }
    }
}

impl Config {
    pub fn is_skip_function(&self, fname: &str) -> bool {
        self.skip_functions.iter().any(|f| f == fname)
    }

    pub fn is_commit_function(&self, fname: &str) -> bool {
        self.commit_functions.iter().any(|f| f == fname)
    }

    pub fn is_ignored_arg(&self, arg_name: &str) -> bool {
        self.ignored_args.iter().any(|a| a == arg_name)
    }
}
