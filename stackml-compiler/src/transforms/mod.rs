//! Graph-to-graph passes run before scheduling.

pub mod dce;
pub mod fuse_unary;

use log::debug;

use crate::error::Result;
use crate::ir::Graph;

pub use dce::DeadCodeElimination;
pub use fuse_unary::FuseUnary;

pub trait GraphPass {
    fn name(&self) -> &'static str;

    /// Returns whether the graph changed.
    fn run(&self, graph: &mut Graph) -> Result<bool>;
}

/// Runs passes in the order they were added.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn GraphPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self, pass: Box<dyn GraphPass>) {
        self.passes.push(pass);
    }

    pub fn with_pass(mut self, pass: impl GraphPass + 'static) -> Self {
        self.add_pass(Box::new(pass));
        self
    }

    pub fn run(&self, graph: &mut Graph) -> Result<bool> {
        let mut changed = false;
        for pass in &self.passes {
            let before = graph.len();
            let pass_changed = pass.run(graph)?;
            debug!(
                "pass {}: {} -> {} nodes{}",
                pass.name(),
                before,
                graph.len(),
                if pass_changed { "" } else { " (unchanged)" }
            );
            changed |= pass_changed;
        }
        Ok(changed)
    }
}
