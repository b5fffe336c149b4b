use crate::error::Result;
use crate::ir::Graph;

use super::GraphPass;

/// Removes nodes no graph output depends on. Input nodes survive since they
/// define the module signature.
pub struct DeadCodeElimination;

impl GraphPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&self, graph: &mut Graph) -> Result<bool> {
        Ok(graph.remove_unreachable() > 0)
    }
}
