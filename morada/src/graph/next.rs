//! Next-step result from a graph node: continue the chain, jump, or end.

/// Next step after running a node.
///
/// - **Continue**: follow the declared edge (or conditional router).
/// - **Node(id)**: jump to the given node.
/// - **End**: stop; return the current state.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Next {
    Continue,
    Node(String),
    End,
}
