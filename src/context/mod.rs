// Operation Context Stack
//
// Each application thread owns one stack of in-flight operations. `begin`
// pushes (the new operation's parent is the current top), `end` pops and
// finalizes; sub-operations are recorded against the top of the stack with a
// step counter that follows creation order.
//
// When a nested operation closes it is attached to its parent's `children`.
// When a root operation closes, the frozen record goes to the aggregator for
// detection and the outbound chain.
//
// Stacks share no state with each other, so no locking is involved. `current`
// offers the same operations as free functions over a thread-local stack.

pub mod current;
mod stack;

pub use stack::{
    Call, ContextStack, OperationHandle, SubOperationHandle, ABANDONED_CALL, IMPLICIT_CLOSE,
    TIMEOUT_MARKER,
};

#[cfg(test)]
mod tests;
