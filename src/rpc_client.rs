/// Identity of the RPC transport an [`crate::auth::Auth`] is bound to.
///
/// The real transport (connection pooling, retransmission, task scheduling)
/// is an external collaborator this crate does not own; it is represented
/// here only far enough to let the Auth Registry key on it and to let a
/// client walk its parent chain the way `cl_parent` is walked in the
/// original design.
pub trait RpcClientHandle: Send + Sync + std::fmt::Debug {
    /// Stable identity distinguishing this transport from others, used as
    /// part of the Auth Registry key.
    fn transport_id(&self) -> u64;

    /// The parent client this one is cloned/bound from, if any. The
    /// registry walks this chain to find the outermost same-transport
    /// ancestor, mirroring `cl_parent` traversal.
    fn parent(&self) -> Option<&dyn RpcClientHandle>;
}

/// Walk `client.parent()` until the transport id changes, returning the
/// outermost ancestor that still shares the same transport.
#[must_use]
pub fn root_transport_id(client: &dyn RpcClientHandle) -> u64 {
    let mut current = client;
    let id = client.transport_id();
    while let Some(parent) = current.parent() {
        if parent.transport_id() != id {
            break;
        }
        current = parent;
    }
    current.transport_id()
}
