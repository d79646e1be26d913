use crate::error::CoreError;
use crate::ident::CorrelationId;

/// Boundary to the duplex connection layer. The engine hands off a fully
/// serialized request and the correlation id it travels under; everything
/// that comes back arrives through `DispatchEngine::on_inbound_event`.
///
/// `send` returning `Ok` means the transport took custody of the bytes,
/// not that the server received them. An `Err` is a synchronous rejection
/// (not connected, write failure) and the engine resolves the pending
/// operation with it immediately.
pub trait Transport: Send + Sync {
    fn send(&self, id: &CorrelationId, payload: &[u8]) -> Result<(), CoreError>;
}
