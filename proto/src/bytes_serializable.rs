use bytes::Bytes;

use crate::error::CmError;

/// Serializes/deserializes a value to and from a framed byte buffer.
///
/// Payload shape is entirely up to the implementor; the change manager only
/// cares whether `as_bytes()` produced zero or more than zero bytes.
pub trait BytesSerializable {
    fn as_bytes(&self) -> Bytes;

    fn from_bytes(bytes: Bytes) -> Result<Self, CmError>
    where
        Self: Sized;

    fn size(&self) -> usize {
        unimplemented!("size")
    }
}
