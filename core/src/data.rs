//! Typed-agnostic byte carriers used by `pack`/`unpack` and
//! `getInstanceData`/`applyInstanceData`. Payload shape is entirely up to
//! the `ObjectData` implementation the application supplies.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use occm_proto::{CmError, Version};

/// An output stream that accumulates bytes into a single growable buffer.
///
/// A commit that writes zero bytes is the sole signal the change manager
/// uses to skip minting a new version (`spec.md` §4.1).
#[derive(Debug, Default)]
pub struct DataOStream {
    buf: BytesMut,
}

impl DataOStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_str(&mut self, value: &str) {
        self.buf.put_u32_le(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Whether any bytes were written at all.
    pub fn has_data(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// An input stream yielding the bytes written by a `DataOStream`, in order.
#[derive(Debug)]
pub struct DataIStream {
    buf: Bytes,
}

impl DataIStream {
    pub fn new(bytes: Bytes) -> Self {
        Self { buf: bytes }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, CmError> {
        if self.buf.remaining() < len {
            return Err(CmError::ProtocolViolation(occm_proto::InstanceId::INVALID));
        }
        Ok(self.buf.copy_to_bytes(len))
    }

    pub fn read_u64(&mut self) -> Result<u64, CmError> {
        if self.buf.remaining() < 8 {
            return Err(CmError::ProtocolViolation(occm_proto::InstanceId::INVALID));
        }
        Ok(self.buf.get_u64_le())
    }

    pub fn read_str(&mut self) -> Result<String, CmError> {
        if self.buf.remaining() < 4 {
            return Err(CmError::ProtocolViolation(occm_proto::InstanceId::INVALID));
        }
        let len = self.buf.get_u32_le() as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CmError::ProtocolViolation(occm_proto::InstanceId::INVALID))
    }
}

/// Implemented by the application payload an `Object` distributes.
///
/// Default `pack`/`unpack` fall back to the full-instance methods, matching
/// the original `Object::pack`/`Object::unpack` defaults.
pub trait ObjectData: Send + Sync {
    /// Whether a commit is needed; a cheap early-out so `commitNB` can skip
    /// calling `pack`/`get_instance_data` entirely.
    fn is_dirty(&self) -> bool {
        true
    }

    fn get_instance_data(&self, os: &mut DataOStream);

    fn apply_instance_data(&mut self, is: &mut DataIStream) -> Result<(), CmError>;

    fn pack(&self, os: &mut DataOStream) {
        self.get_instance_data(os)
    }

    fn unpack(&mut self, is: &mut DataIStream) -> Result<(), CmError> {
        self.apply_instance_data(is)
    }

    /// Hint that a slave's head version has advanced, fired from the
    /// delivery path as soon as a new frame is buffered — not from `sync`.
    /// Applications may override to react (e.g. wake a poller), but must
    /// never call back into `sync` from here: `deliver` still holds the
    /// object's data lock while this runs, and a reentrant `sync` would
    /// deadlock on it.
    fn notify_new_head_version(&self, _version: Version) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u64);

    impl ObjectData for Counter {
        fn get_instance_data(&self, os: &mut DataOStream) {
            os.write_u64(self.0);
        }

        fn apply_instance_data(&mut self, is: &mut DataIStream) -> Result<(), CmError> {
            self.0 = is.read_u64()?;
            Ok(())
        }
    }

    #[test]
    fn round_trips_through_default_pack_unpack() {
        let source = Counter(42);
        let mut os = DataOStream::new();
        source.pack(&mut os);
        assert!(os.has_data());

        let mut target = Counter(0);
        let mut is = DataIStream::new(os.into_bytes());
        target.unpack(&mut is).unwrap();
        assert_eq!(target.0, 42);
    }

    #[test]
    fn empty_write_reports_no_data() {
        let os = DataOStream::new();
        assert!(!os.has_data());
    }
}
