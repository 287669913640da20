//! Wire packets exchanged between master and slave change managers.
//!
//! All multi-byte integers are little-endian; payload length prefixes are
//! 64-bit unsigned; version fields are 128-bit, per `spec.md` §6.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CmError;
use crate::ids::{InstanceId, NodeId, ObjectId};
use crate::version::Version;
use crate::BytesSerializable;

fn put_version(buf: &mut BytesMut, v: Version) {
    buf.put_u128_le(v.0);
}

fn get_version(buf: &mut Bytes) -> Result<Version, CmError> {
    if buf.remaining() < 16 {
        return Err(CmError::ProtocolViolation(InstanceId::INVALID));
    }
    Ok(Version(buf.get_u128_le()))
}

fn put_bytes_framed(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_u64_le(payload.len() as u64);
    buf.put_slice(payload);
}

fn get_bytes_framed(buf: &mut Bytes) -> Result<Bytes, CmError> {
    if buf.remaining() < 8 {
        return Err(CmError::ProtocolViolation(InstanceId::INVALID));
    }
    let len = buf.get_u64_le() as usize;
    if buf.remaining() < len {
        return Err(CmError::ProtocolViolation(InstanceId::INVALID));
    }
    Ok(buf.copy_to_bytes(len))
}

/// `slave -> master`: request to start receiving versions of `object_id`
/// from `requested_start_version` onward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSubscribe {
    pub object_id: ObjectId,
    pub slave_instance_id: InstanceId,
    pub requested_start_version: Version,
    pub request_id: u64,
}

impl BytesSerializable for ObjectSubscribe {
    fn as_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + 4 + 16 + 8);
        buf.put_slice(self.object_id.0.as_bytes());
        buf.put_u32_le(self.slave_instance_id.0);
        put_version(&mut buf, self.requested_start_version);
        buf.put_u64_le(self.request_id);
        buf.freeze()
    }

    fn from_bytes(mut bytes: Bytes) -> Result<Self, CmError> {
        if bytes.remaining() < 16 + 4 + 16 + 8 {
            return Err(CmError::ProtocolViolation(InstanceId::INVALID));
        }
        let mut id_bytes = [0u8; 16];
        bytes.copy_to_slice(&mut id_bytes);
        let object_id = ObjectId(uuid::Uuid::from_bytes(id_bytes));
        let slave_instance_id = InstanceId(bytes.get_u32_le());
        let requested_start_version = get_version(&mut bytes)?;
        let request_id = bytes.get_u64_le();
        Ok(Self {
            object_id,
            slave_instance_id,
            requested_start_version,
            request_id,
        })
    }

    fn size(&self) -> usize {
        16 + 4 + 16 + 8
    }
}

/// Status of an `ObjectSubscribeReply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeStatus {
    Ok,
    NotFound,
    Disconnected,
}

/// `master -> slave`: reply to `ObjectSubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSubscribeReply {
    pub request_id: u64,
    pub first_usable_version: Version,
    pub master_instance_id: InstanceId,
    pub status: SubscribeStatus,
}

impl BytesSerializable for ObjectSubscribeReply {
    fn as_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + 16 + 4 + 1);
        buf.put_u64_le(self.request_id);
        put_version(&mut buf, self.first_usable_version);
        buf.put_u32_le(self.master_instance_id.0);
        buf.put_u8(match self.status {
            SubscribeStatus::Ok => 0,
            SubscribeStatus::NotFound => 1,
            SubscribeStatus::Disconnected => 2,
        });
        buf.freeze()
    }

    fn from_bytes(mut bytes: Bytes) -> Result<Self, CmError> {
        if bytes.remaining() < 8 + 16 + 4 + 1 {
            return Err(CmError::ProtocolViolation(InstanceId::INVALID));
        }
        let request_id = bytes.get_u64_le();
        let first_usable_version = get_version(&mut bytes)?;
        let master_instance_id = InstanceId(bytes.get_u32_le());
        let status = match bytes.get_u8() {
            0 => SubscribeStatus::Ok,
            1 => SubscribeStatus::NotFound,
            _ => SubscribeStatus::Disconnected,
        };
        Ok(Self {
            request_id,
            first_usable_version,
            master_instance_id,
            status,
        })
    }
}

/// `master -> slave`: a full-snapshot (or, when `is_delta`, a delta) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInstance {
    pub object_id: ObjectId,
    pub instance_id: InstanceId,
    pub version: Version,
    pub is_delta: bool,
    pub payload: Bytes,
}

impl BytesSerializable for ObjectInstance {
    fn as_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + 4 + 16 + 1 + 8 + self.payload.len());
        buf.put_slice(self.object_id.0.as_bytes());
        buf.put_u32_le(self.instance_id.0);
        put_version(&mut buf, self.version);
        buf.put_u8(self.is_delta as u8);
        put_bytes_framed(&mut buf, &self.payload);
        buf.freeze()
    }

    fn from_bytes(mut bytes: Bytes) -> Result<Self, CmError> {
        if bytes.remaining() < 16 + 4 + 16 + 1 {
            return Err(CmError::ProtocolViolation(InstanceId::INVALID));
        }
        let mut id_bytes = [0u8; 16];
        bytes.copy_to_slice(&mut id_bytes);
        let object_id = ObjectId(uuid::Uuid::from_bytes(id_bytes));
        let instance_id = InstanceId(bytes.get_u32_le());
        let version = get_version(&mut bytes)?;
        let is_delta = bytes.get_u8() != 0;
        let payload = get_bytes_framed(&mut bytes)?;
        Ok(Self {
            object_id,
            instance_id,
            version,
            is_delta,
            payload,
        })
    }
}

/// `master -> slave` (DELTA only): an incremental update frame.
pub type ObjectDelta = ObjectInstance;

/// `slave -> master`: unsubscribe from further version notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUnsubscribe {
    pub object_id: ObjectId,
    pub slave_instance_id: InstanceId,
}

impl BytesSerializable for ObjectUnsubscribe {
    fn as_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + 4);
        buf.put_slice(self.object_id.0.as_bytes());
        buf.put_u32_le(self.slave_instance_id.0);
        buf.freeze()
    }

    fn from_bytes(mut bytes: Bytes) -> Result<Self, CmError> {
        if bytes.remaining() < 16 + 4 {
            return Err(CmError::ProtocolViolation(InstanceId::INVALID));
        }
        let mut id_bytes = [0u8; 16];
        bytes.copy_to_slice(&mut id_bytes);
        let object_id = ObjectId(uuid::Uuid::from_bytes(id_bytes));
        let slave_instance_id = InstanceId(bytes.get_u32_le());
        Ok(Self {
            object_id,
            slave_instance_id,
        })
    }
}

/// `slave (promoted) -> old master`: the slave has become the new master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNewMaster {
    pub object_id: ObjectId,
    pub new_master_node_id: NodeId,
    pub new_master_instance_id: InstanceId,
}

impl BytesSerializable for ObjectNewMaster {
    fn as_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + 8 + 4);
        buf.put_slice(self.object_id.0.as_bytes());
        buf.put_u64_le(self.new_master_node_id.0);
        buf.put_u32_le(self.new_master_instance_id.0);
        buf.freeze()
    }

    fn from_bytes(mut bytes: Bytes) -> Result<Self, CmError> {
        if bytes.remaining() < 16 + 8 + 4 {
            return Err(CmError::ProtocolViolation(InstanceId::INVALID));
        }
        let mut id_bytes = [0u8; 16];
        bytes.copy_to_slice(&mut id_bytes);
        let object_id = ObjectId(uuid::Uuid::from_bytes(id_bytes));
        let new_master_node_id = NodeId(bytes.get_u64_le());
        let new_master_instance_id = InstanceId(bytes.get_u32_le());
        Ok(Self {
            object_id,
            new_master_node_id,
            new_master_instance_id,
        })
    }
}

/// Intra-node: master application hands committed bytes to the master CM.
#[derive(Debug, Clone)]
pub struct ObjectCommit {
    pub object_id: ObjectId,
    pub version: Version,
    pub buffer: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_subscribe_round_trips() {
        let original = ObjectSubscribe {
            object_id: ObjectId::new(),
            slave_instance_id: InstanceId(7),
            requested_start_version: Version::NONE,
            request_id: 42,
        };
        let decoded = ObjectSubscribe::from_bytes(original.as_bytes()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn object_instance_round_trips_with_payload() {
        let original = ObjectInstance {
            object_id: ObjectId::new(),
            instance_id: InstanceId(3),
            version: Version(9),
            is_delta: true,
            payload: Bytes::from_static(b"+B"),
        };
        let decoded = ObjectInstance::from_bytes(original.as_bytes()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn truncated_subscribe_is_protocol_violation() {
        let err = ObjectSubscribe::from_bytes(Bytes::from_static(b"short")).unwrap_err();
        assert!(matches!(err, CmError::ProtocolViolation(_)));
    }
}
