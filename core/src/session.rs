//! Per-node registry of locally instantiated objects (`spec.md` §4.5).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use occm_proto::{CmError, ObjectId};

use crate::object::ObjectHandle;

/// Maps `ObjectId` to the locally registered object instance. One `Session`
/// exists per node; registration is what makes an object reachable by the
/// command router and by incoming subscribe/instance packets.
#[derive(Default)]
pub struct Session {
    objects: DashMap<ObjectId, Arc<dyn ObjectHandle>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }

    /// Registers a freshly attached object. Rejects a second registration
    /// under the same id, matching the original's "object IDs are
    /// session-unique" invariant.
    pub fn register_object(&self, id: ObjectId, handle: Arc<dyn ObjectHandle>) -> Result<(), CmError> {
        if self.objects.contains_key(&id) {
            return Err(CmError::DuplicateId(id));
        }
        self.objects.insert(id, handle);
        debug!(object_id = %id, "object registered");
        Ok(())
    }

    /// Detaches and removes an object. A no-op, not an error, if the id is
    /// already absent.
    pub async fn deregister_object(&self, id: ObjectId) {
        if let Some((_, handle)) = self.objects.remove(&id) {
            handle.detach_from_session().await;
            debug!(object_id = %id, "object deregistered");
        }
    }

    pub fn lookup(&self, id: ObjectId) -> Option<Arc<dyn ObjectHandle>> {
        self.objects.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// `mapObject`: convenience wrapper for "look up, then subscribe a
    /// slave instance to it."
    pub async fn map_object(
        &self,
        id: ObjectId,
        subscribe: &occm_proto::packets::ObjectSubscribe,
        node: occm_proto::NodeId,
        sink: Arc<dyn crate::transport::SubscriberSink>,
    ) -> Result<occm_proto::Version, CmError> {
        let handle = self.lookup(id).ok_or(CmError::NotFound(id))?;
        handle.add_slave(subscribe, node, sink).await
    }

    /// `unmapObject`: removes a subscribed slave's registration on this
    /// object's master change manager, without deregistering the object
    /// itself from the session.
    pub async fn unmap_object(&self, id: ObjectId, node: occm_proto::NodeId) -> Result<(), CmError> {
        let handle = self.lookup(id).ok_or(CmError::NotFound(id))?;
        handle.remove_slave(node).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataIStream, DataOStream};
    use crate::object::Object;
    use crate::ObjectData;
    use occm_proto::{ChangeType, InstanceId};

    struct Blob(Vec<u8>);

    impl ObjectData for Blob {
        fn get_instance_data(&self, os: &mut DataOStream) {
            os.write_bytes(&self.0);
        }

        fn apply_instance_data(&mut self, is: &mut DataIStream) -> Result<(), CmError> {
            self.0 = is.read_bytes(is.remaining())?.to_vec();
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let session = Session::new();
        let object = Arc::new(Object::new(Blob(vec![])));
        object
            .attach_to_session(ObjectId::new(), InstanceId(0), ChangeType::Static, true, InstanceId::INVALID)
            .await;
        let id = object.id().await;
        session.register_object(id, object.clone()).unwrap();
        let err = session.register_object(id, object).unwrap_err();
        assert!(matches!(err, CmError::DuplicateId(_)));
    }

    #[tokio::test]
    async fn lookup_after_deregister_is_none() {
        let session = Session::new();
        let object = Arc::new(Object::new(Blob(vec![])));
        object
            .attach_to_session(ObjectId::new(), InstanceId(0), ChangeType::Static, true, InstanceId::INVALID)
            .await;
        let id = object.id().await;
        session.register_object(id, object).unwrap();
        session.deregister_object(id).await;
        assert!(session.lookup(id).is_none());
    }
}
