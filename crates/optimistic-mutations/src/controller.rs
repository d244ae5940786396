//! Optimistic create/update/delete against one resource collection.

use crate::error::{MutationError, MutationResult};
use crate::intent::MutationIntent;
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::resource::{merge_patch, parse_list, parse_server_record, Resource};
use entity_collection::{
    CollectionError, EntityId, EntityRecord, LocalId, ServerId, SharedCollection, SyncState,
};
use parking_lot::Mutex;
use request_pipeline::{
    ApiError, ApiRequest, ApiResponse, MultipartForm, RequestBody, RequestPipeline,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Applies mutations to the collection first and reconciles with the server
/// afterwards.
///
/// Mutations on the same record run one after another; a mutation on a record
/// whose create is still pending waits for the create and then targets the
/// id the server assigned.
pub struct OptimisticMutationController<T> {
    pipeline: RequestPipeline,
    collection: SharedCollection<T>,
    locks: KeyedLocks<EntityId>,
    aliases: Mutex<HashMap<LocalId, ServerId>>,
}

impl<T: Resource> OptimisticMutationController<T> {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self::with_collection(pipeline, SharedCollection::default())
    }

    /// Drive an existing collection, e.g. one built with a sink attached.
    pub fn with_collection(pipeline: RequestPipeline, collection: SharedCollection<T>) -> Self {
        Self {
            pipeline,
            collection,
            locks: KeyedLocks::new(),
            aliases: Mutex::new(HashMap::new()),
        }
    }

    pub fn collection(&self) -> &SharedCollection<T> {
        &self.collection
    }

    pub fn snapshot(&self) -> Vec<EntityRecord<T>> {
        self.collection.snapshot()
    }

    /// Server id assigned to a record created under `local`.
    pub fn resolve_alias(&self, local: LocalId) -> Option<ServerId> {
        self.aliases.lock().get(&local).cloned()
    }

    /// Fetch the resource list and rebuild the collection from it.
    ///
    /// Records created locally and not yet confirmed are kept in front of
    /// the server's records. Mutations in flight during a reload settle
    /// against whatever the reload left in place.
    pub async fn load(&self) -> MutationResult<usize> {
        let response = self
            .pipeline
            .send(ApiRequest::get(T::collection_path()))
            .await?;
        let value = response
            .json_value()
            .ok_or_else(|| MutationError::UnexpectedResponse(format!("{} list is not JSON", T::PATH)))?;
        let records = parse_list::<T>(value).map_err(MutationError::UnexpectedResponse)?;

        let count = records.len();
        self.collection
            .write(|collection| {
                let mut merged: Vec<EntityRecord<T>> = collection
                    .records()
                    .iter()
                    .filter(|record| record.id.is_local())
                    .cloned()
                    .collect();
                merged.extend(records);
                collection.reset(merged)
            })
            .map_err(|err| match err {
                CollectionError::DuplicateId(id) => {
                    MutationError::UnexpectedResponse(format!("{} listed twice", id))
                }
                other => self.reconciliation_failure(other),
            })?;

        info!(resource = T::PATH, count, "Loaded collection");
        Ok(count)
    }

    /// Create a record from `fields`, sent as JSON.
    pub async fn create(&self, fields: T) -> MutationResult<ServerId> {
        let body = serde_json::to_value(&fields)
            .map_err(|e| MutationError::InvalidPayload(e.to_string()))?;
        self.create_with_body(fields, RequestBody::Json(body)).await
    }

    /// Create a record whose request body is a multipart form, e.g. a file
    /// upload. `fields` is what the collection shows until the server answers.
    pub async fn create_multipart(&self, fields: T, form: MultipartForm) -> MutationResult<ServerId> {
        self.create_with_body(fields, RequestBody::Multipart(form)).await
    }

    pub async fn create_with_body(&self, fields: T, body: RequestBody) -> MutationResult<ServerId> {
        let local = LocalId::next();
        let target = EntityId::Local(local);
        let _guard = self.locks.lock(target.clone()).await;

        let payload = match &body {
            RequestBody::Json(value) => Some(value.clone()),
            _ => None,
        };
        let intent = MutationIntent::create(T::ENTITY_TYPE, target.clone(), payload);

        self.collection
            .write(|collection| collection.insert_at_front(EntityRecord::pending_local(local, fields)))
            .map_err(|err| self.reconciliation_failure(err))?;
        info!(resource = T::PATH, entity_id = %target, "Optimistic create applied");

        let result = self
            .pipeline
            .send(ApiRequest::post(T::collection_path()).with_body(body))
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => return Err(self.fail(intent, err)),
        };

        let (server_id, confirmed) = match decode_record::<T>(&response) {
            Ok(record) => record,
            Err(reason) => {
                warn!(
                    resource = T::PATH,
                    entity_id = %target,
                    reason = %reason,
                    "Create accepted but response unusable"
                );
                self.collection
                    .write(|collection| {
                        if !collection.contains(&target) {
                            return Ok(());
                        }
                        collection.set_sync_state(&target, SyncState::Failed).map(|_| ())
                    })
                    .map_err(|err| self.reconciliation_failure(err))?;
                return Err(MutationError::UnexpectedResponse(reason));
            }
        };

        let remote = EntityId::Remote(server_id.clone());
        self.collection
            .write(|collection| {
                match (collection.contains(&target), collection.contains(&remote)) {
                    // Already present from a reload; keep that copy.
                    (true, true) => collection.remove(&target).map(|_| ()),
                    (true, false) => collection
                        .replace(&target, EntityRecord::confirmed(server_id.clone(), confirmed))
                        .map(|_| ()),
                    (false, true) => Ok(()),
                    (false, false) => collection
                        .insert_at_front(EntityRecord::confirmed(server_id.clone(), confirmed)),
                }
            })
            .map_err(|err| self.reconciliation_failure(err))?;
        self.aliases.lock().insert(local, server_id.clone());

        info!(
            resource = T::PATH,
            local_id = %target,
            server_id = %server_id,
            "Create confirmed"
        );
        Ok(server_id)
    }

    /// Merge `patch` into the record's fields and send it as a `PATCH`.
    pub async fn update(&self, id: &EntityId, patch: Value) -> MutationResult<()> {
        if !patch.is_object() {
            return Err(MutationError::InvalidPayload(
                "update payload must be a JSON object".to_string(),
            ));
        }

        let (target, server_id, _guard) = self.acquire(id).await?;

        let intent = self.collection.write(|collection| -> MutationResult<MutationIntent<T>> {
            let record = collection
                .get(&target)
                .ok_or_else(|| MutationError::UnknownEntity(target.clone()))?;
            let prior_fields = record.fields.clone();
            let prior_state = record.sync_state;
            let merged = merged_fields(&prior_fields, &patch)?;

            collection
                .update(&target, |fields| *fields = merged)
                .and_then(|_| collection.set_sync_state(&target, SyncState::Pending))
                .map_err(|err| self.reconciliation_failure(err))?;

            Ok(MutationIntent::update(
                T::ENTITY_TYPE,
                target.clone(),
                patch.clone(),
                prior_fields,
                prior_state,
            ))
        })?;
        info!(resource = T::PATH, entity_id = %target, "Optimistic update applied");

        let result = self
            .pipeline
            .send(ApiRequest::patch(T::item_path(&server_id)).json(patch))
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => return Err(self.fail(intent, err)),
        };

        let server_fields = match decode_record::<T>(&response) {
            Ok((_, fields)) => Some(fields),
            Err(reason) => {
                debug!(resource = T::PATH, entity_id = %target, reason = %reason, "Keeping local fields");
                None
            }
        };
        self.collection
            .write(|collection| {
                if !collection.contains(&target) {
                    debug!(resource = T::PATH, entity_id = %target, "Updated record dropped by a reload");
                    return Ok(());
                }
                if let Some(fields) = server_fields {
                    collection.update(&target, |current| *current = fields)?;
                }
                collection.set_sync_state(&target, SyncState::Confirmed).map(|_| ())
            })
            .map_err(|err| self.reconciliation_failure(err))?;

        info!(resource = T::PATH, entity_id = %target, "Update confirmed");
        Ok(())
    }

    /// Remove the record and send a `DELETE`.
    pub async fn delete(&self, id: &EntityId) -> MutationResult<()> {
        let (target, server_id, _guard) = self.acquire(id).await?;

        let (record, index, next) = self
            .collection
            .write(|collection| {
                let (record, index) = collection.remove(&target)?;
                let next = collection.records().get(index).map(|record| record.id.clone());
                Ok::<_, CollectionError>((record, index, next))
            })
            .map_err(|_| MutationError::UnknownEntity(target.clone()))?;
        let intent = MutationIntent::delete(T::ENTITY_TYPE, record, index, next);
        info!(resource = T::PATH, entity_id = %target, index, "Optimistic delete applied");

        match self
            .pipeline
            .send(ApiRequest::delete(T::item_path(&server_id)))
            .await
        {
            Ok(_) => {
                info!(resource = T::PATH, entity_id = %target, "Delete confirmed");
                self.drop_reloaded(&target);
                Ok(())
            }
            Err(ApiError::Http { status: 404, .. }) => {
                info!(resource = T::PATH, entity_id = %target, "Delete confirmed, already gone");
                self.drop_reloaded(&target);
                Ok(())
            }
            Err(err) => Err(self.fail(intent, err)),
        }
    }

    /// Lock the record `id` refers to, following a local id to its server
    /// id once the create behind it has finished.
    async fn acquire(&self, id: &EntityId) -> MutationResult<(EntityId, ServerId, KeyedGuard<EntityId>)> {
        let server_id = match id {
            EntityId::Remote(server_id) => server_id.clone(),
            EntityId::Local(local) => {
                drop(self.locks.lock(id.clone()).await);
                let alias = self.resolve_alias(*local);
                match alias {
                    Some(server_id) => {
                        debug!(local_id = %id, server_id = %server_id, "Following create alias");
                        server_id
                    }
                    None => return Err(MutationError::UnknownEntity(id.clone())),
                }
            }
        };

        let target = EntityId::Remote(server_id.clone());
        let guard = self.locks.lock(target.clone()).await;
        if !self.collection.read(|collection| collection.contains(&target)) {
            return Err(MutationError::UnknownEntity(target));
        }
        Ok((target, server_id, guard))
    }

    /// Remove a deleted record that a reload brought back while the delete
    /// was in flight.
    fn drop_reloaded(&self, target: &EntityId) {
        let removed = self.collection.write(|collection| {
            collection.contains(target) && collection.remove(target).is_ok()
        });
        if removed {
            debug!(resource = T::PATH, entity_id = %target, "Dropped reloaded copy of deleted record");
        }
    }

    /// Roll back `intent` after the request failed, returning the request error.
    fn fail(&self, intent: MutationIntent<T>, err: ApiError) -> MutationError {
        let kind = intent.kind;
        let target = intent.target.clone();
        warn!(
            resource = T::PATH,
            entity_id = %target,
            kind = %kind,
            error = %err,
            "Mutation failed, rolling back"
        );

        if let Err(collection_err) = self.collection.write(|collection| intent.rollback(collection)) {
            self.reconciliation_failure(collection_err);
        }
        MutationError::Api(err)
    }

    fn reconciliation_failure(&self, err: CollectionError) -> MutationError {
        error!(resource = T::PATH, error = %err, "Collection reconciliation failed");
        debug_assert!(false, "collection reconciliation failed: {err}");
        MutationError::Reconciliation(err)
    }
}

fn decode_record<T: Resource>(response: &ApiResponse) -> Result<(ServerId, T), String> {
    let value = response
        .json_value()
        .ok_or_else(|| format!("{} response is not JSON", T::ENTITY_TYPE))?;
    parse_server_record::<T>(value)
}

fn merged_fields<T: Resource>(fields: &T, patch: &Value) -> MutationResult<T> {
    let mut value =
        serde_json::to_value(fields).map_err(|e| MutationError::InvalidPayload(e.to_string()))?;
    merge_patch(&mut value, patch);
    serde_json::from_value(value).map_err(|e| MutationError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;

    #[test]
    fn merged_fields_rejects_invalid_values() {
        let task = Task::new("Ship");
        let err = merged_fields(&task, &serde_json::json!({ "status": "bogus" })).unwrap_err();
        assert!(matches!(err, MutationError::InvalidPayload(_)));

        let merged = merged_fields(&task, &serde_json::json!({ "status": "completed" })).unwrap();
        assert_eq!(merged.status, crate::models::TaskStatus::Completed);
        assert_eq!(merged.title, "Ship");
    }
}
