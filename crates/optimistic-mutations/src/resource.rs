//! REST resources and the JSON shapes the server exchanges for them.

use entity_collection::{EntityRecord, ServerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record type served under `/{PATH}/`.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Path segment of the resource, e.g. `tasks`.
    const PATH: &'static str;

    /// Singular name used in logs.
    const ENTITY_TYPE: &'static str;

    fn collection_path() -> String {
        format!("/{}/", Self::PATH)
    }

    fn item_path(id: &ServerId) -> String {
        format!("/{}/{}/", Self::PATH, id)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListPayload {
    Bare(Vec<Value>),
    Paginated { results: Vec<Value> },
}

/// Split a server record into its id and typed fields.
///
/// The `id` key is taken out of the object before the fields are decoded, so
/// it never ends up in a model's catch-all map.
pub fn parse_server_record<T: Resource>(value: Value) -> Result<(ServerId, T), String> {
    let Value::Object(mut object) = value else {
        return Err(format!("expected a {} object", T::ENTITY_TYPE));
    };
    let id = object
        .remove("id")
        .ok_or_else(|| format!("{} has no id", T::ENTITY_TYPE))?;
    let id: ServerId = serde_json::from_value(id).map_err(|e| e.to_string())?;
    let fields: T = serde_json::from_value(Value::Object(object)).map_err(|e| e.to_string())?;
    Ok((id, fields))
}

/// Decode a list answer, bare array or `{ "results": [...] }`, into
/// confirmed records.
pub fn parse_list<T: Resource>(value: Value) -> Result<Vec<EntityRecord<T>>, String> {
    let items = match serde_json::from_value::<ListPayload>(value) {
        Ok(ListPayload::Bare(items)) | Ok(ListPayload::Paginated { results: items }) => items,
        Err(_) => return Err(format!("expected a list of {}", T::PATH)),
    };
    items
        .into_iter()
        .map(|item| parse_server_record::<T>(item).map(|(id, fields)| EntityRecord::confirmed(id, fields)))
        .collect()
}

/// Apply a JSON merge patch to `target`. `null` values remove keys; nested
/// objects merge recursively; anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(object) = target {
        for (key, value) in patch {
            if value.is_null() {
                object.remove(key);
            } else {
                merge_patch(object.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
