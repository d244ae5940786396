//! List, create, update and delete commands shared by every resource.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::{Context as _, Result};
use entity_collection::{EntityId, EntityRecord, ServerId, SyncState};
use optimistic_mutations::{MutationError, OptimisticMutationController, Resource};
use request_pipeline::MultipartForm;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

fn controller<T: Resource>(ctx: &Context) -> Result<OptimisticMutationController<T>> {
    ctx.require_login()?;
    Ok(OptimisticMutationController::new(ctx.pipeline.clone()))
}

fn failed(err: MutationError) -> anyhow::Error {
    debug!(error = %err, "Mutation failed");
    anyhow::anyhow!(err.user_message())
}

/// List every record of `T`.
pub async fn list<T: Resource>(ctx: &Context, format: &OutputFormat) -> Result<()> {
    let controller = controller::<T>(ctx)?;
    controller.load().await.map_err(failed)?;
    let records = controller.snapshot();

    match format {
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No {} found", T::PATH);
                return Ok(());
            }
            println!("{:<12} {:<40} {}", "ID", "Title", "Status");
            output::print_divider(70);
            for record in &records {
                let row = record_json(record)?;
                println!(
                    "{:<12} {:<40} {}",
                    record.id.to_string(),
                    output::truncate(text_field(&row, "title"), 40),
                    text_field(&row, "status"),
                );
            }
        }
        OutputFormat::Json => {
            let rows = records
                .iter()
                .map(record_json)
                .collect::<Result<Vec<_>>>()?;
            output::print_json(&rows)?;
        }
    }

    Ok(())
}

/// Create a record from JSON fields, uploading `file` as multipart when given.
pub async fn create<T: Resource>(
    ctx: &Context,
    fields_json: &str,
    file: Option<&Path>,
    format: &OutputFormat,
) -> Result<()> {
    let fields_value: Value = serde_json::from_str(fields_json).context("--json is not valid JSON")?;
    let fields: T = serde_json::from_value(fields_value.clone())
        .with_context(|| format!("--json does not describe a {}", T::ENTITY_TYPE))?;

    let controller = controller::<T>(ctx)?;
    let id = match file {
        Some(path) => {
            let form = upload_form(&fields_value, path)?;
            controller.create_multipart(fields, form).await
        }
        None => controller.create(fields).await,
    }
    .map_err(failed)?;

    match format {
        OutputFormat::Text => println!("Created {} {}", T::ENTITY_TYPE, id),
        OutputFormat::Json => {
            let record = controller
                .collection()
                .read(|collection| collection.get(&EntityId::from(id.clone())).cloned());
            match record {
                Some(record) => output::print_json(&record_json(&record)?)?,
                None => output::print_json(&serde_json::json!({ "id": id }))?,
            }
        }
    }
    Ok(())
}

/// Apply a partial JSON update to record `id`.
pub async fn update<T: Resource>(
    ctx: &Context,
    id: &str,
    patch_json: &str,
    format: &OutputFormat,
) -> Result<()> {
    let patch: Value = serde_json::from_str(patch_json).context("--json is not valid JSON")?;
    let controller = controller::<T>(ctx)?;
    controller.load().await.map_err(failed)?;

    let target = EntityId::from(ServerId::from_string(id));
    controller.update(&target, patch).await.map_err(failed)?;

    output::print_success(&format!("Updated {} {}", T::ENTITY_TYPE, id), format);
    Ok(())
}

/// Delete record `id`.
pub async fn delete<T: Resource>(ctx: &Context, id: &str, format: &OutputFormat) -> Result<()> {
    let controller = controller::<T>(ctx)?;
    controller.load().await.map_err(failed)?;

    let target = EntityId::from(ServerId::from_string(id));
    controller.delete(&target).await.map_err(failed)?;

    output::print_success(&format!("Deleted {} {}", T::ENTITY_TYPE, id), format);
    Ok(())
}

/// Flatten a record into `{ "id": ..., ...fields }`, flagging records the
/// server has not confirmed.
fn record_json<T: Resource>(record: &EntityRecord<T>) -> Result<Value> {
    let mut row = Map::new();
    row.insert("id".to_string(), Value::String(record.id.to_string()));
    if let Value::Object(fields) = serde_json::to_value(&record.fields)? {
        row.extend(fields);
    }
    if record.sync_state != SyncState::Confirmed {
        row.insert("sync_state".to_string(), serde_json::to_value(record.sync_state)?);
    }
    Ok(Value::Object(row))
}

fn text_field<'a>(row: &'a Value, key: &str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or("-")
}

/// Multipart body: every top-level field as a text part, plus the file.
fn upload_form(fields: &Value, path: &Path) -> Result<MultipartForm> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();

    let mut form = MultipartForm::new();
    if let Value::Object(object) = fields {
        for (name, value) in object {
            let text = match value {
                Value::Null => continue,
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            form = form.text(name.clone(), text);
        }
    }
    Ok(form.file("file", file_name, None, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_collection::LocalId;
    use optimistic_mutations::Task;
    use request_pipeline::FormPart;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn record_json_flattens_fields() {
        let record = EntityRecord::confirmed(ServerId::from(5), Task::new("Ship"));
        assert_eq!(
            record_json(&record).unwrap(),
            json!({ "id": "5", "title": "Ship", "status": "todo" })
        );

        let pending = EntityRecord::pending_local(LocalId::next(), Task::new("Draft"));
        let row = record_json(&pending).unwrap();
        assert_eq!(row["sync_state"], "pending");
        assert!(row["id"].as_str().unwrap().starts_with("tmp-"));
    }

    #[test]
    fn upload_form_carries_fields_and_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.4").unwrap();

        let form = upload_form(
            &json!({ "title": "Spec", "category": null, "pages": 3 }),
            file.path(),
        )
        .unwrap();

        let parts = form.parts();
        assert_eq!(parts.len(), 3);
        assert!(parts.contains(&FormPart::Text {
            name: "title".to_string(),
            value: "Spec".to_string(),
        }));
        assert!(parts.contains(&FormPart::Text {
            name: "pages".to_string(),
            value: "3".to_string(),
        }));
        assert!(matches!(
            parts.last(),
            Some(FormPart::File { name, bytes, .. }) if name == "file" && bytes == b"%PDF-1.4"
        ));
    }

    #[test]
    fn text_field_falls_back_to_dash() {
        let row = json!({ "title": "Ship" });
        assert_eq!(text_field(&row, "title"), "Ship");
        assert_eq!(text_field(&row, "status"), "-");
    }
}
