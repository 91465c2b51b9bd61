//! Media steps: step content stored in object storage.
//!
//! A media step's `content` is the object key. The object is written before
//! the step row and removed after the last step referencing it is deleted, so
//! a visible step never points at a missing object.

use tracing::{debug, info, warn};
use uuid::Uuid;

use stratum_core::defaults::MAX_UPLOAD_SIZE_BYTES;
use stratum_core::{
    CreateStepRequest, Error, ObjectStore, Result, Step, StepContentType, StepRepository,
};

/// Reduce a client-supplied file name to a safe single path segment.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Object key for a media step: `tasks/{task_id}/{uuid}-{file_name}`.
pub fn media_object_key(task_id: Uuid, file_name: &str) -> String {
    format!(
        "tasks/{}/{}-{}",
        task_id,
        Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}

/// Upload `data` and append (or insert at `order`) a media step referencing it.
#[allow(clippy::too_many_arguments)]
pub async fn add_media_step(
    steps: &dyn StepRepository,
    objects: &dyn ObjectStore,
    tenant_id: Uuid,
    task_id: Uuid,
    content_type: StepContentType,
    order: Option<i32>,
    file_name: &str,
    data: &[u8],
) -> Result<Step> {
    if !content_type.is_media() {
        return Err(Error::InvalidInput(format!(
            "media steps must be image or video, got {}",
            content_type
        )));
    }
    if data.is_empty() {
        return Err(Error::InvalidInput("media upload is empty".to_string()));
    }
    if data.len() > MAX_UPLOAD_SIZE_BYTES {
        return Err(Error::InvalidInput(format!(
            "media upload exceeds {} bytes",
            MAX_UPLOAD_SIZE_BYTES
        )));
    }

    let key = media_object_key(task_id, file_name);
    objects.put(&key, data).await?;

    let req = CreateStepRequest {
        order,
        content_type,
        content: key.clone(),
    };
    match steps.add(tenant_id, task_id, req).await {
        Ok(step) => {
            info!(
                subsystem = "db",
                component = "media",
                op = "add_media_step",
                task_id = %task_id,
                key = %key,
                size = data.len(),
                "Media step stored"
            );
            Ok(step)
        }
        Err(e) => {
            if let Err(cleanup) = objects.delete(&key).await {
                warn!(key = %key, error = %cleanup, "media: orphaned object after failed step insert");
            }
            Err(e)
        }
    }
}

/// Delete a step; for media steps also remove the stored object once no
/// other step of the tenant still references it.
pub async fn delete_step(
    steps: &dyn StepRepository,
    objects: Option<&dyn ObjectStore>,
    tenant_id: Uuid,
    task_id: Uuid,
    step_id: Uuid,
) -> Result<Step> {
    let removed = steps.delete(tenant_id, task_id, step_id).await?;
    if !removed.content_type.is_media() {
        return Ok(removed);
    }

    let Some(objects) = objects else {
        warn!(
            subsystem = "db",
            component = "media",
            op = "delete_step",
            key = %removed.content,
            "No object store configured; media object left in place"
        );
        return Ok(removed);
    };

    match steps.count_with_content(tenant_id, &removed.content).await {
        Ok(0) => {
            if let Err(e) = objects.delete(&removed.content).await {
                warn!(
                    subsystem = "db",
                    component = "media",
                    op = "delete_step",
                    key = %removed.content,
                    error = %e,
                    "Step removed but its object could not be deleted"
                );
            }
        }
        Ok(remaining) => debug!(
            subsystem = "db",
            component = "media",
            op = "delete_step",
            key = %removed.content,
            remaining,
            "Media object still referenced by other steps"
        ),
        Err(e) => warn!(
            subsystem = "db",
            component = "media",
            op = "delete_step",
            key = %removed.content,
            error = %e,
            "Could not count references; media object left in place"
        ),
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::object_storage::FilesystemObjectStore;
    use stratum_core::{CreateTaskRequest, TaskRepository};

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("photo.png"), "photo.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\tmp\\my clip.mp4"), "my_clip.mp4");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[test]
    fn test_media_object_key_layout() {
        let task_id = Uuid::new_v4();
        let key = media_object_key(task_id, "a b.jpg");
        assert!(key.starts_with(&format!("tasks/{}/", task_id)));
        assert!(key.ends_with("-a_b.jpg"));
    }

    #[tokio::test]
    async fn test_media_step_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let objects = FilesystemObjectStore::new(dir.path());
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let task_id = TaskRepository::insert(
            &store,
            tenant,
            Uuid::new_v4(),
            CreateTaskRequest {
                title: "Inspect".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let step = add_media_step(
            &store,
            &objects,
            tenant,
            task_id,
            StepContentType::Image,
            None,
            "crack.png",
            b"\x89PNG",
        )
        .await
        .unwrap();
        assert_eq!(step.order, 0);
        assert!(objects.exists(&step.content).await.unwrap());

        let removed = delete_step(&store, Some(&objects), tenant, task_id, step.id)
            .await
            .unwrap();
        assert_eq!(removed.id, step.id);
        assert!(!objects.exists(&step.content).await.unwrap());
    }

    #[tokio::test]
    async fn test_shared_media_object_survives_until_last_step() {
        let dir = tempfile::tempdir().unwrap();
        let objects = FilesystemObjectStore::new(dir.path());
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let mut task_ids = Vec::new();
        for title in ["Inspect roof", "Inspect roof (next)"] {
            let id = TaskRepository::insert(
                &store,
                tenant,
                Uuid::new_v4(),
                CreateTaskRequest {
                    title: title.into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            task_ids.push(id);
        }

        let original = add_media_step(
            &store,
            &objects,
            tenant,
            task_ids[0],
            StepContentType::Image,
            None,
            "roof.png",
            b"\x89PNG",
        )
        .await
        .unwrap();
        // A recurring instance carries the same key.
        let copy = StepRepository::add(
            &store,
            tenant,
            task_ids[1],
            CreateStepRequest {
                order: None,
                content_type: StepContentType::Image,
                content: original.content.clone(),
            },
        )
        .await
        .unwrap();

        delete_step(&store, Some(&objects), tenant, task_ids[1], copy.id)
            .await
            .unwrap();
        assert!(objects.exists(&original.content).await.unwrap());

        delete_step(&store, Some(&objects), tenant, task_ids[0], original.id)
            .await
            .unwrap();
        assert!(!objects.exists(&original.content).await.unwrap());
    }

    #[tokio::test]
    async fn test_media_step_rejects_text_and_cleans_up_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let objects = FilesystemObjectStore::new(dir.path());
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();

        let err = add_media_step(
            &store,
            &objects,
            tenant,
            Uuid::new_v4(),
            StepContentType::Text,
            None,
            "a.txt",
            b"x",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // Unknown task: the object is written, the step insert fails, the object is removed.
        let err = add_media_step(
            &store,
            &objects,
            tenant,
            Uuid::new_v4(),
            StepContentType::Video,
            None,
            "clip.mp4",
            b"data",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(_)));
        let leftovers = walk(dir.path());
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                files.extend(walk(&path));
            } else {
                files.push(path);
            }
        }
        files
    }
}
