use crate::models::{FinalImage, GeneratedCopy, ProductRecord, StorageObject};
use crate::pipeline::PipelineError;
use crate::pipeline::input::mime_for_extension;
use crate::store::{ObjectStore, ProductTable};
use chrono::Utc;
use once_cell::sync::Lazy;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

pub(crate) const UPLOAD_STAGE: &str = "upload_image";
pub(crate) const INSERT_STAGE: &str = "insert_product";

const SUFFIX_LEN: u32 = 6;
const SUFFIX_SPACE: u64 = 26u64.pow(SUFFIX_LEN);
// Prime, so co-prime with 26^6: successive suffixes never repeat within SUFFIX_SPACE draws.
const SUFFIX_STRIDE: u64 = 104_729;

struct SuffixSequence {
    origin: u64,
    next: AtomicU64,
}

static SUFFIXES: Lazy<SuffixSequence> = Lazy::new(|| SuffixSequence {
    origin: rand::rng().random_range(0..SUFFIX_SPACE),
    next: AtomicU64::new(0),
});

fn next_suffix() -> String {
    let step = SUFFIXES.next.fetch_add(1, Ordering::Relaxed) % SUFFIX_SPACE;
    let mut value = (SUFFIXES.origin + step * SUFFIX_STRIDE) % SUFFIX_SPACE;
    let mut letters = [b'a'; SUFFIX_LEN as usize];
    for slot in letters.iter_mut().rev() {
        *slot = b'a' + (value % 26) as u8;
        value /= 26;
    }
    letters.iter().map(|&b| b as char).collect()
}

/// Maps an extension onto the set the storefront serves, defaulting to `jpg`.
pub fn normalize_extension(extension: &str) -> &'static str {
    match extension.trim().to_lowercase().as_str() {
        "jpeg" => "jpeg",
        "png" => "png",
        "webp" => "webp",
        _ => "jpg",
    }
}

pub fn storage_key(unix_seconds: i64, suffix: &str, extension: &str) -> String {
    format!("{unix_seconds}-{suffix}.{extension}")
}

/// `{unix_seconds}-{6 lowercase letters}.{ext}`
pub fn generate_storage_key(extension: &str) -> String {
    storage_key(
        Utc::now().timestamp(),
        &next_suffix(),
        normalize_extension(extension),
    )
}

/// The image's own MIME type wins over the one implied by the key extension.
fn content_type_for<'a>(mime_type: &'a str, extension: &str) -> &'a str {
    if mime_type.starts_with("image/") {
        mime_type
    } else {
        mime_for_extension(extension)
    }
}

pub async fn upload(
    objects: &dyn ObjectStore,
    bucket: &str,
    image: FinalImage,
) -> Result<StorageObject, PipelineError> {
    let extension = normalize_extension(&image.extension);
    let key = generate_storage_key(extension);
    let content_type = content_type_for(&image.mime_type, extension);
    objects
        .upload(bucket, &key, image.bytes, content_type)
        .await
        .map_err(|err| PipelineError::upload(UPLOAD_STAGE, format!("{key}: {err}")))?;
    let public_url = objects.public_url(bucket, &key);
    Ok(StorageObject { key, public_url })
}

pub async fn insert(
    products: &dyn ProductTable,
    table: &str,
    copy: &GeneratedCopy,
    object: &StorageObject,
) -> Result<ProductRecord, PipelineError> {
    let record = ProductRecord::seeded(
        copy.title.clone(),
        copy.description.clone(),
        copy.tag.clone(),
        object.public_url.clone(),
    );
    if let Err(err) = products.insert(table, &record).await {
        // The uploaded object is not removed.
        error!(
            target = "vitrine.supabase",
            key = %object.key,
            error = %err,
            "product_insert_failed_object_orphaned"
        );
        return Err(PipelineError::database(
            INSERT_STAGE,
            format!("{err} (uploaded object {} left in storage)", object.key),
        ));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineErrorKind;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn matches_key_shape(key: &str, extension: &str) -> bool {
        let Some((stem, ext)) = key.rsplit_once('.') else {
            return false;
        };
        let Some((digits, letters)) = stem.split_once('-') else {
            return false;
        };
        ext == extension
            && !digits.is_empty()
            && digits.chars().all(|c| c.is_ascii_digit())
            && letters.len() == 6
            && letters.chars().all(|c| c.is_ascii_lowercase())
    }

    #[test]
    fn key_has_timestamp_letters_and_extension() {
        let key = generate_storage_key("PNG");
        assert!(matches_key_shape(&key, "png"), "unexpected key {key}");
        let fallback = generate_storage_key("heic");
        assert!(matches_key_shape(&fallback, "jpg"), "unexpected key {fallback}");
    }

    #[test]
    fn keys_never_collide_across_concurrent_callers() {
        let keys = Mutex::new(HashSet::new());
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let batch: Vec<String> =
                        (0..1250).map(|_| generate_storage_key("jpg")).collect();
                    keys.lock().unwrap().extend(batch);
                });
            }
        });
        assert_eq!(keys.into_inner().unwrap().len(), 10_000);
    }

    #[test]
    fn unknown_extensions_default_to_jpg() {
        assert_eq!(normalize_extension("JPG"), "jpg");
        assert_eq!(normalize_extension("jpeg"), "jpeg");
        assert_eq!(normalize_extension("webp"), "webp");
        assert_eq!(normalize_extension("gif"), "jpg");
        assert_eq!(normalize_extension(""), "jpg");
    }

    #[derive(Default)]
    struct MemoryStore {
        uploads: Mutex<Vec<(String, String, Vec<u8>, String)>>,
        rows: Mutex<Vec<ProductRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn upload(
            &self,
            bucket: &str,
            key: &str,
            bytes: Vec<u8>,
            content_type: &str,
        ) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Status {
                    status: 413,
                    body: "Payload too large".into(),
                });
            }
            self.uploads.lock().unwrap().push((
                bucket.into(),
                key.into(),
                bytes,
                content_type.into(),
            ));
            Ok(())
        }

        fn public_url(&self, bucket: &str, key: &str) -> String {
            format!("https://cdn.test/{bucket}/{key}")
        }
    }

    #[async_trait]
    impl ProductTable for MemoryStore {
        async fn insert(&self, _table: &str, record: &ProductRecord) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Request("connection closed".into()));
            }
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn image(extension: &str) -> FinalImage {
        FinalImage {
            bytes: b"pixels".to_vec(),
            extension: extension.into(),
            mime_type: "image/png".into(),
        }
    }

    #[tokio::test]
    async fn upload_stores_bytes_under_generated_key() {
        let store = MemoryStore::default();
        let object = upload(&store, "product-images", image("png")).await.expect("upload");
        let uploads = store.uploads.lock().unwrap();
        let (bucket, key, bytes, content_type) = &uploads[0];
        assert_eq!(bucket, "product-images");
        assert_eq!(key, &object.key);
        assert_eq!(bytes, b"pixels");
        assert_eq!(content_type, "image/png");
        assert_eq!(object.public_url, format!("https://cdn.test/product-images/{key}"));
    }

    #[tokio::test]
    async fn upload_keeps_mime_type_of_unlisted_formats() {
        let store = MemoryStore::default();
        let gif = FinalImage {
            bytes: b"GIF89a".to_vec(),
            extension: "jpeg".into(),
            mime_type: "image/gif".into(),
        };
        let object = upload(&store, "product-images", gif).await.expect("upload");
        let uploads = store.uploads.lock().unwrap();
        assert!(object.key.ends_with(".jpeg"));
        assert_eq!(uploads[0].3, "image/gif");
    }

    #[test]
    fn missing_mime_type_falls_back_to_extension() {
        assert_eq!(content_type_for("", "png"), "image/png");
        assert_eq!(content_type_for("application/octet-stream", "jpg"), "image/jpeg");
        assert_eq!(content_type_for("image/webp", "jpg"), "image/webp");
    }

    #[tokio::test]
    async fn upload_failure_is_an_upload_error() {
        let store = MemoryStore {
            fail: true,
            ..MemoryStore::default()
        };
        let err = upload(&store, "product-images", image("jpg"))
            .await
            .expect_err("too large");
        assert_eq!(err.kind(), PipelineErrorKind::Upload);
        assert_eq!(err.stage(), UPLOAD_STAGE);
    }

    #[tokio::test]
    async fn insert_failure_names_orphaned_object() {
        let store = MemoryStore {
            fail: true,
            ..MemoryStore::default()
        };
        let copy = GeneratedCopy {
            title: "Lamp".into(),
            description: "Warm desk lamp".into(),
            tag: "Home".into(),
            image_quality: Default::default(),
        };
        let object = StorageObject {
            key: "1700000000-qwerty.jpg".into(),
            public_url: "https://cdn.test/x".into(),
        };
        let err = insert(&store, "products", &copy, &object)
            .await
            .expect_err("db down");
        assert_eq!(err.kind(), PipelineErrorKind::Database);
        assert!(err.detail().contains("1700000000-qwerty.jpg"));
    }
}
