//! Uploads and image processing.
//!
//! [`FormPayload`] accepts either a JSON body or a multipart form, so the
//! same endpoint can take plain field updates and file uploads. Uploaded
//! images are cropped to a fixed size, re-encoded as JPEG and written below
//! the public directory.

use std::path::{Path, PathBuf};

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::header,
    Json,
};
use chrono::Utc;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType};
use serde::de::value::MapDeserializer;
use serde::de::{DeserializeOwned, Deserializer, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;
use serde_json::{Map, Value};

use crate::errors::AppError;

pub const NOT_AN_IMAGE: &str = "Not an image! Please upload only images.";
pub const JPEG_QUALITY: u8 = 90;
pub const USER_PHOTO_SIZE: (u32, u32) = (500, 500);
pub const TOUR_IMAGE_SIZE: (u32, u32) = (2000, 1333);
pub const MAX_TOUR_IMAGES: usize = 3;

/// An uploaded file held in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Form field the file was sent under
    pub field: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Request body that is either JSON or `multipart/form-data`.
#[derive(Debug, Default)]
pub struct FormPayload {
    /// Fields of a JSON body
    pub fields: Map<String, Value>,
    /// Text fields of a multipart form, as sent
    pub texts: Vec<(String, String)>,
    pub files: Vec<UploadedFile>,
}

impl FormPayload {
    /// Deserialize the non-file fields.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        if self.texts.is_empty() {
            return Ok(serde_json::from_value(Value::Object(self.fields.clone()))?);
        }
        let texts = self
            .texts
            .iter()
            .map(|(name, text)| (name.as_str(), FieldText(text.clone())));
        Ok(T::deserialize(MapDeserializer::<_, serde_json::Error>::new(texts))?)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name) || self.texts.iter().any(|(field, _)| field == name)
    }

    /// Files sent under `field`.
    pub fn files_named<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a UploadedFile> + 'a {
        self.files.iter().filter(move |f| f.field == field)
    }
}

/// A multipart text field. Read verbatim wherever a string is expected;
/// numbers, booleans and arrays are recovered from their JSON spelling.
struct FieldText(String);

impl FieldText {
    fn typed(&self) -> Option<Value> {
        serde_json::from_str::<Value>(&self.0)
            .ok()
            .filter(|value| !value.is_string() && !value.is_null())
    }
}

impl<'de> Deserializer<'de> for FieldText {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.typed() {
            Some(value) => value.deserialize_any(visitor),
            None => visitor.visit_string(self.0),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.0)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.0)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_some(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_enum(self.0.into_deserializer())
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char bytes byte_buf
        unit unit_struct newtype_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

impl<'de> IntoDeserializer<'de, serde_json::Error> for FieldText {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

impl<S: Send + Sync> FromRequest<S> for FormPayload {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("multipart/form-data"));

        if !is_multipart {
            let Json(value) = Json::<Value>::from_request(req, state).await?;
            return match value {
                Value::Object(fields) => Ok(FormPayload {
                    fields,
                    ..FormPayload::default()
                }),
                _ => Err(AppError::BadRequest(
                    "Request body must be a JSON object".to_string(),
                )),
            };
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        let mut payload = FormPayload::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if field.file_name().is_some() {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    payload.files.push(UploadedFile {
                        field: name,
                        content_type,
                        bytes,
                    });
                }
            } else {
                let text = field.text().await?;
                payload.texts.push((name, text));
            }
        }
        Ok(payload)
    }
}

/// Reject anything that does not claim to be an image.
pub fn ensure_image(file: &UploadedFile) -> Result<(), AppError> {
    if file.content_type.starts_with("image/") {
        Ok(())
    } else {
        Err(AppError::BadRequest(NOT_AN_IMAGE.to_string()))
    }
}

/// Cover-crop to `width`x`height` and encode as JPEG, on the blocking pool.
pub async fn resize_to_jpeg(bytes: Bytes, width: u32, height: u32) -> Result<Vec<u8>, AppError> {
    tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&bytes)
            .map_err(|_| AppError::BadRequest(NOT_AN_IMAGE.to_string()))?;
        let resized = image
            .resize_to_fill(width, height, FilterType::Lanczos3)
            .to_rgb8();

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
            .encode_image(&resized)
            .map_err(|e| AppError::Internal(format!("Failed to encode image: {}", e)))?;
        Ok(out)
    })
    .await?
}

/// Writes processed images below `<public>/img`.
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(public_dir: &Path) -> Self {
        Self {
            root: public_dir.join("img"),
        }
    }

    pub fn users_dir(&self) -> PathBuf {
        self.root.join("users")
    }

    pub fn tours_dir(&self) -> PathBuf {
        self.root.join("tours")
    }

    /// Store a profile photo, returning its file name.
    pub async fn save_user_photo(
        &self,
        user_id: &str,
        file: &UploadedFile,
    ) -> Result<String, AppError> {
        ensure_image(file)?;
        let (width, height) = USER_PHOTO_SIZE;
        let jpeg = resize_to_jpeg(file.bytes.clone(), width, height).await?;

        let filename = format!("user-{}-{}.jpeg", user_id, Utc::now().timestamp_millis());
        self.write(self.users_dir(), &filename, jpeg).await?;
        Ok(filename)
    }

    /// Store one tour image; `suffix` is `cover` or the image's position.
    pub async fn save_tour_image(
        &self,
        tour_id: &str,
        file: &UploadedFile,
        suffix: &str,
    ) -> Result<String, AppError> {
        ensure_image(file)?;
        let (width, height) = TOUR_IMAGE_SIZE;
        let jpeg = resize_to_jpeg(file.bytes.clone(), width, height).await?;

        let filename = format!(
            "tour-{}-{}-{}.jpeg",
            tour_id,
            Utc::now().timestamp_millis(),
            suffix
        );
        self.write(self.tours_dir(), &filename, jpeg).await?;
        Ok(filename)
    }

    async fn write(&self, dir: PathBuf, filename: &str, bytes: Vec<u8>) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(filename), bytes).await?;
        tracing::debug!("Stored image {}", filename);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png(width: u32, height: u32) -> Bytes {
        let image = RgbImage::from_pixel(width, height, Rgb([30, 120, 200]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        Bytes::from(out.into_inner())
    }

    fn upload(field: &str, content_type: &str, bytes: Bytes) -> UploadedFile {
        UploadedFile {
            field: field.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }

    fn texts(pairs: &[(&str, &str)]) -> FormPayload {
        FormPayload {
            texts: pairs
                .iter()
                .map(|(name, text)| (name.to_string(), text.to_string()))
                .collect(),
            ..FormPayload::default()
        }
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Fields {
        name: Option<String>,
        price: Option<f64>,
        secret_tour: Option<bool>,
        images: Option<Vec<String>>,
    }

    #[test]
    fn test_multipart_text_recovers_types() {
        let fields: Fields = texts(&[
            ("name", "The Park Camper"),
            ("price", "497"),
            ("secretTour", "true"),
            ("images", r#"["a.jpg","b.jpg"]"#),
        ])
        .deserialize()
        .unwrap();
        assert_eq!(fields.name.as_deref(), Some("The Park Camper"));
        assert_eq!(fields.price, Some(497.0));
        assert_eq!(fields.secret_tour, Some(true));
        assert_eq!(fields.images.unwrap(), vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn test_numeric_text_stays_a_string() {
        let fields: Fields = texts(&[("name", "1234567890")]).deserialize().unwrap();
        assert_eq!(fields.name.as_deref(), Some("1234567890"));

        let fields: Fields = texts(&[("name", "null")]).deserialize().unwrap();
        assert_eq!(fields.name.as_deref(), Some("null"));
        assert!(texts(&[("price", "abc")]).deserialize::<Fields>().is_err());
    }

    #[test]
    fn test_non_images_are_refused() {
        let file = upload("photo", "text/plain", Bytes::from_static(b"hello"));
        assert_eq!(ensure_image(&file).unwrap_err().message(), NOT_AN_IMAGE);
    }

    #[tokio::test]
    async fn test_resize_produces_jpeg_of_requested_size() {
        let jpeg = resize_to_jpeg(png(800, 300), 500, 500).await.unwrap();
        let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (500, 500));
    }

    #[tokio::test]
    async fn test_corrupt_image_is_refused() {
        let err = resize_to_jpeg(Bytes::from_static(b"\x89PNG garbage"), 10, 10)
            .await
            .unwrap_err();
        assert_eq!(err.message(), NOT_AN_IMAGE);
    }

    #[tokio::test]
    async fn test_user_photo_is_written() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path());
        let name = store
            .save_user_photo("abc", &upload("photo", "image/png", png(64, 64)))
            .await
            .unwrap();

        assert!(name.starts_with("user-abc-"));
        assert!(name.ends_with(".jpeg"));
        assert!(store.users_dir().join(&name).exists());
    }
}
