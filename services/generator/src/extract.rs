//! Request body extractor accepting JSON, urlencoded forms and multipart text fields

use axum::{
    Form, Json, async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Deserialize the body according to its `Content-Type`. Anything that is not
/// a form is treated as JSON.
pub struct FormOrJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            return Ok(Self(value));
        }

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            return text_fields(multipart).await.map(Self);
        }

        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Collect the text fields of a multipart body into `T`; file parts are skipped
async fn text_fields<T: DeserializeOwned>(mut multipart: Multipart) -> Result<T, ApiError> {
    let mut fields = Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() {
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        fields.insert(name, Value::String(text));
    }

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| ApiError::BadRequest(format!("Invalid form data: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    use crate::models::GenerateVideoRequest;

    async fn extract(content_type: &str, body: &str) -> Result<GenerateVideoRequest, ApiError> {
        let req = Request::builder()
            .method("POST")
            .uri("/generate-video/")
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap();

        FormOrJson::<GenerateVideoRequest>::from_request(req, &())
            .await
            .map(|FormOrJson(value)| value)
    }

    #[tokio::test]
    async fn test_json_body() {
        let req = extract(
            "application/json",
            r#"{"image_url":"/media/a.png","prompt":"zoom in"}"#,
        )
        .await
        .unwrap();
        assert_eq!(req.image_url, "/media/a.png");
        assert_eq!(req.prompt.as_deref(), Some("zoom in"));
    }

    #[tokio::test]
    async fn test_urlencoded_body() {
        let req = extract(
            "application/x-www-form-urlencoded",
            "image_url=%2Fmedia%2Fa.png&prompt=zoom+in",
        )
        .await
        .unwrap();
        assert_eq!(req.image_url, "/media/a.png");
        assert_eq!(req.prompt.as_deref(), Some("zoom in"));
    }

    #[tokio::test]
    async fn test_multipart_text_fields() {
        let body = "--b\r\nContent-Disposition: form-data; name=\"image_url\"\r\n\r\n/media/a.png\r\n\
                    --b\r\nContent-Disposition: form-data; name=\"attachment\"; filename=\"x.bin\"\r\n\r\nraw\r\n\
                    --b--\r\n";
        let req = extract("multipart/form-data; boundary=b", body).await.unwrap();
        assert_eq!(req.image_url, "/media/a.png");
        assert!(req.prompt.is_none());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let err = extract("application/json", "{not json").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
