use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::detector::DetectError;
use crate::models::ErrorResponse;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("malformed multipart body: {0}")]
    Multipart(String),
    #[error("field 'file' is required")]
    MissingFile,
    #[error("cannot identify image file: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("inference worker was cancelled")]
    Blocking,
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::Multipart(_) => StatusCode::BAD_REQUEST,
            PredictError::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
            PredictError::Decode(_) | PredictError::Detect(_) | PredictError::Blocking => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
