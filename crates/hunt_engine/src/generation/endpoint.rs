use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RemoteError;
use crate::geo::LatLng;
use crate::model::OwnerId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub owner_id: OwnerId,
    pub coordinates: LatLng,
}

/// Raw endpoint reply. `success: true` is only trusted once every circle
/// field is present and valid, see [`GenerationResponse::into_circle`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_number: Option<u32>,
    #[serde(
        rename = "errorMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratedCircle {
    pub center: LatLng,
    pub radius_km: f64,
    pub generation_number: u32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResponseError {
    #[error("endpoint reported failure: {0}")]
    Reported(String),
    #[error("success response is missing `{0}`")]
    Missing(&'static str),
    #[error("success response has invalid `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    #[error("response is not valid json at {path}: {message}")]
    Decode { path: String, message: String },
}

impl ResponseError {
    /// True when the endpoint claimed success but the payload cannot be used.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Reported(_))
    }
}

impl GenerationResponse {
    pub fn success(center: LatLng, radius_km: f64, generation_number: u32) -> Self {
        Self {
            success: true,
            lat: Some(center.lat),
            lng: Some(center.lng),
            radius_km: Some(radius_km),
            generation_number: Some(generation_number),
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ResponseError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
            let path = error.path().to_string();
            ResponseError::Decode {
                path: if path.is_empty() { ".".to_string() } else { path },
                message: error.into_inner().to_string(),
            }
        })
    }

    pub fn into_circle(self) -> Result<GeneratedCircle, ResponseError> {
        if !self.success {
            return Err(ResponseError::Reported(
                self.error_message
                    .unwrap_or_else(|| "no error message".to_string()),
            ));
        }
        let lat = self.lat.ok_or(ResponseError::Missing("lat"))?;
        let lng = self.lng.ok_or(ResponseError::Missing("lng"))?;
        let radius_km = self.radius_km.ok_or(ResponseError::Missing("radius_km"))?;
        let generation_number = self
            .generation_number
            .ok_or(ResponseError::Missing("generation_number"))?;

        let center = LatLng::new(lat, lng).map_err(|error| ResponseError::Invalid {
            field: "lat/lng",
            message: error.to_string(),
        })?;
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(ResponseError::Invalid {
                field: "radius_km",
                message: format!("expected a positive number, got {radius_km}"),
            });
        }
        if generation_number == 0 {
            return Err(ResponseError::Invalid {
                field: "generation_number",
                message: "generation numbers start at 1".to_string(),
            });
        }
        Ok(GeneratedCircle {
            center,
            radius_km,
            generation_number,
        })
    }
}

#[allow(async_fn_in_trait)]
pub trait GenerationEndpoint {
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GenerationResponse, RemoteError>;
}
