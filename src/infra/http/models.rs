use serde::{Deserialize, Serialize};

use crate::{application::render::RenderedImage, domain::ContentEncoding};

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub content: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BinaryConvertRequest {
    pub content: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub encoding: ContentEncoding,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VersionQuery {
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub image: String,
    pub format: &'static str,
}

impl From<&RenderedImage> for ConvertResponse {
    fn from(image: &RenderedImage) -> Self {
        Self {
            image: image.encode_base64(),
            format: RenderedImage::FORMAT,
        }
    }
}
