use std::path::Path;

use crate::error::EncodingError;
use crate::models::{EncodedPayload, ImageAsset};

impl ImageAsset {
    /**
     * \brief 异步读取图片文件，按文件头识别 MIME 类型。
     */
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, EncodingError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| EncodingError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let mime_type = sniff_image_mime(&bytes)?;
        Ok(Self {
            bytes,
            mime_type,
            preview: path.to_path_buf(),
        })
    }
}

/**
 * \brief 将图片编码为可传输的 base64 载荷。相同字节总是得到相同输出。
 */
pub async fn encode(asset: &ImageAsset) -> Result<EncodedPayload, EncodingError> {
    if asset.bytes.is_empty() {
        return Err(EncodingError::Empty);
    }
    if !asset.mime_type.starts_with("image/") {
        return Err(EncodingError::UnsupportedType(asset.mime_type.clone()));
    }
    Ok(EncodedPayload::from_bytes(&asset.mime_type, &asset.bytes))
}

fn sniff_image_mime(bytes: &[u8]) -> Result<String, EncodingError> {
    if bytes.is_empty() {
        return Err(EncodingError::Empty);
    }
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {
            Ok(kind.mime_type().to_string())
        }
        Some(kind) => Err(EncodingError::UnsupportedType(kind.mime_type().to_string())),
        None => Err(EncodingError::UnsupportedType("unknown".to_string())),
    }
}
