//! Request DTOs for the file cache API
//!
//! Path parameters of the thumbnail routes.

use serde::Deserialize;

/// Path of `GET /thumbs/:size/:name`
#[derive(Debug, Clone, Deserialize)]
pub struct SquareThumbParams {
    /// Size in steps, clamped to the configured bounds
    pub size: String,
    /// Image file name below the root
    pub name: String,
}

/// Path of `GET /thumbs/:size/:height/:crop/:name`. The first segment is
/// named `size` in the route so both thumbnail routes share it.
#[derive(Debug, Clone, Deserialize)]
pub struct BoxThumbParams {
    #[serde(rename = "size")]
    pub width: String,
    pub height: String,
    /// `"1"` fills and crops, anything else fits
    pub crop: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_params_deserialize() {
        let json = r#"{"size": "4", "name": "cat.png"}"#;
        let params: SquareThumbParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.size, "4");
        assert_eq!(params.name, "cat.png");
    }

    #[test]
    fn test_box_params_read_size_as_width() {
        let json = r#"{"size": "4", "height": "3", "crop": "1", "name": "cat.png"}"#;
        let params: BoxThumbParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.width, "4");
        assert_eq!(params.height, "3");
        assert_eq!(params.crop, "1");
    }
}
