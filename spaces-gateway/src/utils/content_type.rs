use mime::Mime;

/// Content type for an object, chosen from its file extension
pub fn content_type_for(filename: &str) -> Mime {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => mime::TEXT_HTML,
        "css" => mime::TEXT_CSS,
        "js" => mime::APPLICATION_JAVASCRIPT,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "svg" => mime::IMAGE_SVG,
        "json" => mime::APPLICATION_JSON,
        "pdf" => mime::APPLICATION_PDF,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}
