//! Media types a peer may announce in a GET response.

const IMAGE: &[&str] = &[
    "jpeg", "png", "gif", "svg+xml", "bmp", "tiff", "ico", "x-icon", "x-xbitmap", "x-xpixmap",
];

const AUDIO: &[&str] = &[
    "mpeg", "mp4", "ogg", "wav", "aac", "midi", "webm", "x-aac", "x-mpegurl", "x-realaudio",
];

const VIDEO: &[&str] = &["mp4", "ogg", "webm", "mpeg", "quicktime", "x-flv", "avi", "x-matroska"];

const APPLICATION: &[&str] = &[
    "json",
    "xml",
    "pdf",
    "zip",
    "x-gzip",
    "x-tar",
    "x-www-form-urlencoded",
    "x-shockwave-flash",
    "excel",
    "powerpoint",
    "word",
    "x-7z-compressed",
    "vnd.api+json",
    "x-html+ul",
    "x-protobuf",
    "x-bzip2",
    "x-xml-dtd",
    "x-xml-xsl",
];

const MULTIPART: &[&str] = &["form-data", "mixed", "alternative", "related"];

const TEXT: &[&str] = &["plain", "html", "css", "csv"];

/// Known subtypes for a top-level media family
pub fn subtypes(family: &str) -> Option<&'static [&'static str]> {
    match family {
        "image" => Some(IMAGE),
        "audio" => Some(AUDIO),
        "video" => Some(VIDEO),
        "application" => Some(APPLICATION),
        "multipart" => Some(MULTIPART),
        "text" => Some(TEXT),
        _ => None,
    }
}

/// Whether `content_type` (`family/subtype`, parameters ignored) is known
pub fn is_known(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    let Some((family, subtype)) = essence.split_once('/') else {
        return false;
    };

    subtypes(&family.to_ascii_lowercase())
        .map(|known| known.contains(&subtype.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
