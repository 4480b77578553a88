/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::path::Path;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type served by the edge for a webroot file, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "htm" | "html" => "text/html",
        "xml" => "application/xml",
        "xht" | "xhtml" => "text/xhtml+xml",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" | "text" | "md" | "markdown" | "textile" => "text/plain",

        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "webp" => "image/webp",

        "eot" => "application/vnd.ms-fontobject",
        "woff" => "application/font-woff",
        "woff2" => "application/font-woff2",
        "otf" => "application/x-font-opentype",
        "ttf" => "application/x-font-truetype",

        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "f4a" | "f4b" => "audio/mp4",

        "mpeg" | "mpg" => "video/mpeg",
        "mp4" | "f4v" | "f4p" => "video/mp4",
        "mov" => "video/quicktime",
        "ogv" => "video/ogg",
        "avi" => "video/msvideo",
        "webm" => "video/webm",
        "m3u8" => "application/vnd.apple.mpegurl",
        "flv" => "video/x-flv",

        "swf" => "application/x-shockwave-flash",
        "jar" => "application/java-archive",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
