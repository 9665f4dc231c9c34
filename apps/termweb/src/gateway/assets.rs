//! Embedded web assets.
//!
//! The client bundle is compiled into the binary; anything the build
//! drops into `assets/` is served from memory with a content type derived
//! from its extension. The index page additionally gets the runtime
//! config JSON spliced in at the marker.

pub const INDEX_HTML: &str = include_str!("../../assets/index.html");
pub const CONFIG_MARKER: &str = "__TERMWEB_CONFIG__";

pub struct Asset {
    pub path: &'static str,
    pub body: &'static [u8],
}

static ASSETS: &[Asset] = &[Asset {
    path: "/manifest.json",
    body: include_bytes!("../../assets/manifest.json"),
}];

pub fn lookup(path: &str) -> Option<&'static Asset> {
    ASSETS.iter().find(|asset| asset.path == path)
}

pub fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or("") {
        "html" => "text/html; charset=utf-8",
        "js" => "application/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "wasm" => "application/wasm",
        "ico" => "image/x-icon",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Index page with the config fragment injected at the marker.
pub fn render_index(config_json: &str) -> String {
    INDEX_HTML.replace(CONFIG_MARKER, config_json)
}
